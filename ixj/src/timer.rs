//! The periodic card tick and the thread that drives it.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, select, tick, Sender};
use ixj_pac::register::SlicState;
use log::{debug, info, trace, warn};

use crate::board::Board;
use crate::callerid::{CidKind, CidPhase, ACK_WAIT_MS};
use crate::card::{Card, CardCore};
use crate::clock::Tick;
use crate::error::Result;
use crate::event::PhoneEvent;
use crate::hook::Port;

impl Card {
    /// One timer period of card work. Returns `false` when the tick was
    /// skipped because an operation held the card.
    ///
    /// A failing step is logged and the rest of the tick still runs; the
    /// next tick retries.
    pub fn tick(&self) -> bool {
        let Some(mut guard) = self.core.try_enter() else {
            trace!("card busy; tick skipped");
            return false;
        };
        let core = &mut *guard;
        let board = &self.board;
        let now = board.now();

        if let Err(e) = core.update_hookstate(board, now) {
            warn!("hookstate: {e}");
        }
        if let Err(e) = core.advance_tone(board, now) {
            warn!("tone: {e}");
        }
        if let Err(e) = core.service_audio(board, now) {
            warn!("audio: {e}");
        }

        if core.ring.is_active() {
            let step = core.ring.advance(now, core.hookstate.off_hook(), core.cid.is_playing());
            if step.finished {
                debug!("ringing over");
            }
            if let Err(e) = core.apply_ring_step(board, step) {
                warn!("ring: {e}");
            }
        } else if let Err(e) = core.monitor(board, now) {
            warn!("monitor: {e}");
        }

        if board.kind.has_pstn() {
            let bridged = core.pots_pstn && core.hookstate.off_hook();
            if let Err(e) = core.daa.poll(board, &mut core.pld, now, bridged, &mut core.events) {
                warn!("DAA: {e}");
            }
        }

        core.events.deliver();
        true
    }
}

impl CardCore {
    fn update_hookstate(&mut self, board: &Board, now: Tick) -> Result<()> {
        let ctx = self.hook_context();
        let bits = self.hook.read(board, &mut self.pld, &ctx, now, &mut self.events)?;
        if bits.off_hook() != self.hookstate.off_hook() {
            debug!("{}", if bits.off_hook() { "off-hook" } else { "on-hook" });
            self.events.raise(PhoneEvent::Hookstate(bits.off_hook()));
        }
        self.hookstate = bits;
        Ok(())
    }

    fn advance_tone(&mut self, board: &Board, now: Tick) -> Result<()> {
        if let Some(command) = self.tone.advance(now) {
            command.apply(board)?;
        }
        if self.cid.phase == CidPhase::Alerting && !self.tone.is_playing() {
            let deadline = now.offset(board.ticks_from_ms(ACK_WAIT_MS));
            self.cid.phase = CidPhase::AwaitingAck(deadline);
        }
        Ok(())
    }

    fn service_audio(&mut self, board: &Board, now: Tick) -> Result<()> {
        self.restore_audio(board)?;

        let fsk = if self.cid.is_playing() { Some(&mut self.fsk) } else { None };
        let digits = self.audio.service(board, fsk)?;
        for &digit in &digits {
            self.events.raise(PhoneEvent::Dtmf(digit));
        }

        match self.cid.phase {
            CidPhase::AwaitingAck(deadline) => {
                if digits.iter().any(|&d| d == 'A' || d == 'D') {
                    info!("Caller-ID acknowledged");
                    if let Some(caller_id) = self.cid.pending.take() {
                        caller_id.render(&mut self.fsk, CidKind::Waiting);
                    }
                    self.cid.phase = CidPhase::Playing(CidKind::Waiting);
                } else if now.is_after(deadline) {
                    info!("no Caller-ID acknowledgment");
                    self.finish_caller_id(board, false)?;
                }
            }
            CidPhase::Playing(kind) => {
                let picked_up = kind == CidKind::OnHook && self.hookstate.off_hook();
                if self.fsk.is_drained() || picked_up {
                    self.finish_caller_id(board, true)?;
                }
            }
            CidPhase::Idle | CidPhase::Alerting | CidPhase::Restoring(_) => {}
        }
        Ok(())
    }

    /// Idle-line work: keep the SLIC in step with the hookswitch and sample
    /// the tone filters once per DSP frame.
    fn monitor(&mut self, board: &Board, now: Tick) -> Result<()> {
        if self.port == Port::Pots && !self.pots_pstn && self.cid.is_idle() {
            match (self.hookstate.off_hook(), board.slic_state()) {
                (true, Some(state)) if state != SlicState::Active => {
                    self.pld.set_slic_state(board, SlicState::Active);
                }
                (false, Some(SlicState::Active)) => {
                    self.pld.set_slic_state(board, SlicState::Standby);
                }
                _ => {}
            }
        }

        if !self.filters.iter().any(|f| f.is_active()) {
            return Ok(());
        }
        let frame = board.dsp.frame_count()?;
        if self.last_frame == Some(frame) {
            return Ok(());
        }
        self.last_frame = Some(frame);

        for (n, filter) in self.filters.iter_mut().enumerate() {
            if !filter.is_active() {
                continue;
            }
            let status = board.dsp.filter_status(n)?;
            let outcome = filter.sample(status & 1 != 0, now);
            if outcome.matched {
                self.events.raise(PhoneEvent::FilterCadence(n));
            }
            if outcome.triggered {
                self.events.raise(PhoneEvent::FilterTrigger(n));
            }
        }
        Ok(())
    }
}

/// Ticks a card from its own thread until stopped or dropped.
pub struct TimerThread {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TimerThread {
    pub fn spawn(card: Arc<Card>, period: Duration) -> Result<Self> {
        Self::spawn_with(card, period, || {})
    }

    /// `on_start` runs on the timer thread before the first tick, e.g. to
    /// raise its scheduling priority.
    pub fn spawn_with<F>(card: Arc<Card>, period: Duration, on_start: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (stop, stopped) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("ixj_timer".to_string())
            .spawn(move || {
                on_start();
                let ticker = tick(period);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            card.tick();
                        }
                        recv(stopped) -> _ => break,
                    }
                }
                debug!("timer thread done");
            })?;

        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender disconnects the stop channel.
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("timer thread panicked");
            }
        }
    }
}

impl Drop for TimerThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}
