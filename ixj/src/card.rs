//! One telephony card: its configuration, the state machines behind its
//! exclusive access, and the operations a character device would expose.
//!
//! Every operation here enters through [`ExclusiveAccess::enter`] and so
//! waits out a timer tick in progress; the tick itself lives in
//! [`crate::timer`].

use std::sync::{Arc, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver};
use ixj_pac::device::PortAddress;
use ixj_pac::register::{DaaMode, SlicState};
use log::{debug, info};

use crate::access::ExclusiveAccess;
use crate::audio::{AudioPath, Codec};
use crate::board::{self, Board, Pld};
use crate::cadence::{Cadence, CadenceArm, ToneFilter};
use crate::callerid::{self, CallerId, CidKind, CidPhase, CidSession};
use crate::clock::{SharedClock, SystemClock};
use crate::daa::{Daa, DEFAULT_WINKTIME_MS};
use crate::dsp::SharedIo;
use crate::error::{Error, Result, Wait};
use crate::event::{EventQueue, Exceptions, PhoneEvent};
use crate::fsk::{FskBuffer, DEFAULT_CAPACITY};
use crate::hook::{CardKind, HookBits, HookContext, HookReader, Port};
use crate::ring::{self, RingEngine, RingPattern, RingStep, DEFAULT_RING_CADENCE};
use crate::tone::{ToneCadence, ToneElement, TonePlayer};

/// How long an operation waits for the timer to let go of the card.
const PATIENCE: Duration = Duration::from_millis(100);

pub const FILTERS: usize = 4;

#[derive(Clone, Debug)]
pub struct CardConfig {
    pub kind: CardKind,
    pub dsp_base: PortAddress,
    pub xilinx_base: PortAddress,
    /// Tick clock rate.
    pub hz: u32,
    /// Timer calls per second.
    pub samplerate: u32,
    pub command_timeout_ms: u32,
    pub flash_ms: u32,
    pub winktime_ms: u32,
    /// POTS ring bitmap, one bit per half second, MSB first.
    pub ring_cadence: u16,
    /// Caller-ID buffer size in samples.
    pub fsk_capacity: usize,
    /// LineJACK: bridge the POTS port straight onto the line at startup.
    pub pots_pstn: bool,
}

impl Default for CardConfig {
    fn default() -> Self {
        Self {
            kind: CardKind::LineJack,
            dsp_base: 0x300,
            xilinx_base: 0x310,
            hz: 1000,
            samplerate: 100,
            command_timeout_ms: 600,
            flash_ms: 600,
            winktime_ms: DEFAULT_WINKTIME_MS,
            ring_cadence: DEFAULT_RING_CADENCE,
            fsk_capacity: DEFAULT_CAPACITY,
            pots_pstn: false,
        }
    }
}

impl CardConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.samplerate.max(1) as u64)
    }
}

/// Everything the timer and the file operations share.
pub(crate) struct CardCore {
    pub(crate) port: Port,
    pub(crate) pots_pstn: bool,
    pub(crate) pld: Pld,
    pub(crate) hook: HookReader,
    pub(crate) hookstate: HookBits,
    pub(crate) ring: RingEngine,
    pub(crate) filters: [ToneFilter; FILTERS],
    pub(crate) last_frame: Option<u16>,
    pub(crate) daa: Daa,
    pub(crate) fsk: FskBuffer,
    pub(crate) cid: CidSession,
    pub(crate) tone: TonePlayer,
    pub(crate) audio: AudioPath,
    pub(crate) events: EventQueue,
    readers: u32,
    writers: u32,
}

impl CardCore {
    pub(crate) fn hook_context(&self) -> HookContext {
        HookContext {
            port: self.port,
            ringing: self.ring.is_active(),
            // The bridged loop is only watched while someone has the device open.
            pots_pstn: self.pots_pstn && self.readers + self.writers > 0,
            daa_mode: self.daa.mode(),
        }
    }

    pub(crate) fn apply_ring_step(&mut self, board: &Board, step: RingStep) -> Result<()> {
        match step.ringer {
            Some(true) => ring::ringer_on(board, &mut self.pld)?,
            // Caller-ID owns the SLIC while it plays.
            Some(false) if self.cid.is_playing() => {}
            Some(false) => ring::ringer_off(board, &mut self.pld)?,
            None => {}
        }
        if step.send_caller_id {
            if let Some(caller_id) = self.cid.pending.take() {
                self.send_on_hook_caller_id(board, &caller_id)?;
            }
        }
        if step.finished {
            self.cid.pending = None;
        }
        Ok(())
    }

    pub(crate) fn send_on_hook_caller_id(&mut self, board: &Board, caller_id: &CallerId) -> Result<()> {
        if !self.cid.is_idle() {
            debug!("Caller-ID already in progress; dropping {:?}", caller_id.number);
            return Ok(());
        }
        let snapshot = callerid::pre_cid(board, &mut self.audio, false)?;
        self.pld.set_slic_state(board, SlicState::OnHookTransmission);
        caller_id.render(&mut self.fsk, CidKind::OnHook);
        self.cid.snapshot = Some(snapshot);
        self.cid.phase = CidPhase::Playing(CidKind::OnHook);
        Ok(())
    }

    /// End a Caller-ID transmission, sent or not, and put the audio path
    /// back the way it was.
    pub(crate) fn finish_caller_id(&mut self, board: &Board, sent: bool) -> Result<()> {
        let waiting = matches!(self.cid.phase, CidPhase::AwaitingAck(_) | CidPhase::Playing(CidKind::Waiting));
        let burst = self.fsk.len();

        self.cid.phase = CidPhase::Restoring(burst);
        self.cid.pending = None;
        if waiting {
            self.cid.outcome = Some(sent);
        }
        self.fsk.clear();
        if sent {
            self.events.raise(PhoneEvent::CallerIdSent);
        }
        self.restore_audio(board)
    }

    /// Hand the saved audio setup back to the DSP. The snapshot is kept
    /// until that succeeds, so a timeout here is retried on the next tick.
    pub(crate) fn restore_audio(&mut self, board: &Board) -> Result<()> {
        let CidPhase::Restoring(burst) = self.cid.phase else {
            return Ok(());
        };
        if let Some(snapshot) = self.cid.snapshot {
            callerid::post_cid(board, &mut self.pld, &mut self.audio, snapshot, burst)?;
        }
        self.cid.snapshot = None;
        self.cid.phase = CidPhase::Idle;
        Ok(())
    }
}

pub struct Card {
    pub(crate) config: CardConfig,
    pub(crate) board: Board,
    pub(crate) core: ExclusiveAccess<CardCore>,
}

impl Card {
    pub fn new(io: SharedIo, config: CardConfig, clock: SharedClock) -> Result<Self> {
        board::check_bases(config.dsp_base, config.xilinx_base)?;
        let board = Board::new(
            config.kind,
            io,
            config.dsp_base,
            config.xilinx_base,
            clock,
            config.command_timeout_ms,
        );
        let hz = board.hz();

        let mut core = CardCore {
            port: Port::Pots,
            pots_pstn: false,
            pld: Pld::default(),
            hook: HookReader::new(board.ticks_from_ms(config.flash_ms)),
            hookstate: HookBits::default(),
            ring: RingEngine::new(config.ring_cadence, hz),
            filters: Default::default(),
            last_frame: None,
            daa: Daa::new(hz, config.winktime_ms),
            fsk: FskBuffer::new(config.fsk_capacity),
            cid: CidSession::default(),
            tone: TonePlayer::new(hz),
            audio: AudioPath::default(),
            events: EventQueue::default(),
            readers: 0,
            writers: 0,
        };

        ring::ringer_off(&board, &mut core.pld)?;
        if config.kind.has_pstn() {
            core.daa.set_mode(&board, &mut core.pld, DaaMode::Sleep, board.now())?;
            if config.pots_pstn {
                core.pld.write_slicw(&board, |w| w.with_rly1(true));
                core.pots_pstn = true;
            }
        }

        info!(
            "{:?} at DSP 0x{:03x}, PLD 0x{:03x}",
            config.kind, config.dsp_base, config.xilinx_base
        );

        Ok(Self {
            config,
            board,
            core: ExclusiveAccess::new(core),
        })
    }

    /// A card ticking on wall-clock time at `config.hz`.
    pub fn with_system_clock(io: SharedIo, config: CardConfig) -> Result<Self> {
        let clock = Arc::new(SystemClock::new(config.hz));
        Self::new(io, config, clock)
    }

    pub fn kind(&self) -> CardKind {
        self.board.kind
    }

    pub fn config(&self) -> &CardConfig {
        &self.config
    }

    fn enter(&self) -> Result<MutexGuard<'_, CardCore>> {
        self.core.enter(PATIENCE)
    }

    fn require_pstn(&self) -> Result<()> {
        if self.board.kind.has_pstn() {
            Ok(())
        } else {
            Err(Error::Unsupported(self.board.kind))
        }
    }

    ///////////////////////////////////////////////////////////////////
    // Open / close

    pub fn open(&self, read: bool, write: bool) -> Result<()> {
        let mut core = self.enter()?;
        core.readers += read as u32;
        core.writers += write as u32;
        Ok(())
    }

    /// The last close stops everything the card is doing and releases the
    /// Caller-ID buffer.
    pub fn close(&self, read: bool, write: bool) -> Result<()> {
        let mut guard = self.enter()?;
        let core = &mut *guard;
        let board = &self.board;

        if read {
            core.readers = core.readers.saturating_sub(1);
        }
        if write {
            core.writers = core.writers.saturating_sub(1);
        }
        if core.readers + core.writers > 0 {
            return Ok(());
        }

        debug!("last close");
        core.tone.stop().apply(board)?;
        if core.ring.is_active() {
            core.ring.stop();
            ring::ringer_off(board, &mut core.pld)?;
        }
        core.cid = CidSession::default();
        core.audio.play_stop(board)?;
        core.audio.record_stop(board)?;
        core.fsk.free();
        Ok(())
    }

    ///////////////////////////////////////////////////////////////////
    // Audio

    /// Queue play data; returns how much fit.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        Ok(self.enter()?.audio.write(data))
    }

    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.enter()?.audio.read(buf))
    }

    pub fn play_start(&self) -> Result<()> {
        self.enter()?.audio.play_start(&self.board)
    }

    pub fn play_stop(&self) -> Result<()> {
        self.enter()?.audio.play_stop(&self.board)
    }

    pub fn record_start(&self) -> Result<()> {
        self.enter()?.audio.record_start(&self.board)
    }

    pub fn record_stop(&self) -> Result<()> {
        self.enter()?.audio.record_stop(&self.board)
    }

    pub fn set_play_codec(&self, codec: Codec) -> Result<()> {
        self.enter()?.audio.set_play_codec(&self.board, codec)
    }

    pub fn set_record_codec(&self, codec: Codec) -> Result<()> {
        self.enter()?.audio.set_record_codec(&self.board, codec)
    }

    /// 10, 20 or 30 ms.
    pub fn set_frame_ms(&self, ms: u8) -> Result<()> {
        self.enter()?.audio.set_base_frame(&self.board, ms)
    }

    pub fn set_aec(&self, level: u8) -> Result<()> {
        self.enter()?.audio.set_aec(&self.board, level)
    }

    ///////////////////////////////////////////////////////////////////
    // Ports and hookswitch

    pub fn set_port(&self, port: Port) -> Result<()> {
        if port == Port::Pstn {
            self.require_pstn()?;
        }
        let mut guard = self.enter()?;
        let core = &mut *guard;
        if !matches!(self.board.kind, CardKind::PhoneJack | CardKind::PhoneCard) {
            core.pld.write_slicw(&self.board, |w| w.with_spken(port == Port::Speaker));
        }
        core.port = port;
        Ok(())
    }

    /// LineJACK: connect the POTS port straight to the line.
    pub fn set_pots_pstn(&self, bridged: bool) -> Result<()> {
        self.require_pstn()?;
        let mut guard = self.enter()?;
        let core = &mut *guard;
        core.pld.write_slicw(&self.board, |w| w.with_rly1(bridged));
        core.pots_pstn = bridged;
        Ok(())
    }

    /// Read the hookswitch now, rather than waiting for the next tick.
    pub fn hookstate(&self) -> Result<HookBits> {
        let mut guard = self.enter()?;
        let core = &mut *guard;
        let ctx = core.hook_context();
        core.hook.read(&self.board, &mut core.pld, &ctx, self.board.now(), &mut core.events)
    }

    ///////////////////////////////////////////////////////////////////
    // POTS ringing

    /// Ring the POTS port, optionally sending on-hook Caller-ID in the
    /// first silent slot.
    pub fn ring_start(&self, caller_id: Option<CallerId>) -> Result<()> {
        if self.board.kind == CardKind::PhoneCard {
            return Err(Error::Unsupported(self.board.kind));
        }
        let mut guard = self.enter()?;
        let core = &mut *guard;
        if core.hookstate.off_hook() {
            return Err(Error::Busy);
        }

        let step = core.ring.start(self.board.now(), caller_id.is_some());
        core.cid.pending = caller_id;
        core.apply_ring_step(&self.board, step)
    }

    pub fn ring_stop(&self) -> Result<()> {
        let mut guard = self.enter()?;
        let core = &mut *guard;
        if !core.ring.is_active() {
            return Ok(());
        }
        let step = core.ring.stop();
        core.apply_ring_step(&self.board, step)
    }

    pub fn set_ring_cadence(&self, bitmap: u16) -> Result<()> {
        self.enter()?.ring.set_bitmap(bitmap);
        Ok(())
    }

    /// Replace the bitmap with an explicit pattern, durations in
    /// milliseconds. `None` goes back to the bitmap.
    pub fn set_ring_pattern(&self, pattern: Option<RingPattern>) -> Result<()> {
        let hz = self.board.hz();
        let pattern = pattern.map(|p| RingPattern {
            cadence: Cadence::from_ms(p.cadence, hz),
            ..p
        });
        self.enter()?.ring.set_pattern(pattern);
        Ok(())
    }

    ///////////////////////////////////////////////////////////////////
    // Tone filters

    /// Durations in milliseconds.
    pub fn set_filter_cadence(&self, filter: usize, cadence: Cadence, arm: CadenceArm) -> Result<()> {
        if filter >= FILTERS {
            return Err(Error::FilterIndex(filter));
        }
        let cadence = Cadence::from_ms(cadence, self.board.hz());
        self.enter()?.filters[filter].set_cadence(cadence, arm);
        Ok(())
    }

    pub fn set_filter_enable(&self, filter: usize, enabled: bool) -> Result<()> {
        if filter >= FILTERS {
            return Err(Error::FilterIndex(filter));
        }
        self.enter()?.filters[filter].set_enabled(enabled);
        Ok(())
    }

    ///////////////////////////////////////////////////////////////////
    // PSTN

    /// Durations in milliseconds.
    pub fn set_pstn_ring_cadence(&self, cadence: Cadence, arm: CadenceArm) -> Result<()> {
        self.require_pstn()?;
        let cadence = Cadence::from_ms(cadence, self.board.hz());
        self.enter()?.daa.set_ring_cadence(cadence, arm);
        Ok(())
    }

    pub fn set_pstn_state(&self, mode: DaaMode) -> Result<()> {
        self.require_pstn()?;
        let mut guard = self.enter()?;
        let core = &mut *guard;
        core.daa.set_mode(&self.board, &mut core.pld, mode, self.board.now())
    }

    pub fn pstn_state(&self) -> Result<DaaMode> {
        self.require_pstn()?;
        Ok(self.enter()?.daa.mode())
    }

    pub fn set_winktime(&self, ms: u32) -> Result<()> {
        self.require_pstn()?;
        self.enter()?.daa.set_winktime(ms);
        Ok(())
    }

    ///////////////////////////////////////////////////////////////////
    // Call-progress tones

    pub fn play_tone(&self, element: ToneElement) -> Result<()> {
        let mut core = self.enter()?;
        core.tone.play(element, self.board.now()).apply(&self.board)
    }

    pub fn set_tone_cadence(&self, cadence: ToneCadence) -> Result<()> {
        let mut core = self.enter()?;
        core.tone.play_cadence(cadence, self.board.now()).apply(&self.board)
    }

    pub fn stop_tone(&self) -> Result<()> {
        let mut core = self.enter()?;
        core.tone.stop().apply(&self.board)
    }

    ///////////////////////////////////////////////////////////////////
    // Caller-ID

    /// Send on-hook Caller-ID now, without ringing.
    pub fn send_caller_id(&self, caller_id: &CallerId) -> Result<()> {
        let mut guard = self.enter()?;
        let core = &mut *guard;
        if core.hookstate.off_hook() {
            return Err(Error::Busy);
        }
        core.send_on_hook_caller_id(&self.board, caller_id)
    }

    /// Start call-waiting Caller-ID: alert tones, then the data once the
    /// far end acknowledges. The timer carries it the rest of the way.
    pub fn start_caller_id_waiting(&self, caller_id: CallerId) -> Result<()> {
        let mut guard = self.enter()?;
        let core = &mut *guard;
        if !core.cid.is_idle() {
            return Err(Error::Busy);
        }

        let snapshot = callerid::pre_cid(&self.board, &mut core.audio, true)?;
        core.cid.snapshot = Some(snapshot);
        core.cid.pending = Some(caller_id);
        core.cid.outcome = None;
        core.cid.phase = CidPhase::Alerting;
        core.tone.play_cadence(callerid::alert_tones(), self.board.now()).apply(&self.board)
    }

    /// Result of the last call-waiting attempt, once it is over: whether the
    /// data went out.
    pub fn caller_id_waiting_outcome(&self) -> Result<Option<bool>> {
        Ok(self.enter()?.cid.outcome.take())
    }

    /// [`start_caller_id_waiting`](Self::start_caller_id_waiting) and wait
    /// for the outcome. Needs the timer running.
    pub fn send_caller_id_waiting(&self, caller_id: CallerId, timeout: Duration) -> Result<bool> {
        self.start_caller_id_waiting(caller_id)?;
        let deadline = Instant::now() + timeout;
        loop {
            thread::sleep(self.config.tick_period());
            if let Some(sent) = self.caller_id_waiting_outcome()? {
                return Ok(sent);
            }
            if Instant::now() >= deadline {
                return Err(Error::HardwareTimeout(Wait::CallerIdDone));
            }
        }
    }

    ///////////////////////////////////////////////////////////////////
    // Events

    /// Subscribe to events, replacing any earlier subscriber.
    pub fn events(&self) -> Result<Receiver<PhoneEvent>> {
        let (sender, receiver) = unbounded();
        self.enter()?.events.set_sink(Some(sender));
        Ok(receiver)
    }

    /// Read and clear the latched event flags.
    pub fn exceptions(&self) -> Result<Exceptions> {
        Ok(self.enter()?.events.take_exceptions())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::clock::ManualClock;
    use crate::sim::SimCard;

    fn card(kind: CardKind) -> (Arc<SimCard>, Card) {
        let sim = Arc::new(SimCard::new(kind, 0x300, 0x310));
        let config = CardConfig {
            kind,
            ..Default::default()
        };
        let card = Card::new(sim.clone(), config, Arc::new(ManualClock::new(1000))).unwrap();
        (sim, card)
    }

    #[test]
    fn new_card_idles_the_line() {
        let (sim, card) = card(CardKind::LineJack);
        assert_eq!(sim.slic_state(), SlicState::Standby);
        assert_eq!(sim.daa_mode(), DaaMode::Sleep);
        assert_eq!(card.pstn_state().unwrap(), DaaMode::Sleep);
    }

    #[test]
    fn port_bases_follow_the_decoders() {
        let sim = Arc::new(SimCard::new(CardKind::LineJack, 0x300, 0x318));
        let config = CardConfig {
            kind: CardKind::LineJack,
            xilinx_base: 0x318,
            ..Default::default()
        };
        let card = Card::new(sim.clone(), config, Arc::new(ManualClock::new(1000))).unwrap();
        card.set_pstn_state(DaaMode::Conversation).unwrap();
        assert_eq!(sim.daa_mode(), DaaMode::Conversation);

        for (dsp_base, xilinx_base) in [(0x308, 0x310), (0x300, 0x31c), (0x300, 0x308)] {
            let config = CardConfig {
                dsp_base,
                xilinx_base,
                ..Default::default()
            };
            let result = Card::new(sim.clone(), config, Arc::new(ManualClock::new(1000)));
            assert!(matches!(result, Err(Error::Invalid("port base"))));
        }
    }

    #[test]
    fn closed_device_reads_the_slic_even_when_bridged() {
        let sim = Arc::new(SimCard::new(CardKind::LineJack, 0x300, 0x310));
        let config = CardConfig {
            kind: CardKind::LineJack,
            pots_pstn: true,
            ..Default::default()
        };
        let card = Card::new(sim.clone(), config, Arc::new(ManualClock::new(1000))).unwrap();
        sim.set_pots_pstn_loop(true);
        assert!(!card.hookstate().unwrap().off_hook());

        sim.set_off_hook(true);
        assert!(card.hookstate().unwrap().off_hook());
    }

    #[test]
    fn pstn_operations_need_a_linejack() {
        let (_sim, card) = card(CardKind::PhoneJackLite);
        assert!(matches!(card.set_port(Port::Pstn), Err(Error::Unsupported(CardKind::PhoneJackLite))));
        assert!(matches!(card.pstn_state(), Err(Error::Unsupported(_))));
        assert!(card.set_port(Port::Speaker).is_ok());
    }

    #[test]
    fn phonecard_cannot_ring() {
        let (_sim, card) = card(CardKind::PhoneCard);
        assert!(matches!(card.ring_start(None), Err(Error::Unsupported(CardKind::PhoneCard))));
    }

    #[test]
    fn filter_index_is_checked() {
        let (_sim, card) = card(CardKind::LineJack);
        assert!(matches!(card.set_filter_enable(4, true), Err(Error::FilterIndex(4))));
        assert!(matches!(
            card.set_filter_cadence(7, Cadence::default(), CadenceArm::Always),
            Err(Error::FilterIndex(7))
        ));
        assert!(card.set_filter_enable(3, true).is_ok());
    }

    #[test]
    fn ring_start_drives_the_ringer() {
        let (sim, card) = card(CardKind::LineJack);
        card.ring_start(None).unwrap();
        assert!(sim.ringer_on());
        card.ring_stop().unwrap();
        assert!(!sim.ringer_on());
        assert_eq!(sim.slic_state(), SlicState::Standby);
    }

    #[test]
    fn pstn_state_reaches_the_daa() {
        let (sim, card) = card(CardKind::LineJack);
        card.set_pstn_state(DaaMode::Conversation).unwrap();
        assert_eq!(sim.daa_mode(), DaaMode::Conversation);
        assert!(sim.slicw().rly2());
    }

    #[test]
    fn last_close_releases_caller_id_buffer() {
        let (sim, card) = card(CardKind::LineJack);
        card.open(true, true).unwrap();
        card.open(true, false).unwrap();

        card.send_caller_id(&CallerId { number: "5551234".into(), ..Default::default() }).unwrap();
        assert!(sim.playing());
        assert!(card.core.try_enter().unwrap().fsk.is_allocated());

        card.close(true, true).unwrap();
        assert!(card.core.try_enter().unwrap().fsk.is_allocated());

        card.close(true, false).unwrap();
        assert!(!card.core.try_enter().unwrap().fsk.is_allocated());
        assert!(!sim.playing());
    }

    #[test]
    fn play_data_is_queued() {
        let (_sim, card) = card(CardKind::PhoneJackPci);
        assert_eq!(card.write(&[0u8; 100]).unwrap(), 100);
        let mut buf = [0u8; 10];
        assert_eq!(card.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn operations_wait_out_a_held_card() {
        let (_sim, card) = card(CardKind::LineJack);
        let held = card.core.try_enter().unwrap();
        assert!(matches!(card.set_ring_cadence(0xffff), Err(Error::Busy)));
        drop(held);
        assert!(card.set_ring_cadence(0xffff).is_ok());
    }
}
