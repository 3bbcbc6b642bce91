//! LineJACK PSTN side: the DAA behind the PLD's serial control interface.
//!
//! Every DAA access is an SCI transfer: deselect, load the two data bytes,
//! select the DAA and wait for the PLD to raise SCI, collect the answer,
//! deselect again. The DAA latches its interrupts (ring, Caller-ID capture,
//! its own cadence timer, line voltage) and flags them in SCRR.daaflag;
//! reading XR0 returns and clears them.

use ixj_pac::register::{DaaMode, SciCommand, CR1, DAA_ID_BYTE, XR0};
use log::{debug, info, warn};

use crate::board::{Board, Pld};
use crate::cadence::{Cadence, CadenceArm, CadenceMachine, CadenceState, CadenceStep, Edge};
use crate::clock::{ms_to_ticks, Tick};
use crate::error::{Error, Result, Wait};
use crate::event::{EventQueue, PhoneEvent};

pub const DEFAULT_WINKTIME_MS: u32 = 320;
/// No ring for this long while ringing and the call is over.
pub const RING_TIMEOUT_MS: u32 = 5000;
/// The DAA needs this long after its Caller-ID interrupt before the data is
/// worth reading.
pub const CALLER_ID_SETTLE_MS: u32 = 1000;

const SCI_POLLS: usize = 10;

/// SCI target select, SCRW.c1/c0.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum SciTarget {
    End,
    Daa,
}

pub struct Daa {
    hz: u32,
    mode: DaaMode,
    cr: [u8; 8],
    xr: [u8; 8],
    winktime: u32,
    cadence: CadenceMachine,

    ring_int: bool,
    rmr: bool,
    vdd_ok: bool,
    last_ring: Option<Tick>,
    sleep_until: Option<Tick>,
    wink_start: Option<Tick>,
    caller_id_due: Option<Tick>,
}

impl Daa {
    pub fn new(hz: u32, winktime_ms: u32) -> Self {
        Self {
            hz,
            mode: DaaMode::Sleep,
            cr: [0; 8],
            xr: [0; 8],
            winktime: ms_to_ticks(winktime_ms, hz),
            cadence: CadenceMachine::disabled(),
            ring_int: false,
            rmr: false,
            vdd_ok: false,
            last_ring: None,
            sleep_until: None,
            wink_start: None,
            caller_id_due: None,
        }
    }

    pub fn mode(&self) -> DaaMode {
        self.mode
    }

    pub fn set_winktime(&mut self, ms: u32) {
        self.winktime = ms_to_ticks(ms, self.hz);
    }

    /// Ring cadence in ticks. A disabled cadence reports every ring burst.
    pub fn set_ring_cadence(&mut self, cadence: Cadence, arm: CadenceArm) {
        self.cadence.set_cadence(cadence, arm);
    }

    pub fn cadence_state(&self) -> CadenceState {
        self.cadence.state()
    }

    /// Last value read from a control register.
    pub fn cr(&self, index: usize) -> u8 {
        self.cr[index & 7]
    }

    /// Last value read from an extended register.
    pub fn xr(&self, index: usize) -> u8 {
        self.xr[index & 7]
    }

    ///////////////////////////////////////////////////////////////////
    // SCI

    fn sci_select(&self, board: &Board, pld: &mut Pld, target: SciTarget) {
        let daa = target == SciTarget::Daa;
        pld.write_scrw(board, |w| w.with_c1(false).with_c0(daa));
    }

    fn sci_wait(&self, board: &Board, high: bool) -> Result<()> {
        for _ in 0..SCI_POLLS {
            if board.xilinx().scrr().read().sci() == high {
                return Ok(());
            }
            std::hint::spin_loop();
        }
        let what = if high { Wait::SciHigh } else { Wait::SciLow };
        warn!("DAA: timed out waiting for {what}");
        Err(Error::HardwareTimeout(what))
    }

    /// One complete transfer. Returns the (low, high) bytes the DAA left in
    /// the SCI data registers.
    fn sci_transfer(&self, board: &Board, pld: &mut Pld, command: SciCommand, data: u8) -> Result<(u8, u8)> {
        self.sci_select(board, pld, SciTarget::End);
        self.sci_wait(board, false)?;

        let xilinx = board.xilinx();
        xilinx.sci_high().write_value(command.into());
        xilinx.sci_low().write_value(data);

        self.sci_select(board, pld, SciTarget::Daa);
        self.sci_wait(board, true)?;

        let low = xilinx.sci_low().read();
        let high = xilinx.sci_high().read();

        self.sci_select(board, pld, SciTarget::End);
        Ok((low, high))
    }

    fn read_command(&self) -> SciCommand {
        SciCommand::new().with_mode(self.mode).with_read(true).with_load(true)
    }

    /// Read and clear the interrupt source register.
    fn int_read(&mut self, board: &Board, pld: &mut Pld) -> Result<XR0> {
        // The XR0 read always goes out in sleep-mode encoding.
        let command = SciCommand::new().with_read(true).with_load(true).with_xop(true);
        let (id, value) = self.sci_transfer(board, pld, command, 0)?;
        if id != DAA_ID_BYTE {
            warn!("DAA ID 0x{id:02x}, expected 0x{DAA_ID_BYTE:02x}");
            return Err(Error::DaaId(id));
        }
        self.xr[0] = value;
        Ok(XR0::from(value))
    }

    fn cr_read(&mut self, board: &Board, pld: &mut Pld, index: u8) -> Result<u8> {
        let command = self.read_command().with_index(index);
        let (_, value) = self.sci_transfer(board, pld, command, 0)?;
        self.cr[index as usize & 7] = value;
        Ok(value)
    }

    ///////////////////////////////////////////////////////////////////
    // Modes

    pub fn set_mode(&mut self, board: &Board, pld: &mut Pld, mode: DaaMode, now: Tick) -> Result<()> {
        match mode {
            DaaMode::Sleep => {
                pld.write_scrw(board, |w| w.with_daafsyncen(false));
                pld.write_slicw(board, |w| w.with_rly2(false));
            }
            DaaMode::Conversation => {
                pld.write_slicw(board, |w| w.with_rly2(true));
                pld.write_scrw(board, |w| w.with_daafsyncen(true));
                self.ring_int = false;
                self.last_ring = None;
                self.wink_start = None;
            }
            DaaMode::Ringing | DaaMode::Reset => {}
        }
        // Every call starts matching the ring pattern from scratch.
        self.cadence.reset();

        let command = SciCommand::new().with_mode(mode).with_load(true);
        self.sci_transfer(board, pld, command, 0)?;

        if self.mode == DaaMode::Conversation && mode != DaaMode::Conversation {
            // Hanging up makes the line bounce; ignore ring signals for a while.
            self.sleep_until = Some(now.offset(self.hz / 4));
        }
        if self.mode != mode {
            debug!("DAA {:?} -> {mode:?}", self.mode);
        }
        self.mode = mode;
        Ok(())
    }

    ///////////////////////////////////////////////////////////////////
    // Polling

    /// Run the PSTN state machine for one tick. `pots_pstn_off_hook` is the
    /// POTS phone being off-hook while relayed straight to the line.
    pub fn poll(
        &mut self,
        board: &Board,
        pld: &mut Pld,
        now: Tick,
        pots_pstn_off_hook: bool,
        events: &mut EventQueue,
    ) -> Result<()> {
        let in_sleep_window = self.sleep_until.map_or(false, |until| now.is_before(until));
        let mut cadence_int = false;
        let mut vdd_change = None;

        if board.xilinx().scrr().read().daaflag() {
            let xr0 = self.int_read(board, pld)?;

            if xr0.RING() {
                if in_sleep_window || pots_pstn_off_hook {
                    debug!("DAA ring while hung up or bridged; resetting");
                    self.set_mode(board, pld, DaaMode::Reset, now)?;
                } else {
                    self.ring_int = true;
                    self.last_ring = Some(now);
                }
            }
            if xr0.Caller_ID() {
                self.caller_id_due = Some(now.offset(ms_to_ticks(CALLER_ID_SETTLE_MS, self.hz)));
            }
            cadence_int = xr0.Cadence();
            if xr0.VDD_OK() != self.vdd_ok {
                self.vdd_ok = xr0.VDD_OK();
                vdd_change = Some(self.vdd_ok);
            }
        }

        let rmr = CR1::from(self.cr_read(board, pld, 1)?).RMR();
        let mut edge = None;
        if rmr != self.rmr {
            self.rmr = rmr;
            if !in_sleep_window {
                edge = Some(if rmr { Edge::On } else { Edge::Off });
                if rmr {
                    self.last_ring = Some(now);
                }
            }
        }

        if let Some(due) = self.caller_id_due {
            if !now.is_before(due) {
                self.caller_id_due = None;
                events.raise(PhoneEvent::CallerId);
            }
        }

        match self.mode {
            DaaMode::Sleep => {
                if self.ring_int {
                    self.ring_int = false;
                    self.set_mode(board, pld, DaaMode::Ringing, now)?;
                }
                self.ring_edge(edge, now, events);
            }
            DaaMode::Ringing => {
                self.ring_edge(edge, now, events);
                self.ring_int = false;
                let timeout = ms_to_ticks(RING_TIMEOUT_MS, self.hz);
                let quiet = self.last_ring.map_or(true, |last| now.is_after(last.offset(timeout)));
                if cadence_int || quiet {
                    debug!("DAA ringing over (cadence interrupt: {cadence_int})");
                    self.set_mode(board, pld, DaaMode::Sleep, now)?;
                }
            }
            DaaMode::Conversation => {
                match vdd_change {
                    Some(false) => self.wink_start = Some(now),
                    Some(true) => self.wink_start = None,
                    None => {}
                }
                if let Some(start) = self.wink_start {
                    if now.since(start) >= self.winktime {
                        info!("PSTN wink");
                        self.wink_start = None;
                        events.raise(PhoneEvent::PstnWink);
                        self.set_mode(board, pld, DaaMode::Sleep, now)?;
                    }
                }
            }
            DaaMode::Reset => {
                if !in_sleep_window {
                    self.set_mode(board, pld, DaaMode::Sleep, now)?;
                }
            }
        }

        Ok(())
    }

    fn ring_edge(&mut self, edge: Option<Edge>, now: Tick, events: &mut EventQueue) {
        let Some(edge) = edge else {
            return;
        };
        if !self.cadence.is_enabled() {
            if edge == Edge::On {
                events.raise(PhoneEvent::PstnRing);
            }
            return;
        }
        if self.cadence.edge(edge, now) == CadenceStep::Matched {
            info!("PSTN ring cadence matched");
            events.raise(PhoneEvent::PstnRing);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use crate::clock::ManualClock;
    use crate::hook::CardKind;
    use crate::sim::SimCard;

    fn setup() -> (Arc<SimCard>, Board, Pld, Daa) {
        let sim = Arc::new(SimCard::new(CardKind::LineJack, 0x300, 0x310));
        let board = Board::new(CardKind::LineJack, sim.clone(), 0x300, 0x310, Arc::new(ManualClock::new(1000)), 600);
        let mut pld = Pld::default();
        let mut daa = Daa::new(1000, DEFAULT_WINKTIME_MS);
        daa.set_mode(&board, &mut pld, DaaMode::Sleep, Tick(0)).unwrap();
        (sim, board, pld, daa)
    }

    #[test]
    fn conversation_closes_the_line_relay() {
        let (sim, board, mut pld, mut daa) = setup();
        daa.set_mode(&board, &mut pld, DaaMode::Conversation, Tick(0)).unwrap();
        assert_eq!(sim.daa_mode(), DaaMode::Conversation);
        assert!(pld.slicw().rly2());
        assert!(pld.scrw().daafsyncen());
        // SCI deselected after the transfer.
        assert!(!pld.scrw().c0());

        daa.set_mode(&board, &mut pld, DaaMode::Sleep, Tick(10)).unwrap();
        assert_eq!(sim.daa_mode(), DaaMode::Sleep);
        assert!(!sim.slicw().rly2());
    }

    #[test]
    fn ring_cadence_raises_pstn_ring() {
        let (sim, board, mut pld, mut daa) = setup();
        let mut events = EventQueue::default();
        daa.set_ring_cadence(Cadence::single(2000, 4000), CadenceArm::Always);

        sim.set_ring_line(true);
        daa.poll(&board, &mut pld, Tick(0), false, &mut events).unwrap();
        assert_eq!(daa.mode(), DaaMode::Ringing);
        assert_eq!(daa.cadence_state(), CadenceState::On1);

        sim.set_ring_line(false);
        daa.poll(&board, &mut pld, Tick(2000), false, &mut events).unwrap();
        assert_eq!(daa.cadence_state(), CadenceState::Off1);
        assert!(events.pending().is_empty());

        sim.set_ring_line(true);
        daa.poll(&board, &mut pld, Tick(6000), false, &mut events).unwrap();
        assert_eq!(events.pending(), &[PhoneEvent::PstnRing]);
        assert_eq!(daa.mode(), DaaMode::Ringing);
    }

    #[test]
    fn every_burst_rings_without_a_cadence() {
        let (sim, board, mut pld, mut daa) = setup();
        let mut events = EventQueue::default();

        sim.set_ring_line(true);
        daa.poll(&board, &mut pld, Tick(0), false, &mut events).unwrap();
        assert_eq!(events.pending(), &[PhoneEvent::PstnRing]);
    }

    #[test]
    fn unanswered_ringing_goes_back_to_sleep() {
        let (sim, board, mut pld, mut daa) = setup();
        let mut events = EventQueue::default();

        sim.set_ring_line(true);
        daa.poll(&board, &mut pld, Tick(0), false, &mut events).unwrap();
        sim.set_ring_line(false);
        daa.poll(&board, &mut pld, Tick(1000), false, &mut events).unwrap();
        assert_eq!(daa.mode(), DaaMode::Ringing);

        daa.poll(&board, &mut pld, Tick(5000), false, &mut events).unwrap();
        assert_eq!(daa.mode(), DaaMode::Ringing);
        daa.poll(&board, &mut pld, Tick(6001), false, &mut events).unwrap();
        assert_eq!(daa.mode(), DaaMode::Sleep);
        assert_eq!(sim.daa_mode(), DaaMode::Sleep);
    }

    #[test]
    fn cadence_interrupt_ends_ringing() {
        let (sim, board, mut pld, mut daa) = setup();
        let mut events = EventQueue::default();

        sim.set_ring_line(true);
        daa.poll(&board, &mut pld, Tick(0), false, &mut events).unwrap();
        sim.raise_cadence();
        daa.poll(&board, &mut pld, Tick(10), false, &mut events).unwrap();
        assert_eq!(daa.mode(), DaaMode::Sleep);
    }

    #[test]
    fn wink_in_conversation() {
        let (sim, board, mut pld, mut daa) = setup();
        let mut events = EventQueue::default();
        daa.set_mode(&board, &mut pld, DaaMode::Conversation, Tick(0)).unwrap();

        sim.set_line_voltage(true);
        daa.poll(&board, &mut pld, Tick(0), false, &mut events).unwrap();

        // A short drop is not a wink.
        sim.set_line_voltage(false);
        daa.poll(&board, &mut pld, Tick(100), false, &mut events).unwrap();
        sim.set_line_voltage(true);
        daa.poll(&board, &mut pld, Tick(200), false, &mut events).unwrap();
        daa.poll(&board, &mut pld, Tick(600), false, &mut events).unwrap();
        assert!(events.pending().is_empty());

        sim.set_line_voltage(false);
        daa.poll(&board, &mut pld, Tick(1000), false, &mut events).unwrap();
        daa.poll(&board, &mut pld, Tick(1319), false, &mut events).unwrap();
        assert!(events.pending().is_empty());
        daa.poll(&board, &mut pld, Tick(1320), false, &mut events).unwrap();
        assert_eq!(events.pending(), &[PhoneEvent::PstnWink]);
        assert_eq!(daa.mode(), DaaMode::Sleep);
    }

    #[test]
    fn ring_right_after_hangup_forces_reset() {
        let (sim, board, mut pld, mut daa) = setup();
        let mut events = EventQueue::default();
        daa.set_mode(&board, &mut pld, DaaMode::Conversation, Tick(0)).unwrap();
        daa.set_mode(&board, &mut pld, DaaMode::Sleep, Tick(1000)).unwrap();

        sim.set_ring_line(true);
        daa.poll(&board, &mut pld, Tick(1010), false, &mut events).unwrap();
        assert_eq!(daa.mode(), DaaMode::Reset);
        assert!(events.pending().is_empty());

        daa.poll(&board, &mut pld, Tick(1300), false, &mut events).unwrap();
        assert_eq!(daa.mode(), DaaMode::Sleep);
    }

    #[test]
    fn caller_id_event_waits_for_the_data_to_settle() {
        let (sim, board, mut pld, mut daa) = setup();
        let mut events = EventQueue::default();

        sim.raise_caller_id();
        daa.poll(&board, &mut pld, Tick(0), false, &mut events).unwrap();
        daa.poll(&board, &mut pld, Tick(999), false, &mut events).unwrap();
        assert!(events.pending().is_empty());
        daa.poll(&board, &mut pld, Tick(1000), false, &mut events).unwrap();
        assert_eq!(events.pending(), &[PhoneEvent::CallerId]);
    }

    #[test]
    fn wrong_id_byte_is_an_error() {
        let (sim, board, mut pld, mut daa) = setup();
        let mut events = EventQueue::default();

        sim.set_daa_id(0x42);
        sim.raise_caller_id();
        let result = daa.poll(&board, &mut pld, Tick(0), false, &mut events);
        assert!(matches!(result, Err(Error::DaaId(0x42))));
    }

    #[test]
    fn abandoned_ring_pattern_does_not_leak_into_the_next_call() {
        let (sim, board, mut pld, mut daa) = setup();
        let mut events = EventQueue::default();
        daa.set_ring_cadence(Cadence::single(2000, 4000), CadenceArm::Always);

        // The caller gives up after the first burst.
        sim.set_ring_line(true);
        daa.poll(&board, &mut pld, Tick(0), false, &mut events).unwrap();
        sim.set_ring_line(false);
        daa.poll(&board, &mut pld, Tick(2000), false, &mut events).unwrap();
        assert_eq!(daa.cadence_state(), CadenceState::Off1);
        daa.poll(&board, &mut pld, Tick(8000), false, &mut events).unwrap();
        assert_eq!(daa.mode(), DaaMode::Sleep);
        assert_eq!(daa.cadence_state(), CadenceState::Idle);

        sim.set_ring_line(true);
        daa.poll(&board, &mut pld, Tick(60000), false, &mut events).unwrap();
        assert_eq!(daa.cadence_state(), CadenceState::On1);
        sim.set_ring_line(false);
        daa.poll(&board, &mut pld, Tick(62000), false, &mut events).unwrap();
        sim.set_ring_line(true);
        daa.poll(&board, &mut pld, Tick(66000), false, &mut events).unwrap();
        assert_eq!(events.pending(), &[PhoneEvent::PstnRing]);
    }

    #[test]
    fn stuck_sci_times_out() {
        let (sim, board, mut pld, mut daa) = setup();
        sim.set_sci_stall(true);
        let result = daa.set_mode(&board, &mut pld, DaaMode::Ringing, Tick(0));
        assert!(matches!(result, Err(Error::HardwareTimeout(Wait::SciHigh))));
        assert_eq!(daa.mode(), DaaMode::Sleep);
    }
}
