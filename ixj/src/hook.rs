//! Hookswitch reader.
//!
//! Each card family reports the hookswitch differently: the ISA PhoneJACK
//! through a DSP GPIO pin, the SLIC-based cards through the PLD, and the
//! PCMCIA PhoneCARD through its cable sense register. On top of the raw bit
//! the reader debounces hook flashes and derives the "dialtone available"
//! bit from the selected port.

use ixj_pac::register::{CableType, DaaMode, SlicState};
use log::debug;

use crate::board::{Board, Pld};
use crate::clock::Tick;
use crate::error::Result;
use crate::event::{EventQueue, PhoneEvent};
use crate::ring;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CardKind {
    /// ISA Internet PhoneJACK.
    PhoneJack,
    /// Internet LineJACK, with a DAA for the PSTN port.
    LineJack,
    PhoneJackLite,
    PhoneJackPci,
    /// PCMCIA Internet PhoneCARD.
    PhoneCard,
}

impl CardKind {
    pub fn has_pstn(self) -> bool {
        self == CardKind::LineJack
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Port {
    Pots,
    Pstn,
    Speaker,
    Handset,
}

/// Bit 0 off-hook, bit 1 dialtone available.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct HookBits(u8);

impl HookBits {
    pub const OFF_HOOK: u8 = 0x01;
    pub const DIALTONE: u8 = 0x02;

    pub fn new(off_hook: bool, dialtone: bool) -> Self {
        let mut bits = 0;
        if off_hook {
            bits |= Self::OFF_HOOK;
        }
        if dialtone {
            bits |= Self::DIALTONE;
        }
        Self(bits)
    }

    pub fn off_hook(self) -> bool {
        self.0 & Self::OFF_HOOK != 0
    }

    pub fn dialtone(self) -> bool {
        self.0 & Self::DIALTONE != 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

/// What the reader needs to know about the rest of the card.
#[derive(Copy, Clone, Debug)]
pub struct HookContext {
    pub port: Port,
    pub ringing: bool,
    /// LineJACK routing POTS to PSTN with the device open.
    pub pots_pstn: bool,
    pub daa_mode: DaaMode,
}

pub struct HookReader {
    flash_window: u32,
    r_hook: bool,
    p_hook: bool,
    checkwait: Option<Tick>,
    flash_end: Option<Tick>,
    cable_present: bool,
    cable_type: CableType,
}

impl HookReader {
    /// `flash_window` in ticks.
    pub fn new(flash_window: u32) -> Self {
        Self {
            flash_window,
            r_hook: false,
            p_hook: false,
            checkwait: None,
            flash_end: None,
            cable_present: false,
            cable_type: CableType::Unknown,
        }
    }

    pub fn cable(&self) -> Option<CableType> {
        self.cable_present.then_some(self.cable_type)
    }

    pub fn read(
        &mut self,
        board: &Board,
        pld: &mut Pld,
        ctx: &HookContext,
        now: Tick,
        events: &mut EventQueue,
    ) -> Result<HookBits> {
        let mut off_hook = self.raw(board, pld, ctx, now)?;

        if off_hook != self.r_hook {
            self.r_hook = off_hook;
            match ctx.port {
                Port::Speaker | Port::Handset => events.raise(PhoneEvent::Hookstate(off_hook)),
                _ if !off_hook => self.flash_end = Some(now.offset(self.flash_window)),
                _ => {}
            }
        }

        let in_flash_window = self.flash_end.map_or(false, |end| now.is_before(end));
        if off_hook {
            if in_flash_window {
                debug!("hook flash");
                events.raise(PhoneEvent::Flash);
                self.flash_end = None;
            }
        } else if in_flash_window {
            off_hook = true;
        }

        let dialtone = match ctx.port {
            Port::Pstn => ctx.daa_mode == DaaMode::Conversation,
            Port::Speaker => match board.kind {
                CardKind::PhoneCard => self.cable_present && self.cable_type != CableType::Unknown,
                _ => true,
            },
            Port::Handset => true,
            Port::Pots => false,
        };

        Ok(HookBits::new(off_hook, dialtone))
    }

    fn raw(&mut self, board: &Board, pld: &mut Pld, ctx: &HookContext, now: Tick) -> Result<bool> {
        match board.kind {
            CardKind::PhoneJack => Ok(board.dsp.gpio_read()?.gpio3()),
            CardKind::PhoneCard => Ok(self.cable_check(board)),
            kind => {
                let xilinx = board.xilinx();
                let slicr = xilinx.slicr().read();

                if kind == CardKind::LineJack && ctx.pots_pstn {
                    let mut off_hook = slicr.potspstn();
                    if off_hook != self.p_hook {
                        let since = *self.checkwait.get_or_insert(now);
                        if now.is_before(since.offset(2)) {
                            off_hook = !off_hook;
                        } else {
                            self.checkwait = None;
                        }
                        self.p_hook = off_hook;
                    }
                    return Ok(off_hook);
                }

                match slicr.state() {
                    SlicState::Active | SlicState::Standby => {
                        if ctx.ringing && board.slic_state() == Some(SlicState::Ringing) {
                            ring::ringer_on(board, pld)?;
                        }
                        if kind == CardKind::PhoneJackPci {
                            Ok(xilinx.scrr().read().det())
                        } else {
                            Ok(slicr.det())
                        }
                    }
                    _ => Ok(false),
                }
            }
        }
    }

    fn cable_check(&mut self, board: &Board) -> bool {
        let xilinx = board.xilinx();
        let pccr1 = xilinx.pccr1().read();
        if pccr1.drf() {
            if self.cable_present {
                debug!("PhoneCARD cable removed");
            }
            self.cable_present = false;
            self.cable_type = CableType::Unknown;
            return false;
        }

        if !self.cable_present || self.cable_type != pccr1.cable() {
            debug!("PhoneCARD cable: {:?}", pccr1.cable());
        }
        self.cable_present = true;
        self.cable_type = pccr1.cable();
        xilinx.pslic().read().det()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use crate::clock::{Clock, ManualClock, SharedClock};
    use crate::sim::SimCard;

    const DSP: u16 = 0x300;
    const XILINX: u16 = 0x310;

    fn setup(kind: CardKind) -> (Arc<SimCard>, Arc<ManualClock>, Board) {
        let sim = Arc::new(SimCard::new(kind, DSP, XILINX));
        let clock = Arc::new(ManualClock::new(1000));
        let shared: SharedClock = clock.clone();
        let board = Board::new(kind, sim.clone(), DSP, XILINX, shared, 600);
        (sim, clock, board)
    }

    fn ctx(port: Port) -> HookContext {
        HookContext {
            port,
            ringing: false,
            pots_pstn: false,
            daa_mode: DaaMode::Sleep,
        }
    }

    #[test]
    fn slic_active_with_detect_is_off_hook() {
        let (sim, clock, board) = setup(CardKind::LineJack);
        let mut pld = Pld::default();
        let mut events = EventQueue::default();
        let mut reader = HookReader::new(600);

        pld.set_slic_state(&board, SlicState::Active);
        sim.set_off_hook(true);

        let bits = reader.read(&board, &mut pld, &ctx(Port::Pots), clock.now(), &mut events).unwrap();
        assert!(bits.off_hook());
        assert!(!bits.dialtone());

        let bits = reader.read(&board, &mut pld, &ctx(Port::Speaker), clock.now(), &mut events).unwrap();
        assert!(bits.off_hook());
        assert!(bits.dialtone());
    }

    #[test]
    fn slic_in_other_states_reads_on_hook() {
        let (sim, clock, board) = setup(CardKind::PhoneJackLite);
        let mut pld = Pld::default();
        let mut events = EventQueue::default();
        let mut reader = HookReader::new(600);

        pld.set_slic_state(&board, SlicState::OpenCircuit);
        sim.set_off_hook(true);

        let bits = reader.read(&board, &mut pld, &ctx(Port::Pots), clock.now(), &mut events).unwrap();
        assert!(!bits.off_hook());
    }

    #[test]
    fn short_on_hook_blip_is_a_flash() {
        let (sim, clock, board) = setup(CardKind::PhoneJackPci);
        let mut pld = Pld::default();
        let mut events = EventQueue::default();
        let mut reader = HookReader::new(600);
        pld.set_slic_state(&board, SlicState::Active);

        sim.set_off_hook(true);
        assert!(reader.read(&board, &mut pld, &ctx(Port::Pots), clock.now(), &mut events).unwrap().off_hook());

        // Hung up briefly: still reported off-hook inside the window.
        sim.set_off_hook(false);
        clock.advance(10);
        assert!(reader.read(&board, &mut pld, &ctx(Port::Pots), clock.now(), &mut events).unwrap().off_hook());

        clock.advance(200);
        sim.set_off_hook(true);
        assert!(reader.read(&board, &mut pld, &ctx(Port::Pots), clock.now(), &mut events).unwrap().off_hook());
        assert!(events.take_exceptions().flash);
    }

    #[test]
    fn long_on_hook_is_a_hang_up() {
        let (sim, clock, board) = setup(CardKind::LineJack);
        let mut pld = Pld::default();
        let mut events = EventQueue::default();
        let mut reader = HookReader::new(600);
        pld.set_slic_state(&board, SlicState::Active);

        sim.set_off_hook(true);
        reader.read(&board, &mut pld, &ctx(Port::Pots), clock.now(), &mut events).unwrap();
        sim.set_off_hook(false);
        reader.read(&board, &mut pld, &ctx(Port::Pots), clock.now(), &mut events).unwrap();

        clock.advance(601);
        let bits = reader.read(&board, &mut pld, &ctx(Port::Pots), clock.now(), &mut events).unwrap();
        assert!(!bits.off_hook());
        assert!(!events.take_exceptions().flash);
    }

    #[test]
    fn handset_transitions_raise_hookstate_immediately() {
        let (sim, clock, board) = setup(CardKind::LineJack);
        let mut pld = Pld::default();
        let mut events = EventQueue::default();
        let mut reader = HookReader::new(600);
        pld.set_slic_state(&board, SlicState::Standby);

        sim.set_off_hook(true);
        let bits = reader.read(&board, &mut pld, &ctx(Port::Handset), clock.now(), &mut events).unwrap();
        assert!(bits.off_hook());
        assert!(bits.dialtone());
        assert_eq!(events.pending(), &[PhoneEvent::Hookstate(true)]);
    }

    #[test]
    fn pots_pstn_loop_is_debounced() {
        let (sim, clock, board) = setup(CardKind::LineJack);
        let mut pld = Pld::default();
        let mut events = EventQueue::default();
        let mut reader = HookReader::new(600);
        let mut c = ctx(Port::Pots);
        c.pots_pstn = true;

        sim.set_pots_pstn_loop(true);
        assert!(!reader.read(&board, &mut pld, &c, clock.now(), &mut events).unwrap().off_hook());
        clock.advance(1);
        assert!(!reader.read(&board, &mut pld, &c, clock.now(), &mut events).unwrap().off_hook());
        clock.advance(1);
        assert!(reader.read(&board, &mut pld, &c, clock.now(), &mut events).unwrap().off_hook());
    }

    #[test]
    fn phonejack_reads_gpio3() {
        let (sim, clock, board) = setup(CardKind::PhoneJack);
        let mut pld = Pld::default();
        let mut events = EventQueue::default();
        let mut reader = HookReader::new(600);

        sim.set_off_hook(true);
        assert!(reader.read(&board, &mut pld, &ctx(Port::Pots), clock.now(), &mut events).unwrap().off_hook());
    }

    #[test]
    fn phonecard_speaker_dialtone_needs_a_typed_cable() {
        let (sim, clock, board) = setup(CardKind::PhoneCard);
        let mut pld = Pld::default();
        let mut events = EventQueue::default();
        let mut reader = HookReader::new(600);

        let bits = reader.read(&board, &mut pld, &ctx(Port::Speaker), clock.now(), &mut events).unwrap();
        assert!(!bits.dialtone());
        assert_eq!(reader.cable(), None);

        sim.set_cable(Some(CableType::Speaker));
        sim.set_off_hook(true);
        let bits = reader.read(&board, &mut pld, &ctx(Port::Speaker), clock.now(), &mut events).unwrap();
        assert!(bits.dialtone());
        assert!(bits.off_hook());
        assert_eq!(reader.cable(), Some(CableType::Speaker));
    }
}
