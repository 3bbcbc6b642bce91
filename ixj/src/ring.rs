//! POTS ringing.
//!
//! Ringing follows either a 16-slot bitmap stepped every half second, or an
//! explicit on/off pattern. The engine only decides; [`ringer_on`] and
//! [`ringer_off`] drive the hardware.

use ixj_pac::register::{SlicState, GPIO};

use crate::board::{Board, Pld};
use crate::cadence::{Cadence, Termination};
use crate::clock::Tick;
use crate::error::{Error, Result};
use crate::hook::CardKind;

/// One second on, three off, repeated.
pub const DEFAULT_RING_CADENCE: u16 = 0xc0c0;

pub fn ringer_on(board: &Board, pld: &mut Pld) -> Result<()> {
    match board.kind {
        CardKind::PhoneJack => {
            board.dsp.gpio_write(GPIO::new().with_gpio1(true).with_gpio2(true).with_gpio5(false))
        }
        CardKind::PhoneCard => Err(Error::Unsupported(board.kind)),
        _ => {
            pld.set_slic_state(board, SlicState::Ringing);
            Ok(())
        }
    }
}

pub fn ringer_off(board: &Board, pld: &mut Pld) -> Result<()> {
    match board.kind {
        CardKind::PhoneJack => {
            board.dsp.gpio_write(GPIO::new().with_gpio1(false).with_gpio2(true).with_gpio5(false))
        }
        CardKind::PhoneCard => Ok(()),
        _ => {
            pld.set_slic_state(board, SlicState::Standby);
            Ok(())
        }
    }
}

/// An explicit ring pattern, in ticks.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RingPattern {
    pub cadence: Cadence,
    pub termination: Termination,
}

#[derive(Copy, Clone, Debug)]
struct PatternCursor {
    segment: usize,
    ends: Tick,
}

/// What the card should do after one ring step.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RingStep {
    /// Start the pending Caller-ID burst in this silent slot.
    pub send_caller_id: bool,
    pub ringer: Option<bool>,
    /// Ringing is over.
    pub finished: bool,
}

pub struct RingEngine {
    bitmap: u16,
    slot: u8,
    last_step: Tick,
    half_second: u32,
    active: bool,
    pattern: Option<RingPattern>,
    cursor: Option<PatternCursor>,
    cid_due: bool,
    cid_sent: bool,
}

impl RingEngine {
    pub fn new(bitmap: u16, hz: u32) -> Self {
        Self {
            bitmap,
            slot: 15,
            last_step: Tick::default(),
            half_second: hz / 2,
            active: false,
            pattern: None,
            cursor: None,
            cid_due: false,
            cid_sent: true,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn bitmap(&self) -> u16 {
        self.bitmap
    }

    pub fn set_bitmap(&mut self, bitmap: u16) {
        self.bitmap = bitmap;
    }

    pub fn set_pattern(&mut self, pattern: Option<RingPattern>) {
        self.pattern = pattern;
        self.cursor = None;
    }

    pub fn start(&mut self, now: Tick, caller_id: bool) -> RingStep {
        self.active = true;
        self.slot = 15;
        self.last_step = now;
        self.cid_due = false;
        self.cid_sent = !caller_id;

        if self.pattern.is_some() {
            return self.pattern_from(0, now);
        }
        self.ring_slot(false)
    }

    pub fn stop(&mut self) -> RingStep {
        self.active = false;
        self.cursor = None;
        RingStep {
            ringer: Some(false),
            finished: true,
            ..Default::default()
        }
    }

    pub fn advance(&mut self, now: Tick, off_hook: bool, cid_playing: bool) -> RingStep {
        if !self.active {
            return RingStep::default();
        }
        if off_hook {
            return self.stop();
        }

        if self.pattern.is_some() {
            return match self.cursor {
                Some(cursor) if !now.is_before(cursor.ends) => self.pattern_from(cursor.segment + 1, now),
                _ => RingStep::default(),
            };
        }

        if !now.is_after(self.last_step.offset(self.half_second)) {
            return RingStep::default();
        }

        let mut send_caller_id = false;
        if self.cid_due && !self.cid_sent {
            self.cid_sent = true;
            self.cid_due = false;
            send_caller_id = true;
        }

        self.slot = if self.slot == 0 { 15 } else { self.slot - 1 };
        self.last_step = now;

        let mut step = self.ring_slot(cid_playing || send_caller_id);
        step.send_caller_id = send_caller_id;
        step
    }

    fn ring_slot(&mut self, suppressed: bool) -> RingStep {
        let ringing = self.bitmap & (1 << self.slot) != 0;
        if !ringing && !self.cid_sent {
            self.cid_due = true;
        }
        RingStep {
            ringer: Some(ringing && !suppressed),
            ..Default::default()
        }
    }

    /// Move to the first non-empty pattern segment at or after `segment`.
    fn pattern_from(&mut self, segment: usize, now: Tick) -> RingStep {
        let Some(pattern) = self.pattern else {
            return RingStep::default();
        };
        let segments = pattern.cadence.segments();

        let mut next = (segment..6).find(|&i| segments[i] != 0);
        if next.is_none() {
            next = match pattern.termination {
                Termination::PlayOnce => None,
                Termination::RepeatAll => (0..6).find(|&i| segments[i] != 0),
                Termination::RepeatLast => (0..6).rev().find(|&i| segments[i] != 0).map(|i| i & !1),
            };
        }

        match next {
            Some(i) => {
                self.cursor = Some(PatternCursor {
                    segment: i,
                    ends: now.offset(segments[i]),
                });
                RingStep {
                    ringer: Some(i % 2 == 0),
                    ..Default::default()
                }
            }
            None => self.stop(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HZ: u32 = 1000;

    fn run(engine: &mut RingEngine, from: u32, to: u32, cid_playing: bool) -> Vec<(u32, RingStep)> {
        (from..to)
            .map(|t| (t, engine.advance(Tick(t), false, cid_playing)))
            .filter(|(_, step)| *step != RingStep::default())
            .collect()
    }

    #[test]
    fn bitmap_steps_every_half_second() {
        let mut engine = RingEngine::new(DEFAULT_RING_CADENCE, HZ);
        let first = engine.start(Tick(0), false);
        assert_eq!(first.ringer, Some(true));

        let steps = run(&mut engine, 1, 4010, false);
        let ringer: Vec<_> = steps.iter().map(|(_, s)| s.ringer.unwrap()).collect();
        // Slots 14..7 after the initial slot 15.
        assert_eq!(ringer, vec![true, false, false, false, false, false, false, true]);
        assert_eq!(steps[0].0, 501);
        assert!(steps.iter().all(|(_, s)| !s.send_caller_id));
    }

    #[test]
    fn caller_id_goes_out_in_first_silent_slot() {
        let mut engine = RingEngine::new(DEFAULT_RING_CADENCE, HZ);
        engine.start(Tick(0), true);

        let steps = run(&mut engine, 1, 2000, false);
        let sends: Vec<_> = steps.iter().filter(|(_, s)| s.send_caller_id).collect();
        assert_eq!(sends.len(), 1);
        // Slot 13 is the first silent one; the burst starts on the next step.
        assert_eq!(sends[0].0, 1503);
        assert_eq!(sends[0].1.ringer, Some(false));
    }

    #[test]
    fn ring_is_suppressed_while_caller_id_plays() {
        let mut engine = RingEngine::new(0xffff, HZ);
        engine.start(Tick(0), false);
        let steps = run(&mut engine, 1, 600, true);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].1.ringer, Some(false));
    }

    #[test]
    fn off_hook_stops_ringing() {
        let mut engine = RingEngine::new(DEFAULT_RING_CADENCE, HZ);
        engine.start(Tick(0), false);
        let step = engine.advance(Tick(10), true, false);
        assert!(step.finished);
        assert_eq!(step.ringer, Some(false));
        assert!(!engine.is_active());
    }

    #[test]
    fn explicit_pattern_plays_once() {
        let mut engine = RingEngine::new(DEFAULT_RING_CADENCE, HZ);
        engine.set_pattern(Some(RingPattern {
            cadence: Cadence::single(100, 200),
            termination: Termination::PlayOnce,
        }));

        assert_eq!(engine.start(Tick(0), false).ringer, Some(true));
        let steps = run(&mut engine, 1, 1000, false);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0], (100, RingStep { ringer: Some(false), ..Default::default() }));
        assert_eq!(steps[1].0, 300);
        assert!(steps[1].1.finished);
        assert!(!engine.is_active());
    }

    #[test]
    fn explicit_pattern_repeats_all() {
        let mut engine = RingEngine::new(DEFAULT_RING_CADENCE, HZ);
        engine.set_pattern(Some(RingPattern {
            cadence: Cadence::single(100, 200),
            termination: Termination::RepeatAll,
        }));

        engine.start(Tick(0), false);
        let steps = run(&mut engine, 1, 700, false);
        let ringer: Vec<_> = steps.iter().map(|(t, s)| (*t, s.ringer.unwrap())).collect();
        assert_eq!(ringer, vec![(100, false), (300, true), (400, false), (600, true)]);
    }
}
