//! Call-progress tone sequencing.
//!
//! The DSP generates the tones itself; the host walks a cadence of tone
//! elements, (re)programming and starting each one when the previous
//! element's on and off periods have run out.

use crate::board::Board;
use crate::cadence::Termination;
use crate::clock::Tick;
use crate::error::Result;

/// One step of a tone cadence. Periods are in 0.25 ms units; a zero on
/// period plays until stopped.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ToneElement {
    pub index: u8,
    pub on_units: u16,
    pub off_units: u16,
    pub freq0: u16,
    pub gain0: u16,
    pub freq1: u16,
    pub gain1: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToneCadence {
    pub elements: Vec<ToneElement>,
    pub termination: Termination,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum TonePhase {
    Silent,
    On,
    Off,
}

/// Hardware action requested by the player.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ToneCommand {
    Start(ToneElement),
    Stop,
}

impl ToneCommand {
    pub fn apply(self, board: &Board) -> Result<()> {
        match self {
            ToneCommand::Start(element) => {
                if element.gain0 != 0 {
                    board.dsp.tone_init(element.index, element.freq0, element.gain0, element.freq1, element.gain1)?;
                }
                board.dsp.tone_on_period(element.on_units)?;
                board.dsp.tone_off_period(element.off_units)?;
                board.dsp.tone_play(element.index)
            }
            ToneCommand::Stop => board.dsp.tone_play(0),
        }
    }
}

pub fn units_to_ticks(units: u16, hz: u32) -> u32 {
    ((hz as u64 * units as u64 * 25) / 100_000) as u32
}

pub struct TonePlayer {
    hz: u32,
    cadence: Option<ToneCadence>,
    current: ToneElement,
    element: usize,
    phase: TonePhase,
    phase_start: Tick,
}

impl TonePlayer {
    pub fn new(hz: u32) -> Self {
        Self {
            hz,
            cadence: None,
            current: ToneElement::default(),
            element: 0,
            phase: TonePhase::Silent,
            phase_start: Tick::default(),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.phase != TonePhase::Silent
    }

    /// Play one tone slot with fixed periods, outside any cadence.
    pub fn play(&mut self, element: ToneElement, now: Tick) -> ToneCommand {
        self.cadence = None;
        self.start(element, now)
    }

    pub fn play_cadence(&mut self, cadence: ToneCadence, now: Tick) -> ToneCommand {
        let first = cadence.elements.first().copied();
        self.cadence = Some(cadence);
        self.element = 0;
        match first {
            Some(element) => self.start(element, now),
            None => self.stop(),
        }
    }

    pub fn stop(&mut self) -> ToneCommand {
        self.phase = TonePhase::Silent;
        self.cadence = None;
        ToneCommand::Stop
    }

    fn start(&mut self, element: ToneElement, now: Tick) -> ToneCommand {
        self.current = element;
        self.phase = TonePhase::On;
        self.phase_start = now;
        ToneCommand::Start(element)
    }

    pub fn advance(&mut self, now: Tick) -> Option<ToneCommand> {
        let period = match self.phase {
            TonePhase::Silent => return None,
            TonePhase::On => self.current.on_units,
            TonePhase::Off => self.current.off_units,
        };
        if self.phase == TonePhase::On && period == 0 {
            return None;
        }
        if now.is_before(self.phase_start.offset(units_to_ticks(period, self.hz))) {
            return None;
        }

        match self.phase {
            TonePhase::On => {
                self.phase = TonePhase::Off;
                self.phase_start = now;
                // A zero off period falls straight through to the next element.
                if self.current.off_units != 0 {
                    return None;
                }
                self.next_element(now)
            }
            _ => self.next_element(now),
        }
    }

    fn next_element(&mut self, now: Tick) -> Option<ToneCommand> {
        let (count, termination) = match &self.cadence {
            Some(cadence) => (cadence.elements.len(), cadence.termination),
            // A lone tone repeats its on/off cycle.
            None => return Some(self.start(self.current, now)),
        };

        let mut next = self.element + 1;
        if next >= count {
            next = match termination {
                Termination::PlayOnce => return Some(self.stop()),
                Termination::RepeatLast => count - 1,
                Termination::RepeatAll => 0,
            };
        }

        let element = self.cadence.as_ref().map(|cadence| cadence.elements[next])?;
        self.element = next;
        Some(self.start(element, now))
    }
}
