//! On/off cadence matching.
//!
//! One [`CadenceMachine`] validates a sequence of signal edges against up to
//! three on/off segment pairs. The tone filters and the PSTN ring detector
//! each run their own instance.

use log::debug;

use crate::clock::{ms_to_ticks, Tick};

/// Percent either side of a segment's nominal duration that still matches.
pub const TOLERANCE_PERCENT: u32 = 10;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CadenceState {
    Idle = 0,
    On1 = 1,
    Off1 = 2,
    On2 = 3,
    Off2 = 4,
    On3 = 5,
    Off3 = 6,
    Complete = 7,
}

impl CadenceState {
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Segment pair (0..=2) for the on/off states.
    fn pair(self) -> Option<usize> {
        match self {
            CadenceState::On1 | CadenceState::Off1 => Some(0),
            CadenceState::On2 | CadenceState::Off2 => Some(1),
            CadenceState::On3 | CadenceState::Off3 => Some(2),
            _ => None,
        }
    }

    fn on(pair: usize) -> Self {
        [CadenceState::On1, CadenceState::On2, CadenceState::On3][pair]
    }

    fn off(pair: usize) -> Self {
        [CadenceState::Off1, CadenceState::Off2, CadenceState::Off3][pair]
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Edge {
    On,
    Off,
}

/// How a sequence ends once the last segment is done.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Termination {
    PlayOnce,
    RepeatLast,
    RepeatAll,
}

/// Whether a detector keeps matching after the first complete cadence.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CadenceArm {
    Disabled,
    Once,
    Always,
}

/// Segment durations in ticks. A zero-length segment is not required.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Cadence {
    pub on1: u32,
    pub off1: u32,
    pub on2: u32,
    pub off2: u32,
    pub on3: u32,
    pub off3: u32,
}

impl Cadence {
    pub fn single(on: u32, off: u32) -> Self {
        Self {
            on1: on,
            off1: off,
            ..Default::default()
        }
    }

    pub fn on(&self, pair: usize) -> u32 {
        [self.on1, self.on2, self.on3][pair]
    }

    pub fn off(&self, pair: usize) -> u32 {
        [self.off1, self.off2, self.off3][pair]
    }

    /// The six segments in play order, on first.
    pub fn segments(&self) -> [u32; 6] {
        [self.on1, self.off1, self.on2, self.off2, self.on3, self.off3]
    }

    /// Convert durations given in milliseconds to ticks.
    pub fn from_ms(ms: Cadence, hz: u32) -> Self {
        let t = |v: u32| ms_to_ticks(v, hz);
        Self {
            on1: t(ms.on1),
            off1: t(ms.off1),
            on2: t(ms.on2),
            off2: t(ms.off2),
            on3: t(ms.on3),
            off3: t(ms.off3),
        }
    }
}

#[derive(Copy, Clone, Debug, Default)]
struct Window {
    min: Tick,
    nominal: Tick,
    max: Tick,
}

impl Window {
    fn arm(now: Tick, duration: u32, tolerance: u32) -> Self {
        let scale = |percent: u32| ((duration as u64 * percent as u64) / 100) as u32;
        Self {
            min: now.offset(scale(100 - tolerance)),
            nominal: now.offset(duration),
            max: now.offset(scale(100 + tolerance)),
        }
    }

    fn contains(&self, now: Tick) -> bool {
        !now.is_before(self.min) && !now.is_after(self.max)
    }
}

/// Outcome of feeding one edge.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CadenceStep {
    /// Disabled, or the edge repeats the current phase.
    Ignored,
    Advanced(CadenceState),
    /// The whole cadence matched; the machine is idle again.
    Matched,
    /// Out-of-window edge; the machine is idle again.
    Mismatch,
}

pub struct CadenceMachine {
    cadence: Cadence,
    tolerance: u32,
    arm: CadenceArm,
    state: CadenceState,
    /// on1, off1, on2, off2, on3, off3
    windows: [Window; 6],
}

impl CadenceMachine {
    pub fn new(cadence: Cadence, arm: CadenceArm) -> Self {
        Self {
            cadence,
            tolerance: TOLERANCE_PERCENT,
            arm,
            state: CadenceState::Idle,
            windows: [Window::default(); 6],
        }
    }

    pub fn disabled() -> Self {
        Self::new(Cadence::default(), CadenceArm::Disabled)
    }

    pub fn set_cadence(&mut self, cadence: Cadence, arm: CadenceArm) {
        self.cadence = cadence;
        self.arm = arm;
        self.reset();
    }

    pub fn cadence(&self) -> Cadence {
        self.cadence
    }

    pub fn state(&self) -> CadenceState {
        self.state
    }

    pub fn arm(&self) -> CadenceArm {
        self.arm
    }

    pub fn is_enabled(&self) -> bool {
        self.arm != CadenceArm::Disabled
    }

    pub fn reset(&mut self) {
        self.state = CadenceState::Idle;
    }

    /// Nominal end of the segment currently being timed.
    pub fn nominal_deadline(&self) -> Option<Tick> {
        let index = match self.state {
            CadenceState::Idle | CadenceState::Complete => return None,
            state => state.index() as usize - 1,
        };
        Some(self.windows[index].nominal)
    }

    pub fn edge(&mut self, edge: Edge, now: Tick) -> CadenceStep {
        if !self.is_enabled() {
            return CadenceStep::Ignored;
        }

        let state = self.state;
        match (state, edge) {
            (CadenceState::Idle, Edge::On) => self.enter(CadenceState::On1, now),

            (CadenceState::On1 | CadenceState::On2 | CadenceState::On3, Edge::Off) => {
                let pair = state.pair().unwrap_or(0);
                if self.cadence.on(pair) == 0 {
                    return self.complete();
                }
                if !self.windows[2 * pair].contains(now) {
                    return self.mismatch(edge, now);
                }
                if self.cadence.off(pair) == 0 {
                    self.complete()
                } else {
                    self.enter(CadenceState::off(pair), now)
                }
            }

            (CadenceState::Off1 | CadenceState::Off2 | CadenceState::Off3, Edge::On) => {
                let pair = state.pair().unwrap_or(0);
                if !self.windows[2 * pair + 1].contains(now) {
                    return self.mismatch(edge, now);
                }
                if pair == 2 || self.cadence.on(pair + 1) == 0 {
                    self.complete()
                } else {
                    self.enter(CadenceState::on(pair + 1), now)
                }
            }

            (CadenceState::Idle, Edge::Off)
            | (CadenceState::On1 | CadenceState::On2 | CadenceState::On3, Edge::On)
            | (CadenceState::Off1 | CadenceState::Off2 | CadenceState::Off3, Edge::Off) => {
                CadenceStep::Ignored
            }

            (CadenceState::Complete, _) => {
                self.reset();
                CadenceStep::Ignored
            }
        }
    }

    fn enter(&mut self, state: CadenceState, now: Tick) -> CadenceStep {
        let index = state.index() as usize - 1;
        let duration = self.cadence.segments()[index];
        self.windows[index] = Window::arm(now, duration, self.tolerance);
        self.state = state;
        CadenceStep::Advanced(state)
    }

    fn complete(&mut self) -> CadenceStep {
        self.state = CadenceState::Complete;
        // Consumed in the same call.
        self.state = CadenceState::Idle;
        if self.arm == CadenceArm::Once {
            self.arm = CadenceArm::Disabled;
        }
        CadenceStep::Matched
    }

    fn mismatch(&mut self, edge: Edge, now: Tick) -> CadenceStep {
        debug!("cadence mismatch: {edge:?} edge at {now:?} in {:?}", self.state);
        self.reset();
        CadenceStep::Mismatch
    }
}

///////////////////////////////////////////////////////////////////////
// DSP tone filters

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterOutcome {
    pub matched: bool,
    pub triggered: bool,
}

/// One of the four programmable DSP tone filters, sampled once per frame.
pub struct ToneFilter {
    history: u8,
    enabled: bool,
    machine: CadenceMachine,
}

impl Default for ToneFilter {
    fn default() -> Self {
        Self {
            history: 0,
            enabled: false,
            machine: CadenceMachine::disabled(),
        }
    }
}

impl ToneFilter {
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_cadence(&mut self, cadence: Cadence, arm: CadenceArm) {
        self.machine.set_cadence(cadence, arm);
    }

    pub fn is_active(&self) -> bool {
        self.enabled || self.machine.is_enabled()
    }

    pub fn machine(&self) -> &CadenceMachine {
        &self.machine
    }

    pub fn sample(&mut self, detected: bool, now: Tick) -> FilterOutcome {
        self.history = ((self.history << 1) | detected as u8) & 0x0f;
        let h = self.history;

        let edge = if h & 3 != 0 && h & 12 == 0 {
            Some(Edge::On)
        } else if h & 12 != 0 && h & 3 == 0 {
            Some(Edge::Off)
        } else {
            None
        };

        let matched = match edge {
            Some(edge) => self.machine.edge(edge, now) == CadenceStep::Matched,
            None => false,
        };

        FilterOutcome {
            matched,
            triggered: self.enabled && h & 1 != 0 && h & 2 == 0,
        }
    }
}
