use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A point on the card's monotonic tick counter.
///
/// The counter wraps; order comparisons are only meaningful between ticks
/// less than half the counter range apart, the same contract as the kernel's
/// `time_after()`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Tick(pub u32);

impl Tick {
    pub fn offset(self, ticks: u32) -> Tick {
        Tick(self.0.wrapping_add(ticks))
    }

    pub fn is_after(self, other: Tick) -> bool {
        (other.0.wrapping_sub(self.0) as i32) < 0
    }

    pub fn is_before(self, other: Tick) -> bool {
        other.is_after(self)
    }

    /// Ticks elapsed from `earlier` to `self`.
    pub fn since(self, earlier: Tick) -> u32 {
        self.0.wrapping_sub(earlier.0)
    }
}

/// Milliseconds to ticks at `hz`, rounding down.
pub fn ms_to_ticks(ms: u32, hz: u32) -> u32 {
    ((ms as u64 * hz as u64) / 1000) as u32
}

pub trait Clock: Send + Sync {
    fn now(&self) -> Tick;

    /// Ticks per second.
    fn hz(&self) -> u32;

    fn ticks_from_ms(&self, ms: u32) -> u32 {
        ms_to_ticks(ms, self.hz())
    }
}

pub type SharedClock = Arc<dyn Clock>;

/// Wall-clock ticks derived from `Instant`.
pub struct SystemClock {
    epoch: Instant,
    hz: u32,
}

impl SystemClock {
    pub fn new(hz: u32) -> Self {
        assert!(hz > 0);
        Self {
            epoch: Instant::now(),
            hz,
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Tick {
        let elapsed = self.epoch.elapsed();
        let ticks = elapsed.as_micros() * self.hz as u128 / 1_000_000;
        Tick(ticks as u32)
    }

    fn hz(&self) -> u32 {
        self.hz
    }
}

/// A clock that only moves when told to.
///
/// With a non-zero `step` every `now()` call also advances the clock, which
/// lets deadline-bounded busy waits run to expiry without real time passing.
pub struct ManualClock {
    now: AtomicU32,
    step: AtomicU32,
    hz: u32,
}

impl ManualClock {
    pub fn new(hz: u32) -> Self {
        Self::starting_at(hz, Tick(0))
    }

    pub fn starting_at(hz: u32, start: Tick) -> Self {
        Self {
            now: AtomicU32::new(start.0),
            step: AtomicU32::new(0),
            hz,
        }
    }

    pub fn advance(&self, ticks: u32) {
        self.now.fetch_add(ticks, Ordering::SeqCst);
    }

    pub fn set(&self, tick: Tick) {
        self.now.store(tick.0, Ordering::SeqCst);
    }

    pub fn set_step(&self, ticks: u32) {
        self.step.store(ticks, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Tick {
        let step = self.step.load(Ordering::SeqCst);
        Tick(self.now.fetch_add(step, Ordering::SeqCst))
    }

    fn hz(&self) -> u32 {
        self.hz
    }
}
