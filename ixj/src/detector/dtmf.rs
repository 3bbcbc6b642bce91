//! DTMF digit detection on 8 kHz linear samples.
//!
//! Row and column tones each get a bank of Goertzel filters. The row bank
//! runs 212-sample blocks in two phases half a block apart, so that a row
//! decision is ready every time the 106-sample column block ends. Each block
//! yields at most one key, and a short debounce turns block decisions into
//! key presses.

use std::f32::consts::TAU;
use std::ops::RangeInclusive;

use num_complex::Complex;

pub const SAMPLE_RATE_HZ: f32 = 8000.0;

pub const LOW_GROUP_HZ:  [f32; 4] = [ 697.0,  770.0,  852.0,  941.0];
pub const HIGH_GROUP_HZ: [f32; 4] = [1209.0, 1336.0, 1477.0, 1633.0];

pub const KEYPAD: [[char; 4]; 4] = [
    ['1', '2', '3', 'A'],
    ['4', '5', '6', 'B'],
    ['7', '8', '9', 'C'],
    ['*', '0', '#', 'D'],
];

const ROW_BLOCK: usize = 212;
const COLUMN_BLOCK: usize = 106;

/// Levels a tone must reach, in dB against a full-scale sine.
const PRESENT: RangeInclusive<f32> = -25.0..=0.0;
/// How far the strongest tone of a group must stand above the next one.
const DOMINANCE_DB: f32 = 10.0;
/// Column level minus row level.
const TWIST: RangeInclusive<f32> = -8.0..=4.0;

/// Goertzel filters for `K` tones over blocks of `n` samples that all end on
/// the same sample.
struct ToneBank<const K: usize> {
    feedback: [f32; K],
    twiddle: [Complex<f32>; K],
    s1: [f32; K],
    s2: [f32; K],
    n: usize,
    count: usize,
}

impl<const K: usize> ToneBank<K> {
    /// `offset` samples of the first block count as already seen.
    fn new(tones_hz: [f32; K], n: usize, offset: usize) -> Self {
        let omega = tones_hz.map(|hz| TAU * hz / SAMPLE_RATE_HZ);
        Self {
            feedback: omega.map(|w| 2.0 * w.cos()),
            twiddle: omega.map(|w| Complex::from_polar(1.0, -w)),
            s1: [0.0; K],
            s2: [0.0; K],
            n,
            count: offset,
        }
    }

    /// Feed a sample. When it closes a block, returns each tone's level in dB
    /// (a sine of amplitude A reads 20·log10(A/2)) and starts the next block.
    fn push(&mut self, x: f32) -> Option<[f32; K]> {
        for k in 0..K {
            let s0 = x + self.feedback[k] * self.s1[k] - self.s2[k];
            self.s2[k] = self.s1[k];
            self.s1[k] = s0;
        }
        self.count += 1;
        if self.count < self.n {
            return None;
        }

        let n = self.n as f32;
        let levels: [f32; K] = std::array::from_fn(|k| {
            let y = Complex::from(self.s1[k]) - self.twiddle[k] * self.s2[k];
            20.0 * (y.norm() / n).log10()
        });
        self.s1 = [0.0; K];
        self.s2 = [0.0; K];
        self.count = 0;
        Some(levels)
    }
}

/// The index of the one tone that clearly stands out in a group.
fn dominant(levels: [f32; 4]) -> Option<(usize, f32)> {
    let mut ranked = [0, 1, 2, 3].map(|i| (i, levels[i]));
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    let (index, level) = ranked[0];
    (PRESENT.contains(&level) && level - ranked[1].1 >= DOMINANCE_DB).then_some((index, level))
}

fn decide(rows: [f32; 4], columns: [f32; 4]) -> Option<char> {
    let (row, row_level) = dominant(rows)?;
    let (column, column_level) = dominant(columns)?;
    TWIST
        .contains(&(column_level - row_level))
        .then(|| KEYPAD[row][column])
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Debounce {
    Idle,
    Confirming,
    Latched,
}

/// Block decisions in, key presses out. A key is pressed once it holds for
/// three blocks running. After a press, or a key that changed mid-way,
/// nothing more is reported until two empty blocks go by.
struct KeyDebounce {
    state: Debounce,
    previous: Option<char>,
}

impl KeyDebounce {
    fn new() -> Self {
        Self {
            state: Debounce::Idle,
            previous: None,
        }
    }

    fn feed(&mut self, decision: Option<char>) -> Option<char> {
        let repeat = decision.is_some() && decision == self.previous;
        let quiet = decision.is_none() && self.previous.is_none();
        self.previous = decision;

        use Debounce::*;
        let (state, press) = match self.state {
            Idle if repeat => (Confirming, None),
            Idle => (Idle, None),
            _ if quiet => (Idle, None),
            Confirming if repeat => (Latched, decision),
            Confirming | Latched => (Latched, None),
        };
        self.state = state;
        press
    }
}

pub struct DtmfDetector {
    rows: [ToneBank<4>; 2],
    columns: ToneBank<4>,
    debounce: KeyDebounce,
}

impl Default for DtmfDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl DtmfDetector {
    pub fn new() -> Self {
        Self {
            rows: [
                ToneBank::new(LOW_GROUP_HZ, ROW_BLOCK, 0),
                ToneBank::new(LOW_GROUP_HZ, ROW_BLOCK, ROW_BLOCK / 2),
            ],
            columns: ToneBank::new(HIGH_GROUP_HZ, COLUMN_BLOCK, 0),
            debounce: KeyDebounce::new(),
        }
    }

    /// Feed one sample, full scale 1.0. Returns a digit once per key press.
    pub fn advance(&mut self, x: f32) -> Option<char> {
        let mut rows = None;
        for bank in &mut self.rows {
            rows = bank.push(x).or(rows);
        }
        let columns = self.columns.push(x)?;
        let decision = rows.and_then(|rows| decide(rows, columns));
        self.debounce.feed(decision)
    }
}
