//! Bell 202 FSK modulator for Caller-ID.
//!
//! The waveform tables hold one bit period (20 samples at 24 kHz) of the
//! mark (1200 Hz) and space (2200 Hz) tones, for each of six starting
//! phases. Taking every third sample decimates to the 8 kHz play rate, and
//! the leftover sub-bit offset carries into the next bit so that bit
//! boundaries fall between output samples the way 1200 baud demands. A
//! space bit ends 5/6 of a cycle further on than it started, which is what
//! the phase index tracks; a mark bit ends where it began.

/// Samples per bit at 24 kHz.
const CELL: usize = 20;
/// 24 kHz to 8 kHz.
const STRIDE: usize = 3;
/// Frame of silence padding, and the playback unit.
pub const FRAME_SAMPLES: usize = 240;
/// Silence after the message.
pub const TRAILER_SAMPLES: usize = 720;
pub const DEFAULT_CAPACITY: usize = 8000;

#[rustfmt::skip]
static FSK: [[[i16; CELL]; 6]; 2] = [
    // Space, 2200 Hz.
    [
        [0, 4462, 7484, 8091, 6088, 2120, -2531, -6366, -8147, -7299, -4096, 429, 4815, 7648, 8013, 5793, 1703, -2936, -6627, -8181],
        [-7094, -3719, 856, 5155, 7791, 7913, 5482, 1282, -3332, -6870, -8192, -6870, -3332, 1282, 5482, 7913, 7791, 5155, 856, -3719],
        [-7094, -8181, -6627, -2936, 1703, 5793, 8013, 7648, 4815, 429, -4096, -7299, -8147, -6366, -2531, 2120, 6088, 8091, 7484, 4462],
        [0, -4462, -7484, -8091, -6088, -2120, 2531, 6366, 8147, 7299, 4096, -429, -4815, -7648, -8013, -5793, -1703, 2936, 6627, 8181],
        [7094, 3719, -856, -5155, -7791, -7913, -5482, -1282, 3332, 6870, 8192, 6870, 3332, -1282, -5482, -7913, -7791, -5155, -856, 3719],
        [7094, 8181, 6627, 2936, -1703, -5793, -8013, -7648, -4815, -429, 4096, 7299, 8147, 6366, 2531, -2120, -6088, -8091, -7484, -4462],
    ],
    // Mark, 1200 Hz.
    [
        [0, 2531, 4815, 6627, 7791, 8192, 7791, 6627, 4815, 2531, 0, -2531, -4815, -6627, -7791, -8192, -7791, -6627, -4815, -2531],
        [-7094, -5482, -3332, -856, 1703, 4096, 6088, 7484, 8147, 8013, 7094, 5482, 3332, 856, -1703, -4096, -6088, -7484, -8147, -8013],
        [-7094, -8013, -8147, -7484, -6088, -4096, -1703, 856, 3332, 5482, 7094, 8013, 8147, 7484, 6088, 4096, 1703, -856, -3332, -5482],
        [0, -2531, -4815, -6627, -7791, -8192, -7791, -6627, -4815, -2531, 0, 2531, 4815, 6627, 7791, 8192, 7791, 6627, 4815, 2531],
        [7094, 5482, 3332, 856, -1703, -4096, -6088, -7484, -8147, -8013, -7094, -5482, -3332, -856, 1703, 4096, 6088, 7484, 8147, 8013],
        [7094, 8013, 8147, 7484, 6088, 4096, 1703, -856, -3332, -5482, -7094, -8013, -8147, -7484, -6088, -4096, -1703, 856, 3332, 5482],
    ],
];

/// Anything that accepts a serial bit stream.
pub trait BitSink {
    fn write_bit(&mut self, bit: bool);

    /// Start bit, eight data bits LSB first, stop bit.
    fn write_byte(&mut self, byte: u8) {
        self.write_bit(false);
        for i in 0..8 {
            self.write_bit(byte & (1 << i) != 0);
        }
        self.write_bit(true);
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.write_byte(byte);
        }
    }
}

/// Channel seizure: alternating bits, then a run of marks.
pub fn write_seizure<S: BitSink>(sink: &mut S, alternations: usize, marks: usize) {
    for _ in 0..alternations {
        sink.write_bit(false);
        sink.write_bit(true);
    }
    for _ in 0..marks {
        sink.write_bit(true);
    }
}

/// Rendered FSK samples waiting for playback.
///
/// Storage is allocated on first write and released by [`free`](Self::free).
/// Writes stop one short of capacity; the rest of a burst is dropped.
pub struct FskBuffer {
    samples: Vec<i16>,
    capacity: usize,
    play: usize,
    phase: usize,
    offset: usize,
}

impl FskBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Vec::new(),
            capacity,
            play: 0,
            phase: 0,
            offset: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_allocated(&self) -> bool {
        self.samples.capacity() != 0
    }

    /// The write cursor.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Drop rendered samples and rewind both cursors and the modulator phase.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.play = 0;
        self.phase = 0;
        self.offset = 0;
    }

    pub fn free(&mut self) {
        self.clear();
        self.samples = Vec::new();
    }

    /// Append one sample. Returns false once the buffer is full.
    pub fn push(&mut self, sample: i16) -> bool {
        if !self.is_allocated() {
            self.samples.reserve_exact(self.capacity);
        }
        if self.samples.len() + 1 < self.capacity {
            self.samples.push(sample);
            true
        } else {
            false
        }
    }

    /// Pad with silence to the next frame boundary, then add the trailer.
    pub fn pad(&mut self) {
        let partial = self.samples.len() % FRAME_SAMPLES;
        let fill = if partial == 0 { 0 } else { FRAME_SAMPLES - partial };
        for _ in 0..fill + TRAILER_SAMPLES {
            self.push(0);
        }
    }

    /// The playback cursor.
    pub fn played(&self) -> usize {
        self.play
    }

    pub fn is_drained(&self) -> bool {
        self.play >= self.samples.len()
    }

    /// Take the next frame for playback; short frames are filled with silence.
    pub fn next_frame(&mut self) -> [i16; FRAME_SAMPLES] {
        let mut frame = [0; FRAME_SAMPLES];
        let end = (self.play + FRAME_SAMPLES).min(self.samples.len());
        let n = end.saturating_sub(self.play);
        frame[..n].copy_from_slice(&self.samples[self.play..end]);
        self.play += FRAME_SAMPLES;
        frame
    }

    pub fn rewind(&mut self) {
        self.play = 0;
    }
}

impl BitSink for FskBuffer {
    fn write_bit(&mut self, bit: bool) {
        let table = &FSK[bit as usize][self.phase];
        while self.offset < CELL {
            self.push(table[self.offset]);
            self.offset += STRIDE;
        }
        self.offset %= CELL;
        if !bit {
            self.phase = (self.phase + 1) % 6;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records bits and decodes them with async serial framing.
    #[derive(Default)]
    struct BitRecorder {
        bits: Vec<bool>,
    }

    impl BitSink for BitRecorder {
        fn write_bit(&mut self, bit: bool) {
            self.bits.push(bit);
        }
    }

    impl BitRecorder {
        fn decode(&self) -> Vec<u8> {
            self.bits
                .chunks(10)
                .map(|frame| {
                    assert!(!frame[0], "start bit");
                    assert!(frame[9], "stop bit");
                    frame[1..9]
                        .iter()
                        .enumerate()
                        .fold(0u8, |byte, (i, &b)| byte | ((b as u8) << i))
                })
                .collect()
        }
    }

    #[test]
    fn byte_framing_round_trips_for_every_value() {
        for value in 0..=255u8 {
            let mut recorder = BitRecorder::default();
            recorder.write_byte(value);
            assert_eq!(recorder.bits.len(), 10);
            assert_eq!(recorder.decode(), vec![value]);
        }
    }

    #[test]
    fn three_bits_make_twenty_samples() {
        let mut fsk = FskBuffer::new(DEFAULT_CAPACITY);
        fsk.write_bit(true);
        assert_eq!(fsk.len(), 7);
        fsk.write_bit(true);
        assert_eq!(fsk.len(), 14);
        fsk.write_bit(true);
        assert_eq!(fsk.len(), 20);
        fsk.write_bit(true);
        assert_eq!(fsk.len(), 27);
    }

    #[test]
    fn space_bit_advances_phase() {
        let mut fsk = FskBuffer::new(DEFAULT_CAPACITY);
        fsk.write_bit(false);
        assert_eq!(&fsk.samples()[..7], &[0, 8091, -2531, -7299, 4815, 5793, -6627]);

        // Second bit starts one table sample in, from phase 1.
        fsk.write_bit(true);
        assert_eq!(fsk.samples()[7], FSK[1][1][1]);
    }

    #[test]
    fn writes_stop_one_short_of_capacity() {
        let mut fsk = FskBuffer::new(DEFAULT_CAPACITY);
        let accepted = (0..8200).filter(|&i| fsk.push(i as i16)).count();
        assert_eq!(accepted, 7999);
        assert_eq!(fsk.len(), 7999);
        assert_eq!(fsk.samples()[7998], 7998);
    }

    #[test]
    fn bits_past_capacity_are_dropped() {
        let mut fsk = FskBuffer::new(100);
        for _ in 0..100 {
            fsk.write_byte(0x55);
        }
        assert_eq!(fsk.len(), 99);
    }

    #[test]
    fn pad_reaches_frame_boundary_plus_trailer() {
        let mut fsk = FskBuffer::new(DEFAULT_CAPACITY);
        fsk.write_byte(0xa5);
        let written = fsk.len();
        fsk.pad();
        assert_eq!(fsk.len(), FRAME_SAMPLES + TRAILER_SAMPLES);
        assert!(fsk.samples()[written..].iter().all(|&s| s == 0));
    }

    #[test]
    fn playback_walks_frames_and_free_releases() {
        let mut fsk = FskBuffer::new(DEFAULT_CAPACITY);
        for i in 0..300 {
            fsk.push(i as i16 + 1);
        }
        let first = fsk.next_frame();
        assert_eq!(first[0], 1);
        assert!(!fsk.is_drained());
        let second = fsk.next_frame();
        assert_eq!(second[59], 300);
        assert_eq!(second[60], 0);
        assert!(fsk.is_drained());

        fsk.free();
        assert!(!fsk.is_allocated());
        assert_eq!(fsk.played(), 0);
    }
}
