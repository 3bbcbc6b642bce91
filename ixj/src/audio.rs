//! Play and record frame exchange with the DSP.

use ringbuf::{Consumer, Producer, RingBuffer};

use crate::board::Board;
use crate::detector::DtmfDetector;
use crate::error::{Error, Result};
use crate::fsk::FskBuffer;

/// Queue size for each direction, in bytes.
const QUEUE_BYTES: usize = 8192;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Codec {
    Ulaw,
    Alaw,
    Linear16,
    Linear8,
}

impl Codec {
    pub fn dsp_code(self) -> u16 {
        match self {
            Codec::Ulaw     => 0x0,
            Codec::Alaw     => 0x1,
            Codec::Linear16 => 0x6,
            Codec::Linear8  => 0x7,
        }
    }

    pub fn bytes_per_ms(self) -> usize {
        match self {
            Codec::Linear16 => 16,
            _ => 8,
        }
    }
}

/// Codec and transport state that Caller-ID injection saves and restores.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AudioSettings {
    pub play_codec: Codec,
    pub record_codec: Codec,
    pub frame_ms: u8,
    pub aec_level: u8,
    pub playing: bool,
    pub recording: bool,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            play_codec: Codec::Ulaw,
            record_codec: Codec::Ulaw,
            frame_ms: 30,
            aec_level: 0,
            playing: false,
            recording: false,
        }
    }
}

pub struct AudioPath {
    settings: AudioSettings,
    play_in: Producer<u8>,
    play_out: Consumer<u8>,
    record_in: Producer<u8>,
    record_out: Consumer<u8>,
    dtmf: DtmfDetector,
}

impl Default for AudioPath {
    fn default() -> Self {
        let (play_in, play_out) = RingBuffer::new(QUEUE_BYTES).split();
        let (record_in, record_out) = RingBuffer::new(QUEUE_BYTES).split();
        Self {
            settings: AudioSettings::default(),
            play_in,
            play_out,
            record_in,
            record_out,
            dtmf: DtmfDetector::new(),
        }
    }
}

impl AudioPath {
    pub fn settings(&self) -> AudioSettings {
        self.settings
    }

    pub fn play_frame_bytes(&self) -> usize {
        self.settings.play_codec.bytes_per_ms() * self.settings.frame_ms as usize
    }

    pub fn record_frame_bytes(&self) -> usize {
        self.settings.record_codec.bytes_per_ms() * self.settings.frame_ms as usize
    }

    ///////////////////////////////////////////////////////////////////
    // Settings

    pub fn set_base_frame(&mut self, board: &Board, ms: u8) -> Result<()> {
        if !matches!(ms, 10 | 20 | 30) {
            return Err(Error::Invalid("frame size"));
        }
        board.dsp.base_frame(ms * 8)?;
        self.settings.frame_ms = ms;
        Ok(())
    }

    pub fn set_play_codec(&mut self, board: &Board, codec: Codec) -> Result<()> {
        board.dsp.play_codec(codec.dsp_code())?;
        self.settings.play_codec = codec;
        Ok(())
    }

    pub fn set_record_codec(&mut self, board: &Board, codec: Codec) -> Result<()> {
        board.dsp.record_codec(codec.dsp_code())?;
        self.settings.record_codec = codec;
        Ok(())
    }

    pub fn set_aec(&mut self, board: &Board, level: u8) -> Result<()> {
        board.dsp.aec_level(level)?;
        self.settings.aec_level = level;
        Ok(())
    }

    pub fn play_start(&mut self, board: &Board) -> Result<()> {
        board.dsp.play_start()?;
        self.settings.playing = true;
        Ok(())
    }

    pub fn play_stop(&mut self, board: &Board) -> Result<()> {
        self.settings.playing = false;
        board.dsp.play_stop()
    }

    pub fn record_start(&mut self, board: &Board) -> Result<()> {
        board.dsp.record_start()?;
        self.settings.recording = true;
        self.dtmf = DtmfDetector::new();
        Ok(())
    }

    pub fn record_stop(&mut self, board: &Board) -> Result<()> {
        self.settings.recording = false;
        board.dsp.record_stop()
    }

    ///////////////////////////////////////////////////////////////////
    // User side

    /// Queue play data. Whatever doesn't fit is dropped.
    pub fn write(&mut self, data: &[u8]) -> usize {
        self.play_in.push_slice(data)
    }

    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        self.record_out.pop_slice(buf)
    }

    pub fn queued_play_bytes(&self) -> usize {
        self.play_out.len()
    }

    ///////////////////////////////////////////////////////////////////
    // DSP side

    /// Exchange at most one record and one play frame with the DSP.
    ///
    /// While `cid` is given its frames take the place of queued play data.
    /// Returns any DTMF digits found in linear record data.
    pub fn service(&mut self, board: &Board, cid: Option<&mut FskBuffer>) -> Result<Vec<char>> {
        let hsr = board.dsp.hsr();
        let mut digits = Vec::new();

        if self.settings.recording && hsr.rxrdy() {
            self.read_frame(board, &mut digits);
        }

        if hsr.txrdy() {
            if let Some(fsk) = cid {
                for sample in fsk.next_frame() {
                    board.dsp.write_sample(sample);
                }
            } else if self.settings.playing {
                self.write_frame(board);
            }
        }

        Ok(digits)
    }

    fn read_frame(&mut self, board: &Board, digits: &mut Vec<char>) {
        let linear = self.settings.record_codec == Codec::Linear16;
        let words = self.record_frame_bytes() / 2;
        let mut frame = Vec::with_capacity(words * 2);

        for _ in 0..words {
            let sample = board.dsp.read_sample();
            frame.extend_from_slice(&sample.to_le_bytes());
            if linear {
                if let Some(digit) = self.dtmf.advance(sample as f32 / 32768.0) {
                    digits.push(digit);
                }
            }
        }

        self.record_in.push_slice(&frame);
    }

    fn write_frame(&mut self, board: &Board) {
        let mut frame = vec![0u8; self.play_frame_bytes()];
        self.play_out.pop_slice(&mut frame);
        for pair in frame.chunks_exact(2) {
            board.dsp.write_sample(i16::from_le_bytes([pair[0], pair[1]]));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use crate::clock::ManualClock;
    use crate::generator::DualToneGenerator;
    use crate::hook::CardKind;
    use crate::sim::SimCard;

    fn setup() -> (Arc<SimCard>, Board) {
        let sim = Arc::new(SimCard::new(CardKind::PhoneJackLite, 0x300, 0x310));
        let clock = ManualClock::new(1000);
        clock.set_step(1);
        let board = Board::new(CardKind::PhoneJackLite, sim.clone(), 0x300, 0x310, Arc::new(clock), 600);
        (sim, board)
    }

    #[test]
    fn play_frames_come_from_the_queue() {
        let (sim, board) = setup();
        let mut audio = AudioPath::default();
        audio.set_play_codec(&board, Codec::Linear16).unwrap();
        audio.set_base_frame(&board, 10).unwrap();
        audio.play_start(&board).unwrap();

        let samples: Vec<u8> = (1..=100i16).flat_map(|s| s.to_le_bytes()).collect();
        assert_eq!(audio.write(&samples), 200);

        audio.service(&board, None).unwrap();
        let played = sim.take_played();
        assert_eq!(played.len(), 80);
        assert_eq!(played[0], 1);
        assert_eq!(played[79], 80);

        // Underrun pads with silence.
        audio.service(&board, None).unwrap();
        let played = sim.take_played();
        assert_eq!(&played[..20], &(81..=100).collect::<Vec<i16>>()[..]);
        assert!(played[20..].iter().all(|&s| s == 0));
    }

    #[test]
    fn caller_id_frames_replace_play_data() {
        let (sim, board) = setup();
        let mut audio = AudioPath::default();
        audio.play_start(&board).unwrap();
        audio.write(&[0x55; 64]);

        let mut fsk = FskBuffer::new(1000);
        fsk.push(1234);
        audio.service(&board, Some(&mut fsk)).unwrap();

        let played = sim.take_played();
        assert_eq!(played.len(), 240);
        assert_eq!(played[0], 1234);
        assert_eq!(audio.queued_play_bytes(), 64);
    }

    #[test]
    fn linear_record_data_feeds_dtmf() {
        let (sim, board) = setup();
        let mut audio = AudioPath::default();
        audio.set_record_codec(&board, Codec::Linear16).unwrap();
        audio.record_start(&board).unwrap();

        let mut generator = DualToneGenerator::new(941.0, 1633.0).with_amplitude(0.8);
        sim.queue_record(&generator.take_pcm(960));

        let mut digits = Vec::new();
        for _ in 0..4 {
            digits.extend(audio.service(&board, None).unwrap());
        }
        assert_eq!(digits, vec!['D']);

        let mut buf = [0u8; 4096];
        assert_eq!(audio.read(&mut buf), 1920);
    }

    #[test]
    fn odd_frame_sizes_are_rejected() {
        let (_sim, board) = setup();
        let mut audio = AudioPath::default();
        assert!(matches!(audio.set_base_frame(&board, 25), Err(Error::Invalid(_))));
        assert_eq!(audio.settings().frame_ms, 30);
    }
}
