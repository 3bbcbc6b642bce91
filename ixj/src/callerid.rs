//! Outbound Caller-ID: MDMF message assembly, FSK rendering, and the audio
//! setup around injecting it into the play path.

use ixj_pac::register::SlicState;
use log::debug;

use crate::audio::{AudioPath, AudioSettings, Codec};
use crate::board::{Board, Pld};
use crate::cadence::Termination;
use crate::clock::Tick;
use crate::error::Result;
use crate::fsk::{write_seizure, BitSink, FskBuffer};
use crate::tone::{ToneCadence, ToneElement};

/// Multiple data message format.
pub const MDMF_TYPE: u8 = 0x80;
pub const PARAM_DATE_TIME: u8 = 0x01;
pub const PARAM_NUMBER: u8 = 0x02;
pub const PARAM_NAME: u8 = 0x07;

pub const FRAME_MS: u8 = 30;
pub const PLAY_VOLUME: u16 = 0x1b;
/// Bursts longer than this were sent on-hook; the SLIC goes back to standby.
pub const LONG_BURST: usize = 5000;

/// Subscriber alerting signal tone slot, 440 Hz.
pub const SAS_TONE: u8 = 12;
/// CPE alerting signal tone slot, 2130 + 2750 Hz.
pub const CAS_TONE: u8 = 13;
/// How long the far end gets to acknowledge a CAS.
pub const ACK_WAIT_MS: u32 = 500;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallerId {
    pub month: String,
    pub day: String,
    pub hour: String,
    pub min: String,
    pub number: String,
    pub name: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CidKind {
    /// Sent between rings, handset down.
    OnHook,
    /// Caller-ID on call waiting, sent during a call after the alert tones.
    Waiting,
}

fn field(s: &str, max: usize) -> &[u8] {
    let bytes = s.as_bytes();
    &bytes[..bytes.len().min(max)]
}

/// Two's complement of the byte sum.
pub fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |sum, &b| sum.wrapping_add(b));
    (sum ^ 0xff).wrapping_add(1)
}

impl CallerId {
    /// The MDMF message: type, length, date/time, number and name
    /// parameters, checksum.
    pub fn mdmf(&self) -> Vec<u8> {
        let mut date_time = Vec::with_capacity(8);
        for part in [&self.month, &self.day, &self.hour, &self.min] {
            date_time.extend_from_slice(field(part, 2));
        }
        let number = field(&self.number, 10);
        let name = field(&self.name, 79);

        let length = date_time.len() + number.len() + name.len() + 6;

        let mut message = Vec::with_capacity(length + 3);
        message.push(MDMF_TYPE);
        message.push(length as u8);
        for (param, value) in [(PARAM_DATE_TIME, &date_time[..]), (PARAM_NUMBER, number), (PARAM_NAME, name)] {
            message.push(param);
            message.push(value.len() as u8);
            message.extend_from_slice(value);
        }
        message.push(checksum(&message));
        message
    }

    /// Render seizure, message and trailing silence into `fsk`, replacing
    /// whatever it held.
    pub fn render(&self, fsk: &mut FskBuffer, kind: CidKind) {
        fsk.clear();
        match kind {
            CidKind::OnHook => write_seizure(fsk, 150, 180),
            CidKind::Waiting => write_seizure(fsk, 0, 80),
        }
        fsk.write_bytes(&self.mdmf());
        fsk.pad();
        debug!("rendered {kind:?} caller ID for {:?}: {} samples", self.number, fsk.len());
    }
}

/// Audio state saved while Caller-ID owns the play path.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AudioSnapshot {
    settings: AudioSettings,
    play_volume: u16,
    record_volume: u16,
}

/// Save the audio setup and switch the play path over to 16-bit linear at
/// 30 ms frames. With `listen`, recording is also switched to linear so the
/// DTMF acknowledgment can be heard.
pub fn pre_cid(board: &Board, audio: &mut AudioPath, listen: bool) -> Result<AudioSnapshot> {
    let snapshot = AudioSnapshot {
        settings: audio.settings(),
        play_volume: board.dsp.play_volume()?,
        record_volume: board.dsp.record_volume()?,
    };

    audio.play_stop(board)?;
    board.dsp.tone_play(0)?;

    audio.set_base_frame(board, FRAME_MS)?;
    audio.set_play_codec(board, Codec::Linear16)?;
    board.dsp.set_play_volume(PLAY_VOLUME)?;
    audio.play_start(board)?;

    if listen {
        audio.record_stop(board)?;
        audio.set_record_codec(board, Codec::Linear16)?;
        audio.record_start(board)?;
    }

    Ok(snapshot)
}

/// Undo [`pre_cid`]. `burst` is the length of what was sent.
pub fn post_cid(
    board: &Board,
    pld: &mut Pld,
    audio: &mut AudioPath,
    snapshot: AudioSnapshot,
    burst: usize,
) -> Result<()> {
    let saved = snapshot.settings;

    audio.play_stop(board)?;
    if burst > LONG_BURST {
        pld.set_slic_state(board, SlicState::Standby);
    }

    audio.set_base_frame(board, saved.frame_ms)?;
    audio.set_play_codec(board, saved.play_codec)?;
    audio.set_aec(board, saved.aec_level)?;
    board.dsp.set_play_volume(snapshot.play_volume)?;

    if audio.settings().recording && !saved.recording {
        audio.record_stop(board)?;
    }
    audio.set_record_codec(board, saved.record_codec)?;
    board.dsp.set_record_volume(snapshot.record_volume)?;

    if saved.recording && !audio.settings().recording {
        audio.record_start(board)?;
    }
    if saved.playing {
        audio.play_start(board)?;
    }
    Ok(())
}

/// SAS then CAS, played once.
pub fn alert_tones() -> ToneCadence {
    ToneCadence {
        elements: vec![
            ToneElement {
                index: SAS_TONE,
                on_units: 1200,
                off_units: 160,
                freq0: 440,
                gain0: 0x1a,
                freq1: 0,
                gain1: 0,
            },
            ToneElement {
                index: CAS_TONE,
                on_units: 320,
                off_units: 0,
                freq0: 2130,
                gain0: 0x1a,
                freq1: 2750,
                gain1: 0x1a,
            },
        ],
        termination: Termination::PlayOnce,
    }
}

/// Where an outbound Caller-ID transmission stands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CidPhase {
    Idle,
    /// Call waiting: alert tones playing.
    Alerting,
    /// Call waiting: tones done, listening for 'A' or 'D' until the deadline.
    AwaitingAck(Tick),
    Playing(CidKind),
    /// Over, but the saved audio setup of a `burst` samples long
    /// transmission still has to go back.
    Restoring(usize),
}

/// The per-card Caller-ID session.
pub struct CidSession {
    pub phase: CidPhase,
    pub snapshot: Option<AudioSnapshot>,
    pub pending: Option<CallerId>,
    /// Result of the last call-waiting attempt: acknowledged or not.
    pub outcome: Option<bool>,
}

impl Default for CidSession {
    fn default() -> Self {
        Self {
            phase: CidPhase::Idle,
            snapshot: None,
            pending: None,
            outcome: None,
        }
    }
}

impl CidSession {
    pub fn is_playing(&self) -> bool {
        matches!(self.phase, CidPhase::Playing(_))
    }

    pub fn is_idle(&self) -> bool {
        self.phase == CidPhase::Idle
    }
}
