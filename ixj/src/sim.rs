//! A behavioural model of a card's two port windows.
//!
//! The model answers the DSP command handshake (with the handful of
//! commands whose answers matter: frame count, GPIO, filter status,
//! volumes), moves PCM samples through play and record FIFOs, and behind
//! the PLD models the SLIC, the PhoneCARD cable sense and the DAA's SCI
//! transfers with latched interrupts. Tests and the `simulate` tool flip
//! the line-side inputs through the `set_*` methods.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use ixj_pac::device::{Addressing, PortAddress, PortIo, PortValue, Window};
use ixj_pac::register::*;
use log::trace;

use crate::dsp::cmd;
use crate::hook::CardKind;

const DEFAULT_FRAME_SAMPLES: usize = 240;
/// Command words kept for [`SimCard::commands`].
pub const COMMAND_LOG: usize = 4096;
/// Ten seconds of played audio kept for [`SimCard::take_played`].
pub const PLAYED_LOG: usize = 80_000;

/// The newest `capacity` entries pushed.
struct BoundedLog<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedLog<T> {
    fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    fn push(&mut self, entry: T) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    fn take(&mut self) -> Vec<T> {
        self.entries.drain(..).collect()
    }
}

impl<T: Clone> BoundedLog<T> {
    fn to_vec(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }
}

struct DspModel {
    command_low: u8,
    ssr: u16,
    status_ready: bool,
    stall_control: bool,
    stall_status: bool,
    /// Command collecting argument words, and how many are still due.
    collecting: Option<(u16, usize)>,
    arguments: Vec<u16>,
    commands: BoundedLog<u16>,

    frame_count: u16,
    filter_select: usize,
    filter_detect: [bool; 4],
    play_volume: u16,
    record_volume: u16,
    tone: u8,
    gpio: GPIO,

    playing: bool,
    recording: bool,
    frame_samples: usize,
    pcm_out_low: u8,
    pcm_in_high: u8,
    played: BoundedLog<i16>,
    record: VecDeque<i16>,
}

impl Default for DspModel {
    fn default() -> Self {
        Self {
            command_low: 0,
            ssr: 0,
            status_ready: false,
            stall_control: false,
            stall_status: false,
            collecting: None,
            arguments: Vec::new(),
            commands: BoundedLog::new(COMMAND_LOG),
            frame_count: 0,
            filter_select: 0,
            filter_detect: [false; 4],
            play_volume: 0x100,
            record_volume: 0x100,
            tone: 0,
            gpio: GPIO::new(),
            playing: false,
            recording: false,
            frame_samples: DEFAULT_FRAME_SAMPLES,
            pcm_out_low: 0,
            pcm_in_high: 0,
            played: BoundedLog::new(PLAYED_LOG),
            record: VecDeque::new(),
        }
    }
}

struct DaaModel {
    mode: DaaMode,
    id: u8,
    sci_stall: bool,
    data_low: u8,
    data_high: u8,
    flag: bool,
    ring_latched: bool,
    cadence_latched: bool,
    caller_id_latched: bool,
    ring_line: bool,
    line_voltage: bool,
}

impl Default for DaaModel {
    fn default() -> Self {
        Self {
            mode: DaaMode::Sleep,
            id: DAA_ID_BYTE,
            sci_stall: false,
            data_low: 0,
            data_high: 0,
            flag: false,
            ring_latched: false,
            cadence_latched: false,
            caller_id_latched: false,
            ring_line: false,
            line_voltage: false,
        }
    }
}

struct SimState {
    dsp: DspModel,
    daa: DaaModel,
    scrw: SCRW,
    slicw: SLICW,
    slic_state: SlicState,
    off_hook: bool,
    pots_pstn_loop: bool,
    cable: Option<CableType>,
}

pub struct SimCard {
    kind: CardKind,
    dsp_base: PortAddress,
    xilinx_base: PortAddress,
    state: Mutex<SimState>,
}

impl SimCard {
    pub fn new(kind: CardKind, dsp_base: PortAddress, xilinx_base: PortAddress) -> Self {
        Self {
            kind,
            dsp_base,
            xilinx_base,
            state: Mutex::new(SimState {
                dsp: DspModel::default(),
                daa: DaaModel::default(),
                scrw: SCRW::new(),
                slicw: SLICW::new(),
                slic_state: SlicState::OpenCircuit,
                off_hook: false,
                pots_pstn_loop: false,
                cable: None,
            }),
        }
    }

    pub fn kind(&self) -> CardKind {
        self.kind
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    ///////////////////////////////////////////////////////////////////
    // Line side

    pub fn set_off_hook(&self, off_hook: bool) {
        self.state().off_hook = off_hook;
    }

    pub fn set_pots_pstn_loop(&self, closed: bool) {
        self.state().pots_pstn_loop = closed;
    }

    /// PhoneCARD cable; `None` is unplugged.
    pub fn set_cable(&self, cable: Option<CableType>) {
        self.state().cable = cable;
    }

    pub fn set_filter_detect(&self, filter: usize, detected: bool) {
        self.state().dsp.filter_detect[filter] = detected;
    }

    /// Ring voltage on the PSTN line. Each rising edge latches a ring
    /// interrupt.
    pub fn set_ring_line(&self, ringing: bool) {
        let mut state = self.state();
        if ringing && !state.daa.ring_line {
            state.daa.ring_latched = true;
            state.daa.flag = true;
        }
        state.daa.ring_line = ringing;
    }

    pub fn set_line_voltage(&self, present: bool) {
        let mut state = self.state();
        if present != state.daa.line_voltage {
            state.daa.flag = true;
        }
        state.daa.line_voltage = present;
    }

    pub fn raise_caller_id(&self) {
        let mut state = self.state();
        state.daa.caller_id_latched = true;
        state.daa.flag = true;
    }

    pub fn raise_cadence(&self) {
        let mut state = self.state();
        state.daa.cadence_latched = true;
        state.daa.flag = true;
    }

    pub fn set_daa_id(&self, id: u8) {
        self.state().daa.id = id;
    }

    /// Hold SCI low so DAA transfers never complete.
    pub fn set_sci_stall(&self, stall: bool) {
        self.state().daa.sci_stall = stall;
    }

    pub fn set_stall_control(&self, stall: bool) {
        self.state().dsp.stall_control = stall;
    }

    pub fn set_stall_status(&self, stall: bool) {
        self.state().dsp.stall_status = stall;
    }

    ///////////////////////////////////////////////////////////////////
    // Audio

    pub fn queue_record(&self, samples: &[i16]) {
        self.state().dsp.record.extend(samples.iter().copied());
    }

    pub fn take_played(&self) -> Vec<i16> {
        self.state().dsp.played.take()
    }

    ///////////////////////////////////////////////////////////////////
    // Observation

    pub fn daa_mode(&self) -> DaaMode {
        self.state().daa.mode
    }

    pub fn slic_state(&self) -> SlicState {
        self.state().slic_state
    }

    pub fn slicw(&self) -> SLICW {
        self.state().slicw
    }

    pub fn scrw(&self) -> SCRW {
        self.state().scrw
    }

    /// Ring voltage on the POTS port.
    pub fn ringer_on(&self) -> bool {
        let state = self.state();
        match self.kind {
            CardKind::PhoneJack => state.dsp.gpio.gpio1(),
            _ => state.slic_state == SlicState::Ringing,
        }
    }

    pub fn playing(&self) -> bool {
        self.state().dsp.playing
    }

    pub fn recording(&self) -> bool {
        self.state().dsp.recording
    }

    /// Call-progress tone slot the DSP is playing; 0 is silence.
    pub fn tone(&self) -> u8 {
        self.state().dsp.tone
    }

    pub fn play_volume(&self) -> u16 {
        self.state().dsp.play_volume
    }

    /// The last [`COMMAND_LOG`] command and argument words written, in order.
    pub fn commands(&self) -> Vec<u16> {
        self.state().dsp.commands.to_vec()
    }
}

///////////////////////////////////////////////////////////////////////
// DSP window

impl DspModel {
    fn hsr(&self) -> HSR {
        HSR::new()
            .with_statusrdy(self.status_ready && !self.stall_status)
            .with_controlrdy(!self.stall_control)
            .with_rxrdy(self.recording && self.record.len() >= self.frame_samples)
            .with_txrdy(self.playing)
    }

    /// `hook` is the level on GPIO3, where the ISA PhoneJACK wires its
    /// hookswitch.
    fn command(&mut self, word: u16, hook: bool) {
        trace!("sim DSP command 0x{word:04x}");
        self.commands.push(word);
        self.status_ready = true;
        self.ssr = 0;

        if let Some((command, due)) = self.collecting.take() {
            self.arguments.push(word);
            if due > 1 {
                self.collecting = Some((command, due - 1));
            } else {
                self.finish(command);
            }
            return;
        }

        match word {
            cmd::FRAME_COUNT => {
                self.frame_count = self.frame_count.wrapping_add(1);
                self.ssr = self.frame_count;
            }
            cmd::GPIO_READ => {
                self.ssr = u8::from(self.gpio.with_gpio3(hook)) as u16;
            }
            w if (cmd::FILTER_SELECT..cmd::FILTER_SELECT + 4).contains(&w) => {
                self.filter_select = (w - cmd::FILTER_SELECT) as usize;
            }
            cmd::FILTER_STATUS => self.ssr = self.filter_detect[self.filter_select] as u16,
            cmd::PLAY_START => self.playing = true,
            cmd::PLAY_STOP => self.playing = false,
            cmd::RECORD_START => self.recording = true,
            cmd::RECORD_STOP => self.recording = false,
            cmd::PLAY_VOLUME_READ => self.ssr = self.play_volume,
            cmd::RECORD_VOLUME_READ => self.ssr = self.record_volume,
            cmd::PLAY_VOLUME | cmd::RECORD_VOLUME | cmd::TONE_ON_PERIOD | cmd::TONE_OFF_PERIOD => {
                self.collect(word, 1);
            }
            w => match w & 0xff00 {
                cmd::TONE_INIT => self.collect(w, 4),
                cmd::TONE_PLAY => self.tone = w as u8,
                cmd::BASE_FRAME => self.frame_samples = (w & 0xff) as usize,
                cmd::GPIO_WRITE => self.gpio = GPIO::from(w as u8),
                _ => {}
            },
        }
    }

    fn collect(&mut self, command: u16, words: usize) {
        self.arguments.clear();
        self.collecting = Some((command, words));
    }

    fn finish(&mut self, command: u16) {
        match command {
            cmd::PLAY_VOLUME => self.play_volume = self.arguments[0],
            cmd::RECORD_VOLUME => self.record_volume = self.arguments[0],
            _ => {}
        }
    }
}

impl SimCard {
    fn dsp_in(&self, state: &mut SimState, offset: u16) -> PortValue {
        let dsp = &mut state.dsp;
        match offset {
            0x02 => dsp.ssr as u8,
            0x03 => {
                dsp.status_ready = false;
                (dsp.ssr >> 8) as u8
            }
            0x08 => dsp.hsr().into(),
            0x0e => {
                let [low, high] = dsp.record.pop_front().unwrap_or(0).to_le_bytes();
                dsp.pcm_in_high = high;
                low
            }
            0x0f => dsp.pcm_in_high,
            _ => 0,
        }
    }

    fn dsp_out(&self, state: &mut SimState, offset: u16, value: PortValue) {
        let hook = self.kind == CardKind::PhoneJack && state.off_hook;
        let dsp = &mut state.dsp;
        match offset {
            0x06 => dsp.command_low = value,
            0x07 => {
                if !dsp.stall_control {
                    let word = u16::from_le_bytes([dsp.command_low, value]);
                    dsp.command(word, hook);
                }
            }
            0x0c => dsp.pcm_out_low = value,
            0x0d => {
                let sample = i16::from_le_bytes([dsp.pcm_out_low, value]);
                dsp.played.push(sample);
            }
            _ => {}
        }
    }
}

///////////////////////////////////////////////////////////////////////
// Xilinx window

impl SimCard {
    fn sci_raised(&self, state: &SimState) -> bool {
        !state.daa.sci_stall && (state.scrw.c0() || state.scrw.c1())
    }

    fn xilinx_in(&self, state: &mut SimState, offset: u16) -> PortValue {
        let card_present = state.cable.is_some();
        match (offset, self.kind) {
            (0x00, kind) => SCRR::new()
                .with_daaflag(kind == CardKind::LineJack && state.daa.flag)
                .with_det(kind == CardKind::PhoneJackPci && state.off_hook)
                .with_sci(self.sci_raised(state))
                .into(),
            (0x01, CardKind::PhoneCard) => PSLIC::new()
                .with_power(true)
                .with_det(card_present && state.off_hook)
                .with_state(state.slic_state)
                .into(),
            (0x01, kind) => SLICR::new()
                .with_det(kind != CardKind::PhoneJackPci && state.off_hook)
                .with_potspstn(kind == CardKind::LineJack && state.pots_pstn_loop)
                .with_state(state.slic_state)
                .into(),
            (0x02, _) => state.daa.data_low,
            (0x03, CardKind::PhoneCard) => PCCR1::new()
                .with_drf(!card_present)
                .with_ed(true)
                .with_cable(state.cable.unwrap_or(CableType::Unknown))
                .into(),
            (0x03, _) => state.daa.data_high,
            _ => 0,
        }
    }

    fn xilinx_out(&self, state: &mut SimState, offset: u16, value: PortValue) {
        match (offset, self.kind) {
            (0x00, kind) => {
                let was_selected = state.scrw.c0() && !state.scrw.c1();
                state.scrw = SCRW::from(value);
                let selected = state.scrw.c0() && !state.scrw.c1();
                if kind == CardKind::LineJack && selected && !was_selected && !state.daa.sci_stall {
                    Self::sci_transfer(&mut state.daa);
                }
            }
            (0x01, CardKind::PhoneCard) => state.slic_state = PSLIC::from(value).state(),
            (0x01, _) => {
                state.slicw = SLICW::from(value);
                state.slic_state = state.slicw.state();
            }
            (0x02, _) => state.daa.data_low = value,
            (0x03, _) => state.daa.data_high = value,
            _ => {}
        }
    }

    fn sci_transfer(daa: &mut DaaModel) {
        let command = SciCommand::from(daa.data_high);
        trace!("sim SCI command 0x{:02x}", daa.data_high);

        if command.read() {
            daa.data_low = daa.id;
            daa.data_high = if command.xop() && command.index() == 0 {
                let xr0 = XR0::new()
                    .with_RING(daa.ring_latched)
                    .with_VDD_OK(daa.line_voltage)
                    .with_Cadence(daa.cadence_latched)
                    .with_Caller_ID(daa.caller_id_latched)
                    .with_RMR(daa.ring_line);
                daa.ring_latched = false;
                daa.cadence_latched = false;
                daa.caller_id_latched = false;
                daa.flag = false;
                xr0.into()
            } else if !command.xop() && command.index() == 1 {
                CR1::new().with_RMR(daa.ring_line).into()
            } else {
                0
            };
        } else if command.load() {
            daa.mode = command.mode();
        }
    }
}

impl PortIo for SimCard {
    fn inb(&self, port: PortAddress) -> PortValue {
        let mut state = self.state();
        if let Some(offset) = Addressing::offset(Window::Dsp, self.dsp_base, port) {
            self.dsp_in(&mut state, offset)
        } else if let Some(offset) = Addressing::offset(Window::Xilinx, self.xilinx_base, port) {
            self.xilinx_in(&mut state, offset)
        } else {
            0xff
        }
    }

    fn outb(&self, port: PortAddress, value: PortValue) {
        let mut state = self.state();
        if let Some(offset) = Addressing::offset(Window::Dsp, self.dsp_base, port) {
            self.dsp_out(&mut state, offset, value);
        } else if let Some(offset) = Addressing::offset(Window::Xilinx, self.xilinx_base, port) {
            self.xilinx_out(&mut state, offset, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use crate::clock::ManualClock;
    use crate::dsp::Dsp;

    fn dsp(sim: &Arc<SimCard>) -> Dsp {
        let clock = ManualClock::new(1000);
        clock.set_step(1);
        Dsp::new(sim.clone(), 0x300, Arc::new(clock), 600)
    }

    #[test]
    fn volume_argument_words_are_collected() {
        let sim = Arc::new(SimCard::new(CardKind::LineJack, 0x300, 0x310));
        let dsp = dsp(&sim);

        dsp.set_play_volume(0x5144).unwrap();
        assert_eq!(dsp.play_volume().unwrap(), 0x5144);
        // The argument was not taken for a frame count command.
        assert_eq!(dsp.frame_count().unwrap(), 1);
        assert_eq!(sim.commands(), vec![cmd::PLAY_VOLUME, 0x5144, cmd::PLAY_VOLUME_READ, cmd::FRAME_COUNT]);
    }

    #[test]
    fn logs_keep_the_newest_entries() {
        let mut log = BoundedLog::new(3);
        for n in 0..5 {
            log.push(n);
        }
        assert_eq!(log.to_vec(), vec![2, 3, 4]);
        assert_eq!(log.take(), vec![2, 3, 4]);
        assert!(log.take().is_empty());

        let sim = Arc::new(SimCard::new(CardKind::LineJack, 0x300, 0x310));
        let dsp = dsp(&sim);
        dsp.set_play_volume(0x5144).unwrap();
        for _ in 0..COMMAND_LOG {
            dsp.frame_count().unwrap();
        }
        let commands = sim.commands();
        assert_eq!(commands.len(), COMMAND_LOG);
        assert!(commands.iter().all(|&word| word == cmd::FRAME_COUNT));
    }

    #[test]
    fn tone_init_takes_four_words() {
        let sim = Arc::new(SimCard::new(CardKind::LineJack, 0x300, 0x310));
        let dsp = dsp(&sim);

        dsp.tone_init(13, 2130, 0x1a, 0x6000, 0x1a).unwrap();
        dsp.tone_play(13).unwrap();
        assert_eq!(sim.tone(), 13);
    }

    #[test]
    fn phonejack_hook_through_gpio() {
        let sim = Arc::new(SimCard::new(CardKind::PhoneJack, 0x300, 0x310));
        let dsp = dsp(&sim);

        assert!(!dsp.gpio_read().unwrap().gpio3());
        sim.set_off_hook(true);
        assert!(dsp.gpio_read().unwrap().gpio3());
        dsp.gpio_write(GPIO::new().with_gpio1(true).with_gpio2(true)).unwrap();
        assert!(sim.ringer_on());
    }

    #[test]
    fn stalled_status_times_out() {
        let sim = Arc::new(SimCard::new(CardKind::LineJack, 0x300, 0x310));
        let dsp = dsp(&sim);
        sim.set_stall_status(true);
        assert!(dsp.frame_count().is_err());
        sim.set_stall_status(false);
        assert_eq!(dsp.frame_count().unwrap(), 2);
    }

    #[test]
    fn ports_outside_both_windows_float_high() {
        let sim = SimCard::new(CardKind::LineJack, 0x300, 0x310);
        assert_eq!(sim.inb(0x2f0), 0xff);
    }
}
