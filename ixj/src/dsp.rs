//! Command/status exchange with the card's codec DSP.
//!
//! The DSP takes 16-bit command words through two byte ports and answers
//! every command with a 16-bit software status word (SSR). Multi-word
//! commands send their arguments as further command words. The host status
//! register (HSR) carries the handshake flags for both directions.

use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;

use ixj_pac::device::{DspWindow, PortAddress, PortIo};
use ixj_pac::register::{GPIO, HSR};
use log::{error, warn};

use crate::clock::SharedClock;
use crate::error::{Error, Result, Wait};

pub type SharedIo = Arc<dyn PortIo + Send + Sync>;

/// Status word cached after a failed exchange.
pub const STATUS_INVALID: u16 = 0xffff;

pub mod cmd {
    pub const GPIO_WRITE:         u16 = 0x0b00;
    pub const BASE_FRAME:         u16 = 0x1300;
    pub const GPIO_READ:          u16 = 0x5143;
    pub const FRAME_COUNT:        u16 = 0x5144;
    pub const FILTER_SELECT:      u16 = 0x5154;
    pub const FILTER_STATUS:      u16 = 0x515c;
    pub const RECORD_START:       u16 = 0x5182;
    pub const RECORD_STOP:        u16 = 0x5183;
    pub const PLAY_START:         u16 = 0x5188;
    pub const PLAY_STOP:          u16 = 0x5189;
    pub const PLAY_CODEC:         u16 = 0x5230;
    pub const RECORD_CODEC:       u16 = 0x5270;
    pub const TONE_PLAY:          u16 = 0x6000;
    pub const TONE_INIT:          u16 = 0x6800;
    pub const TONE_ON_PERIOD:     u16 = 0x6e04;
    pub const TONE_OFF_PERIOD:    u16 = 0x6e05;
    pub const PLAY_VOLUME_READ:   u16 = 0xcf00;
    pub const RECORD_VOLUME_READ: u16 = 0xcf01;
    pub const PLAY_VOLUME:        u16 = 0xcf02;
    pub const RECORD_VOLUME:      u16 = 0xcf03;
    pub const AEC_LEVEL:          u16 = 0xe010;
}

pub struct Dsp {
    io: SharedIo,
    base: PortAddress,
    clock: SharedClock,
    timeout: u32,
    in_flight: AtomicU32,
    ssr: AtomicU16,
}

impl Dsp {
    /// `timeout` bounds each handshake wait, in clock ticks.
    pub fn new(io: SharedIo, base: PortAddress, clock: SharedClock, timeout: u32) -> Self {
        Self {
            io,
            base,
            clock,
            timeout,
            in_flight: AtomicU32::new(0),
            ssr: AtomicU16::new(0),
        }
    }

    fn window(&self) -> DspWindow<'_, dyn PortIo + Send + Sync> {
        DspWindow::new(&*self.io, self.base)
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Status word returned by the last command, or `STATUS_INVALID`.
    pub fn status(&self) -> u16 {
        self.ssr.load(Ordering::SeqCst)
    }

    pub fn hsr(&self) -> HSR {
        self.window().hsr().read()
    }

    pub fn send_command(&self, command: u16) -> Result<()> {
        let previous = self.in_flight.fetch_add(1, Ordering::SeqCst);
        if previous > 0 {
            self.decrement();
            error!("DSP write overlap attempting command 0x{command:04x}");
            return Err(Error::CommandOverlap(command));
        }

        let result = self.exchange(command);
        if result.is_err() {
            self.ssr.store(STATUS_INVALID, Ordering::SeqCst);
        }

        if self.decrement() > 1 {
            warn!("DSP command 0x{command:04x} finished with overlapping writers; draining");
            self.in_flight.store(0, Ordering::SeqCst);
        }

        result
    }

    fn decrement(&self) -> u32 {
        self.in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0)
    }

    fn exchange(&self, command: u16) -> Result<()> {
        self.wait(Wait::ControlReady, |hsr| hsr.controlrdy())?;

        let window = self.window();
        let [low, high] = command.to_le_bytes();
        window.command_low().write_value(low);
        window.command_high().write_value(high);

        self.wait(Wait::StatusReady, |hsr| hsr.statusrdy())?;

        let low = window.ssr_low().read();
        let high = window.ssr_high().read();
        self.ssr.store(u16::from_le_bytes([low, high]), Ordering::SeqCst);

        Ok(())
    }

    fn wait<F>(&self, what: Wait, ready: F) -> Result<()>
    where
        F: Fn(HSR) -> bool,
    {
        let deadline = self.clock.now().offset(self.timeout);
        loop {
            if ready(self.hsr()) {
                return Ok(());
            }
            if self.clock.now().is_after(deadline) {
                warn!("DSP at 0x{:03x}: timed out waiting for {what}", self.base);
                return Err(Error::HardwareTimeout(what));
            }
            std::hint::spin_loop();
        }
    }

    fn send_with_argument(&self, command: u16, argument: u16) -> Result<()> {
        self.send_command(command)?;
        self.send_command(argument)
    }

    ///////////////////////////////////////////////////////////////////
    // Commands

    pub fn frame_count(&self) -> Result<u16> {
        self.send_command(cmd::FRAME_COUNT)?;
        Ok(self.status())
    }

    pub fn gpio_read(&self) -> Result<GPIO> {
        self.send_command(cmd::GPIO_READ)?;
        Ok(GPIO::from(self.status() as u8))
    }

    pub fn gpio_write(&self, gpio: GPIO) -> Result<()> {
        self.send_command(cmd::GPIO_WRITE | u8::from(gpio) as u16)
    }

    /// Read the detect history word of one of the four programmable filters.
    pub fn filter_status(&self, filter: usize) -> Result<u16> {
        debug_assert!(filter < 4);
        self.send_command(cmd::FILTER_SELECT + filter as u16)?;
        self.send_command(cmd::FILTER_STATUS)?;
        Ok(self.status())
    }

    pub fn tone_init(&self, index: u8, freq0: u16, gain0: u16, freq1: u16, gain1: u16) -> Result<()> {
        self.send_command(cmd::TONE_INIT | index as u16)?;
        for word in [freq0, gain0, freq1, gain1] {
            self.send_command(word)?;
        }
        Ok(())
    }

    pub fn tone_on_period(&self, quarter_ms: u16) -> Result<()> {
        self.send_with_argument(cmd::TONE_ON_PERIOD, quarter_ms)
    }

    pub fn tone_off_period(&self, quarter_ms: u16) -> Result<()> {
        self.send_with_argument(cmd::TONE_OFF_PERIOD, quarter_ms)
    }

    /// Tone index 0 is silence and stops call-progress tone output.
    pub fn tone_play(&self, index: u8) -> Result<()> {
        self.send_command(cmd::TONE_PLAY | index as u16)
    }

    pub fn base_frame(&self, samples: u8) -> Result<()> {
        self.send_command(cmd::BASE_FRAME | samples as u16)
    }

    pub fn play_codec(&self, code: u16) -> Result<()> {
        self.send_command(cmd::PLAY_CODEC | code)
    }

    pub fn record_codec(&self, code: u16) -> Result<()> {
        self.send_command(cmd::RECORD_CODEC | code)
    }

    pub fn play_volume(&self) -> Result<u16> {
        self.send_command(cmd::PLAY_VOLUME_READ)?;
        Ok(self.status())
    }

    pub fn set_play_volume(&self, volume: u16) -> Result<()> {
        self.send_with_argument(cmd::PLAY_VOLUME, volume)
    }

    pub fn record_volume(&self) -> Result<u16> {
        self.send_command(cmd::RECORD_VOLUME_READ)?;
        Ok(self.status())
    }

    pub fn set_record_volume(&self, volume: u16) -> Result<()> {
        self.send_with_argument(cmd::RECORD_VOLUME, volume)
    }

    pub fn play_start(&self) -> Result<()> {
        self.send_command(cmd::PLAY_START)
    }

    pub fn play_stop(&self) -> Result<()> {
        self.send_command(cmd::PLAY_STOP)
    }

    pub fn record_start(&self) -> Result<()> {
        self.send_command(cmd::RECORD_START)
    }

    pub fn record_stop(&self) -> Result<()> {
        self.send_command(cmd::RECORD_STOP)
    }

    pub fn aec_level(&self, level: u8) -> Result<()> {
        self.send_command(cmd::AEC_LEVEL | (level & 0x0f) as u16)
    }

    ///////////////////////////////////////////////////////////////////
    // PCM ports

    pub fn write_sample(&self, sample: i16) {
        let window = self.window();
        let [low, high] = sample.to_le_bytes();
        window.pcm_out_low().write_value(low);
        window.pcm_out_high().write_value(high);
    }

    pub fn read_sample(&self) -> i16 {
        let window = self.window();
        let low = window.pcm_in_low().read();
        let high = window.pcm_in_high().read();
        i16::from_le_bytes([low, high])
    }
}
