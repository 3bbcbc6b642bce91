use ixj_pac::device::{Addressing, PortAddress, PortIo, Window, XilinxWindow};
use ixj_pac::register::{SlicState, SCRW, SLICW};
use log::warn;

use crate::clock::{SharedClock, Tick};
use crate::dsp::{Dsp, SharedIo};
use crate::error::{Error, Result};
use crate::hook::CardKind;

/// Refuse a base the card's address decoder can't sit at.
pub(crate) fn check_base(window: Window, base: PortAddress) -> Result<()> {
    if Addressing::is_valid_base(window, base) {
        Ok(())
    } else {
        warn!("{window:?} window can't start at 0x{base:03x}");
        Err(Error::Invalid("port base"))
    }
}

/// Both windows must decode and must not share a port.
pub(crate) fn check_bases(dsp_base: PortAddress, xilinx_base: PortAddress) -> Result<()> {
    check_base(Window::Dsp, dsp_base)?;
    check_base(Window::Xilinx, xilinx_base)?;
    if Addressing::overlaps((Window::Dsp, dsp_base), (Window::Xilinx, xilinx_base)) {
        warn!("DSP 0x{dsp_base:03x} and PLD 0x{xilinx_base:03x} windows overlap");
        return Err(Error::Invalid("port base"));
    }
    Ok(())
}

/// The fixed hardware resources of one card: its port windows, the DSP
/// command channel and the tick clock.
///
/// Nothing in here needs the card's exclusive access; the DSP guards its own
/// command channel.
pub struct Board {
    pub kind: CardKind,
    pub dsp: Dsp,
    io: SharedIo,
    xilinx_base: PortAddress,
    clock: SharedClock,
}

impl Board {
    pub fn new(
        kind: CardKind,
        io: SharedIo,
        dsp_base: PortAddress,
        xilinx_base: PortAddress,
        clock: SharedClock,
        command_timeout_ms: u32,
    ) -> Self {
        let timeout = clock.ticks_from_ms(command_timeout_ms);
        Self {
            kind,
            dsp: Dsp::new(io.clone(), dsp_base, clock.clone(), timeout),
            io,
            xilinx_base,
            clock,
        }
    }

    pub fn xilinx(&self) -> XilinxWindow<'_, dyn PortIo + Send + Sync> {
        XilinxWindow::new(&*self.io, self.xilinx_base)
    }

    pub fn now(&self) -> Tick {
        self.clock.now()
    }

    pub fn hz(&self) -> u32 {
        self.clock.hz()
    }

    pub fn ticks_from_ms(&self, ms: u32) -> u32 {
        self.clock.ticks_from_ms(ms)
    }

    /// SLIC state as reported by the PLD, for cards that have one.
    pub fn slic_state(&self) -> Option<SlicState> {
        match self.kind {
            CardKind::PhoneJack => None,
            CardKind::PhoneCard => Some(self.xilinx().pslic().read().state()),
            _ => Some(self.xilinx().slicr().read().state()),
        }
    }
}

/// Shadows of the write-only PLD registers.
#[derive(Copy, Clone, Debug)]
pub struct Pld {
    scrw: SCRW,
    slicw: SLICW,
}

impl Default for Pld {
    fn default() -> Self {
        Self {
            scrw: SCRW::new(),
            slicw: SLICW::new(),
        }
    }
}

impl Pld {
    pub fn scrw(&self) -> SCRW {
        self.scrw
    }

    pub fn slicw(&self) -> SLICW {
        self.slicw
    }

    pub fn write_scrw<F>(&mut self, board: &Board, f: F)
    where
        F: FnOnce(SCRW) -> SCRW,
    {
        self.scrw = f(self.scrw);
        board.xilinx().scrw().write_value(self.scrw);
    }

    pub fn write_slicw<F>(&mut self, board: &Board, f: F)
    where
        F: FnOnce(SLICW) -> SLICW,
    {
        self.slicw = f(self.slicw);
        board.xilinx().slicw().write_value(self.slicw);
    }

    /// Command the SLIC. The ISA PhoneJACK has no SLIC register; the call is
    /// ignored there.
    pub fn set_slic_state(&mut self, board: &Board, state: SlicState) {
        match board.kind {
            CardKind::PhoneJack => {}
            CardKind::PhoneCard => {
                board.xilinx().pslic().write(|w| w.with_power(true).with_state(state));
            }
            _ => self.write_slicw(board, |w| w.with_state(state)),
        }
    }
}
