use core::marker::PhantomData;

use crate::register::*;

pub type PortAddress = u16;
pub type PortValue = u8;

/// Byte-wide access to the card's I/O port space.
///
/// Port I/O cannot fail, so neither direction returns a `Result`. Methods
/// take `&self`: implementations serialize internally if they need to.
pub trait PortIo {
    fn inb(&self, port: PortAddress) -> PortValue;
    fn outb(&self, port: PortAddress, value: PortValue);
}

pub struct Access<'a, D, T>
where D: PortIo + ?Sized,
{
    io: &'a D,
    port: PortAddress,
    t: PhantomData<T>,
}

impl<'a, D, T> Access<'a, D, T>
where D: PortIo + ?Sized,
{
    fn new(io: &'a D, port: PortAddress) -> Self {
        Self {
            io,
            port,
            t: PhantomData,
        }
    }

    pub fn port(&self) -> PortAddress {
        self.port
    }
}

impl<D, T> Access<'_, D, T>
where D: PortIo + ?Sized,
      T: From<u8>,
{
    pub fn read(&self) -> T {
        T::from(self.io.inb(self.port))
    }
}

impl<D, T> Access<'_, D, T>
where D: PortIo + ?Sized,
      T: From<u8> + Into<u8>,
{
    /// Write a value built up from zero. Write-only registers (SCRW, SLICW)
    /// don't read back, so callers that care keep a shadow copy.
    pub fn write<F>(&self, f: F)
    where
        F: FnOnce(T) -> T,
    {
        let value = f(T::from(0));
        self.io.outb(self.port, value.into());
    }

    pub fn write_value(&self, value: T) {
        self.io.outb(self.port, value.into());
    }

    pub fn modify<F>(&self, f: F)
    where
        F: FnOnce(T) -> T,
    {
        let value = f(self.read());
        self.io.outb(self.port, value.into());
    }
}

///////////////////////////////////////////////////////////////////////
// DSP host interface window

pub struct DspWindow<'a, D>
where D: PortIo + ?Sized,
{
    io: &'a D,
    base: PortAddress,
}

impl<'a, D> DspWindow<'a, D>
where D: PortIo + ?Sized,
{
    pub fn new(io: &'a D, base: PortAddress) -> Self {
        Self {
            io,
            base,
        }
    }

    fn access<T>(&self, offset: u16) -> Access<'a, D, T> {
        Access::new(self.io, Addressing::window(Window::Dsp, self.base, offset))
    }

    pub fn ssr_low     (&self) -> Access<'a, D, u8>  { self.access(0x02) }
    pub fn ssr_high    (&self) -> Access<'a, D, u8>  { self.access(0x03) }
    pub fn command_low (&self) -> Access<'a, D, u8>  { self.access(0x06) }
    pub fn command_high(&self) -> Access<'a, D, u8>  { self.access(0x07) }
    pub fn hsr         (&self) -> Access<'a, D, HSR> { self.access(0x08) }
    pub fn hsr_high    (&self) -> Access<'a, D, u8>  { self.access(0x09) }
    pub fn pcm_out_low (&self) -> Access<'a, D, u8>  { self.access(0x0c) }
    pub fn pcm_out_high(&self) -> Access<'a, D, u8>  { self.access(0x0d) }
    pub fn pcm_in_low  (&self) -> Access<'a, D, u8>  { self.access(0x0e) }
    pub fn pcm_in_high (&self) -> Access<'a, D, u8>  { self.access(0x0f) }
}

///////////////////////////////////////////////////////////////////////
// Xilinx PLD window

pub struct XilinxWindow<'a, D>
where D: PortIo + ?Sized,
{
    io: &'a D,
    base: PortAddress,
}

impl<'a, D> XilinxWindow<'a, D>
where D: PortIo + ?Sized,
{
    pub fn new(io: &'a D, base: PortAddress) -> Self {
        Self {
            io,
            base,
        }
    }

    fn access<T>(&self, offset: u16) -> Access<'a, D, T> {
        Access::new(self.io, Addressing::window(Window::Xilinx, self.base, offset))
    }

    pub fn scrr    (&self) -> Access<'a, D, SCRR>  { self.access(0x00) }
    pub fn scrw    (&self) -> Access<'a, D, SCRW>  { self.access(0x00) }
    pub fn slicr   (&self) -> Access<'a, D, SLICR> { self.access(0x01) }
    pub fn slicw   (&self) -> Access<'a, D, SLICW> { self.access(0x01) }
    pub fn pslic   (&self) -> Access<'a, D, PSLIC> { self.access(0x01) }
    pub fn sci_low (&self) -> Access<'a, D, u8>    { self.access(0x02) }
    pub fn sci_high(&self) -> Access<'a, D, u8>    { self.access(0x03) }
    pub fn pccr1   (&self) -> Access<'a, D, PCCR1> { self.access(0x03) }
}

/// The two port ranges a card decodes. Each spans a power of two and has
/// to start on a multiple of its own size.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Window {
    /// DSP host interface.
    Dsp,
    /// Xilinx PLD. The LineJACK decodes 8 ports here, so 0x318 is a real base.
    Xilinx,
}

impl Window {
    pub const fn ports(self) -> u16 {
        match self {
            Window::Dsp => 16,
            Window::Xilinx => 8,
        }
    }
}

pub struct Addressing {}

impl Addressing {
    pub fn is_valid_base(window: Window, base: PortAddress) -> bool {
        let ports = window.ports();
        base % ports == 0 && base.checked_add(ports - 1).is_some()
    }

    /// Port `offset` into the window at `base`. Bases are checked once with
    /// `is_valid_base` when a card is set up; offsets are register constants.
    pub fn window(window: Window, base: PortAddress, offset: u16) -> PortAddress {
        debug_assert!(offset < window.ports());
        base.wrapping_add(offset)
    }

    /// The offset of `port` within the window at `base`, if it falls inside.
    pub fn offset(window: Window, base: PortAddress, port: PortAddress) -> Option<u16> {
        port.checked_sub(base).filter(|&offset| offset < window.ports())
    }

    /// Whether the two windows share any port.
    pub fn overlaps(a: (Window, PortAddress), b: (Window, PortAddress)) -> bool {
        let end = |(window, base): (Window, PortAddress)| base as u32 + window.ports() as u32;
        (a.1 as u32) < end(b) && (b.1 as u32) < end(a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    struct Latch {
        last_port: Cell<PortAddress>,
        last_value: Cell<PortValue>,
    }

    impl PortIo for Latch {
        fn inb(&self, port: PortAddress) -> PortValue {
            self.last_port.set(port);
            self.last_value.get()
        }

        fn outb(&self, port: PortAddress, value: PortValue) {
            self.last_port.set(port);
            self.last_value.set(value);
        }
    }

    #[test]
    fn addressing_window() {
        assert_eq!(Addressing::window(Window::Dsp, 0x300, 0x0), 0x300);
        assert_eq!(Addressing::window(Window::Dsp, 0x300, 0xf), 0x30f);
        assert_eq!(Addressing::window(Window::Xilinx, 0x318, 0x3), 0x31b);
        assert_eq!(Addressing::window(Window::Dsp, 0xfff0, 0x8), 0xfff8);
    }

    #[test]
    fn window_bases() {
        assert!(Addressing::is_valid_base(Window::Dsp, 0x300));
        assert!(!Addressing::is_valid_base(Window::Dsp, 0x308));
        assert!(Addressing::is_valid_base(Window::Xilinx, 0x318));
        assert!(!Addressing::is_valid_base(Window::Xilinx, 0x31c));
        assert!(Addressing::is_valid_base(Window::Xilinx, 0xfff8));
        assert!(Addressing::is_valid_base(Window::Dsp, 0xfff0));
    }

    #[test]
    fn addressing_offset() {
        assert_eq!(Addressing::offset(Window::Dsp, 0x300, 0x308), Some(8));
        assert_eq!(Addressing::offset(Window::Dsp, 0x300, 0x310), None);
        assert_eq!(Addressing::offset(Window::Dsp, 0x300, 0x2ff), None);
        assert_eq!(Addressing::offset(Window::Xilinx, 0x318, 0x31f), Some(7));
        assert_eq!(Addressing::offset(Window::Xilinx, 0x318, 0x320), None);
    }

    #[test]
    fn window_overlap() {
        assert!(!Addressing::overlaps((Window::Dsp, 0x300), (Window::Xilinx, 0x310)));
        assert!(!Addressing::overlaps((Window::Dsp, 0x300), (Window::Xilinx, 0x2f8)));
        assert!(Addressing::overlaps((Window::Dsp, 0x300), (Window::Xilinx, 0x308)));
        assert!(Addressing::overlaps((Window::Xilinx, 0xfff8), (Window::Dsp, 0xfff0)));
    }

    #[test]
    fn access_modify_round_trips_through_port() {
        let latch = Latch { last_port: Cell::new(0), last_value: Cell::new(0) };
        let xilinx = XilinxWindow::new(&latch, 0x200);

        xilinx.slicw().write(|w| w.with_state(SlicState::Standby).with_rly2(true));
        assert_eq!(latch.last_port.get(), 0x201);
        assert_eq!(latch.last_value.get(), 0b0100_0101);

        xilinx.slicw().modify(|w| w.with_state(SlicState::Active));
        assert_eq!(latch.last_value.get(), 0b0100_0010);
    }

    #[test]
    fn dsp_window_ports() {
        let latch = Latch { last_port: Cell::new(0), last_value: Cell::new(0x0a) };
        let dsp = DspWindow::new(&latch, 0x300);

        let hsr = dsp.hsr().read();
        assert_eq!(latch.last_port.get(), 0x308);
        assert!(hsr.controlrdy());
        assert!(hsr.txrdy());
        assert!(!hsr.statusrdy());
    }
}
