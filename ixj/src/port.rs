//! Raw port I/O backend for a real card.

use std::io;

use ixj_pac::device::{PortAddress, PortIo, PortValue, Window};

use crate::board::check_base;
use crate::error::Result;

/// Direct `in`/`out` instructions against ranges granted by `ioperm(2)`.
///
/// Needs `CAP_SYS_RAWIO`. Only x86 Linux can construct one.
pub struct RawPortIo {
    ranges: Vec<(Window, PortAddress)>,
}

impl RawPortIo {
    /// Request access to each window at its base.
    pub fn open(windows: &[(Window, PortAddress)]) -> Result<Self> {
        for &(window, base) in windows {
            check_base(window, base)?;
        }
        let mut io = Self {
            ranges: Vec::with_capacity(windows.len()),
        };
        for &(window, base) in windows {
            permit(window, base, true)?;
            io.ranges.push((window, base));
        }
        Ok(io)
    }
}

impl Drop for RawPortIo {
    fn drop(&mut self) {
        for &(window, base) in &self.ranges {
            let _ = permit(window, base, false);
        }
    }
}

#[cfg(all(target_os = "linux", any(target_arch = "x86", target_arch = "x86_64")))]
fn permit(window: Window, base: PortAddress, on: bool) -> io::Result<()> {
    let rc = unsafe {
        libc::ioperm(base as libc::c_ulong, window.ports() as libc::c_ulong, on as libc::c_int)
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(all(target_os = "linux", any(target_arch = "x86", target_arch = "x86_64"))))]
fn permit(_window: Window, _base: PortAddress, _on: bool) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "raw port I/O needs x86 Linux"))
}

#[cfg(all(target_os = "linux", any(target_arch = "x86", target_arch = "x86_64")))]
impl PortIo for RawPortIo {
    fn inb(&self, port: PortAddress) -> PortValue {
        let value: u8;
        unsafe {
            core::arch::asm!("in al, dx", out("al") value, in("dx") port, options(nomem, nostack, preserves_flags));
        }
        value
    }

    fn outb(&self, port: PortAddress, value: PortValue) {
        unsafe {
            core::arch::asm!("out dx, al", in("dx") port, in("al") value, options(nomem, nostack, preserves_flags));
        }
    }
}

// Never constructed off x86 Linux; `open()` fails first.
#[cfg(not(all(target_os = "linux", any(target_arch = "x86", target_arch = "x86_64"))))]
impl PortIo for RawPortIo {
    fn inb(&self, _port: PortAddress) -> PortValue {
        0xff
    }

    fn outb(&self, _port: PortAddress, _value: PortValue) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::Error;

    #[test]
    fn misaligned_window_is_refused_before_ioperm() {
        let result = RawPortIo::open(&[(Window::Dsp, 0x300), (Window::Xilinx, 0x31c)]);
        assert!(matches!(result, Err(Error::Invalid("port base"))));
    }
}
