use std::fmt;

use thiserror::Error;

use crate::hook::CardKind;

/// The hardware handshake a deadline-bounded wait was polling for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Wait {
    ControlReady,
    StatusReady,
    SciHigh,
    SciLow,
    CallerIdDone,
}

impl fmt::Display for Wait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Wait::ControlReady => "DSP control ready",
            Wait::StatusReady  => "DSP status ready",
            Wait::SciHigh      => "SCI high",
            Wait::SciLow       => "SCI low",
            Wait::CallerIdDone => "Caller-ID completion",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("timed out waiting for {0}")]
    HardwareTimeout(Wait),
    #[error("DSP command 0x{0:04x} overlaps a command in flight")]
    CommandOverlap(u16),
    #[error("DAA answered 0x{0:02x} instead of its ID byte")]
    DaaId(u8),
    #[error("card busy")]
    Busy,
    #[error("not supported on {0:?}")]
    Unsupported(CardKind),
    #[error("filter {0} out of range")]
    FilterIndex(usize),
    #[error("invalid {0}")]
    Invalid(&'static str),
    #[error("no such card")]
    NoCard,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The errno a character-device entry point would hand back for this error.
    pub fn errno(&self) -> i32 {
        match self {
            Error::HardwareTimeout(_) => libc::ETIMEDOUT,
            Error::CommandOverlap(_)  => libc::EBUSY,
            Error::DaaId(_)           => libc::EIO,
            Error::Busy               => libc::EBUSY,
            Error::Unsupported(_)     => libc::EINVAL,
            Error::FilterIndex(_)     => libc::EINVAL,
            Error::Invalid(_)         => libc::EINVAL,
            Error::NoCard             => libc::ENODEV,
            Error::Io(e)              => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
