//! Line-state and signal core for Quicknet Internet PhoneJACK / LineJACK
//! telephony cards.
//!
//! A [`card::Card`] owns the per-card state machines (hookswitch, POTS ring,
//! tone-filter cadences, the DAA PSTN handler, Caller-ID FSK injection) and is
//! stepped once per frame by [`timer::TimerThread`]. Hardware is reached
//! through the `PortIo` trait from `ixj-pac`, backed either by raw port I/O
//! ([`port::RawPortIo`]) or by the behavioural model in [`sim`].

pub mod access;
pub mod audio;
pub mod board;
pub mod cadence;
pub mod callerid;
pub mod card;
pub mod clock;
pub mod daa;
pub mod detector;
pub mod dsp;
pub mod error;
pub mod event;
pub mod fsk;
pub mod generator;
pub mod hook;
pub mod port;
pub mod registry;
pub mod ring;
pub mod sim;
pub mod timer;
pub mod tone;

pub use card::{Card, CardConfig};
pub use error::{Error, Result};
pub use event::PhoneEvent;
