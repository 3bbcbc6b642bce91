#![allow(non_snake_case)]
#![allow(non_camel_case_types)]
#![allow(clippy::upper_case_acronyms)]

use modular_bitfield_msb::prelude::*;

///////////////////////////////////////////////////////////////////////
// DSP host interface

/// Host Status Register, low byte (HSR) - DSP+0x08
///
/// * statusrdy: a command response is waiting in the SSR.
/// * controlrdy: the DSP will accept a new command word.
/// * rxrdy: a record frame is ready to be read from the PCM input port.
/// * txrdy: the DSP will accept a play frame on the PCM output port.
/// * rxerr / txerr: record overrun / play underrun since the last read.
///
#[bitfield(bits=8)]
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub struct HSR {
    #[skip] __a: B2,
    pub txerr: bool,
    pub rxerr: bool,
    pub txrdy: bool,
    pub rxrdy: bool,
    pub controlrdy: bool,
    pub statusrdy: bool,
}

/// GPIO read-back, low byte of the SSR after a GPIO read command.
///
/// Only the ISA Internet PhoneJACK routes the hookswitch through the DSP
/// GPIO pins; the off-hook level appears on GPIO3.
///
#[bitfield(bits=8)]
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub struct GPIO {
    pub gpio7: bool,
    pub gpio6: bool,
    pub gpio5: bool,
    pub gpio4: bool,
    pub gpio3: bool,
    pub gpio2: bool,
    pub gpio1: bool,
    #[skip] __a: B1,
}

///////////////////////////////////////////////////////////////////////
// Xilinx PLD

/// SLIC operating states, as commanded through SLICW and reported in SLICR.
#[derive(Copy, Clone, BitfieldSpecifier, Debug, PartialEq, Eq)]
#[bits=3]
pub enum SlicState {
    /// Open circuit, line powered down.
    OpenCircuit = 0b000,
    /// Ring voltage applied to the line.
    Ringing = 0b001,
    /// Loop current flowing, normal conversation.
    Active = 0b010,
    /// On-hook transmission (Caller-ID with the handset down).
    OnHookTransmission = 0b011,
    TipOpen = 0b100,
    /// Idle, waiting for loop closure.
    Standby = 0b101,
    ActivePolarityReversal = 0b110,
    OnHookTransmissionPolarityReversal = 0b111,
}

/// Status Control Register, read side (SCRR) - XILINX+0x00
///
/// * daaflag: the DAA has latched an interrupt (ring, Caller-ID, cadence,
///   line voltage change).
/// * det: hookswitch detect on the PCI PhoneJACK.
/// * sci: serial control interface handshake line.
///
#[bitfield(bits=8)]
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub struct SCRR {
    #[skip] __a: B2,
    pub daaflag: bool,
    pub det: bool,
    #[skip] __b: B3,
    pub sci: bool,
}

/// Status Control Register, write side (SCRW) - XILINX+0x00
///
/// * c1/c0: SCI target select. 00 = end of transfer, 01 = DAA, 10 = mixer,
///   11 = EEPROM.
/// * daafsyncen: route frame sync to the DAA codec (conversation only).
///
#[bitfield(bits=8)]
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub struct SCRW {
    pub led2: bool,
    pub led1: bool,
    pub daafsyncen: bool,
    #[skip] __a: B3,
    pub c1: bool,
    pub c0: bool,
}

/// SLIC Register, read side (SLICR) - XILINX+0x01
///
/// * potspstn: LineJACK POTS-to-PSTN relay loop detect.
/// * det: loop closure detect (off-hook) on the POTS port.
///
#[bitfield(bits=8)]
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub struct SLICR {
    pub powerdown: bool,
    pub potspstn: bool,
    pub det: bool,
    pub hom: bool,
    pub b2en: bool,
    pub state: SlicState,
}

/// SLIC Register, write side (SLICW) - XILINX+0x01
///
/// * rly1: LineJACK bridge relay, connects the POTS port straight to the line.
/// * rly2: LineJACK PSTN line relay; closed while the DAA is in conversation.
/// * spken: speaker amplifier enable.
///
#[bitfield(bits=8)]
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub struct SLICW {
    pub rly3: bool,
    pub rly2: bool,
    pub rly1: bool,
    pub spken: bool,
    pub b2en: bool,
    pub state: SlicState,
}

/// PhoneCARD cable types, as sensed through PCCR1.
#[derive(Copy, Clone, BitfieldSpecifier, Debug, PartialEq, Eq)]
#[bits=2]
pub enum CableType {
    Unknown = 0b00,
    Handset = 0b01,
    Headset = 0b10,
    Speaker = 0b11,
}

/// PCMCIA Cable Control Register 1 (PCCR1) - XILINX+0x03, PhoneCARD only
///
/// * drf: no cable plugged into the card edge.
/// * ed: cable detect enable.
///
#[bitfield(bits=8)]
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub struct PCCR1 {
    pub drf: bool,
    pub ed: bool,
    #[skip] __a: B4,
    pub cable: CableType,
}

/// PhoneCARD SLIC Register (PSLIC) - XILINX+0x01, PhoneCARD only
#[bitfield(bits=8)]
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub struct PSLIC {
    pub power: bool,
    #[skip] __a: B2,
    pub det: bool,
    pub spk: bool,
    pub state: SlicState,
}

///////////////////////////////////////////////////////////////////////
// DAA (reached through the SCI)

/// DAA power-up modes. The mode is carried in every SCI command word.
#[derive(Copy, Clone, BitfieldSpecifier, Debug, PartialEq, Eq)]
#[bits=2]
pub enum DaaMode {
    Sleep = 0b00,
    Ringing = 0b01,
    Conversation = 0b10,
    Reset = 0b11,
}

/// DAA ID byte, returned in the SCI low data register on an XR0 read.
pub const DAA_ID_BYTE: u8 = 0x81;

/// SCI command word for the DAA (high SCI data byte).
///
/// * mode: the power-up mode the DAA is (or is being put) in.
/// * read: read the addressed register instead of writing it.
/// * load: on a write, latch `mode` into the DAA. Reads set it too, and
///   leave the mode alone.
/// * xop: address the extended (XOP, interrupt) bank instead of the
///   control (SOP) bank.
/// * index: register index within the bank.
///
/// A sleep-mode load is `0x10`, a CR1 read in ringing mode is `0x71`, and
/// the interrupt source read is `0x38`.
///
#[bitfield(bits=8)]
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub struct SciCommand {
    pub mode: DaaMode,
    pub read: bool,
    pub load: bool,
    pub xop: bool,
    pub index: B3,
}

/// DAA Extended Register 0 (XR0), interrupt source
///
/// * RING: ring burst detected.
/// * VDD_OK: line voltage present (level, not latched).
/// * Cadence: the DAA's own cadence timer expired.
/// * Caller_ID: the DAA finished capturing a Caller-ID burst.
/// * RMR: ring mode, mirrors CR1.RMR.
///
#[bitfield(bits=8)]
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub struct XR0 {
    #[skip] __a: B3,
    pub RING: bool,
    pub VDD_OK: bool,
    pub Cadence: bool,
    pub Caller_ID: bool,
    pub RMR: bool,
}

/// DAA Control Register 1 (CR1)
///
/// * RMR: ring detect output; follows the ring voltage envelope, so its
///   edges carry the ring cadence.
///
#[bitfield(bits=8)]
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub struct CR1 {
    #[skip] __a: B3,
    pub RMR: bool,
    #[skip] __b: B4,
}
