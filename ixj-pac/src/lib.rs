//! Register map of the Quicknet Internet PhoneJACK / LineJACK family.
//!
//! Two I/O windows are decoded by every card: the DSP host interface (16
//! ports at the DSP base) and the Xilinx PLD (8 ports at the Xilinx base),
//! which fronts the SLIC, the PCMCIA cable logic and the serial control
//! interface (SCI) to the DAA.

#![no_std]

pub mod device;
pub mod register;
