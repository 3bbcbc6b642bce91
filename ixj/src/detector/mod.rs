//! Software tone detection on the linear record path.

pub mod dtmf;

pub use dtmf::DtmfDetector;
