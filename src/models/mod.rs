//! Concrete models hosted by simulator adapters.

/// Power output from a time-indexed profile.
pub mod generator;
/// Observation recording and CSV output.
pub mod monitor;
pub mod profile;
pub mod sil;
