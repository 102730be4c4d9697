//! Software-in-the-loop bridge for energy co-simulation.
//!
//! A discrete-time co-simulation publishes solar, carbon-intensity, and
//! battery state-of-charge signals to an HTTP control bridge, where an
//! external controller reads them and issues actuation commands. The
//! simulation drains those commands once per step.

/// HTTP surface of the control bridge.
pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod io;
pub mod models;
pub mod runner;
pub mod sil;
/// Co-simulation clock, adapter contract, and hosting driver.
pub mod sim;
pub mod store;
pub mod telemetry;
