//! Software-in-the-loop plumbing: the control bridge over the event log
//! store, its HTTP client, and the startup readiness signal.

use std::time::Duration;

use crate::store::StoreError;

pub mod bridge;
pub mod client;
pub mod protocol;
pub mod readiness;

pub use bridge::Bridge;
pub use client::{BridgeClient, RetryPolicy};
pub use protocol::{BatteryCommand, CollectSet, NodeCommand, PowerMode, Scalar, SimUpdate};

/// Errors raised by the bridge, its client, or server startup.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The event log store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Transport-level HTTP failure.
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    /// The bridge answered with a non-success status.
    #[error("bridge returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Retries were exhausted.
    #[error("bridge unavailable after {attempts} attempts: {last}")]
    Unavailable {
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        last: String,
    },

    /// The server did not report readiness in time.
    #[error("bridge not ready after {0:?}")]
    ReadinessTimeout(Duration),

    /// The server thread ended before reporting readiness.
    #[error("bridge server exited during startup")]
    ServerExited,

    /// The server could not bind its listener.
    #[error("bridge failed to start: {0}")]
    Bind(String),

    /// The server thread could not be spawned.
    #[error("failed to spawn bridge server: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Simulation-side access to the bridge: publish scalars, drain commands.
///
/// Implemented in process by [`Bridge`] and over HTTP by [`BridgeClient`].
pub trait ControlChannel: Send + Sync {
    /// Publishes the current scalar values.
    ///
    /// # Errors
    ///
    /// Returns a `BridgeError` if the values could not be stored.
    fn publish(&self, update: &SimUpdate) -> Result<(), BridgeError>;

    /// Drains every actuation command received since the last call.
    ///
    /// # Errors
    ///
    /// Returns a `BridgeError` if the buckets could not be drained.
    fn collect(&self) -> Result<CollectSet, BridgeError>;
}
