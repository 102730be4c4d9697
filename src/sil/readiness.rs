//! One-shot startup readiness signal between a server thread and its
//! launcher.

use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::time::Duration;

use super::BridgeError;

/// Creates a connected signal/waiter pair.
pub fn channel() -> (Readiness, ReadinessWaiter) {
    let (tx, rx) = mpsc::sync_channel(1);
    (Readiness(tx), ReadinessWaiter(rx))
}

/// Server side of the signal. Consumed on use, so it fires at most once.
#[derive(Debug)]
pub struct Readiness(SyncSender<Result<SocketAddr, String>>);

impl Readiness {
    /// Reports that the listener is bound at `addr` and accepting.
    pub fn ready(self, addr: SocketAddr) {
        // The launcher may have given up already.
        let _ = self.0.send(Ok(addr));
    }

    /// Reports that startup failed.
    pub fn failed(self, reason: impl Into<String>) {
        let _ = self.0.send(Err(reason.into()));
    }
}

/// Launcher side of the signal.
#[derive(Debug)]
pub struct ReadinessWaiter(Receiver<Result<SocketAddr, String>>);

impl ReadinessWaiter {
    /// Blocks until the server reports, for at most `timeout`.
    ///
    /// # Errors
    ///
    /// * `BridgeError::ReadinessTimeout` if nothing arrives in time
    /// * `BridgeError::Bind` if the server reported a startup failure
    /// * `BridgeError::ServerExited` if the server side was dropped unused
    pub fn wait(self, timeout: Duration) -> Result<SocketAddr, BridgeError> {
        match self.0.recv_timeout(timeout) {
            Ok(Ok(addr)) => Ok(addr),
            Ok(Err(reason)) => Err(BridgeError::Bind(reason)),
            Err(RecvTimeoutError::Timeout) => Err(BridgeError::ReadinessTimeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::ServerExited),
        }
    }
}
