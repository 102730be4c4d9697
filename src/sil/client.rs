//! Blocking HTTP client for the control bridge, used by the simulation loop.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use rand::Rng;
use reqwest::blocking::{Client, RequestBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::protocol::{BatteryCommand, CollectSet, NodeCommand, Scalar, SimUpdate};
use super::{BridgeError, ControlChannel};

/// Interval between readiness probes.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Retry schedule for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub base_backoff: Duration,
    /// Upper bound on a single delay, before jitter.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based), with up to 50%
    /// random jitter added.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = self
            .base_backoff
            .saturating_mul(1 << exponent)
            .min(self.max_backoff);
        let jitter_ms = u64::try_from(backoff.as_millis() / 2).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_ms)
        };
        backoff + Duration::from_millis(jitter)
    }
}

/// Client for a bridge reachable over HTTP.
///
/// Reads and scalar publishes are retried per the [`RetryPolicy`] on
/// connection failures, timeouts and 5xx answers. Command appends are
/// retried only when the connection failed, since a timed-out append may
/// already be recorded. Drains carry a token so a retried drain replays
/// the batch the bridge already handed out. 4xx answers fail immediately.
#[derive(Debug, Clone)]
pub struct BridgeClient {
    http: Client,
    base_url: String,
    retry: RetryPolicy,
    /// Token of a drain whose answer never arrived; reused by the next
    /// `collect` so its batch is not lost.
    pending_drain: Arc<Mutex<Option<u64>>>,
}

enum Attempt<T> {
    Done(T),
    Retry(BridgeError),
}

/// Whether a request may be sent again after it might have reached the
/// bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replay {
    Safe,
    ConnectOnly,
}

impl BridgeClient {
    /// Creates a client for the bridge at `base_url`, e.g. `http://127.0.0.1:8000`.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Http` if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        request_timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, BridgeError> {
        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry,
            pending_drain: Arc::new(Mutex::new(None)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Single health probe without retries.
    ///
    /// # Errors
    ///
    /// Returns the transport or status error of the probe.
    pub fn health(&self) -> Result<(), BridgeError> {
        let response = self.http.get(self.url("/health")).send()?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(BridgeError::Status {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            })
        }
    }

    /// Polls `/health` until the bridge answers or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::ReadinessTimeout` if the bridge never answered.
    pub fn wait_until_ready(&self, timeout: Duration) -> Result<(), BridgeError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.health() {
                Ok(()) => {
                    debug!(url = %self.base_url, "bridge ready");
                    return Ok(());
                }
                Err(err) => {
                    let now = Instant::now();
                    if now >= deadline {
                        warn!(url = %self.base_url, error = %err, "bridge did not become ready");
                        return Err(BridgeError::ReadinessTimeout(timeout));
                    }
                    std::thread::sleep(READY_POLL_INTERVAL.min(deadline - now));
                }
            }
        }
    }

    /// Reads one published scalar.
    ///
    /// # Errors
    ///
    /// Returns a `BridgeError` if the request fails, or `Status` with 404 for
    /// scalars without a read endpoint.
    pub fn scalar(&self, scalar: Scalar) -> Result<Option<f64>, BridgeError> {
        let path = scalar.path().ok_or_else(|| BridgeError::Status {
            status: 404,
            body: format!("no endpoint for scalar \"{}\"", scalar.key()),
        })?;
        let mut body: BTreeMap<String, Option<f64>> = self.execute(Replay::Safe, || self.http.get(self.url(path)))?;
        Ok(body.remove(scalar.key()).flatten())
    }

    /// Sends a battery command.
    ///
    /// # Errors
    ///
    /// Returns a `BridgeError` if the request fails.
    pub fn set_battery(&self, command: &BatteryCommand) -> Result<BatteryCommand, BridgeError> {
        self.execute(Replay::ConnectOnly, || {
            self.http.put(self.url("/api/battery")).json(command)
        })
    }

    /// Sends a power-mode command for a node. Invalid modes come back as
    /// `BridgeError::Status` with status 400.
    ///
    /// # Errors
    ///
    /// Returns a `BridgeError` if the request fails or is rejected.
    pub fn set_power_mode(&self, node: u32, power_mode: &str) -> Result<NodeCommand, BridgeError> {
        let body = NodeCommand {
            power_mode: power_mode.to_string(),
        };
        self.execute(Replay::ConnectOnly, || {
            self.http
                .put(self.url(&format!("/api/nodes/{node}")))
                .json(&body)
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn execute<T, F>(&self, replay: Replay, build: F) -> Result<T, BridgeError>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match Self::attempt(replay, build()) {
                Ok(Attempt::Done(value)) => return Ok(value),
                Ok(Attempt::Retry(err)) => err,
                Err(err) => return Err(err),
            };
            if attempt >= self.retry.max_attempts {
                return Err(BridgeError::Unavailable {
                    attempts: attempt,
                    last: err.to_string(),
                });
            }
            let delay = self.retry.delay(attempt);
            warn!(url = %self.base_url, attempt, ?delay, error = %err, "bridge request failed, retrying");
            std::thread::sleep(delay);
        }
    }

    fn attempt<T: DeserializeOwned>(
        replay: Replay,
        request: RequestBuilder,
    ) -> Result<Attempt<T>, BridgeError> {
        let response = match request.send() {
            Ok(response) => response,
            Err(err) if err.is_connect() || (replay == Replay::Safe && err.is_timeout()) => {
                return Ok(Attempt::Retry(err.into()));
            }
            Err(err) => return Err(err.into()),
        };
        let status = response.status();
        if status.is_success() {
            return Ok(Attempt::Done(response.json()?));
        }
        let err = BridgeError::Status {
            status: status.as_u16(),
            body: response.text().unwrap_or_default(),
        };
        if status.is_server_error() && replay == Replay::Safe {
            Ok(Attempt::Retry(err))
        } else {
            Err(err)
        }
    }

    fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T, BridgeError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        self.execute(Replay::Safe, || self.http.put(self.url(path)).json(body))
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<u64>> {
        self.pending_drain
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl ControlChannel for BridgeClient {
    fn publish(&self, update: &SimUpdate) -> Result<(), BridgeError> {
        let _echo: SimUpdate = self.put_json("/sim/update", update)?;
        Ok(())
    }

    fn collect(&self) -> Result<CollectSet, BridgeError> {
        let token = self.lock_pending().take().unwrap_or_else(rand::random);
        let path = format!("/sim/collect-set?token={token}");
        let result = self.execute(Replay::Safe, || self.http.get(self.url(&path)));
        if result.is_err() {
            *self.lock_pending() = Some(token);
        }
        result
    }
}
