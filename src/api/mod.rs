//! HTTP surface of the control bridge.
//!
//! Controller-facing endpoints:
//! - `GET /api/solar`, `GET /api/ci`, `GET /api/battery-soc`: latest scalars
//! - `PUT /api/battery`, `PUT /api/nodes/{id}`: actuation commands
//!
//! Simulation-facing endpoints:
//! - `PUT /sim/update`: publish scalars
//! - `GET /sim/collect-set`: drain actuation commands
//!
//! Plus `GET /health` for readiness probes.

mod error;
mod handlers;
pub mod types;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, put};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::sil::{Bridge, BridgeError, readiness};

pub use error::ApiError;

/// State shared across request handlers.
pub struct AppState {
    /// Bridge over the event log store.
    pub bridge: Bridge,
}

impl AppState {
    pub fn new(bridge: Bridge) -> Self {
        Self { bridge }
    }
}

/// Builds the axum router with all bridge routes.
///
/// # Arguments
///
/// * `state` - Shared application state
///
/// # Returns
///
/// Configured `Router` ready to serve.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/solar", get(handlers::get_solar))
        .route("/api/ci", get(handlers::get_ci))
        .route("/api/battery-soc", get(handlers::get_battery_soc))
        .route("/api/battery", put(handlers::put_battery))
        .route("/api/nodes/{id}", put(handlers::put_node))
        .route("/sim/update", put(handlers::put_update))
        .route("/sim/collect-set", get(handlers::get_collect_set))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the API on an already-bound listener until `shutdown` resolves.
///
/// # Errors
///
/// Returns an `io::Error` if the server fails.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "bridge listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Handle to a bridge server running on its own thread.
///
/// Dropping the handle shuts the server down and waits for it.
#[derive(Debug)]
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Address the listener is bound to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL for a [`crate::sil::BridgeClient`].
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stops the server and waits for its thread to finish.
    pub fn shutdown(mut self) {
        self.stop(true);
    }

    fn stop(&mut self, join: bool) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if join && thread.join().is_err() {
                warn!(addr = %self.addr, "bridge server thread panicked");
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop(true);
    }
}

/// Starts the bridge on a dedicated thread and waits for it to accept
/// connections.
///
/// Readiness is signalled once the listener is bound. If it is not observed
/// within `startup_timeout` the server is told to shut down and the thread
/// is detached.
///
/// # Arguments
///
/// * `state` - Shared application state
/// * `addr` - Address to bind; port 0 picks a free port
/// * `startup_timeout` - How long to wait for readiness
///
/// # Errors
///
/// * `BridgeError::Spawn` if the thread cannot be started
/// * `BridgeError::Bind` if the listener cannot be bound
/// * `BridgeError::ReadinessTimeout` if readiness is not observed in time
pub fn spawn(
    state: Arc<AppState>,
    addr: SocketAddr,
    startup_timeout: Duration,
) -> Result<ServerHandle, BridgeError> {
    let (ready, waiter) = readiness::channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let thread = std::thread::Builder::new()
        .name("bridge-server".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    ready.failed(format!("tokio runtime: {e}"));
                    return;
                }
            };
            runtime.block_on(async move {
                let listener = match TcpListener::bind(addr).await {
                    Ok(listener) => listener,
                    Err(e) => {
                        ready.failed(format!("{addr}: {e}"));
                        return;
                    }
                };
                match listener.local_addr() {
                    Ok(local) => ready.ready(local),
                    Err(e) => {
                        ready.failed(format!("{addr}: {e}"));
                        return;
                    }
                }
                let shutdown = async {
                    let _ = shutdown_rx.await;
                };
                if let Err(e) = serve(listener, state, shutdown).await {
                    error!(error = %e, "bridge server failed");
                }
            });
        })?;

    let mut handle = ServerHandle {
        addr,
        shutdown: Some(shutdown_tx),
        thread: Some(thread),
    };
    match waiter.wait(startup_timeout) {
        Ok(local) => {
            handle.addr = local;
            Ok(handle)
        }
        Err(err) => {
            handle.stop(false);
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener as StdListener;

    use super::*;

    #[test]
    fn spawn_reports_bound_address() {
        let state = Arc::new(AppState::new(Bridge::in_memory()));
        let handle = spawn(state, "127.0.0.1:0".parse().unwrap(), Duration::from_secs(5)).unwrap();
        assert_ne!(handle.addr().port(), 0);
        assert!(handle.url().starts_with("http://127.0.0.1:"));
        handle.shutdown();
    }

    #[test]
    fn spawn_on_busy_port_fails() {
        let taken = StdListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();
        let state = Arc::new(AppState::new(Bridge::in_memory()));
        assert!(matches!(
            spawn(state, addr, Duration::from_secs(5)),
            Err(BridgeError::Bind(_))
        ));
    }
}
