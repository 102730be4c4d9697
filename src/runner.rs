//! Scenario wiring: builds the bridge and the co-simulation from a
//! [`ScenarioConfig`] and drives them.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::api::{self, AppState, ServerHandle};
use crate::config::{ConfigError, ScenarioConfig};
use crate::error::SimError;
use crate::models::generator::{GeneratorConfig, GeneratorSim};
use crate::models::monitor::{MonitorConfig, MonitorParams, MonitorSim};
use crate::models::sil::{SilConfig, SilSim};
use crate::sil::{Bridge, BridgeClient, BridgeError, ControlChannel};
use crate::sim::clock::Clock;
use crate::sim::engine::{Engine, EntityRef, RunSummary};
use crate::sim::inputs::AggregationPolicy;
use crate::sim::types::EntityId;

/// Simulator id of the SIL interface.
pub const SIL_SID: &str = "sil";
/// Simulator id of the monitor.
pub const MONITOR_SID: &str = "monitor";

/// SIL attributes recorded by the monitor.
const RECORDED_ATTRS: [&str; 6] = [
    "solar",
    "ci",
    "battery_soc",
    "battery_min_soc",
    "battery_grid_charge",
    "nodes_power_mode",
];

/// Errors from running a scenario.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The scenario failed validation.
    #[error("invalid configuration ({} errors)", .0.len())]
    Config(Vec<ConfigError>),

    #[error(transparent)]
    Sim(#[from] SimError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

impl From<ConfigError> for RunError {
    fn from(e: ConfigError) -> Self {
        Self::Config(vec![e])
    }
}

fn validated(config: &ScenarioConfig) -> Result<(), RunError> {
    let errors = config.validate();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(RunError::Config(errors))
    }
}

fn bind_address(config: &ScenarioConfig) -> Result<SocketAddr, RunError> {
    let address = config.bridge.address();
    address
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| {
            RunError::from(ConfigError {
                field: "bridge.host".into(),
                message: format!("cannot resolve \"{address}\""),
            })
        })
}

/// Serves the control bridge until Ctrl+C.
///
/// # Errors
///
/// Returns `RunError::Config` for an invalid scenario and
/// `RunError::Bridge` if the listener cannot be bound.
pub fn serve(config: &ScenarioConfig) -> Result<(), RunError> {
    validated(config)?;
    let addr = bind_address(config)?;
    let state = Arc::new(AppState::new(Bridge::in_memory()));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BridgeError::Bind(format!("{addr}: {e}")))?;
        api::serve(listener, state, shutdown_signal()).await?;
        Ok::<(), RunError>(())
    })
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl+C, shutting down"),
        Err(e) => warn!(error = %e, "cannot listen for Ctrl+C"),
    }
}

/// Runs the co-simulation described by `config`.
///
/// With `client.url` set the simulation talks to that bridge; otherwise a
/// bridge is started on `bridge.host:bridge.port` for the duration of the
/// run, reachable by external controllers.
///
/// # Errors
///
/// Returns `RunError::Config` for an invalid scenario, `RunError::Bridge`
/// if the bridge cannot be started or reached, and `RunError::Sim` for
/// failures during the run.
pub fn run_cosimulation(config: &ScenarioConfig) -> Result<RunSummary, RunError> {
    validated(config)?;
    let c = &config.client;

    let (url, _server): (String, Option<ServerHandle>) = match &c.url {
        Some(url) => (url.clone(), None),
        None => {
            let state = Arc::new(AppState::new(Bridge::in_memory()));
            let startup = Duration::from_secs(config.bridge.startup_timeout_secs);
            let handle = api::spawn(state, bind_address(config)?, startup)?;
            (handle.url(), Some(handle))
        }
    };

    let client = BridgeClient::new(url, c.request_timeout(), c.retry_policy())?;
    client.wait_until_ready(c.ready_timeout())?;
    info!(url = %client.base_url(), "bridge ready");

    let mut engine = build_engine(config, Arc::new(client))?;
    let summary = engine.run()?;
    info!(
        steps = summary.steps,
        last_tick = ?summary.last_tick,
        out = %config.monitor.out_path.display(),
        "co-simulation finished"
    );
    Ok(summary)
}

fn single(ids: Vec<EntityId>, sid: &str) -> Result<EntityId, SimError> {
    ids.into_iter()
        .next()
        .ok_or_else(|| SimError::Wiring(format!("simulator \"{sid}\" created no entity")))
}

/// Builds the engine: one generator per signal, the SIL interface fed by
/// the generators, and a monitor recording the SIL attributes.
///
/// Simulators are registered in that order, so at a shared tick the SIL
/// interface sees fresh generator output and the monitor sees what the SIL
/// interface published.
///
/// # Errors
///
/// Returns `RunError::Config` for an unparseable start time, and
/// `RunError::Sim` if a profile cannot be built or wiring is rejected.
pub fn build_engine(
    config: &ScenarioConfig,
    channel: Arc<dyn ControlChannel>,
) -> Result<Engine, RunError> {
    let s = &config.simulation;
    let start = s.start_time()?;
    let clock = Clock::new(start, s.resolution_secs)?;
    let mut engine = Engine::new(clock, s.duration_ticks);
    if let Some(factor) = s.rt_factor {
        engine = engine.with_rt_factor(factor);
    }

    let mut generators = Vec::new();
    for (signal, profile) in config.signals.entries() {
        let mut sim = GeneratorSim::new(signal);
        sim.init(start, s.resolution_secs, GeneratorConfig::new(profile.build()?))?;
        let eid = single(sim.create(1, "Generator", ())?, signal)?;
        engine.add_simulator(Box::new(sim))?;
        generators.push((EntityRef::new(signal, eid), signal));
    }

    let mut sil = SilSim::new(SIL_SID);
    sil.init(start, s.resolution_secs, SilConfig::new(channel))?;
    let sil_ref = EntityRef::new(
        SIL_SID,
        single(sil.create(1, "SilInterface", AggregationPolicy::default())?, SIL_SID)?,
    );
    engine.add_simulator(Box::new(sil))?;

    let m = &config.monitor;
    let mut monitor = MonitorSim::new(MONITOR_SID);
    monitor.init(start, s.resolution_secs, MonitorConfig::new(m.step_size))?;
    let params = MonitorParams::new(m.out_path.clone()).with_aggregation(m.aggregation_policy());
    let monitor_ref = EntityRef::new(
        MONITOR_SID,
        single(monitor.create(1, "Monitor", params)?, MONITOR_SID)?,
    );
    engine.add_simulator(Box::new(monitor))?;

    for (generator, signal) in &generators {
        engine.connect(generator, &sil_ref, &[("p", *signal)])?;
    }
    let recorded: Vec<(&str, &str)> = RECORDED_ATTRS.iter().map(|a| (*a, *a)).collect();
    engine.connect(&sil_ref, &monitor_ref, &recorded)?;

    info!(
        start = %start,
        resolution_secs = s.resolution_secs,
        duration_ticks = s.duration_ticks,
        "co-simulation wired"
    );
    Ok(engine)
}
