//! Simulation-side endpoint of the control bridge.
//!
//! Each step publishes the current solar, carbon-intensity, and battery
//! state-of-charge inputs, then drains the actuation commands the external
//! controller issued since the previous step.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::SimError;
use crate::sil::protocol::{CollectSet, PowerMode, Scalar, SimUpdate};
use crate::sil::ControlChannel;
use crate::sim::adapter::{Adapter, Model};
use crate::sim::clock::Clock;
use crate::sim::inputs::AggregationPolicy;
use crate::sim::manifest::ModelDescriptor;
use crate::sim::types::{AttrValue, EntityInputs, SimTime};

/// SIL interface simulator adapter.
pub type SilSim = Adapter<SilInterface>;

/// Adapter-level SIL configuration.
#[derive(Clone)]
pub struct SilConfig {
    /// Channel to the bridge, in process or over HTTP.
    pub channel: Arc<dyn ControlChannel>,
}

impl SilConfig {
    pub fn new(channel: Arc<dyn ControlChannel>) -> Self {
        Self { channel }
    }
}

impl fmt::Debug for SilConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SilConfig").finish_non_exhaustive()
    }
}

/// Shared SIL context.
pub struct SilContext {
    channel: Arc<dyn ControlChannel>,
}

/// Commands drained at one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedCommands {
    pub time: SimTime,
    pub commands: CollectSet,
}

/// An entity bridging simulation state to an external controller.
pub struct SilInterface {
    eid: String,
    aggregation: AggregationPolicy,
    published: Option<SimUpdate>,
    battery_min_soc: Option<f64>,
    battery_grid_charge: Option<f64>,
    power_modes: BTreeMap<String, PowerMode>,
    applied: Vec<AppliedCommands>,
}

impl SilInterface {
    /// Ticks at which commands were drained, with what was drained.
    pub fn applied_commands(&self) -> &[AppliedCommands] {
        &self.applied
    }

    /// Current mode per node, after every command drained so far.
    pub fn power_modes(&self) -> &BTreeMap<String, PowerMode> {
        &self.power_modes
    }

    fn required(&self, flat: &BTreeMap<String, AttrValue>, scalar: Scalar) -> Result<f64, SimError> {
        let attr = scalar.key();
        let value = flat.get(attr).ok_or_else(|| SimError::MissingInput {
            entity: self.eid.clone(),
            attr,
        })?;
        value
            .as_f64()
            .ok_or_else(|| SimError::NonNumericInput(attr.to_string()))
    }

    fn apply(&mut self, time: SimTime, commands: CollectSet) {
        if commands.is_empty() {
            return;
        }
        if let Some(min_soc) = commands.latest_min_soc() {
            self.battery_min_soc = Some(min_soc);
        }
        if let Some(grid_charge) = commands.latest_grid_charge() {
            self.battery_grid_charge = Some(grid_charge);
        }
        self.power_modes.extend(commands.power_modes());
        info!(
            sil = %self.eid,
            time,
            min_soc = ?self.battery_min_soc,
            grid_charge = ?self.battery_grid_charge,
            nodes = self.power_modes.len(),
            "actuation commands applied"
        );
        self.applied.push(AppliedCommands { time, commands });
    }
}

impl Model for SilInterface {
    type Config = SilConfig;
    type Context = SilContext;
    type Params = AggregationPolicy;

    const DESCRIPTOR: ModelDescriptor = ModelDescriptor {
        kind: "SilInterface",
        public: true,
        params: &["aggregation"],
        attrs: &[
            "solar",
            "ci",
            "battery_soc",
            "battery_min_soc",
            "battery_grid_charge",
            "nodes_power_mode",
        ],
        any_inputs: false,
    };

    fn context(_clock: Clock, config: SilConfig) -> Result<SilContext, SimError> {
        Ok(SilContext {
            channel: config.channel,
        })
    }

    fn create(
        _context: &mut SilContext,
        eid: &str,
        aggregation: AggregationPolicy,
    ) -> Result<Self, SimError> {
        Ok(Self {
            eid: eid.to_string(),
            aggregation,
            published: None,
            battery_min_soc: None,
            battery_grid_charge: None,
            power_modes: BTreeMap::new(),
            applied: Vec::new(),
        })
    }

    fn step(
        &mut self,
        context: &SilContext,
        time: SimTime,
        inputs: &EntityInputs,
    ) -> Result<(), SimError> {
        let flat = self.aggregation.flatten(inputs)?;
        let update = SimUpdate {
            solar: self.required(&flat, Scalar::Solar)?,
            ci: self.required(&flat, Scalar::Ci)?,
            battery_soc: self.required(&flat, Scalar::BatterySoc)?,
            tick: Some(time),
        };
        context.channel.publish(&update)?;
        self.published = Some(update);
        let commands = context.channel.collect()?;
        debug!(sil = %self.eid, time, drained = !commands.is_empty(), "bridge exchange");
        self.apply(time, commands);
        Ok(())
    }

    fn get(&self, attr: &str) -> Option<AttrValue> {
        match attr {
            "solar" => self.published.map(|u| u.solar.into()),
            "ci" => self.published.map(|u| u.ci.into()),
            "battery_soc" => self.published.map(|u| u.battery_soc.into()),
            "battery_min_soc" => self.battery_min_soc.map(AttrValue::from),
            "battery_grid_charge" => self.battery_grid_charge.map(AttrValue::from),
            "nodes_power_mode" if !self.power_modes.is_empty() => {
                serde_json::to_string(&self.power_modes).ok().map(AttrValue::from)
            }
            _ => None,
        }
    }

    fn next_step(&self, _context: &SilContext, time: SimTime) -> Result<Option<SimTime>, SimError> {
        time.checked_add(1)
            .map(Some)
            .ok_or(SimError::TimeOverflow(time))
    }
}
