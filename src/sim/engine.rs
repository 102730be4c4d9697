//! Minimal hosting driver: steps registered simulators in tick order and
//! moves attribute values along explicit wires.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::SimError;

use super::adapter::Simulator;
use super::clock::Clock;
use super::manifest::ModelDescriptor;
use super::types::{DataRequest, EntityId, Inputs, SimTime};

/// Fully qualified entity reference, `sid.eid`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityRef {
    /// Owning simulator id.
    pub sid: String,
    /// Entity id within that simulator.
    pub eid: EntityId,
}

impl EntityRef {
    /// Creates a reference to entity `eid` of simulator `sid`.
    pub fn new(sid: impl Into<String>, eid: impl Into<EntityId>) -> Self {
        Self {
            sid: sid.into(),
            eid: eid.into(),
        }
    }

    /// Globally unique id used as the source key in entity inputs.
    pub fn full_id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.sid, self.eid)
    }
}

/// One attribute connection between two entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wire {
    pub src: EntityRef,
    pub src_attr: String,
    pub dst: EntityRef,
    pub dst_attr: String,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Number of adapter `step` calls made.
    pub steps: u64,
    /// Last tick at which anything was stepped.
    pub last_tick: Option<SimTime>,
}

/// Co-simulation driver owning initialized simulators and their wiring.
///
/// Simulators due at the same tick are stepped in registration order, so a
/// source registered before its consumer is read after it has stepped.
pub struct Engine {
    clock: Clock,
    until: SimTime,
    rt_factor: Option<f64>,
    sims: Vec<Box<dyn Simulator>>,
    wires: Vec<Wire>,
}

impl Engine {
    /// Creates a driver that runs ticks `0..until`.
    ///
    /// # Arguments
    ///
    /// * `clock` - Clock shared with the simulators, used for pacing
    /// * `until` - First tick that is no longer stepped
    pub fn new(clock: Clock, until: SimTime) -> Self {
        Self {
            clock,
            until,
            rt_factor: None,
            sims: Vec::new(),
            wires: Vec::new(),
        }
    }

    /// Paces the run so one tick takes `resolution * factor` wall seconds.
    ///
    /// Non-positive or non-finite factors run as fast as possible.
    pub fn with_rt_factor(mut self, factor: f64) -> Self {
        self.rt_factor = (factor.is_finite() && factor > 0.0).then_some(factor);
        self
    }

    /// Registers an initialized simulator.
    ///
    /// # Errors
    ///
    /// Returns `SimError::NotInitialized` if it has no manifest yet, or
    /// `SimError::Wiring` if its id is already registered.
    pub fn add_simulator(&mut self, sim: Box<dyn Simulator>) -> Result<(), SimError> {
        if sim.manifest().is_none() {
            return Err(SimError::NotInitialized(sim.sid().to_string()));
        }
        if self.sim_index(sim.sid()).is_some() {
            return Err(SimError::Wiring(format!(
                "simulator id \"{}\" registered twice",
                sim.sid()
            )));
        }
        self.sims.push(sim);
        Ok(())
    }

    /// Connects attributes of `src` to inputs of `dst`.
    ///
    /// Each pair is validated against both manifests before it is accepted.
    ///
    /// # Arguments
    ///
    /// * `src` - Producing entity
    /// * `dst` - Consuming entity
    /// * `attrs` - `(source attribute, destination attribute)` pairs
    ///
    /// # Errors
    ///
    /// Returns `SimError::Wiring` for unknown simulators or entities and
    /// `SimError::UnknownAttribute` for attributes the manifests reject.
    pub fn connect(
        &mut self,
        src: &EntityRef,
        dst: &EntityRef,
        attrs: &[(&str, &str)],
    ) -> Result<(), SimError> {
        if src.sid == dst.sid {
            return Err(SimError::Wiring(format!(
                "cannot connect {src} to {dst} within one simulator"
            )));
        }
        let src_kind = self.kind_of(src)?;
        let dst_kind = self.kind_of(dst)?;
        for (src_attr, dst_attr) in attrs {
            src_kind.require_attr(src_attr)?;
            dst_kind.require_input(dst_attr)?;
            self.wires.push(Wire {
                src: src.clone(),
                src_attr: (*src_attr).to_string(),
                dst: dst.clone(),
                dst_attr: (*dst_attr).to_string(),
            });
        }
        debug!(%src, %dst, count = attrs.len(), "connected");
        Ok(())
    }

    /// Current wiring.
    pub fn wires(&self) -> &[Wire] {
        &self.wires
    }

    /// Runs the co-simulation to completion and finalizes every simulator.
    ///
    /// # Errors
    ///
    /// Returns the first stepping error, after which no simulator is
    /// finalized, or the first finalize error once all have been finalized.
    pub fn run(&mut self) -> Result<RunSummary, SimError> {
        info!(
            simulators = self.sims.len(),
            wires = self.wires.len(),
            until = self.until,
            "co-simulation starting"
        );
        let mut pending: Vec<Option<SimTime>> = vec![Some(0); self.sims.len()];
        let mut summary = RunSummary {
            steps: 0,
            last_tick: None,
        };
        let started = Instant::now();

        while let Some(now) = pending
            .iter()
            .flatten()
            .copied()
            .filter(|&t| t < self.until)
            .min()
        {
            self.pace(now, started);
            for idx in 0..self.sims.len() {
                if pending[idx] != Some(now) {
                    continue;
                }
                let inputs = self.gather_inputs(idx)?;
                let next = self.sims[idx].step(now, &inputs)?;
                // A simulator asking for the current tick again runs next tick.
                pending[idx] = next.map(|t| t.max(now + 1));
                summary.steps += 1;
            }
            summary.last_tick = Some(now);
        }

        let mut first_error = None;
        for sim in &mut self.sims {
            if let Err(err) = sim.finalize() {
                first_error.get_or_insert(err);
            }
        }
        info!(steps = summary.steps, last_tick = ?summary.last_tick, "co-simulation finished");
        first_error.map_or(Ok(summary), Err)
    }

    fn sim_index(&self, sid: &str) -> Option<usize> {
        self.sims.iter().position(|s| s.sid() == sid)
    }

    fn kind_of(&self, entity: &EntityRef) -> Result<ModelDescriptor, SimError> {
        let sim = self
            .sim_index(&entity.sid)
            .map(|idx| &self.sims[idx])
            .ok_or_else(|| SimError::Wiring(format!("unknown simulator \"{}\"", entity.sid)))?;
        let kind = sim
            .entity_kind(&entity.eid)
            .ok_or_else(|| SimError::Wiring(format!("unknown entity \"{entity}\"")))?;
        let manifest = sim
            .manifest()
            .ok_or_else(|| SimError::NotInitialized(entity.sid.clone()))?;
        manifest.require_model(kind).copied()
    }

    fn gather_inputs(&self, idx: usize) -> Result<Inputs, SimError> {
        let sid = self.sims[idx].sid();
        let mut inputs = Inputs::new();
        for wire in self.wires.iter().filter(|w| w.dst.sid == sid) {
            let src_idx = self
                .sim_index(&wire.src.sid)
                .ok_or_else(|| SimError::Wiring(format!("unknown simulator \"{}\"", wire.src.sid)))?;
            let request = DataRequest::from([(wire.src.eid.clone(), vec![wire.src_attr.clone()])]);
            let value = self.sims[src_idx]
                .get_data(&request)?
                .remove(&wire.src.eid)
                .and_then(|mut attrs| attrs.remove(&wire.src_attr))
                .flatten();
            // Unset source attributes are not delivered.
            if let Some(value) = value {
                inputs
                    .entry(wire.dst.eid.clone())
                    .or_default()
                    .entry(wire.dst_attr.clone())
                    .or_default()
                    .insert(wire.src.full_id(), value);
            }
        }
        Ok(inputs)
    }

    fn pace(&self, tick: SimTime, started: Instant) {
        let Some(factor) = self.rt_factor else {
            return;
        };
        let target = tick as f64 * self.clock.resolution_secs() as f64 * factor;
        let Ok(target) = Duration::try_from_secs_f64(target) else {
            return;
        };
        if let Some(wait) = target.checked_sub(started.elapsed()) {
            std::thread::sleep(wait);
        }
    }
}
