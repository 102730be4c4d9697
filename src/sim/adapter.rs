//! Generic simulator adapter: lifecycle, entity ownership, and per-tick
//! stepping on behalf of a hosting scheduler.
//!
//! A concrete model implements [`Model`]; [`Adapter`] supplies the rest of
//! the contract (manifest, entity ids, input slicing, time checks). The
//! object-safe [`Simulator`] trait is what the hosting driver sees.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use tracing::{debug, info};

use crate::error::SimError;

use super::clock::Clock;
use super::manifest::{Manifest, ModelDescriptor};
use super::types::{AttrValue, DataRequest, EntityId, EntityInputs, Inputs, Outputs, SimTime};

/// A stepped model kind hosted by an [`Adapter`].
///
/// `Context` is state shared by every entity of one adapter (the clock plus
/// adapter-level configuration). Entities are created with `Params` and only
/// mutated through `step`.
pub trait Model: Sized {
    /// Adapter-level configuration passed to `init`.
    type Config;
    /// Shared state built once at `init`.
    type Context;
    /// Per-entity construction parameters.
    type Params: Clone;

    /// Static manifest entry for this model kind.
    const DESCRIPTOR: ModelDescriptor;

    /// Builds the shared context at `init`.
    ///
    /// # Errors
    ///
    /// Returns `SimError::InvalidParameter` for unusable configuration.
    fn context(clock: Clock, config: Self::Config) -> Result<Self::Context, SimError>;

    /// Creates one entity with id `eid`.
    ///
    /// # Errors
    ///
    /// Returns `SimError::InvalidParameter` for unusable parameters.
    fn create(context: &mut Self::Context, eid: &str, params: Self::Params)
    -> Result<Self, SimError>;

    /// Per-tick update with the inputs addressed to this entity only.
    ///
    /// # Errors
    ///
    /// Returns an error if the inputs cannot be applied.
    fn step(
        &mut self,
        context: &Self::Context,
        time: SimTime,
        inputs: &EntityInputs,
    ) -> Result<(), SimError>;

    /// Current value of an attribute, `None` if not yet computed.
    fn get(&self, attr: &str) -> Option<AttrValue>;

    /// Tick at which this entity next needs stepping, `None` if never.
    ///
    /// # Errors
    ///
    /// Returns a time error if the next tick cannot be computed.
    fn next_step(&self, context: &Self::Context, time: SimTime)
    -> Result<Option<SimTime>, SimError>;

    /// Called once at simulation end.
    ///
    /// # Errors
    ///
    /// Returns an error if final output cannot be written.
    fn finalize(&mut self, _context: &Self::Context) -> Result<(), SimError> {
        Ok(())
    }
}

/// Object-safe view of an adapter, as driven by the hosting scheduler.
pub trait Simulator {
    /// Simulator id, unique within a co-simulation.
    fn sid(&self) -> &str;

    /// Capability manifest, available once initialized.
    fn manifest(&self) -> Option<&Manifest>;

    /// Model kind of an owned entity.
    fn entity_kind(&self, eid: &str) -> Option<&'static str>;

    /// Steps every owned entity at `time`.
    ///
    /// # Errors
    ///
    /// See [`Adapter::step`].
    fn step(&mut self, time: SimTime, inputs: &Inputs) -> Result<Option<SimTime>, SimError>;

    /// Reads attribute values of owned entities.
    ///
    /// # Errors
    ///
    /// See [`Adapter::get_data`].
    fn get_data(&self, request: &DataRequest) -> Result<Outputs, SimError>;

    /// Finalizes every owned entity.
    ///
    /// # Errors
    ///
    /// See [`Adapter::finalize`].
    fn finalize(&mut self) -> Result<(), SimError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Initialized,
    Stepping,
    Finalized,
}

/// Simulator adapter hosting entities of model `M`.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use chrono::NaiveDate;
/// use vpp_sil::models::generator::{GeneratorConfig, GeneratorSim};
/// use vpp_sil::models::profile::ConstantProfile;
///
/// let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
/// let mut sim = GeneratorSim::new("solar");
/// sim.init(start, 60, GeneratorConfig::new(Arc::new(ConstantProfile::new(3.0))))
///     .unwrap();
/// let eids = sim.create(1, "Generator", ()).unwrap();
/// assert_eq!(eids, vec!["Generator_0".to_string()]);
/// ```
pub struct Adapter<M: Model> {
    sid: String,
    eid_prefix: Option<String>,
    lifecycle: Lifecycle,
    manifest: Option<Manifest>,
    clock: Option<Clock>,
    context: Option<M::Context>,
    entities: BTreeMap<EntityId, M>,
    next_index: usize,
    last_time: Option<SimTime>,
}

impl<M: Model> Adapter<M> {
    /// Creates an uninitialized adapter with simulator id `sid`.
    pub fn new(sid: impl Into<String>) -> Self {
        Self {
            sid: sid.into(),
            eid_prefix: None,
            lifecycle: Lifecycle::Created,
            manifest: None,
            clock: None,
            context: None,
            entities: BTreeMap::new(),
            next_index: 0,
            last_time: None,
        }
    }

    /// Uses `<prefix><n>` instead of `<Kind>_<n>` for entity ids.
    pub fn with_eid_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.eid_prefix = Some(prefix.into());
        self
    }

    /// One-time initialization; returns the capability manifest.
    ///
    /// # Arguments
    ///
    /// * `start` - Wall-clock time of tick 0
    /// * `resolution_secs` - Seconds per tick
    /// * `config` - Adapter-level model configuration
    ///
    /// # Errors
    ///
    /// Returns `SimError::AlreadyInitialized` on a second call, or a
    /// parameter error from the clock or the model.
    pub fn init(
        &mut self,
        start: NaiveDateTime,
        resolution_secs: u64,
        config: M::Config,
    ) -> Result<&Manifest, SimError> {
        if self.lifecycle != Lifecycle::Created {
            return Err(SimError::AlreadyInitialized(self.sid.clone()));
        }
        let clock = Clock::new(start, resolution_secs)?;
        self.context = Some(M::context(clock, config)?);
        self.clock = Some(clock);
        self.lifecycle = Lifecycle::Initialized;
        info!(sid = %self.sid, kind = M::DESCRIPTOR.kind, resolution_secs, "simulator initialized");
        Ok(self
            .manifest
            .insert(Manifest::time_based(&[M::DESCRIPTOR])))
    }

    /// Clock shared by the adapter's entities, once initialized.
    pub fn clock(&self) -> Option<&Clock> {
        self.clock.as_ref()
    }

    /// Instantiates `count` entities of `kind` with a copy of `params` each.
    ///
    /// # Returns
    ///
    /// The new entity ids, in creation order.
    ///
    /// # Errors
    ///
    /// Returns `SimError::UnknownModelKind` if `kind` is not in the manifest,
    /// or a lifecycle error if called before `init` or after `finalize`.
    pub fn create(
        &mut self,
        count: usize,
        kind: &str,
        params: M::Params,
    ) -> Result<Vec<EntityId>, SimError> {
        self.require_active()?;
        self.manifest
            .as_ref()
            .ok_or_else(|| SimError::NotInitialized(self.sid.clone()))?
            .require_model(kind)?;
        let context = self
            .context
            .as_mut()
            .ok_or_else(|| SimError::NotInitialized(self.sid.clone()))?;

        let mut created = Vec::with_capacity(count);
        for _ in 0..count {
            let eid = match &self.eid_prefix {
                Some(prefix) => format!("{prefix}{}", self.next_index),
                None => format!("{kind}_{}", self.next_index),
            };
            let entity = M::create(context, &eid, params.clone())?;
            self.next_index += 1;
            self.entities.insert(eid.clone(), entity);
            created.push(eid);
        }
        debug!(sid = %self.sid, kind, count, "entities created");
        Ok(created)
    }

    /// Ids of all owned entities.
    pub fn entity_ids(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    /// Borrows an owned entity.
    pub fn entity(&self, eid: &str) -> Option<&M> {
        self.entities.get(eid)
    }

    /// Steps every owned entity at `time`, delivering each only its slice
    /// of `inputs`.
    ///
    /// # Returns
    ///
    /// The earliest tick any entity asks to be stepped at again, or `None`
    /// if no entity self-schedules.
    ///
    /// # Errors
    ///
    /// * `SimError::TimeRegression` if `time` is earlier than the last step
    /// * `SimError::UnknownEntity` / `SimError::UnknownAttribute` for inputs
    ///   addressed to entities or attributes this adapter does not own
    /// * any error raised by an entity
    pub fn step(&mut self, time: SimTime, inputs: &Inputs) -> Result<Option<SimTime>, SimError> {
        self.require_active()?;
        if let Some(previous) = self.last_time.filter(|&previous| time < previous) {
            return Err(SimError::TimeRegression {
                previous,
                requested: time,
            });
        }
        for (eid, attrs) in inputs {
            if !self.entities.contains_key(eid) {
                return Err(SimError::UnknownEntity(eid.clone()));
            }
            for attr in attrs.keys() {
                M::DESCRIPTOR.require_input(attr)?;
            }
        }

        let context = self
            .context
            .as_ref()
            .ok_or_else(|| SimError::NotInitialized(self.sid.clone()))?;
        let empty = EntityInputs::new();
        let mut next: Option<SimTime> = None;
        for (eid, entity) in &mut self.entities {
            entity.step(context, time, inputs.get(eid).unwrap_or(&empty))?;
            if let Some(requested) = entity.next_step(context, time)? {
                next = Some(next.map_or(requested, |n| n.min(requested)));
            }
        }

        if let Some(requested) = next.filter(|&requested| requested < time) {
            return Err(SimError::TimeRegression {
                previous: time,
                requested,
            });
        }
        self.last_time = Some(time);
        self.lifecycle = Lifecycle::Stepping;
        debug!(sid = %self.sid, time, ?next, "stepped");
        Ok(next)
    }

    /// Returns current values for the requested entities and attributes.
    ///
    /// # Errors
    ///
    /// Returns `SimError::UnknownEntity` or `SimError::UnknownAttribute` for
    /// requests outside this adapter's entities or manifest.
    pub fn get_data(&self, request: &DataRequest) -> Result<Outputs, SimError> {
        self.require_active()?;
        let mut outputs = Outputs::new();
        for (eid, attrs) in request {
            let entity = self
                .entities
                .get(eid)
                .ok_or_else(|| SimError::UnknownEntity(eid.clone()))?;
            let values = outputs.entry(eid.clone()).or_default();
            for attr in attrs {
                M::DESCRIPTOR.require_attr(attr)?;
                values.insert(attr.clone(), entity.get(attr));
            }
        }
        Ok(outputs)
    }

    /// Runs every entity's finalize hook; no further calls are legal.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Finalized` on a second call, or the first entity
    /// error. Remaining entities are still finalized.
    pub fn finalize(&mut self) -> Result<(), SimError> {
        self.require_active()?;
        self.lifecycle = Lifecycle::Finalized;
        let Some(context) = self.context.as_ref() else {
            return Ok(());
        };
        let mut first_error = None;
        for entity in self.entities.values_mut() {
            if let Err(err) = entity.finalize(context) {
                first_error.get_or_insert(err);
            }
        }
        info!(sid = %self.sid, entities = self.entities.len(), "simulator finalized");
        first_error.map_or(Ok(()), Err)
    }

    fn require_active(&self) -> Result<(), SimError> {
        match self.lifecycle {
            Lifecycle::Created => Err(SimError::NotInitialized(self.sid.clone())),
            Lifecycle::Finalized => Err(SimError::Finalized(self.sid.clone())),
            Lifecycle::Initialized | Lifecycle::Stepping => Ok(()),
        }
    }
}

impl<M: Model> Simulator for Adapter<M> {
    fn sid(&self) -> &str {
        &self.sid
    }

    fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }

    fn entity_kind(&self, eid: &str) -> Option<&'static str> {
        self.entities
            .contains_key(eid)
            .then_some(M::DESCRIPTOR.kind)
    }

    fn step(&mut self, time: SimTime, inputs: &Inputs) -> Result<Option<SimTime>, SimError> {
        Adapter::step(self, time, inputs)
    }

    fn get_data(&self, request: &DataRequest) -> Result<Outputs, SimError> {
        Adapter::get_data(self, request)
    }

    fn finalize(&mut self) -> Result<(), SimError> {
        Adapter::finalize(self)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    /// Counts its steps and echoes the last `x` input.
    struct Echo {
        steps: u32,
        x: Option<AttrValue>,
        finalized: bool,
    }

    impl Model for Echo {
        type Config = SimTime;
        type Context = SimTime;
        type Params = ();

        const DESCRIPTOR: ModelDescriptor = ModelDescriptor {
            kind: "Echo",
            public: true,
            params: &[],
            attrs: &["x", "steps"],
            any_inputs: false,
        };

        fn context(_clock: Clock, every: SimTime) -> Result<SimTime, SimError> {
            Ok(every)
        }

        fn create(_context: &mut SimTime, _eid: &str, _params: ()) -> Result<Self, SimError> {
            Ok(Self {
                steps: 0,
                x: None,
                finalized: false,
            })
        }

        fn step(
            &mut self,
            _context: &SimTime,
            _time: SimTime,
            inputs: &EntityInputs,
        ) -> Result<(), SimError> {
            self.steps += 1;
            if let Some(sources) = inputs.get("x") {
                self.x = sources.values().next().cloned();
            }
            Ok(())
        }

        fn get(&self, attr: &str) -> Option<AttrValue> {
            match attr {
                "x" => self.x.clone(),
                "steps" => Some(f64::from(self.steps).into()),
                _ => None,
            }
        }

        fn next_step(&self, every: &SimTime, time: SimTime) -> Result<Option<SimTime>, SimError> {
            Ok(Some(time + every))
        }

        fn finalize(&mut self, _context: &SimTime) -> Result<(), SimError> {
            self.finalized = true;
            Ok(())
        }
    }

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn ready(every: SimTime) -> Adapter<Echo> {
        let mut sim = Adapter::new("echo");
        sim.init(start(), 60, every).unwrap();
        sim
    }

    fn x_input(eid: &str, value: f64) -> Inputs {
        let mut entity = EntityInputs::new();
        entity
            .entry("x".to_string())
            .or_default()
            .insert("src.Src_0".to_string(), value.into());
        Inputs::from([(eid.to_string(), entity)])
    }

    #[test]
    fn init_returns_manifest_once() {
        let mut sim = Adapter::<Echo>::new("echo");
        let manifest = sim.init(start(), 60, 1).unwrap();
        assert!(manifest.model("Echo").is_some());
        assert!(matches!(
            sim.init(start(), 60, 1),
            Err(SimError::AlreadyInitialized(_))
        ));
    }

    #[test]
    fn operations_before_init_are_rejected() {
        let mut sim = Adapter::<Echo>::new("echo");
        assert!(matches!(
            sim.create(1, "Echo", ()),
            Err(SimError::NotInitialized(_))
        ));
        assert!(matches!(
            sim.step(0, &Inputs::new()),
            Err(SimError::NotInitialized(_))
        ));
    }

    #[test]
    fn create_numbers_entities_across_calls() {
        let mut sim = ready(1);
        assert_eq!(sim.create(2, "Echo", ()).unwrap(), vec!["Echo_0", "Echo_1"]);
        assert_eq!(sim.create(1, "Echo", ()).unwrap(), vec!["Echo_2"]);
    }

    #[test]
    fn create_uses_configured_prefix() {
        let mut sim = Adapter::<Echo>::new("echo").with_eid_prefix("e");
        sim.init(start(), 60, 1).unwrap();
        assert_eq!(sim.create(2, "Echo", ()).unwrap(), vec!["e0", "e1"]);
    }

    #[test]
    fn create_rejects_unknown_kind() {
        let mut sim = ready(1);
        assert!(matches!(
            sim.create(1, "Battery", ()),
            Err(SimError::UnknownModelKind(kind)) if kind == "Battery"
        ));
    }

    #[test]
    fn step_delivers_only_the_addressed_slice() {
        let mut sim = ready(1);
        sim.create(2, "Echo", ()).unwrap();
        sim.step(0, &x_input("Echo_1", 7.0)).unwrap();

        assert_eq!(sim.entity("Echo_0").unwrap().x, None);
        assert_eq!(sim.entity("Echo_1").unwrap().x, Some(7.0.into()));
        assert_eq!(sim.entity("Echo_0").unwrap().steps, 1);
    }

    #[test]
    fn step_returns_requested_next_tick() {
        let mut sim = ready(15);
        sim.create(1, "Echo", ()).unwrap();
        assert_eq!(sim.step(0, &Inputs::new()).unwrap(), Some(15));
        assert_eq!(sim.step(15, &Inputs::new()).unwrap(), Some(30));
    }

    #[test]
    fn step_rejects_time_regression() {
        let mut sim = ready(1);
        sim.create(1, "Echo", ()).unwrap();
        sim.step(5, &Inputs::new()).unwrap();
        sim.step(5, &Inputs::new()).unwrap();
        assert!(matches!(
            sim.step(4, &Inputs::new()),
            Err(SimError::TimeRegression {
                previous: 5,
                requested: 4
            })
        ));
    }

    #[test]
    fn step_rejects_inputs_for_unknown_targets() {
        let mut sim = ready(1);
        sim.create(1, "Echo", ()).unwrap();
        assert!(matches!(
            sim.step(0, &x_input("Echo_9", 1.0)),
            Err(SimError::UnknownEntity(_))
        ));

        let mut bad_attr = x_input("Echo_0", 1.0);
        let slice = bad_attr.get_mut("Echo_0").unwrap();
        let sources = slice.remove("x").unwrap();
        slice.insert("y".to_string(), sources);
        assert!(matches!(
            sim.step(0, &bad_attr),
            Err(SimError::UnknownAttribute { .. })
        ));
    }

    #[test]
    fn get_data_reports_unset_and_set_values() {
        let mut sim = ready(1);
        sim.create(1, "Echo", ()).unwrap();
        let request = DataRequest::from([(
            "Echo_0".to_string(),
            vec!["x".to_string(), "steps".to_string()],
        )]);

        let before = sim.get_data(&request).unwrap();
        assert_eq!(before["Echo_0"]["x"], None);

        sim.step(0, &x_input("Echo_0", 2.5)).unwrap();
        let after = sim.get_data(&request).unwrap();
        assert_eq!(after["Echo_0"]["x"], Some(2.5.into()));
        assert_eq!(after["Echo_0"]["steps"], Some(1.0.into()));

        let unknown = DataRequest::from([("Echo_0".to_string(), vec!["q".to_string()])]);
        assert!(sim.get_data(&unknown).is_err());
    }

    #[test]
    fn finalize_runs_hooks_at_most_once() {
        let mut sim = ready(1);
        sim.create(2, "Echo", ()).unwrap();
        sim.finalize().unwrap();
        assert!(sim.entity("Echo_0").unwrap().finalized);
        assert!(sim.entity("Echo_1").unwrap().finalized);
        assert!(matches!(sim.finalize(), Err(SimError::Finalized(_))));
        assert!(matches!(
            sim.step(10, &Inputs::new()),
            Err(SimError::Finalized(_))
        ));
    }
}
