//! Monitor model: accumulates observations per tick and writes them to CSV
//! once at simulation end.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::{debug, info};

use crate::error::SimError;
use crate::io::export::export_csv;
use crate::sim::adapter::{Adapter, Model};
use crate::sim::clock::Clock;
use crate::sim::inputs::AggregationPolicy;
use crate::sim::manifest::ModelDescriptor;
use crate::sim::types::{AttrValue, EntityInputs, SimTime};

/// Monitor simulator adapter.
pub type MonitorSim = Adapter<Monitor>;

/// Supplies extra named values to record at every monitor step.
pub trait MetricsProducer: Send + Sync {
    /// Values to record for the current tick.
    fn produce(&self) -> BTreeMap<String, AttrValue>;
}

impl<F> MetricsProducer for F
where
    F: Fn() -> BTreeMap<String, AttrValue> + Send + Sync,
{
    fn produce(&self) -> BTreeMap<String, AttrValue> {
        self()
    }
}

/// Observations keyed by attribute name, then timestamp. Append-only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSeries {
    columns: BTreeMap<String, BTreeMap<NaiveDateTime, AttrValue>>,
}

impl MetricSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one observation.
    ///
    /// # Errors
    ///
    /// Returns `SimError::DuplicateObservation` if `attr` already has a value
    /// at `time`; the existing value is kept.
    pub fn record(
        &mut self,
        attr: &str,
        time: NaiveDateTime,
        value: AttrValue,
    ) -> Result<(), SimError> {
        let column = self.columns.entry(attr.to_string()).or_default();
        if column.contains_key(&time) {
            return Err(SimError::DuplicateObservation {
                attr: attr.to_string(),
                time,
            });
        }
        column.insert(time, value);
        Ok(())
    }

    /// Records a whole tick of observations, or none of them.
    ///
    /// # Errors
    ///
    /// Returns `SimError::DuplicateObservation` for the first attribute that
    /// already has a value at `time`; the series is left unchanged.
    pub fn record_all(
        &mut self,
        time: NaiveDateTime,
        values: BTreeMap<String, AttrValue>,
    ) -> Result<(), SimError> {
        if let Some(attr) = values.keys().find(|attr| self.get(attr, time).is_some()) {
            return Err(SimError::DuplicateObservation {
                attr: attr.clone(),
                time,
            });
        }
        for (attr, value) in values {
            self.columns.entry(attr).or_default().insert(time, value);
        }
        Ok(())
    }

    /// Value of `attr` at `time`.
    pub fn get(&self, attr: &str, time: NaiveDateTime) -> Option<&AttrValue> {
        self.columns.get(attr).and_then(|c| c.get(&time))
    }

    /// All observations of one attribute, ordered by time.
    pub fn column(&self, attr: &str) -> Option<&BTreeMap<NaiveDateTime, AttrValue>> {
        self.columns.get(attr)
    }

    /// Attribute names in order.
    pub fn attrs(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Distinct timestamps across all attributes, ascending.
    pub fn timestamps(&self) -> BTreeSet<NaiveDateTime> {
        self.columns
            .values()
            .flat_map(|c| c.keys().copied())
            .collect()
    }

    /// Total number of observations.
    pub fn len(&self) -> usize {
        self.columns.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Adapter-level monitor configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Ticks between monitor steps.
    pub step_size: SimTime,
}

impl MonitorConfig {
    pub fn new(step_size: SimTime) -> Self {
        Self { step_size }
    }
}

/// Shared monitor context.
pub struct MonitorContext {
    clock: Clock,
    step_size: SimTime,
    out_paths: HashSet<PathBuf>,
}

/// Per-entity monitor parameters.
#[derive(Clone)]
pub struct MonitorParams {
    /// CSV output path.
    pub out_path: PathBuf,
    /// Optional producer of extra values.
    pub metrics: Option<Arc<dyn MetricsProducer>>,
    /// How fan-in inputs collapse.
    pub aggregation: AggregationPolicy,
}

impl MonitorParams {
    /// Parameters writing to `out_path` with the default aggregation policy.
    pub fn new(out_path: impl Into<PathBuf>) -> Self {
        Self {
            out_path: out_path.into(),
            metrics: None,
            aggregation: AggregationPolicy::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsProducer>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_aggregation(mut self, aggregation: AggregationPolicy) -> Self {
        self.aggregation = aggregation;
        self
    }
}

impl fmt::Debug for MonitorParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorParams")
            .field("out_path", &self.out_path)
            .field("metrics", &self.metrics.is_some())
            .field("aggregation", &self.aggregation)
            .finish()
    }
}

/// A monitor entity.
pub struct Monitor {
    eid: String,
    params: MonitorParams,
    series: MetricSeries,
    written: bool,
}

impl Monitor {
    /// Observations recorded so far.
    pub fn series(&self) -> &MetricSeries {
        &self.series
    }

    /// Output path of this monitor.
    pub fn out_path(&self) -> &Path {
        &self.params.out_path
    }

    fn producer_source(&self) -> String {
        format!("{}.metrics", self.eid)
    }
}

impl Model for Monitor {
    type Config = MonitorConfig;
    type Context = MonitorContext;
    type Params = MonitorParams;

    const DESCRIPTOR: ModelDescriptor = ModelDescriptor {
        kind: "Monitor",
        public: true,
        params: &["out_path", "metrics", "aggregation"],
        attrs: &[],
        any_inputs: true,
    };

    fn context(clock: Clock, config: MonitorConfig) -> Result<MonitorContext, SimError> {
        if config.step_size == 0 {
            return Err(SimError::InvalidParameter {
                name: "step_size",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(MonitorContext {
            clock,
            step_size: config.step_size,
            out_paths: HashSet::new(),
        })
    }

    fn create(context: &mut MonitorContext, eid: &str, params: MonitorParams) -> Result<Self, SimError> {
        if !context.out_paths.insert(params.out_path.clone()) {
            return Err(SimError::InvalidParameter {
                name: "out_path",
                reason: format!("{} is already used by another monitor", params.out_path.display()),
            });
        }
        Ok(Self {
            eid: eid.to_string(),
            params,
            series: MetricSeries::new(),
            written: false,
        })
    }

    fn step(
        &mut self,
        context: &MonitorContext,
        time: SimTime,
        inputs: &EntityInputs,
    ) -> Result<(), SimError> {
        let dt = context.clock.to_datetime(time)?;

        let mut merged;
        let inputs = match &self.params.metrics {
            Some(producer) => {
                merged = inputs.clone();
                let source = self.producer_source();
                for (attr, value) in producer.produce() {
                    merged
                        .entry(attr)
                        .or_default()
                        .insert(source.clone(), value);
                }
                &merged
            }
            None => inputs,
        };

        let flat = self.params.aggregation.flatten(inputs)?;
        debug!(monitor = %self.eid, %dt, observations = flat.len(), "recording");
        for (attr, value) in &flat {
            debug!(monitor = %self.eid, %attr, %value);
        }
        self.series.record_all(dt, flat)
    }

    fn get(&self, _attr: &str) -> Option<AttrValue> {
        None
    }

    fn next_step(&self, context: &MonitorContext, time: SimTime) -> Result<Option<SimTime>, SimError> {
        time.checked_add(context.step_size)
            .map(Some)
            .ok_or(SimError::TimeOverflow(time))
    }

    fn finalize(&mut self, _context: &MonitorContext) -> Result<(), SimError> {
        if self.written {
            return Ok(());
        }
        export_csv(&self.series, &self.params.out_path)?;
        self.written = true;
        info!(
            monitor = %self.eid,
            path = %self.params.out_path.display(),
            rows = self.series.timestamps().len(),
            "monitor output written"
        );
        Ok(())
    }
}
