//! Fan-in aggregation: collapsing per-source inputs into one value per
//! attribute.
//!
//! When the hosting scheduler wires several sources to the same attribute of
//! one entity, the entity receives every value separately, keyed by source.
//! How they collapse is an explicit per-attribute rule, never an implicit
//! merge.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::SimError;

use super::types::{AttrValue, EntityInputs};

/// Rule for collapsing several same-tick values of one attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Sum all values; every value must be numeric.
    Sum,
    /// Keep the value of the last source in source-id order.
    Last,
    /// More than one source is an error.
    #[default]
    Conflict,
}

/// Aggregation rules for an entity: a default plus per-attribute overrides.
///
/// # Examples
///
/// ```
/// use vpp_sil::sim::inputs::{Aggregation, AggregationPolicy};
///
/// let policy = AggregationPolicy::new(Aggregation::Conflict).with_rule("p", Aggregation::Sum);
/// assert_eq!(policy.rule_for("p"), Aggregation::Sum);
/// assert_eq!(policy.rule_for("q"), Aggregation::Conflict);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregationPolicy {
    default: Aggregation,
    rules: BTreeMap<String, Aggregation>,
}

impl AggregationPolicy {
    /// Creates a policy applying `default` to every attribute.
    pub fn new(default: Aggregation) -> Self {
        Self {
            default,
            rules: BTreeMap::new(),
        }
    }

    /// Overrides the rule for one attribute.
    pub fn with_rule(mut self, attr: impl Into<String>, rule: Aggregation) -> Self {
        self.rules.insert(attr.into(), rule);
        self
    }

    /// Returns the rule that applies to `attr`.
    pub fn rule_for(&self, attr: &str) -> Aggregation {
        self.rules.get(attr).copied().unwrap_or(self.default)
    }

    /// Collapses per-source inputs to one value per attribute.
    ///
    /// Attributes with a single source pass through unchanged regardless of
    /// the rule; attributes with no sources are omitted.
    ///
    /// # Errors
    ///
    /// Returns `SimError::InputConflict` for a multi-source attribute under
    /// `Conflict`, or `SimError::NonNumericInput` when `Sum` meets text.
    pub fn flatten(&self, inputs: &EntityInputs) -> Result<BTreeMap<String, AttrValue>, SimError> {
        let mut flat = BTreeMap::new();
        for (attr, sources) in inputs {
            let mut values = sources.values();
            let value = match (values.next(), sources.len()) {
                (None, _) => continue,
                (Some(only), 1) => only.clone(),
                (Some(_), _) => self.collapse(attr, sources)?,
            };
            flat.insert(attr.clone(), value);
        }
        Ok(flat)
    }

    fn collapse(
        &self,
        attr: &str,
        sources: &BTreeMap<String, AttrValue>,
    ) -> Result<AttrValue, SimError> {
        match self.rule_for(attr) {
            Aggregation::Sum => sources
                .values()
                .map(AttrValue::as_f64)
                .sum::<Option<f64>>()
                .map(AttrValue::Number)
                .ok_or_else(|| SimError::NonNumericInput(attr.to_string())),
            Aggregation::Last => sources
                .values()
                .next_back()
                .cloned()
                .ok_or_else(|| SimError::NonNumericInput(attr.to_string())),
            Aggregation::Conflict => Err(SimError::InputConflict {
                attr: attr.to_string(),
                sources: sources.keys().cloned().collect(),
            }),
        }
    }
}
