//! Core co-simulation types: ticks, entity ids, attribute values, and the
//! input/output maps exchanged between the hosting scheduler and adapters.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Tick count since simulation start, in units of the clock resolution.
pub type SimTime = u64;

/// Identifier of an entity, unique within its simulator.
pub type EntityId = String;

/// Inputs addressed to one entity: attribute → source full id → value.
pub type EntityInputs = BTreeMap<String, BTreeMap<String, AttrValue>>;

/// Inputs for one `step` call, keyed by receiving entity.
pub type Inputs = BTreeMap<EntityId, EntityInputs>;

/// Attributes requested per entity in a `get_data` call.
pub type DataRequest = BTreeMap<EntityId, Vec<String>>;

/// `get_data` result; `None` marks an attribute that has no value yet.
pub type Outputs = BTreeMap<EntityId, BTreeMap<String, Option<AttrValue>>>;

/// Value of an entity attribute.
///
/// Most attributes are numeric power or signal values; actuation state such
/// as node power modes travels as text.
///
/// # Examples
///
/// ```
/// use vpp_sil::sim::types::AttrValue;
///
/// let p = AttrValue::from(2.5);
/// assert_eq!(p.as_f64(), Some(2.5));
/// assert_eq!(AttrValue::from("normal").as_f64(), None);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// Numeric value.
    Number(f64),
    /// Text value.
    Text(String),
}

impl AttrValue {
    /// Returns the numeric value, or `None` for text.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Text(_) => None,
        }
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}
