//! Capability manifest: what a simulator can instantiate and expose.
//!
//! Descriptors are `'static` data attached to each model type, so the set of
//! kinds, parameters, and attributes is fixed at compile time. The hosting
//! scheduler checks every wire against the manifest before the first step.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::SimError;

/// Manifest format version, bumped on incompatible descriptor changes.
pub const API_VERSION: &str = "1.0";

/// Stepping discipline of a simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SimKind {
    /// Stepped at ticks the simulator requests itself.
    TimeBased,
}

/// Static description of one model kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelDescriptor {
    /// Model kind name used in `create`.
    #[serde(skip)]
    pub kind: &'static str,
    /// Whether the hosting scheduler may instantiate this kind directly.
    pub public: bool,
    /// Construction parameter names.
    pub params: &'static [&'static str],
    /// Observable/writable attribute names.
    pub attrs: &'static [&'static str],
    /// Accepts inputs for attributes not listed in `attrs`.
    pub any_inputs: bool,
}

impl ModelDescriptor {
    /// Whether `attr` is declared for this kind.
    pub fn has_attr(&self, attr: &str) -> bool {
        self.attrs.contains(&attr)
    }

    /// Whether the kind accepts inputs addressed to `attr`.
    pub fn accepts_input(&self, attr: &str) -> bool {
        self.any_inputs || self.has_attr(attr)
    }

    /// Fails unless `attr` is declared for this kind.
    ///
    /// # Errors
    ///
    /// Returns `SimError::UnknownAttribute` otherwise.
    pub fn require_attr(&self, attr: &str) -> Result<(), SimError> {
        if self.has_attr(attr) {
            Ok(())
        } else {
            Err(self.unknown_attr(attr))
        }
    }

    /// Fails unless the kind accepts inputs addressed to `attr`.
    ///
    /// # Errors
    ///
    /// Returns `SimError::UnknownAttribute` otherwise.
    pub fn require_input(&self, attr: &str) -> Result<(), SimError> {
        if self.accepts_input(attr) {
            Ok(())
        } else {
            Err(self.unknown_attr(attr))
        }
    }

    fn unknown_attr(&self, attr: &str) -> SimError {
        SimError::UnknownAttribute {
            kind: self.kind.to_string(),
            attr: attr.to_string(),
        }
    }
}

/// Capability manifest returned by `init`.
///
/// Serializes as `{"api_version", "type", "models": {kind: descriptor}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    /// Manifest format version.
    pub api_version: &'static str,
    /// Stepping discipline.
    #[serde(rename = "type")]
    pub sim_kind: SimKind,
    /// Supported model kinds.
    pub models: BTreeMap<&'static str, ModelDescriptor>,
}

impl Manifest {
    /// Builds a time-based manifest from model descriptors.
    pub fn time_based(models: &[ModelDescriptor]) -> Self {
        Self {
            api_version: API_VERSION,
            sim_kind: SimKind::TimeBased,
            models: models.iter().map(|m| (m.kind, *m)).collect(),
        }
    }

    /// Looks up a model kind.
    pub fn model(&self, kind: &str) -> Option<&ModelDescriptor> {
        self.models.get(kind)
    }

    /// Looks up a model kind, failing if it is not declared.
    ///
    /// # Errors
    ///
    /// Returns `SimError::UnknownModelKind` if `kind` is absent.
    pub fn require_model(&self, kind: &str) -> Result<&ModelDescriptor, SimError> {
        self.model(kind)
            .ok_or_else(|| SimError::UnknownModelKind(kind.to_string()))
    }
}
