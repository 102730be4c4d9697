//! Error types for the simulation side: clock, adapters, entities, and the
//! hosting driver.

use chrono::NaiveDateTime;

use crate::sil::BridgeError;
use crate::sim::types::SimTime;

/// Errors raised while setting up or stepping a co-simulation.
///
/// Setup errors (`UnknownModelKind`, `AlreadyInitialized`, `Wiring`, ...) are
/// fatal before the first step. Time errors indicate a desynchronization
/// between the hosting scheduler and an adapter and abort the current tick.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// `create` was asked for a model kind the manifest does not declare.
    #[error("unknown model kind \"{0}\"")]
    UnknownModelKind(String),

    /// `init` was called on an adapter that is already initialized.
    #[error("simulator \"{0}\" is already initialized")]
    AlreadyInitialized(String),

    /// An operation that requires `init` was called before it.
    #[error("simulator \"{0}\" has not been initialized")]
    NotInitialized(String),

    /// An operation was called after `finalize`.
    #[error("simulator \"{0}\" has already been finalized")]
    Finalized(String),

    /// A required construction or init parameter is missing or unusable.
    #[error("invalid parameter \"{name}\": {reason}")]
    InvalidParameter {
        /// Parameter name as listed in the manifest.
        name: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// A wall-clock time earlier than the simulation start.
    #[error("time {time} is before simulation start {start}")]
    InvalidTime {
        /// Offending timestamp.
        time: NaiveDateTime,
        /// Simulation start.
        start: NaiveDateTime,
    },

    /// A step was requested for a tick earlier than the previous one.
    #[error("simulation time regressed from {previous} to {requested}")]
    TimeRegression {
        /// Last tick the adapter was stepped at.
        previous: SimTime,
        /// Tick that was requested.
        requested: SimTime,
    },

    /// Tick arithmetic left the representable range.
    #[error("tick {0} is out of the representable time range")]
    TimeOverflow(SimTime),

    /// The entity id is not owned by the addressed simulator.
    #[error("unknown entity \"{0}\"")]
    UnknownEntity(String),

    /// The attribute is not declared for the model kind in the manifest.
    #[error("model kind \"{kind}\" has no attribute \"{attr}\"")]
    UnknownAttribute {
        /// Model kind.
        kind: String,
        /// Attribute that was referenced.
        attr: String,
    },

    /// Several sources delivered the same attribute under the `conflict` rule.
    #[error("attribute \"{attr}\" received {} values in one tick ({})", .sources.len(), .sources.join(", "))]
    InputConflict {
        /// Attribute name.
        attr: String,
        /// Full ids of the sources that delivered it.
        sources: Vec<String>,
    },

    /// A numeric aggregation was applied to a text value.
    #[error("attribute \"{0}\" cannot be summed: not all inputs are numeric")]
    NonNumericInput(String),

    /// A required input attribute was not delivered this tick.
    #[error("entity \"{entity}\" did not receive required input \"{attr}\"")]
    MissingInput {
        /// Receiving entity.
        entity: String,
        /// Missing attribute.
        attr: &'static str,
    },

    /// A monitor received a second value for the same attribute and instant.
    #[error("attribute \"{attr}\" already has an observation at {time}")]
    DuplicateObservation {
        /// Attribute name.
        attr: String,
        /// Timestamp of the existing observation.
        time: NaiveDateTime,
    },

    /// A time-indexed profile could not be built.
    #[error("invalid profile: {0}")]
    InvalidProfile(String),

    /// Wiring between simulators is inconsistent with their manifests.
    #[error("invalid wiring: {0}")]
    Wiring(String),

    /// Communication with the control bridge failed.
    #[error("control bridge: {0}")]
    Bridge(#[from] BridgeError),

    /// Writing tabular output failed.
    #[error("csv output: {0}")]
    Csv(#[from] csv::Error),

    /// File-system error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
