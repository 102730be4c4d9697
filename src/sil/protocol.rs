//! Wire types and store key names shared by the bridge service, its client,
//! and the simulation-side interface.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::sim::types::SimTime;

/// Bucket holding battery minimum state-of-charge commands.
pub const BATTERY_MIN_SOC_LOG: &str = "battery_min_soc_log";
/// Bucket holding battery grid-charge commands.
pub const BATTERY_GRID_CHARGE_LOG: &str = "battery_grid_charge_log";
/// Bucket holding node power-mode commands.
pub const POWER_MODE_LOG: &str = "power_mode_log";

/// All actuation buckets, drained together by collect-set.
pub const ACTUATION_BUCKETS: [&str; 3] = [BATTERY_MIN_SOC_LOG, BATTERY_GRID_CHARGE_LOG, POWER_MODE_LOG];

/// Scalar slots published by the simulation side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scalar {
    Solar,
    Ci,
    BatterySoc,
    /// Tick of the last publish.
    Tick,
}

impl Scalar {
    /// Store key and JSON field name.
    pub fn key(self) -> &'static str {
        match self {
            Self::Solar => "solar",
            Self::Ci => "ci",
            Self::BatterySoc => "battery_soc",
            Self::Tick => "tick",
        }
    }

    /// HTTP path of the read endpoint, if the scalar has one.
    pub fn path(self) -> Option<&'static str> {
        match self {
            Self::Solar => Some("/api/solar"),
            Self::Ci => Some("/api/ci"),
            Self::BatterySoc => Some("/api/battery-soc"),
            Self::Tick => None,
        }
    }
}

/// Operating mode of a compute node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PowerMode {
    #[serde(rename = "power-saving")]
    PowerSaving,
    #[serde(rename = "normal")]
    Normal,
    #[serde(rename = "high performance")]
    HighPerformance,
}

impl PowerMode {
    /// Every accepted mode, in documented order.
    pub const ALL: [PowerMode; 3] = [Self::PowerSaving, Self::Normal, Self::HighPerformance];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PowerSaving => "power-saving",
            Self::Normal => "normal",
            Self::HighPerformance => "high performance",
        }
    }
}

impl fmt::Display for PowerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A power-mode string outside the accepted set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0} is not a valid power mode. Available power modes: ['power-saving', 'normal', 'high performance']")]
pub struct InvalidPowerMode(pub String);

impl FromStr for PowerMode {
    type Err = InvalidPowerMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| InvalidPowerMode(s.to_string()))
    }
}

/// Body of `PUT /sim/update`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimUpdate {
    pub solar: f64,
    pub ci: f64,
    pub battery_soc: f64,
    /// Tick the values belong to; tags actuation entries received after it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick: Option<SimTime>,
}

/// Body of `PUT /api/battery`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryCommand {
    pub min_soc: f64,
    pub grid_charge: f64,
}

/// Body of `PUT /api/nodes/{id}`.
///
/// The mode stays a string on the wire so invalid values can be rejected
/// with a descriptive message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCommand {
    pub power_mode: String,
}

/// Drained actuation commands, keyed by receipt timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectSet {
    pub battery_min_soc: BTreeMap<NaiveDateTime, f64>,
    pub battery_grid_charge: BTreeMap<NaiveDateTime, f64>,
    /// Node id → mode, one map per command.
    pub nodes_power_mode: BTreeMap<NaiveDateTime, BTreeMap<String, PowerMode>>,
    /// Tick each command was received after, when known.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ticks: BTreeMap<NaiveDateTime, SimTime>,
}

impl CollectSet {
    /// Whether no command was drained.
    pub fn is_empty(&self) -> bool {
        self.battery_min_soc.is_empty()
            && self.battery_grid_charge.is_empty()
            && self.nodes_power_mode.is_empty()
    }

    /// Most recent minimum state-of-charge command.
    pub fn latest_min_soc(&self) -> Option<f64> {
        self.battery_min_soc.values().next_back().copied()
    }

    /// Most recent grid-charge command.
    pub fn latest_grid_charge(&self) -> Option<f64> {
        self.battery_grid_charge.values().next_back().copied()
    }

    /// Final mode per node after applying commands in receipt order.
    pub fn power_modes(&self) -> BTreeMap<String, PowerMode> {
        let mut modes = BTreeMap::new();
        for command in self.nodes_power_mode.values() {
            modes.extend(command.iter().map(|(node, mode)| (node.clone(), *mode)));
        }
        modes
    }
}
