//! TOML-based scenario configuration and preset definitions.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::Deserialize;

use crate::error::SimError;
use crate::models::profile::{ConstantProfile, PowerProfile, SolarProfile, TimeSeriesProfile};
use crate::sil::RetryPolicy;
use crate::sim::inputs::{Aggregation, AggregationPolicy};

/// Accepted layouts for `simulation.start`.
const START_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// Top-level scenario configuration parsed from TOML.
///
/// All sections have defaults matching the `demo` preset. Load from TOML
/// with [`ScenarioConfig::from_toml_file`] or use
/// [`ScenarioConfig::demo`] for the built-in default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Simulation timing.
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Bridge server binding.
    #[serde(default)]
    pub bridge: BridgeConfig,
    /// Simulation-side bridge client.
    #[serde(default)]
    pub client: ClientConfig,
    /// Monitor output and input aggregation.
    #[serde(default)]
    pub monitor: MonitorSection,
    /// Profiles driving the published signals.
    #[serde(default)]
    pub signals: SignalsConfig,
}

/// Simulation timing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Wall-clock time of tick 0, `YYYY-MM-DDTHH:MM:SS`.
    pub start: String,
    /// Seconds per tick (must be > 0).
    pub resolution_secs: u64,
    /// Number of ticks to run (must be > 0).
    pub duration_ticks: u64,
    /// Wall seconds per simulated second; unset runs as fast as possible.
    pub rt_factor: Option<f64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            start: "2020-01-01T00:00:00".to_string(),
            resolution_secs: 60,
            duration_ticks: 60,
            rt_factor: None,
        }
    }
}

impl SimulationConfig {
    /// Parses `start`.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if no accepted layout matches.
    pub fn start_time(&self) -> Result<NaiveDateTime, ConfigError> {
        START_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(self.start.trim(), fmt).ok())
            .ok_or_else(|| ConfigError {
                field: "simulation.start".into(),
                message: format!("\"{}\" is not a YYYY-MM-DDTHH:MM:SS timestamp", self.start),
            })
    }
}

/// Bridge server binding.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to bind; 0 picks a free port.
    pub port: u16,
    /// Seconds to wait for the listener before giving up.
    pub startup_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            startup_timeout_secs: 10,
        }
    }
}

impl BridgeConfig {
    /// `host:port` as a text address.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Simulation-side bridge client.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// External bridge URL; unset starts a bridge in process.
    pub url: Option<String>,
    /// Attempts per request, including the first (must be > 0).
    pub max_attempts: u32,
    /// Delay before the first retry (ms).
    pub backoff_ms: u64,
    /// Per-request timeout (ms).
    pub request_timeout_ms: u64,
    /// Seconds to wait for the bridge to report healthy.
    pub ready_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_attempts: 5,
            backoff_ms: 100,
            request_timeout_ms: 2_000,
            ready_timeout_secs: 10,
        }
    }
}

impl ClientConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_backoff: Duration::from_millis(self.backoff_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }
}

/// Monitor output and input aggregation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorSection {
    /// CSV written at the end of the run.
    pub out_path: PathBuf,
    /// Ticks between observations (must be > 0).
    pub step_size: u64,
    /// Rule for attributes fed by several sources.
    pub aggregation: Aggregation,
    /// Per-attribute rules overriding `aggregation`.
    pub aggregation_overrides: BTreeMap<String, Aggregation>,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            out_path: PathBuf::from("results.csv"),
            step_size: 1,
            aggregation: Aggregation::Conflict,
            aggregation_overrides: BTreeMap::new(),
        }
    }
}

impl MonitorSection {
    pub fn aggregation_policy(&self) -> AggregationPolicy {
        self.aggregation_overrides
            .iter()
            .fold(AggregationPolicy::new(self.aggregation), |policy, (attr, rule)| {
                policy.with_rule(attr.clone(), *rule)
            })
    }
}

/// Profiles for the three published signals.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SignalsConfig {
    /// Solar generation (kW).
    pub solar: ProfileConfig,
    /// Grid carbon intensity (gCO2/kWh).
    pub ci: ProfileConfig,
    /// Battery state of charge (0.0-1.0).
    pub battery_soc: ProfileConfig,
}

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            solar: ProfileConfig::Constant { value: 3.0 },
            ci: ProfileConfig::Constant { value: 250.0 },
            battery_soc: ProfileConfig::Constant { value: 0.5 },
        }
    }
}

impl SignalsConfig {
    /// `(signal name, profile)` pairs in publishing order.
    pub fn entries(&self) -> [(&'static str, &ProfileConfig); 3] {
        [
            ("solar", &self.solar),
            ("ci", &self.ci),
            ("battery_soc", &self.battery_soc),
        ]
    }
}

fn default_update_interval() -> u32 {
    900
}

/// A power profile description, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProfileConfig {
    /// Same value at every instant.
    Constant { value: f64 },
    /// Half-sine daylight curve with seeded noise.
    Solar {
        kw_peak: f64,
        sunrise_hour: f64,
        sunset_hour: f64,
        #[serde(default)]
        noise_std: f64,
        #[serde(default)]
        seed: u64,
        #[serde(default = "default_update_interval")]
        update_interval_secs: u32,
    },
    /// `time,value` samples read from a CSV file.
    Csv { path: PathBuf },
}

impl ProfileConfig {
    /// Builds the described profile.
    ///
    /// # Errors
    ///
    /// Returns `SimError::InvalidProfile` for inconsistent parameters, or a
    /// CSV/IO error if the sample file cannot be read.
    pub fn build(&self) -> Result<Arc<dyn PowerProfile>, SimError> {
        Ok(match self {
            Self::Constant { value } => Arc::new(ConstantProfile::new(*value)),
            Self::Solar {
                kw_peak,
                sunrise_hour,
                sunset_hour,
                noise_std,
                seed,
                update_interval_secs,
            } => Arc::new(SolarProfile::new(
                *kw_peak,
                *sunrise_hour,
                *sunset_hour,
                *noise_std,
                *seed,
                *update_interval_secs,
            )?),
            Self::Csv { path } => Arc::new(TimeSeriesProfile::from_csv_path(path)?),
        })
    }

    fn validate(&self, field: &str, errors: &mut Vec<ConfigError>) {
        match self {
            Self::Constant { value } if !value.is_finite() => errors.push(ConfigError {
                field: format!("{field}.value"),
                message: "must be finite".into(),
            }),
            Self::Solar {
                sunrise_hour,
                sunset_hour,
                ..
            } if sunrise_hour >= sunset_hour => errors.push(ConfigError {
                field: format!("{field}.sunrise_hour"),
                message: format!("must be < {field}.sunset_hour"),
            }),
            Self::Solar {
                update_interval_secs: 0,
                ..
            } => errors.push(ConfigError {
                field: format!("{field}.update_interval_secs"),
                message: "must be > 0".into(),
            }),
            Self::Csv { path } if path.as_os_str().is_empty() => errors.push(ConfigError {
                field: format!("{field}.path"),
                message: "must not be empty".into(),
            }),
            _ => {}
        }
    }
}

/// Configuration error with field path and constraint description.
#[derive(Debug, thiserror::Error)]
#[error("config error: {field}: {message}")]
pub struct ConfigError {
    /// Dotted field path (e.g., `"simulation.resolution_secs"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl ScenarioConfig {
    /// Returns the demo scenario: one simulated hour of constant signals.
    pub fn demo() -> Self {
        Self::default()
    }

    /// Returns the solar preset: one simulated day at 5-minute resolution
    /// with a daylight curve driving the solar signal.
    pub fn solar() -> Self {
        Self {
            simulation: SimulationConfig {
                resolution_secs: 300,
                duration_ticks: 288,
                ..SimulationConfig::default()
            },
            monitor: MonitorSection {
                out_path: PathBuf::from("solar_results.csv"),
                ..MonitorSection::default()
            },
            signals: SignalsConfig {
                solar: ProfileConfig::Solar {
                    kw_peak: 5.0,
                    sunrise_hour: 6.0,
                    sunset_hour: 18.0,
                    noise_std: 0.05,
                    seed: 42,
                    update_interval_secs: 900,
                },
                ..SignalsConfig::default()
            },
            ..Self::default()
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["demo", "solar"];

    /// Loads a scenario from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "demo" => Ok(Self::demo()),
            "solar" => Ok(Self::solar()),
            _ => Err(ConfigError {
                field: "preset".to_string(),
                message: format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            }),
        }
    }

    /// Parses a scenario from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError {
            field: "config".to_string(),
            message: format!("cannot read \"{}\": {e}", path.display()),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a scenario from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError {
            field: "toml".to_string(),
            message: e.to_string(),
        })
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let s = &self.simulation;

        if let Err(e) = s.start_time() {
            errors.push(e);
        }
        if s.resolution_secs == 0 {
            errors.push(ConfigError {
                field: "simulation.resolution_secs".into(),
                message: "must be > 0".into(),
            });
        }
        if s.duration_ticks == 0 {
            errors.push(ConfigError {
                field: "simulation.duration_ticks".into(),
                message: "must be > 0".into(),
            });
        }
        if s.rt_factor.is_some_and(|f| !f.is_finite() || f <= 0.0) {
            errors.push(ConfigError {
                field: "simulation.rt_factor".into(),
                message: "must be a positive number".into(),
            });
        }

        let b = &self.bridge;
        if b.host.trim().is_empty() {
            errors.push(ConfigError {
                field: "bridge.host".into(),
                message: "must not be empty".into(),
            });
        }
        if b.startup_timeout_secs == 0 {
            errors.push(ConfigError {
                field: "bridge.startup_timeout_secs".into(),
                message: "must be > 0".into(),
            });
        }

        let c = &self.client;
        if c.max_attempts == 0 {
            errors.push(ConfigError {
                field: "client.max_attempts".into(),
                message: "must be > 0".into(),
            });
        }
        if c.request_timeout_ms == 0 {
            errors.push(ConfigError {
                field: "client.request_timeout_ms".into(),
                message: "must be > 0".into(),
            });
        }
        if c.url.as_deref().is_some_and(|u| !u.starts_with("http://") && !u.starts_with("https://")) {
            errors.push(ConfigError {
                field: "client.url".into(),
                message: "must start with http:// or https://".into(),
            });
        }

        let m = &self.monitor;
        if m.step_size == 0 {
            errors.push(ConfigError {
                field: "monitor.step_size".into(),
                message: "must be > 0".into(),
            });
        }
        if m.out_path.as_os_str().is_empty() {
            errors.push(ConfigError {
                field: "monitor.out_path".into(),
                message: "must not be empty".into(),
            });
        }

        for (name, profile) in self.signals.entries() {
            profile.validate(&format!("signals.{name}"), &mut errors);
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn presets_are_valid() {
        for name in ScenarioConfig::PRESETS {
            let cfg = ScenarioConfig::from_preset(name).unwrap();
            let errors = cfg.validate();
            assert!(errors.is_empty(), "{name} should be valid: {errors:?}");
        }
    }

    #[test]
    fn from_preset_unknown() {
        let e = ScenarioConfig::from_preset("nonexistent").unwrap_err();
        assert_eq!(e.field, "preset");
        assert!(e.message.contains("unknown preset"));
    }

    #[test]
    fn default_start_parses() {
        let start = ScenarioConfig::demo().simulation.start_time().unwrap();
        assert_eq!(
            start,
            NaiveDate::from_ymd_opt(2020, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn valid_toml_parses() {
        let toml = r#"
[simulation]
start = "2021-06-01 08:00:00"
resolution_secs = 30
duration_ticks = 10
rt_factor = 0.5

[bridge]
host = "0.0.0.0"
port = 9000

[client]
url = "http://localhost:9000"
max_attempts = 3

[monitor]
out_path = "out.csv"
step_size = 2
aggregation = "last"
aggregation_overrides = { p = "sum" }

[signals.solar]
kind = "solar"
kw_peak = 8.0
sunrise_hour = 5.0
sunset_hour = 20.0

[signals.ci]
kind = "csv"
path = "ci.csv"

[signals.battery_soc]
kind = "constant"
value = 0.8
"#;
        let cfg = ScenarioConfig::from_toml_str(toml).unwrap();
        assert!(cfg.validate().is_empty());
        assert_eq!(cfg.simulation.resolution_secs, 30);
        assert_eq!(cfg.simulation.rt_factor, Some(0.5));
        assert_eq!(cfg.bridge.address(), "0.0.0.0:9000");
        assert_eq!(cfg.client.retry_policy().max_attempts, 3);
        assert_eq!(cfg.monitor.aggregation_policy().rule_for("p"), Aggregation::Sum);
        assert_eq!(cfg.monitor.aggregation_policy().rule_for("q"), Aggregation::Last);
        assert!(matches!(
            cfg.signals.solar,
            ProfileConfig::Solar {
                noise_std,
                update_interval_secs: 900,
                ..
            } if noise_std == 0.0
        ));
        assert_eq!(
            cfg.signals.ci,
            ProfileConfig::Csv {
                path: PathBuf::from("ci.csv")
            }
        );
    }

    #[test]
    fn invalid_toml_unknown_field() {
        let toml = r#"
[simulation]
resolution_secs = 60
bogus_field = true
"#;
        assert!(ScenarioConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn unknown_profile_kind_is_rejected() {
        let toml = r#"
[signals.solar]
kind = "wind"
"#;
        assert!(ScenarioConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn validation_catches_zero_resolution() {
        let mut cfg = ScenarioConfig::demo();
        cfg.simulation.resolution_secs = 0;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "simulation.resolution_secs"));
    }

    #[test]
    fn validation_catches_bad_start() {
        let mut cfg = ScenarioConfig::demo();
        cfg.simulation.start = "yesterday".to_string();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "simulation.start"));
    }

    #[test]
    fn validation_reports_every_error() {
        let mut cfg = ScenarioConfig::demo();
        cfg.monitor.step_size = 0;
        cfg.client.max_attempts = 0;
        cfg.signals.solar = ProfileConfig::Solar {
            kw_peak: 1.0,
            sunrise_hour: 18.0,
            sunset_hour: 6.0,
            noise_std: 0.0,
            seed: 0,
            update_interval_secs: 60,
        };
        let fields: Vec<_> = cfg.validate().into_iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "client.max_attempts",
                "monitor.step_size",
                "signals.solar.sunrise_hour"
            ]
        );
    }

    #[test]
    fn validation_rejects_non_http_url() {
        let mut cfg = ScenarioConfig::demo();
        cfg.client.url = Some("localhost:8000".to_string());
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "client.url"));
    }

    #[test]
    fn constant_profile_builds() {
        let profile = ProfileConfig::Constant { value: 4.0 }.build().unwrap();
        let dt = NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        assert_eq!(profile.power_at(dt), 4.0);
        assert_eq!(profile.next_update(dt), None);
    }

    #[test]
    fn missing_csv_profile_fails_to_build() {
        let profile = ProfileConfig::Csv {
            path: PathBuf::from("/nonexistent/profile.csv"),
        };
        assert!(profile.build().is_err());
    }
}
