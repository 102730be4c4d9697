//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};

use vpp_sil::config::ScenarioConfig;

/// 2020-01-01T00:00:00, the default scenario start.
pub fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2020, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// Demo scenario shortened to `ticks`, writing its monitor CSV into `dir`.
pub fn short_scenario(dir: &Path, ticks: u64) -> ScenarioConfig {
    let mut config = ScenarioConfig::demo();
    config.simulation.duration_ticks = ticks;
    config.monitor.out_path = dir.join("results.csv");
    config.bridge.port = 0;
    config
}

/// Reads a monitor CSV into one `column -> cell` map per row.
pub fn read_rows(path: &Path) -> Vec<BTreeMap<String, String>> {
    let mut rdr = csv::Reader::from_path(path).unwrap();
    rdr.deserialize().map(|row| row.unwrap()).collect()
}
