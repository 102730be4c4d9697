//! End-to-end co-simulation runs against an in-process bridge.

mod common;

use std::io::Write;
use std::sync::Arc;

use vpp_sil::config::ProfileConfig;
use vpp_sil::runner::build_engine;
use vpp_sil::sil::protocol::{BatteryCommand, PowerMode, Scalar};
use vpp_sil::sil::Bridge;

#[test]
fn demo_run_publishes_signals_and_records_them() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::short_scenario(dir.path(), 3);
    let bridge = Arc::new(Bridge::in_memory());

    let summary = build_engine(&config, bridge.clone()).unwrap().run().unwrap();
    assert_eq!(summary.last_tick, Some(2));
    // Constant generators step once; the SIL interface and monitor every tick.
    assert_eq!(summary.steps, 3 + 3 + 3);

    assert_eq!(bridge.scalar(Scalar::Solar).unwrap(), Some(3.0));
    assert_eq!(bridge.scalar(Scalar::Ci).unwrap(), Some(250.0));
    assert_eq!(bridge.scalar(Scalar::BatterySoc).unwrap(), Some(0.5));
    assert_eq!(bridge.current_tick().unwrap(), Some(2));

    let rows = common::read_rows(&dir.path().join("results.csv"));
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["time"], "2020-01-01 00:00:00");
    assert_eq!(rows[2]["time"], "2020-01-01 00:02:00");
    assert_eq!(rows[1]["solar"], "3");
    assert_eq!(rows[1]["ci"], "250");
    assert_eq!(rows[1]["battery_soc"], "0.5");
    assert!(!rows[0].contains_key("nodes_power_mode"));
}

#[test]
fn queued_commands_show_up_in_the_monitor_output() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::short_scenario(dir.path(), 2);
    let bridge = Arc::new(Bridge::in_memory());
    bridge.set_power_mode(3, PowerMode::Normal).unwrap();
    bridge
        .set_battery(&BatteryCommand {
            min_soc: 0.25,
            grid_charge: 2.0,
        })
        .unwrap();

    build_engine(&config, bridge.clone()).unwrap().run().unwrap();

    let rows = common::read_rows(&dir.path().join("results.csv"));
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(row["nodes_power_mode"], r#"{"3":"normal"}"#);
        assert_eq!(row["battery_min_soc"], "0.25");
        assert_eq!(row["battery_grid_charge"], "2");
    }
    assert!(bridge.collect_set().unwrap().is_empty());
}

#[test]
fn csv_profile_drives_the_published_signal() {
    let dir = tempfile::tempdir().unwrap();
    let profile_path = dir.path().join("ci.csv");
    let mut file = std::fs::File::create(&profile_path).unwrap();
    writeln!(file, "time,value").unwrap();
    writeln!(file, "2020-01-01 00:00:00,100").unwrap();
    writeln!(file, "2020-01-01 00:02:00,180").unwrap();
    drop(file);

    let mut config = common::short_scenario(dir.path(), 4);
    config.signals.ci = ProfileConfig::Csv { path: profile_path };
    let bridge = Arc::new(Bridge::in_memory());
    build_engine(&config, bridge.clone()).unwrap().run().unwrap();

    let rows = common::read_rows(&dir.path().join("results.csv"));
    let ci: Vec<&str> = rows.iter().map(|r| r["ci"].as_str()).collect();
    assert_eq!(ci, ["100", "100", "180", "180"]);
    assert_eq!(bridge.scalar(Scalar::Ci).unwrap(), Some(180.0));
}

#[test]
fn monitor_step_size_thins_the_output() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::short_scenario(dir.path(), 6);
    config.monitor.step_size = 3;
    build_engine(&config, Arc::new(Bridge::in_memory()))
        .unwrap()
        .run()
        .unwrap();

    let rows = common::read_rows(&dir.path().join("results.csv"));
    let times: Vec<&str> = rows.iter().map(|r| r["time"].as_str()).collect();
    assert_eq!(times, ["2020-01-01 00:00:00", "2020-01-01 00:03:00"]);
}
