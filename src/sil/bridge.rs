//! Control bridge operations over an [`EventLogStore`].

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{NaiveDateTime, TimeDelta, Utc};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::sim::types::SimTime;
use crate::store::{EventLogStore, InMemoryStore, LogEntry, StoreError};

use super::protocol::{
    ACTUATION_BUCKETS, BATTERY_GRID_CHARGE_LOG, BATTERY_MIN_SOC_LOG, BatteryCommand, CollectSet,
    POWER_MODE_LOG, PowerMode, Scalar, SimUpdate,
};
use super::{BridgeError, ControlChannel};

/// The bridge between an external controller and the simulation.
///
/// Scalars are written by the simulation and read by the controller;
/// actuation commands flow the other way through append-only buckets.
/// Every command gets a receipt timestamp that is strictly greater than
/// the previous one issued by this bridge.
///
/// # Examples
///
/// ```
/// use vpp_sil::sil::{Bridge, PowerMode};
///
/// let bridge = Bridge::in_memory();
/// bridge.set_power_mode(3, PowerMode::Normal).unwrap();
///
/// let drained = bridge.collect_set().unwrap();
/// assert_eq!(drained.power_modes()["3"], PowerMode::Normal);
/// assert!(bridge.collect_set().unwrap().is_empty());
/// ```
pub struct Bridge {
    store: Arc<dyn EventLogStore>,
    /// Last issued receipt timestamp; held across the append it stamps.
    last_stamp: Mutex<Option<NaiveDateTime>>,
    /// Most recent tokened drain, replayed when the same token repeats.
    last_drain: Mutex<Option<(u64, CollectSet)>>,
}

impl Bridge {
    pub fn new(store: Arc<dyn EventLogStore>) -> Self {
        Self {
            store,
            last_stamp: Mutex::new(None),
            last_drain: Mutex::new(None),
        }
    }

    /// Bridge over a fresh in-process store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStore::new()))
    }

    /// Latest value of a scalar, `None` if never published.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Store` if the store cannot be read.
    pub fn scalar(&self, scalar: Scalar) -> Result<Option<f64>, BridgeError> {
        Ok(self.store.get_scalar(scalar.key())?)
    }

    /// Tick of the last publish, if it carried one.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Store` if the store cannot be read.
    pub fn current_tick(&self) -> Result<Option<SimTime>, BridgeError> {
        Ok(self
            .scalar(Scalar::Tick)?
            .filter(|t| t.is_finite() && *t >= 0.0)
            .map(|t| t as SimTime))
    }

    /// Overwrites all published scalars at once. An update without a tick
    /// unsets the tick slot, so later commands carry no tag.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Store` if the store cannot be written.
    pub fn update(&self, update: &SimUpdate) -> Result<(), BridgeError> {
        let values = [
            (Scalar::Solar.key(), Some(update.solar)),
            (Scalar::Ci.key(), Some(update.ci)),
            (Scalar::BatterySoc.key(), Some(update.battery_soc)),
            (Scalar::Tick.key(), update.tick.map(|tick| tick as f64)),
        ];
        self.store.set_scalars(&values)?;
        debug!(?update, "scalars published");
        Ok(())
    }

    /// Records a battery command in both battery buckets under one timestamp.
    ///
    /// # Returns
    ///
    /// The receipt timestamp.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Store` if the store cannot be written.
    pub fn set_battery(&self, command: &BatteryCommand) -> Result<NaiveDateTime, BridgeError> {
        let tick = self.current_tick()?;
        self.stamped_append(|timestamp| {
            vec![
                (
                    BATTERY_MIN_SOC_LOG,
                    LogEntry {
                        timestamp,
                        tick,
                        value: command.min_soc.into(),
                    },
                ),
                (
                    BATTERY_GRID_CHARGE_LOG,
                    LogEntry {
                        timestamp,
                        tick,
                        value: command.grid_charge.into(),
                    },
                ),
            ]
        })
    }

    /// Records a power-mode command for one node.
    ///
    /// # Returns
    ///
    /// The receipt timestamp.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Store` if the store cannot be written.
    pub fn set_power_mode(&self, node: u32, mode: PowerMode) -> Result<NaiveDateTime, BridgeError> {
        let tick = self.current_tick()?;
        let value = serde_json::Value::Object(serde_json::Map::from_iter([(
            node.to_string(),
            serde_json::Value::from(mode.as_str()),
        )]));
        self.stamped_append(|timestamp| {
            vec![(
                POWER_MODE_LOG,
                LogEntry {
                    timestamp,
                    tick,
                    value,
                },
            )]
        })
    }

    /// Drains all actuation buckets at once.
    ///
    /// Entries that cannot be decoded are logged and skipped; they never
    /// keep the rest of the batch from being returned.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Store` if the store fails.
    pub fn collect_set(&self) -> Result<CollectSet, BridgeError> {
        let mut drained = self.store.drain(&ACTUATION_BUCKETS)?;
        let mut set = CollectSet::default();
        let mut take = |bucket: &str| drained.remove(bucket).unwrap_or_default();

        for entry in take(BATTERY_MIN_SOC_LOG) {
            if let Some(value) = decode(BATTERY_MIN_SOC_LOG, &entry) {
                record_tick(&mut set, &entry);
                set.battery_min_soc.insert(entry.timestamp, value);
            }
        }
        for entry in take(BATTERY_GRID_CHARGE_LOG) {
            if let Some(value) = decode(BATTERY_GRID_CHARGE_LOG, &entry) {
                record_tick(&mut set, &entry);
                set.battery_grid_charge.insert(entry.timestamp, value);
            }
        }
        for entry in take(POWER_MODE_LOG) {
            if let Some(value) = decode(POWER_MODE_LOG, &entry) {
                record_tick(&mut set, &entry);
                set.nodes_power_mode.insert(entry.timestamp, value);
            }
        }
        debug!(
            min_soc = set.battery_min_soc.len(),
            grid_charge = set.battery_grid_charge.len(),
            power_modes = set.nodes_power_mode.len(),
            "actuation buckets drained"
        );
        Ok(set)
    }

    /// Drains under a caller-chosen token. Repeating the token of the most
    /// recent tokened drain returns that batch again instead of draining,
    /// so a client may retry a drain whose response it never received.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Store` if the store fails.
    pub fn collect_set_with_token(&self, token: u64) -> Result<CollectSet, BridgeError> {
        let mut last = self
            .last_drain
            .lock()
            .map_err(|_| BridgeError::Store(StoreError::Poisoned))?;
        if let Some((_, set)) = last.as_ref().filter(|(previous, _)| *previous == token) {
            debug!(token, "repeated drain token, replaying batch");
            return Ok(set.clone());
        }
        let set = self.collect_set()?;
        *last = Some((token, set.clone()));
        Ok(set)
    }

    fn stamped_append<F>(&self, entries: F) -> Result<NaiveDateTime, BridgeError>
    where
        F: FnOnce(NaiveDateTime) -> Vec<(&'static str, LogEntry)>,
    {
        let mut last = self.lock_stamp()?;
        let mut timestamp = Utc::now().naive_utc();
        if let Some(previous) = last.filter(|previous| timestamp <= *previous) {
            timestamp = previous + TimeDelta::microseconds(1);
        }
        self.store.append(&entries(timestamp))?;
        *last = Some(timestamp);
        Ok(timestamp)
    }

    fn lock_stamp(&self) -> Result<MutexGuard<'_, Option<NaiveDateTime>>, BridgeError> {
        self.last_stamp
            .lock()
            .map_err(|_| BridgeError::Store(StoreError::Poisoned))
    }
}

fn record_tick(set: &mut CollectSet, entry: &LogEntry) {
    if let Some(tick) = entry.tick {
        set.ticks.insert(entry.timestamp, tick);
    }
}

fn decode<T: DeserializeOwned>(bucket: &str, entry: &LogEntry) -> Option<T> {
    match serde_json::from_value(entry.value.clone()) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(bucket, timestamp = %entry.timestamp, error = %e, "dropping undecodable entry");
            None
        }
    }
}

impl ControlChannel for Bridge {
    fn publish(&self, update: &SimUpdate) -> Result<(), BridgeError> {
        self.update(update)
    }

    fn collect(&self) -> Result<CollectSet, BridgeError> {
        self.collect_set()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn update(tick: Option<SimTime>) -> SimUpdate {
        SimUpdate {
            solar: 1.5,
            ci: 300.0,
            battery_soc: 0.8,
            tick,
        }
    }

    #[test]
    fn scalars_are_unset_until_published() {
        let bridge = Bridge::in_memory();
        assert_eq!(bridge.scalar(Scalar::Solar).unwrap(), None);
        bridge.update(&update(None)).unwrap();
        assert_eq!(bridge.scalar(Scalar::Solar).unwrap(), Some(1.5));
        assert_eq!(bridge.scalar(Scalar::Ci).unwrap(), Some(300.0));
        assert_eq!(bridge.scalar(Scalar::BatterySoc).unwrap(), Some(0.8));
        assert_eq!(bridge.current_tick().unwrap(), None);
    }

    #[test]
    fn node_mode_drains_once() {
        let bridge = Bridge::in_memory();
        bridge.set_power_mode(3, PowerMode::Normal).unwrap();

        let first = bridge.collect_set().unwrap();
        assert_eq!(first.nodes_power_mode.len(), 1);
        let command = first.nodes_power_mode.values().next().unwrap();
        assert_eq!(command.len(), 1);
        assert_eq!(command["3"], PowerMode::Normal);

        let second = bridge.collect_set().unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn battery_command_shares_one_timestamp() {
        let bridge = Bridge::in_memory();
        let stamp = bridge
            .set_battery(&BatteryCommand {
                min_soc: 0.3,
                grid_charge: 2.0,
            })
            .unwrap();
        let set = bridge.collect_set().unwrap();
        assert_eq!(set.battery_min_soc[&stamp], 0.3);
        assert_eq!(set.battery_grid_charge[&stamp], 2.0);
    }

    #[test]
    fn receipt_timestamps_strictly_increase() {
        let bridge = Bridge::in_memory();
        let stamps: Vec<_> = (0..100)
            .map(|n| bridge.set_power_mode(n, PowerMode::PowerSaving).unwrap())
            .collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(bridge.collect_set().unwrap().nodes_power_mode.len(), 100);
    }

    #[test]
    fn commands_are_tagged_with_last_published_tick() {
        let bridge = Bridge::in_memory();
        let before = bridge.set_power_mode(1, PowerMode::Normal).unwrap();
        bridge.update(&update(Some(7))).unwrap();
        let after = bridge.set_power_mode(2, PowerMode::Normal).unwrap();

        let set = bridge.collect_set().unwrap();
        assert_eq!(set.ticks.get(&before), None);
        assert_eq!(set.ticks.get(&after), Some(&7));
    }

    #[test]
    fn concurrent_commands_are_each_drained_once() {
        let bridge = Arc::new(Bridge::in_memory());
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let bridge = Arc::clone(&bridge);
                thread::spawn(move || {
                    for n in 0..100 {
                        bridge
                            .set_battery(&BatteryCommand {
                                min_soc: f64::from(w),
                                grid_charge: f64::from(n),
                            })
                            .unwrap();
                    }
                })
            })
            .collect();

        let mut total = 0;
        while writers.iter().any(|w| !w.is_finished()) {
            let set = bridge.collect_set().unwrap();
            assert_eq!(set.battery_min_soc.len(), set.battery_grid_charge.len());
            total += set.battery_min_soc.len();
        }
        for w in writers {
            w.join().unwrap();
        }
        total += bridge.collect_set().unwrap().battery_min_soc.len();
        assert_eq!(total, 400);
    }

    #[test]
    fn update_without_tick_clears_the_tag() {
        let bridge = Bridge::in_memory();
        bridge.update(&update(Some(7))).unwrap();
        bridge.update(&update(None)).unwrap();
        assert_eq!(bridge.current_tick().unwrap(), None);

        let stamp = bridge.set_power_mode(4, PowerMode::Normal).unwrap();
        let set = bridge.collect_set().unwrap();
        assert!(set.nodes_power_mode.contains_key(&stamp));
        assert_eq!(set.ticks.get(&stamp), None);
    }

    #[test]
    fn corrupt_entries_do_not_sink_the_batch() {
        let store = Arc::new(InMemoryStore::new());
        let bridge = Bridge::new(Arc::clone(&store) as Arc<dyn EventLogStore>);
        let stamp = bridge
            .set_battery(&BatteryCommand {
                min_soc: 0.4,
                grid_charge: 1.0,
            })
            .unwrap();
        for value in [serde_json::json!("garbage"), serde_json::json!({ "1": "turbo" })] {
            store
                .append(&[(
                    POWER_MODE_LOG,
                    LogEntry {
                        timestamp: Utc::now().naive_utc(),
                        tick: None,
                        value,
                    },
                )])
                .unwrap();
        }
        bridge.set_power_mode(2, PowerMode::Normal).unwrap();

        let set = bridge.collect_set().unwrap();
        assert_eq!(set.battery_min_soc[&stamp], 0.4);
        assert_eq!(set.battery_grid_charge[&stamp], 1.0);
        assert_eq!(set.nodes_power_mode.len(), 1);
        assert_eq!(store.bucket_len(POWER_MODE_LOG).unwrap(), 0);
    }

    #[test]
    fn repeated_token_replays_the_batch() {
        let bridge = Bridge::in_memory();
        bridge.set_power_mode(3, PowerMode::Normal).unwrap();

        let first = bridge.collect_set_with_token(11).unwrap();
        assert_eq!(first.nodes_power_mode.len(), 1);
        bridge.set_power_mode(5, PowerMode::PowerSaving).unwrap();
        assert_eq!(bridge.collect_set_with_token(11).unwrap(), first);

        let next = bridge.collect_set_with_token(12).unwrap();
        assert_eq!(next.nodes_power_mode.len(), 1);
        assert_eq!(next.nodes_power_mode.values().next().unwrap()["5"], PowerMode::PowerSaving);
        assert!(bridge.collect_set_with_token(13).unwrap().is_empty());
    }
}
