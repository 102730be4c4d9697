//! Event log store: named scalar slots and append-only, drainable log
//! buckets shared between the simulation side and the control bridge.
//!
//! Scalars are last-write-wins and unset until first written. Bucket entries
//! are returned by exactly one `drain`. Multi-key writes are atomic with
//! respect to each other and to `drain`.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::sim::types::SimTime;

mod memory;

pub use memory::InMemoryStore;

/// One timestamped entry of a log bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Receipt timestamp, unique per bridge instance.
    pub timestamp: NaiveDateTime,
    /// Last tick published by the simulation side before receipt.
    pub tick: Option<SimTime>,
    /// Entry payload.
    pub value: serde_json::Value,
}

/// Failures of the store medium.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A writer panicked while holding the store lock.
    #[error("store lock poisoned")]
    Poisoned,

    /// The backing store cannot be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Shared key-value medium between the bridge and the simulation side.
pub trait EventLogStore: Send + Sync {
    /// Latest value of a scalar slot, `None` if never written.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the store cannot be read.
    fn get_scalar(&self, key: &str) -> Result<Option<f64>, StoreError>;

    /// Overwrites several scalar slots in one atomic write. A `None` value
    /// returns its slot to the unset state.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the store cannot be written.
    fn set_scalars(&self, values: &[(&str, Option<f64>)]) -> Result<(), StoreError>;

    /// Appends entries to one or more buckets in one atomic write.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the store cannot be written.
    fn append(&self, entries: &[(&str, LogEntry)]) -> Result<(), StoreError>;

    /// Returns and clears the named buckets in one atomic operation.
    ///
    /// Every requested name is present in the result, empty buckets as
    /// empty vectors. Entries keep append order.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the store cannot be read.
    fn drain(&self, buckets: &[&str]) -> Result<BTreeMap<String, Vec<LogEntry>>, StoreError>;

    /// Number of entries currently held in a bucket.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the store cannot be read.
    fn bucket_len(&self, bucket: &str) -> Result<usize, StoreError>;
}
