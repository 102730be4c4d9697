use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::{EventLogStore, LogEntry, StoreError};

#[derive(Debug, Default)]
struct Inner {
    scalars: HashMap<String, f64>,
    buckets: HashMap<String, Vec<LogEntry>>,
}

/// In-process store; every operation runs under one mutex.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl EventLogStore for InMemoryStore {
    fn get_scalar(&self, key: &str) -> Result<Option<f64>, StoreError> {
        Ok(self.lock()?.scalars.get(key).copied())
    }

    fn set_scalars(&self, values: &[(&str, Option<f64>)]) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        for (key, value) in values {
            match value {
                Some(value) => inner.scalars.insert((*key).to_string(), *value),
                None => inner.scalars.remove(*key),
            };
        }
        Ok(())
    }

    fn append(&self, entries: &[(&str, LogEntry)]) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        for (bucket, entry) in entries {
            inner
                .buckets
                .entry((*bucket).to_string())
                .or_default()
                .push(entry.clone());
        }
        Ok(())
    }

    fn drain(&self, buckets: &[&str]) -> Result<BTreeMap<String, Vec<LogEntry>>, StoreError> {
        let mut inner = self.lock()?;
        Ok(buckets
            .iter()
            .map(|name| {
                let entries = inner
                    .buckets
                    .get_mut(*name)
                    .map(std::mem::take)
                    .unwrap_or_default();
                ((*name).to_string(), entries)
            })
            .collect())
    }

    fn bucket_len(&self, bucket: &str) -> Result<usize, StoreError> {
        Ok(self.lock()?.buckets.get(bucket).map_or(0, Vec::len))
    }
}
