//! Name-keyed collection of item records for one run.

use std::collections::btree_map::{self, BTreeMap};

use serde::Serialize;
use tracing::warn;

use super::item::ItemRecord;

/// Item records collected by one run, keyed by item name.
///
/// Merging is last-write-wins by name. No history is kept inside a run's
/// dataset; later observations replace earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Dataset {
    items: BTreeMap<String, ItemRecord>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record. Returns `true` if the name was new.
    pub fn merge(&mut self, record: ItemRecord) -> bool {
        self.items.insert(record.name.clone(), record).is_none()
    }

    /// Merge several records, returning how many names were new.
    pub fn merge_all<I>(&mut self, records: I) -> usize
    where
        I: IntoIterator<Item = ItemRecord>,
    {
        records
            .into_iter()
            .map(|r| self.merge(r))
            .filter(|inserted| *inserted)
            .count()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.items.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ItemRecord> {
        self.items.get(name)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Values<'_, String, ItemRecord> {
        self.items.values()
    }

    /// Build a dataset from a persisted JSON object.
    ///
    /// Entries that do not match the record schema are skipped with a
    /// warning so one bad entry does not make a whole artifact unreadable.
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let entries: BTreeMap<String, serde_json::Value> = serde_json::from_value(value)?;
        let mut dataset = Self::new();

        for (name, entry) in entries {
            if name.trim().is_empty() {
                warn!("Skipping stored record with empty name");
                continue;
            }
            match serde_json::from_value::<ItemRecord>(entry) {
                Ok(mut record) => {
                    record.name = name;
                    dataset.merge(record);
                }
                Err(e) => warn!("Skipping malformed stored record {:?}: {}", name, e),
            }
        }

        Ok(dataset)
    }
}
