//! Incremental, crash-safe artifact storage.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::artifact::{ArtifactName, RunTimestamp};
use super::StoreError;
use crate::models::{Dataset, ItemRecord, RawRecords};

/// What a merge of raw records did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Names not seen before.
    pub added: usize,
    /// Names that replaced an existing record.
    pub updated: usize,
    /// Records rejected as invalid.
    pub dropped: usize,
}

impl MergeOutcome {
    pub fn stored(&self) -> usize {
        self.added + self.updated
    }
}

impl std::ops::AddAssign for MergeOutcome {
    fn add_assign(&mut self, other: Self) {
        self.added += other.added;
        self.updated += other.updated;
        self.dropped += other.dropped;
    }
}

/// One run's dataset and the artifact it is persisted to.
///
/// Every persist rewrites the whole artifact through a temp file in the same
/// directory followed by a rename, so readers see either the previous or the
/// new complete file.
#[derive(Debug)]
pub struct IncrementalStore {
    path: PathBuf,
    name: ArtifactName,
    dataset: Dataset,
}

impl IncrementalStore {
    /// Open the artifact in `dir`, loading prior state if it exists.
    pub fn open(dir: &Path, name: ArtifactName) -> Result<Self, StoreError> {
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        let path = dir.join(name.file_name());

        let dataset = if path.exists() {
            let dataset = load(&path)?;
            info!(
                "Resuming {} with {} stored records",
                name.file_name(),
                dataset.len()
            );
            dataset
        } else {
            Dataset::new()
        };

        Ok(Self {
            path,
            name,
            dataset,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &ArtifactName {
        &self.name
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.dataset.contains(name)
    }

    /// Names already stored, for resuming a job.
    pub fn processed_names(&self) -> impl Iterator<Item = &str> {
        self.dataset.names()
    }

    /// Merge one validated record. Returns `true` if the name was new.
    pub fn merge(&mut self, record: ItemRecord) -> bool {
        self.dataset.merge(record)
    }

    /// Validate and merge raw records. Invalid ones are logged and dropped.
    pub fn merge_raw(&mut self, records: RawRecords) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        for (name, fields) in records {
            match ItemRecord::from_raw(&name, &fields) {
                Ok(record) => {
                    if self.dataset.merge(record) {
                        outcome.added += 1;
                    } else {
                        outcome.updated += 1;
                    }
                }
                Err(e) => {
                    warn!("Dropping record {:?}: {}", name, e);
                    outcome.dropped += 1;
                }
            }
        }
        outcome
    }

    /// Atomically write the dataset to the artifact.
    pub fn persist(&self) -> Result<(), StoreError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut temp = NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
        serde_json::to_writer_pretty(&mut temp, &self.dataset)
            .map_err(|e| StoreError::parse(&self.path, e))?;
        temp.flush().map_err(|e| StoreError::io(&self.path, e))?;
        temp.as_file_mut()
            .sync_all()
            .map_err(|e| StoreError::io(&self.path, e))?;
        temp.persist(&self.path)
            .map_err(|e| StoreError::io(&self.path, e.error))?;

        debug!(
            "Persisted {} records to {}",
            self.dataset.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// Read an artifact. Malformed entries are skipped, a malformed file is an error.
pub fn load(path: &Path) -> Result<Dataset, StoreError> {
    let contents = fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
    if contents.trim().is_empty() {
        return Ok(Dataset::new());
    }
    let value: serde_json::Value =
        serde_json::from_str(&contents).map_err(|e| StoreError::parse(path, e))?;
    Dataset::from_json(value).map_err(|e| StoreError::parse(path, e))
}

/// An artifact found in the artifact directory.
#[derive(Debug, Clone)]
pub struct ArtifactSummary {
    pub name: ArtifactName,
    pub path: PathBuf,
    /// `None` when the file could not be read.
    pub records: Option<usize>,
}

/// Artifacts in `dir` grouped by run timestamp. Unrelated files are ignored.
pub fn list_runs(dir: &Path) -> Result<BTreeMap<RunTimestamp, Vec<ArtifactSummary>>, StoreError> {
    let mut runs: BTreeMap<RunTimestamp, Vec<ArtifactSummary>> = BTreeMap::new();
    if !dir.exists() {
        return Ok(runs);
    }

    for entry in fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))? {
        let entry = entry.map_err(|e| StoreError::io(dir, e))?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str().and_then(ArtifactName::parse) else {
            continue;
        };

        let path = entry.path();
        let records = match load(&path) {
            Ok(dataset) => Some(dataset.len()),
            Err(e) => {
                warn!("Unreadable artifact: {}", e);
                None
            }
        };

        runs.entry(name.timestamp).or_default().push(ArtifactSummary {
            name,
            path,
            records,
        });
    }

    for artifacts in runs.values_mut() {
        artifacts.sort_by(|a, b| (a.name.kind, &a.name.scope).cmp(&(b.name.kind, &b.name.scope)));
    }
    Ok(runs)
}
