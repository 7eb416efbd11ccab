//! Persistent storage for collected item data.

mod artifact;
mod store;

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use artifact::{
    sanitize_scope, ArtifactKind, ArtifactName, RunTimestamp, ALL_SCOPE, ARTIFACT_DIR,
};
pub use store::{list_runs, load, ArtifactSummary, IncrementalStore, MergeOutcome};

/// Errors reading or writing artifacts.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed artifact {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid run timestamp {0:?}, expected YYYYMMDD_HHMMSS")]
    InvalidTimestamp(String),
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn parse(path: &Path, source: serde_json::Error) -> Self {
        Self::Parse {
            path: path.to_path_buf(),
            source,
        }
    }
}
