//! Run timestamps and artifact file names.
//!
//! Artifacts are named `{prefix}_{scope}_{YYYYMMDD}_{HHMMSS}.json`.
//! Downstream consumers group files by the trailing timestamp, so the
//! format is a stable contract.

use std::fmt;
use std::str::FromStr;

use chrono::{Local, NaiveDateTime, Timelike};

use super::StoreError;

/// Directory under the data dir that holds artifacts.
pub const ARTIFACT_DIR: &str = "cs_data";

/// Scope used when a run is not limited to one category.
pub const ALL_SCOPE: &str = "all";

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Wall-clock second a run started at. Shared by every artifact of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunTimestamp(NaiveDateTime);

impl RunTimestamp {
    pub fn now() -> Self {
        let now = Local::now().naive_local();
        Self(now.with_nanosecond(0).unwrap_or(now))
    }

    pub fn from_datetime(datetime: NaiveDateTime) -> Self {
        Self(datetime)
    }

    pub fn datetime(&self) -> NaiveDateTime {
        self.0
    }
}

impl fmt::Display for RunTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(TIMESTAMP_FORMAT))
    }
}

impl FromStr for RunTimestamp {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDateTime::parse_from_str(s.trim(), TIMESTAMP_FORMAT)
            .map(Self)
            .map_err(|_| StoreError::InvalidTimestamp(s.to_string()))
    }
}

/// Which source produced an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKind {
    /// Paginated listing (`cs_`).
    Listing,
    /// Infinite-scroll feed with detail pages (`qaq_`).
    Detail,
}

impl ArtifactKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Listing => "cs",
            Self::Detail => "qaq",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "cs" => Some(Self::Listing),
            "qaq" => Some(Self::Detail),
            _ => None,
        }
    }
}

/// Replace characters outside `[A-Za-z0-9_-]` with `-`.
pub fn sanitize_scope(scope: &str) -> String {
    let cleaned: String = scope
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();

    if cleaned.is_empty() {
        ALL_SCOPE.to_string()
    } else {
        cleaned
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactName {
    pub kind: ArtifactKind,
    pub scope: String,
    pub timestamp: RunTimestamp,
}

impl ArtifactName {
    /// `scope` of `None` means the whole listing.
    pub fn new(kind: ArtifactKind, scope: Option<&str>, timestamp: RunTimestamp) -> Self {
        Self {
            kind,
            scope: sanitize_scope(scope.unwrap_or(ALL_SCOPE)),
            timestamp,
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}_{}_{}.json", self.kind.prefix(), self.scope, self.timestamp)
    }

    /// Parse a file name. Anything not following the naming contract is `None`.
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(".json")?;
        let parts: Vec<&str> = stem.split('_').collect();
        if parts.len() < 4 {
            return None;
        }

        let kind = ArtifactKind::from_prefix(parts[0])?;
        let n = parts.len();
        let timestamp: RunTimestamp = format!("{}_{}", parts[n - 2], parts[n - 1]).parse().ok()?;
        let scope = parts[1..n - 2].join("_");
        if scope.is_empty() {
            return None;
        }

        Some(Self {
            kind,
            scope,
            timestamp,
        })
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}
