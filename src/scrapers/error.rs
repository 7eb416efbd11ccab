//! Unit-of-work errors.

use thiserror::Error;

use crate::browser::BrowserError;
use crate::repository::StoreError;

/// How the scheduler should treat a failed unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Worth retrying: timeouts, navigation and protocol hiccups.
    Transient,
    /// The page loaded but does not look like we expect. Retrying won't help.
    StructuralMismatch,
    /// The session or the output is unusable. Aborts the job.
    Fatal,
}

impl FetchErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::StructuralMismatch => "structural mismatch",
            Self::Fatal => "fatal",
        }
    }
}

#[derive(Debug, Error)]
#[error("{} error: {message}", .kind.as_str())]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Transient, message)
    }

    pub fn structural(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::StructuralMismatch, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Fatal, message)
    }

    pub fn is_fatal(&self) -> bool {
        self.kind == FetchErrorKind::Fatal
    }
}

impl From<BrowserError> for FetchError {
    fn from(e: BrowserError) -> Self {
        let kind = if e.is_fatal() {
            FetchErrorKind::Fatal
        } else {
            FetchErrorKind::Transient
        };
        Self::new(kind, e.to_string())
    }
}

impl From<StoreError> for FetchError {
    fn from(e: StoreError) -> Self {
        Self::fatal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_browser_error_mapping() {
        let timeout: FetchError = BrowserError::timeout("selector div", Duration::from_secs(3)).into();
        assert_eq!(timeout.kind, FetchErrorKind::Transient);

        let launch: FetchError = BrowserError::Launch("no chrome".into()).into();
        assert!(launch.is_fatal());
    }

    #[test]
    fn test_display_includes_kind() {
        let err = FetchError::structural("filter button missing");
        assert_eq!(
            err.to_string(),
            "structural mismatch error: filter button missing"
        );
    }
}
