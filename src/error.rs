//! Error surface for the retrieval pipeline.
//!
//! Expected site-interaction outcomes (missing element, missing record,
//! failed capture) travel as [`ErrorInfo`] values inside stage results —
//! they are data, not thrown errors. Actual `Err` returns are reserved for
//! programming errors such as invalid configuration ([`ConfigError`]) and
//! for the browser-plumbing layer, which reports transport problems as
//! `anyhow::Error` and gets converted at the stage boundary.

use serde::{Deserialize, Serialize};

use crate::model::Stage;

/// Classification of a stage-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// A selector, record, or reference was absent. Expected and recoverable.
    NotFound,
    /// A wait exceeded its budget.
    Timeout,
    /// Captured bytes failed the magic-byte signature check.
    ValidationFailure,
    /// Transport-level failure (DNS, TLS, connection reset).
    NetworkError,
    /// The site demanded credentials the adapter could not supply.
    AuthenticationRequired,
    /// Every candidate selector was exhausted with none resolving.
    /// Signals the site adapter needs updating.
    SiteStructureChanged,
    /// The caller cancelled the request mid-run.
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "notFound",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ValidationFailure => "validationFailure",
            ErrorKind::NetworkError => "networkError",
            ErrorKind::AuthenticationRequired => "authenticationRequired",
            ErrorKind::SiteStructureChanged => "siteStructureChanged",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage-level failure, carried in `StageResult.error` and surfaced in the
/// terminal `RetrievalResult.error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    /// The stage at which the failure occurred, once known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stage: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationFailure, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkError, message)
    }

    pub fn auth_required(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthenticationRequired, message)
    }

    pub fn structure_changed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SiteStructureChanged, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Tag this failure with the stage it occurred at.
    pub fn at_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Convert a plumbing-layer error into a `NetworkError`.
    pub fn from_plumbing(err: &anyhow::Error) -> Self {
        Self::new(ErrorKind::NetworkError, format!("{err:#}"))
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.stage {
            Some(stage) => write!(f, "[{}] {} at {}", self.kind, self.message, stage.name()),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

/// Invalid configuration. The one class of problem that is a hard error
/// rather than a stage outcome.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid identifier pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("jitter bounds inverted: min {min_ms}ms > max {max_ms}ms")]
    JitterBounds { min_ms: u64, max_ms: u64 },
    #[error("max_sessions must be at least 1")]
    ZeroSessions,
    #[error("timeout `{name}` must be nonzero")]
    ZeroTimeout { name: &'static str },
    #[error("instrument digit bounds inverted: min {min} > max {max}")]
    DigitBounds { min: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serializes_camel_case() {
        let json = serde_json::to_string(&ErrorKind::SiteStructureChanged).unwrap();
        assert_eq!(json, "\"siteStructureChanged\"");
        let json = serde_json::to_string(&ErrorKind::NotFound).unwrap();
        assert_eq!(json, "\"notFound\"");
    }

    #[test]
    fn test_error_info_stage_tagging() {
        let info = ErrorInfo::not_found("no matching parcel").at_stage(Stage::LocateSourceRecord);
        assert_eq!(info.kind, ErrorKind::NotFound);
        assert_eq!(info.stage, Some(Stage::LocateSourceRecord));
        assert!(info.to_string().contains("locateSourceRecord"));
    }

    #[test]
    fn test_stage_omitted_when_unset() {
        let info = ErrorInfo::timeout("popup wait exceeded");
        let json = serde_json::to_value(&info).unwrap();
        assert!(json.get("stage").is_none());
        assert_eq!(json["kind"], "timeout");
    }
}
