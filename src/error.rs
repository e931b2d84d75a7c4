use std::path::PathBuf;
use thiserror::Error;

/// Crate-wide error type returned by library functions.
///
/// Only tier-1 "input" failures (spec.md §7) are represented here. Analytic
/// uncertainty and fatal-engine-bug tiers never produce an `AnalyzerError`;
/// they are absorbed into `ANALYSIS_SKIPPED` / `ANALYSIS_ERROR` findings or a
/// clamp-and-continue fallback by the analyzer that encounters them.
#[derive(Error, Debug, Clone)]
pub enum AnalyzerError {
    #[error("failed to read {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("failed to parse {context}: {detail}")]
    Parse { context: String, detail: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("JSON error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for AnalyzerError {
    fn from(err: serde_json::Error) -> Self {
        AnalyzerError::Json(err.to_string())
    }
}

impl AnalyzerError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AnalyzerError::Io {
            path: path.into(),
            reason: source.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AnalyzerError>;
