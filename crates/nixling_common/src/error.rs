//! Error types for the nixling pipeline.
//!
//! Extraction and resolution errors are recoverable and carry something the
//! caller can show the user (a clarifying question, did-you-mean suggestions).
//! Validation and snapshot errors abort before any mutation happens.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a command token was refused by the whitelist
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("invalid character {found:?} in argument {token:?}")]
    InvalidCharacter { token: String, found: char },

    #[error("path traversal sequence in argument {token:?}")]
    PathTraversal { token: String },

    #[error("argument is {len} characters long (limit {limit})")]
    TooLong { len: usize, limit: usize },

    #[error("empty argument")]
    Empty,

    #[error("no argv template for {operation} via {method}")]
    UnknownMethod { method: String, operation: String },
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::InvalidCharacter { .. } => "invalid_character",
            ValidationError::PathTraversal { .. } => "path_traversal",
            ValidationError::TooLong { .. } => "too_long",
            ValidationError::Empty => "empty",
            ValidationError::UnknownMethod { .. } => "unknown_method",
        }
    }
}

/// Errors surfaced by [`crate::pipeline::handle`] and the components behind it
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// The text was not understood well enough to act on
    #[error("{question}")]
    ExtractionAmbiguous {
        question: String,
        choices: Vec<String>,
        confidence: f32,
    },

    /// No package or service matched the target
    #[error("no package matches '{target}'")]
    NotFound {
        target: String,
        suggestions: Vec<String>,
    },

    /// Security rejection; never retried
    #[error("command rejected: {0}")]
    Validation(#[from] ValidationError),

    /// The package manager ran and exited non-zero
    #[error("package manager exited with code {exit_code:?}")]
    ExecutionFailure {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// The package manager did not finish in time
    #[error("timed out after {timeout_ms} ms")]
    TimedOut {
        timeout_ms: u64,
        stdout: String,
        stderr: String,
    },

    /// The pre-mutation snapshot could not be recorded; nothing was changed
    #[error("could not record a snapshot before mutating: {0}")]
    Snapshot(String),

    /// The caller cancelled the running command
    #[error("cancelled")]
    Cancelled,

    /// An execution was driven through a transition its state does not allow
    #[error("cannot {action} an execution in state {state}")]
    InvalidState { action: String, state: String },
}

impl PipelineError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::ExtractionAmbiguous { .. } => "extraction_ambiguous",
            PipelineError::NotFound { .. } => "not_found",
            PipelineError::Validation(_) => "validation",
            PipelineError::ExecutionFailure { .. } => "execution_failure",
            PipelineError::TimedOut { .. } => "timed_out",
            PipelineError::Snapshot(_) => "snapshot",
            PipelineError::Cancelled => "cancelled",
            PipelineError::InvalidState { .. } => "invalid_state",
        }
    }

    /// Whether retrying (possibly after correcting input) can succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::ExtractionAmbiguous { .. }
            | PipelineError::NotFound { .. }
            | PipelineError::ExecutionFailure { .. }
            | PipelineError::TimedOut { .. }
            | PipelineError::Cancelled => true,
            PipelineError::Validation(_)
            | PipelineError::Snapshot(_)
            | PipelineError::InvalidState { .. } => false,
        }
    }

    /// A one-line hint for the user, when there is one
    pub fn hint(&self) -> Option<String> {
        match self {
            PipelineError::NotFound { suggestions, .. } if !suggestions.is_empty() => {
                Some(format!("Did you mean: {}?", suggestions.join(", ")))
            }
            PipelineError::ExtractionAmbiguous { choices, .. } if !choices.is_empty() => {
                Some(format!("Options: {}", choices.join(", ")))
            }
            PipelineError::TimedOut { .. } => Some(
                "Try again with a longer --timeout, or use a cached answer while offline"
                    .to_string(),
            ),
            PipelineError::ExecutionFailure { .. } => {
                Some("See the captured output above, correct the request and retry".to_string())
            }
            _ => None,
        }
    }
}

/// Internal cache failures; never escape the cache manager
#[derive(Error, Debug)]
pub(crate) enum CacheError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("disk writer is gone")]
    WriterGone,

    #[error("disk writer did not answer within {0:?}")]
    WriterStalled(std::time::Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_never_retryable() {
        let err = PipelineError::from(ValidationError::Empty);
        assert!(!err.is_retryable());
        assert_eq!(err.code(), "validation");
    }

    #[test]
    fn test_not_found_hint_lists_suggestions() {
        let err = PipelineError::NotFound {
            target: "firefx".to_string(),
            suggestions: vec!["firefox".to_string(), "firefox-esr".to_string()],
        };
        assert_eq!(err.hint().as_deref(), Some("Did you mean: firefox, firefox-esr?"));
    }

    #[test]
    fn test_not_found_without_suggestions_has_no_hint() {
        let err = PipelineError::NotFound {
            target: "zzz".to_string(),
            suggestions: vec![],
        };
        assert!(err.hint().is_none());
    }
}
