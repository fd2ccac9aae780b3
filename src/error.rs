use std::sync::Arc;

use crate::catalog::RuleId;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by catalog administration and (internally) by flag evaluation.
///
/// Admin operations return these to the caller unchanged. Evaluation entry points on
/// [`Client`](crate::Client) never return them; instead they degrade to a disabled
/// [`EvaluationResult`](crate::EvaluationResult) carrying the error message.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The requested flag does not exist.
    #[error("flag not found: {0}")]
    FlagNotFound(String),

    /// The rule does not exist or does not belong to the stated flag.
    #[error("rule {rule_id} not found in flag {flag_key}")]
    RuleNotFound {
        /// Flag the rule was looked up in.
        flag_key: String,
        /// Rule identifier as supplied by the caller.
        rule_id: String,
    },

    /// A flag with the same key already exists.
    #[error("flag with key '{0}' already exists")]
    FlagAlreadyExists(String),

    /// A rule references a variation the flag does not have.
    #[error("invalid variation index {index} (flag {flag_key} has {count} variations)")]
    InvalidVariationIndex {
        /// Flag the rule was created for.
        flag_key: String,
        /// Requested variation index.
        index: u32,
        /// Number of variations the flag has.
        count: usize,
    },

    /// Malformed admin input.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Error evaluating a rule.
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    /// Error from the storage collaborator. Never retried.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Coarse classification of [`Error`], for callers that map errors to responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Flag or rule is absent, or the rule is owned by another flag.
    NotFound,
    /// Duplicate flag key.
    Conflict,
    /// Out-of-range variation index or malformed input.
    Validation,
    /// Rule could not be evaluated.
    Evaluation,
    /// Storage failure.
    Store,
}

impl Error {
    /// Return the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::FlagNotFound(_) | Error::RuleNotFound { .. } => ErrorKind::NotFound,
            Error::FlagAlreadyExists(_) => ErrorKind::Conflict,
            Error::InvalidVariationIndex { .. } | Error::Validation(_) => ErrorKind::Validation,
            Error::Evaluation(_) => ErrorKind::Evaluation,
            Error::Store(_) => ErrorKind::Store,
        }
    }

    pub(crate) fn rule_not_found(flag_key: &str, rule_id: impl ToString) -> Error {
        Error::RuleNotFound {
            flag_key: flag_key.to_owned(),
            rule_id: rule_id.to_string(),
        }
    }
}

/// Errors that can happen while evaluating a single rule.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum EvaluationError {
    /// A `matches` rule holds a pattern that is not a valid regular expression.
    #[error("invalid regular expression in rule {rule_id}: {source}")]
    InvalidRegex {
        /// Rule holding the pattern.
        rule_id: RuleId,
        /// Compilation error reported by `regex`.
        #[source]
        source: regex::Error,
    },
}

/// Failures of the storage collaborator.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum StoreError {
    /// An I/O error.
    #[error("catalog storage I/O error: {0}")]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// Catalog document could not be (de)serialized.
    #[error("malformed catalog document: {0}")]
    Serialization(Arc<serde_json::Error>),

    /// Catalog document parsed but violates catalog invariants.
    #[error("corrupted catalog: {0}")]
    Corrupted(String),

    /// Backend-specific failure.
    #[error("storage backend failure: {0}")]
    Backend(String),

    /// Backend did not answer in time.
    #[error("timed out waiting for catalog storage")]
    Timeout,

    /// A writer panicked while holding the catalog lock.
    #[error("catalog lock poisoned")]
    Poisoned,
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Store(StoreError::Io(Arc::new(value)))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Store(StoreError::Serialization(Arc::new(value)))
    }
}
