//! Error taxonomy for the evaluation engine.
//!
//! Malformed service output is deliberately absent: it degrades to a
//! raw-fallback parse inside the client and never reaches callers.

use std::time::Duration;

use crate::model::FailureKind;

/// Failure of a single classification call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
    /// Connection refused, unreachable host, or a non-success HTTP status.
    #[error("classification service unavailable at {endpoint}: {message}")]
    ServiceUnavailable {
        endpoint: String,
        status: Option<u16>,
        message: String,
    },

    /// No response within the per-call bound.
    #[error("classification request timed out after {}s", timeout.as_secs_f64())]
    Timeout { timeout: Duration },

    /// The service is up but does not serve the configured model.
    #[error("model '{model}' is not available at {endpoint}; run `ollama pull {model}`")]
    ModelNotFound { model: String, endpoint: String },
}

impl ClassifyError {
    pub fn unavailable(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            endpoint: endpoint.into(),
            status: None,
            message: message.into(),
        }
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::ServiceUnavailable { .. } | Self::ModelNotFound { .. } => {
                FailureKind::ServiceUnavailable
            }
            Self::Timeout { .. } => FailureKind::Timeout,
        }
    }
}

/// Result store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Id not present in the catalog. Indicates a caller bug.
    #[error("unknown test case: {case_id}")]
    UnknownCase { case_id: String },

    /// Persisted document could not be decoded.
    #[error("result store corrupt at {path}: {message}")]
    Corrupt { path: String, message: String },

    #[error("result store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("result store sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },

    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Test catalog loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {message}")]
    Read { path: String, message: String },

    #[error("failed to parse catalog {path}: {message}")]
    Parse { path: String, message: String },

    #[error("catalog has no test cases")]
    Empty,

    #[error("duplicate test case id: {0}")]
    DuplicateId(String),

    #[error("test case {0} has no expected codes")]
    EmptyExpected(String),

    #[error("test case {0} has an empty input")]
    EmptyInput(String),

    #[error("unknown category: {0}")]
    UnknownCategory(String),
}

/// Batch-level failures. Per-case failures never surface here.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The service is down entirely; the batch was not (or not usefully) executed.
    #[error("{}", unreachable_message(source))]
    ServiceUnreachable { source: ClassifyError },

    #[error("invalid batch: {0}")]
    InvalidInput(String),

    #[error("worker task failed: {0}")]
    Worker(String),
}

fn unreachable_message(source: &ClassifyError) -> String {
    match source {
        ClassifyError::ModelNotFound { .. } => source.to_string(),
        _ => format!("{source}. Is the classification service running (e.g. `ollama serve`)?"),
    }
}

/// Failure of a manager-level run: selection, execution, or persistence.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
