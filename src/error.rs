//! Error taxonomy for the metrics store.
//!
//! Library operations return [`StoreError`] so callers can tell a corrupt
//! row from a missing item from a failed write. The CLI wraps these in
//! `anyhow` like every other command error.

use ffm_core::models::ModelError;
use thiserror::Error;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    /// A schema step failed. The whole migration session was rolled back.
    #[error("migration to schema v{version} failed: {source}")]
    Migration {
        version: i64,
        #[source]
        source: sqlx::Error,
    },

    /// The migration list itself is malformed (gaps or out-of-order versions).
    #[error("invalid migration plan: {0}")]
    MigrationPlan(String),

    /// A stored or submitted metric name is outside the fixed set.
    #[error("unknown metric '{metric}' in {context}")]
    UnknownMetric { metric: String, context: String },

    /// The referenced item is not in the catalog.
    #[error("item not registered in catalog: {0}")]
    UnregisteredItem(String),

    /// One statement of a batch write failed. Nothing from the batch was kept.
    #[error("write failed ({statement}): {source}")]
    Write {
        statement: String,
        #[source]
        source: sqlx::Error,
    },

    /// Summary recomputation failed. Hourly facts are intact; summaries are stale.
    #[error("daily rebuild for {scope} failed, summaries are stale: {source}")]
    Rebuild {
        scope: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("hour {0} is outside 0..=23")]
    InvalidHour(i64),

    #[error("invalid count {value} at hour {hour}")]
    InvalidValue { hour: i64, value: i64 },

    /// Any other value rejected by the typed model (catalog enums).
    #[error("invalid input: {0}")]
    InvalidInput(ModelError),

    #[error("invalid date: '{0}'")]
    InvalidDate(String),

    #[error("invalid SQL identifier: '{0}'")]
    InvalidIdentifier(String),

    /// A stored row violates an invariant the schema should have enforced.
    #[error("corrupt row in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },

    /// Manual schema surgery refused to proceed.
    #[error("schema maintenance: {0}")]
    Maintenance(String),

    #[error("recognizer '{recognizer}' timed out after {timeout_secs}s")]
    RecognitionTimeout { recognizer: String, timeout_secs: u64 },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure reported by an external collaborator (catalog lookup).
    #[error(transparent)]
    External(#[from] anyhow::Error),
}

impl From<ModelError> for StoreError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::UnknownMetric(metric) => StoreError::UnknownMetric {
                metric,
                context: "submitted data".to_string(),
            },
            ModelError::InvalidHour(hour) => StoreError::InvalidHour(hour),
            ModelError::InvalidValue { hour, value } => StoreError::InvalidValue { hour, value },
            other => StoreError::InvalidInput(other),
        }
    }
}

impl StoreError {
    /// Attach a location to an unknown-metric error raised from typed input.
    pub(crate) fn with_context(self, context: impl Into<String>) -> Self {
        match self {
            StoreError::UnknownMetric { metric, .. } => StoreError::UnknownMetric {
                metric,
                context: context.into(),
            },
            other => other,
        }
    }
}
