use thiserror::Error;

/// An inbound payload that could not be normalized into a `CanonicalEvent`.
/// Terminal for the event: no queries run.
#[derive(Error, Debug)]
pub enum MalformedPayload {
    #[error("payload is not valid JSON, even after quote repair: {0}")]
    InvalidStructure(#[source] serde_json::Error),
    #[error("payload is not a key/value object")]
    NotAnObject,
    #[error("missing required field {0}")]
    MissingField(&'static str),
    #[error("field {field} is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl MalformedPayload {
    /// The field that failed validation, if the failure is attributable to one.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            MalformedPayload::MissingField(field) => Some(*field),
            MalformedPayload::InvalidField { field, .. } => Some(*field),
            _ => None,
        }
    }
}

/// A query against the source store failed. Recovered locally by the pipeline.
#[derive(Error, Debug)]
#[error("{query} query failed with: {error}")]
pub struct QueryExecutionError {
    pub query: String,
    #[source]
    pub error: sqlx::Error,
}

/// A single record could not be persisted to the destination store.
#[derive(Error, Debug)]
#[error("write to {table} failed with: {error}")]
pub struct WriteFailure {
    pub table: &'static str,
    #[source]
    pub error: sqlx::Error,
}

/// Failure of one isolated unit of work (one indicator, or the duplicate check).
#[derive(Error, Debug)]
pub enum UnitError {
    #[error(transparent)]
    Query(#[from] QueryExecutionError),
    #[error(transparent)]
    Write(#[from] WriteFailure),
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("failed to read query template {path}: {error}")]
    ReadError {
        path: String,
        error: std::io::Error,
    },
    #[error("query template {0} is empty")]
    EmptyTemplate(String),
    #[error("indicator {0} is configured more than once")]
    DuplicateIndicator(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("destination migrations failed with: {error}")]
    MigrationError { error: sqlx::migrate::MigrateError },
}
