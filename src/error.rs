use thiserror::Error;

/// Failures surfaced by the persisted application table. Everything else in the
/// crate is contained per item and logged.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("application #{0} not found")]
    NotFound(i64),
}
