use thiserror::Error;

/// Result type for engine operations
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors surfaced by the query engine.
///
/// Ingestion never fails observably; statements that match nothing are
/// simply discarded. Filter evaluation errors are contained where they
/// occur (the candidate solution is rejected and the error logged), so
/// they never appear here.
#[derive(Error, Debug)]
pub enum StreamError {
    /// The query text could not be parsed as SPARQL
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The query parsed, but uses a feature this engine does not evaluate
    /// (UNION, ORDER BY, EXISTS, non-SELECT query forms, ...)
    #[error("incompatible query: {0}")]
    IncompatibleQuery(String),

    /// The engine has been shut down and accepts no further work
    #[error("query engine has been shut down")]
    ShutDown,
}
