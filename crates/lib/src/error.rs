//! Failure conditions raised while processing a turn.

/// Message store failures: the backing store is unreachable or rejected the operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("message store database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("message store unavailable: {0}")]
    Unavailable(String),
}

/// Failures that escape the dispatcher. The top-level turn handler reports them and
/// answers the user with a fixed apology; the text here goes to logs and telemetry only.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    /// Raised on purpose by the `error` command to exercise the failure-reporting path.
    #[error("injected fault: {0}")]
    InjectedFault(&'static str),
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
    /// Malformed inbound payload (rejected by a hosting adapter before a turn exists).
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
