// src/error.rs
use uuid::Uuid;

/// The one tagged error type the engine surfaces to callers (spec §7).
///
/// Every operation runs inside a database transaction; any variant here implies
/// the transaction was (or will be) rolled back and any queued post-commit
/// callbacks were discarded.
#[derive(Debug, thiserror::Error)]
pub enum SummaError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("insufficient balance for account {account_id}: requested {requested}, available {available}")]
    InsufficientBalance {
        account_id: Uuid,
        requested: i64,
        available: i64,
    },

    #[error("account {0} is frozen")]
    AccountFrozen(Uuid),

    #[error("account {0} is closed")]
    AccountClosed(Uuid),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("lock timeout: {0}")]
    LockTimeout(String),

    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

/// Stable wire code for each variant, independent of the `Display` message.
/// Matches the §7 code table exactly; callers that need to branch on error
/// kind across a process boundary should match on this rather than the
/// `Display` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCode {
    InvalidArgument,
    NotFound,
    Conflict,
    InsufficientBalance,
    AccountFrozen,
    AccountClosed,
    LimitExceeded,
    LockTimeout,
    ConcurrencyConflict,
    IntegrityViolation,
    Internal,
}

impl SummaError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SummaError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            SummaError::NotFound(_) => ErrorCode::NotFound,
            SummaError::Conflict(_) => ErrorCode::Conflict,
            SummaError::InsufficientBalance { .. } => ErrorCode::InsufficientBalance,
            SummaError::AccountFrozen(_) => ErrorCode::AccountFrozen,
            SummaError::AccountClosed(_) => ErrorCode::AccountClosed,
            SummaError::LimitExceeded(_) => ErrorCode::LimitExceeded,
            SummaError::LockTimeout(_) => ErrorCode::LockTimeout,
            SummaError::ConcurrencyConflict(_) => ErrorCode::ConcurrencyConflict,
            SummaError::IntegrityViolation(_) => ErrorCode::IntegrityViolation,
            SummaError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// True for errors a caller can reasonably retry the whole operation on
    /// (lock contention, optimistic-version races) as opposed to ones that
    /// will fail again with the same inputs.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SummaError::LockTimeout(_) | SummaError::ConcurrencyConflict(_)
        )
    }
}

impl From<sqlx::Error> for SummaError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::PoolTimedOut => SummaError::LockTimeout(e.to_string()),
            sqlx::Error::RowNotFound => SummaError::NotFound(e.to_string()),
            _ => SummaError::Internal(anyhow::Error::new(e)),
        }
    }
}
