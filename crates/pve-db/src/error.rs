use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection loss, timeout, injected fault. Safe to retry.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A constraint rejected the write. Retrying will not help.
    #[error("storage constraint violated: {0}")]
    Constraint(String),

    #[error("stored row could not be decoded: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.constraint().is_some() => {
                StoreError::Constraint(err.to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::Corrupt(err.to_string())
            }
            _ => StoreError::Unavailable(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}
