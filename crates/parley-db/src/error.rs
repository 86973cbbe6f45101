use thiserror::Error;

/// Maximum message length, in characters, after trimming.
pub const MAX_CONTENT_CHARS: usize = 500;

/// A message was rejected before reaching the database.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("message content is empty")]
    EmptyContent,

    #[error("message content is {len} characters, limit is {max}", max = MAX_CONTENT_CHARS)]
    ContentTooLong { len: usize },

    #[error("message sender is empty")]
    EmptySender,
}

/// The underlying persistence layer failed.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("username '{0}' is already taken")]
    UsernameTaken(String),

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error("corrupt {field} on row '{id}': {reason}")]
    Corrupt {
        id: String,
        field: &'static str,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum AppendError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for AppendError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(StoreError::Sqlite(e))
    }
}
