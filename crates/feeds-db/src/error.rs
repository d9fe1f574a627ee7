//! Error types for the data-access layer.

use crate::pool::PoolError;

/// Broad classification of a [`DbError`].
///
/// Callers that only care whether "something went wrong, no data" can
/// match on the kind instead of the full error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The connection string is missing or unusable.
    Configuration,
    /// No session is active for an operation that needs one.
    NoActiveSession,
    /// Building or executing a read failed.
    Query,
    /// Attaching, flushing or committing an entity failed.
    Merge,
    /// A lookup by primary key found nothing.
    NotFound,
}

/// Errors that can occur in the data-access layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// The session could not be started because of configuration.
    #[error("database configuration error: {0}")]
    Configuration(String),

    /// The engine could not be created or could not hand out a connection.
    #[error("database engine error: {0}")]
    Engine(#[from] PoolError),

    /// A connection checkout from the engine failed.
    #[error("database connection unavailable: {0}")]
    Checkout(#[from] r2d2::Error),

    /// The operation requires an active session.
    #[error("no active database session")]
    NoActiveSession,

    /// A read could not be built or executed.
    #[error("query failed: {0}")]
    Query(String),

    /// A write could not be applied.
    #[error("merge failed: {0}")]
    Merge(String),

    /// A parent or entity addressed by primary key does not exist.
    #[error("{table} not found for key {key}")]
    NotFound {
        /// Table that was searched.
        table: &'static str,
        /// Rendered primary-key values.
        key: String,
    },

    /// SQLite reported an error.
    #[error("database error: {0}")]
    Sql(#[from] rusqlite::Error),
}

impl DbError {
    /// Returns the classification of this error.
    ///
    /// Raw SQLite errors count as query failures; engine and checkout
    /// failures count as configuration failures since they arise while
    /// the session is being set up.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) | Self::Engine(_) | Self::Checkout(_) => {
                ErrorKind::Configuration
            }
            Self::NoActiveSession => ErrorKind::NoActiveSession,
            Self::Query(_) | Self::Sql(_) => ErrorKind::Query,
            Self::Merge(_) => ErrorKind::Merge,
            Self::NotFound { .. } => ErrorKind::NotFound,
        }
    }

    /// Re-tags a failure that happened during a write.
    pub(crate) fn into_merge(self) -> Self {
        match self {
            Self::Sql(e) => Self::Merge(e.to_string()),
            Self::Query(msg) => Self::Merge(msg),
            other => other,
        }
    }

    /// Re-tags a failure that happened during a read.
    pub(crate) fn into_query(self) -> Self {
        match self {
            Self::Sql(e) => Self::Query(e.to_string()),
            other => other,
        }
    }
}
