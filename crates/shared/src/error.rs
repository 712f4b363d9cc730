//! Database error classification
//!
//! sqlx reports driver faults as opaque `Database` errors. Flows need to
//! tell a duplicate-key insert apart from an outage, so the classification
//! happens once here and the web layer maps the classes onto HTTP statuses.

use thiserror::Error;

/// Postgres SQLSTATE for unique constraint violations
const UNIQUE_VIOLATION: &str = "23505";

/// A durable-store failure, classified for upstream mapping
#[derive(Debug, Error)]
pub enum DbError {
    /// An insert or update collided with a unique constraint
    #[error("unique constraint violated")]
    UniqueViolation(#[source] sqlx::Error),

    /// A lookup expected a row that is not there
    #[error("row not found")]
    NotFound,

    /// Everything else: connectivity, timeouts, malformed queries
    #[error("database error: {0}")]
    Other(#[source] sqlx::Error),
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound,
            err if is_unique_violation(&err) => Self::UniqueViolation(err),
            err => Self::Other(err),
        }
    }
}

/// True when the error is a Postgres unique-constraint violation (SQLSTATE 23505)
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_classification() {
        let err = DbError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, DbError::NotFound));
    }

    #[test]
    fn test_non_database_errors_are_not_unique_violations() {
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
        assert!(!is_unique_violation(&sqlx::Error::PoolTimedOut));
    }

    #[test]
    fn test_pool_errors_classify_as_other() {
        let err = DbError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, DbError::Other(_)));
    }
}
