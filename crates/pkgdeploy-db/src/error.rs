//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid row: {0}")]
    InvalidRow(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

impl From<DbError> for pkgdeploy_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => pkgdeploy_core::Error::NotFound(msg),
            other => pkgdeploy_core::Error::Persistence(other.to_string()),
        }
    }
}
