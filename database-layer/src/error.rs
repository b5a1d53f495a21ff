use scheduling_engine::StoreError;
use thiserror::Error;

/// SQLSTATE codes the scheduling engine retries on
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const ADMIN_SHUTDOWN: &str = "57P01";
const CANNOT_CONNECT_NOW: &str = "57P03";

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Invalid row: {0}")]
    InvalidRow(String),

    #[error("Database error: {0}")]
    SqlxError(#[from] sqlx::Error),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

impl From<sqlx::migrate::MigrateError> for DatabaseError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        Self::MigrationError(error.to_string())
    }
}

impl From<DatabaseError> for StoreError {
    fn from(error: DatabaseError) -> Self {
        match error {
            DatabaseError::SqlxError(e) => classify(e),
            DatabaseError::ConnectionFailed(message) => StoreError::Unavailable(message),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Map a driver error onto the store taxonomy.
///
/// Serialization failures and deadlocks become retryable
/// [`StoreError::SerializationFailure`]; pool exhaustion and lost
/// connections become [`StoreError::Unavailable`].
pub fn classify(error: sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::Database(ref db) => {
            let code = db.code();
            store_error_for_code(code.as_deref(), db.message())
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(error.to_string())
        }
        other => StoreError::Backend(other.to_string()),
    }
}

fn store_error_for_code(code: Option<&str>, message: &str) -> StoreError {
    match code {
        Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED) => {
            StoreError::SerializationFailure(message.to_string())
        }
        Some(ADMIN_SHUTDOWN) | Some(CANNOT_CONNECT_NOW) => StoreError::Unavailable(message.to_string()),
        Some(code) if code.starts_with("08") => StoreError::Unavailable(message.to_string()),
        // Class 23: integrity constraint violation
        Some(code) if code.starts_with("23") => StoreError::Constraint(message.to_string()),
        _ => StoreError::Backend(message.to_string()),
    }
}
