use thiserror::Error;

#[derive(Error, Debug)]
pub enum ElectroBotError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Background task error: {0}")]
    Task(String),
}

impl ElectroBotError {
    /// Maps a rusqlite failure to `ConstraintViolation` when SQLite reports one,
    /// keeping every other failure as `Database`.
    pub fn from_sqlite(err: rusqlite::Error, context: impl Into<String>) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                ElectroBotError::ConstraintViolation(context.into())
            }
            _ => ElectroBotError::Database(err),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ElectroBotError::NotFound(_))
    }
}
