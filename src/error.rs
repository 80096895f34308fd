use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("store unreachable: {message}")]
    Connectivity { message: String },

    #[error("constraint violation in {table} for key {key}: {reason}")]
    Constraint {
        table: String,
        key: String,
        reason: String,
    },

    #[error("batch schema mismatch for {entity}: {message}")]
    Schema { entity: String, message: String },

    #[error("no batch found for {entity} under {path}")]
    MissingBatch { entity: String, path: String },

    #[error("batch for {entity} at {path} holds no data rows")]
    EmptyBatch { entity: String, path: String },

    #[error("migration {version} failed: {message}")]
    Migration { version: u32, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Database error: {message}")]
    Store { message: String },
}

impl PipelineError {
    /// Classify a SQLite error raised while working on `table`.
    ///
    /// Constraint failures become [`PipelineError::Constraint`] so the caller can
    /// isolate them to one table; open/IO/lock failures mean the store itself is
    /// gone and become [`PipelineError::Connectivity`].
    pub fn from_sqlite(err: rusqlite::Error, table: &str, key: &str) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, msg) => {
                let message = msg.clone().unwrap_or_else(|| failure.to_string());
                match failure.code {
                    ErrorCode::ConstraintViolation => PipelineError::Constraint {
                        table: table.to_string(),
                        key: key.to_string(),
                        reason: message,
                    },
                    ErrorCode::CannotOpen
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::NotADatabase
                    | ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::DatabaseCorrupt => PipelineError::Connectivity { message },
                    _ => PipelineError::Store { message },
                }
            }
            _ => PipelineError::Store {
                message: err.to_string(),
            },
        }
    }

    /// Fatal errors abort the whole run; everything else is isolated to the
    /// entity that raised it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::Connectivity { .. })
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        PipelineError::from_sqlite(err, "-", "-")
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
