//! Error types for the support console.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Import error: {0}")]
    Import(#[from] ImportError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database schema is at V{current}, expected V{expected}; run `support-console migrate`")]
    SchemaOutdated { current: i64, expected: i64 },
}

/// Outcomes of a message-service operation that the caller must tell apart.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// A required field was missing or empty.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The referenced entity does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl ServiceError {
    pub fn message_not_found(id: i64) -> Self {
        Self::NotFound {
            entity: "Message",
            id,
        }
    }
}

/// Batch import errors. Row-level failures are logged and skipped; these
/// abort a single file at most.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("No usable content column in {file}")]
    NoContentColumn { file: String },

    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Result type alias for the console.
pub type Result<T> = std::result::Result<T, Error>;
