// Error handling framework

use thiserror::Error;

/// Validation errors raised before any write
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field value for {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error("Duplicate variable id: {0}")]
    DuplicateVariable(String),

    #[error("{list} references undeclared variable {variable_id}")]
    UndeclaredVariable { list: String, variable_id: String },

    #[error("At least one trigger declaration is required")]
    MissingTrigger,

    #[error("Trigger declaration has an empty trigger_on list")]
    MissingTriggerTargets,
}

/// Database-specific errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Database health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate key violation: {0}")]
    DuplicateKey(String),

    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    match code.as_ref() {
                        "23505" => DatabaseError::DuplicateKey(db_err.message().to_string()),
                        "23503" => DatabaseError::ForeignKeyViolation(db_err.message().to_string()),
                        _ => DatabaseError::QueryFailed(db_err.message().to_string()),
                    }
                } else {
                    DatabaseError::QueryFailed(db_err.message().to_string())
                }
            }
            other => DatabaseError::QueryFailed(other.to_string()),
        }
    }
}

/// Cache errors (best-effort layer, logged rather than propagated)
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    RedisError(String),

    #[error("Cache entry serialization failed: {0}")]
    SerializationFailed(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::RedisError(err.to_string())
    }
}

/// Queue-related errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to connect to queue: {0}")]
    Connection(String),

    #[error("Failed to create stream: {0}")]
    StreamCreation(String),

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Failed to publish message: {0}")]
    PublishFailed(String),

    #[error("Message serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Health check failed: {0}")]
    HealthCheck(String),

    #[error("Queue operation timeout: {0}")]
    Timeout(String),
}

/// Metadata collaborator errors
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Metadata request failed: {0}")]
    RequestFailed(String),

    #[error("Unable to resolve timeseries for variable {variable_id}: {reason}")]
    ResolutionFailed { variable_id: String, reason: String },

    #[error("Invalid metadata response: {0}")]
    InvalidResponse(String),

    #[error("Variable {0} has no metadata, metadataIds or timeseriesId")]
    MissingSource(String),
}

/// Service-level error taxonomy surfaced to the HTTP boundary.
///
/// Cache and queue failures never appear here: the fan-out layer is
/// best-effort and its errors are logged at the call site.
#[derive(Error, Debug)]
pub enum ExtensionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Variable resolution failed: {0}")]
    VariableResolution(#[from] MetadataError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::UndeclaredVariable {
            list: "inputVariables".to_string(),
            variable_id: "v9".to_string(),
        };
        assert_eq!(err.to_string(), "inputVariables references undeclared variable v9");

        let err = ValidationError::MissingField("extensionId".to_string());
        assert!(err.to_string().contains("extensionId"));
    }

    #[test]
    fn test_extension_error_wraps_validation() {
        let err: ExtensionError = ValidationError::MissingTrigger.into();
        assert!(matches!(err, ExtensionError::Validation(_)));
    }
}
