//! Error handling for the registry engine
//!
//! This module provides idiomatic Rust error types using thiserror for
//! better error messages and proper error chain handling. The taxonomy maps
//! one-to-one onto HTTP classes at the API boundary: validation failures are
//! user-fixable (400), unresolved ids are 404, unique-constraint clashes are
//! 409, everything else is 500.

use thiserror::Error;

/// Main error type for the registry system
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Attribute entry is missing required field '{field}'")]
    MissingAttributeField { field: &'static str },

    #[error("No metadata key found with id {key_id}")]
    MetadataNotFound { key_id: i32 },

    #[error("Value '{value}' is not supported for metadata key '{key}'")]
    InvalidAttributeValue { key: String, value: String },

    #[error("Invalid meta_data_key name '{name}'")]
    UnknownFacetKey { name: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("CSV decode failed at line {line}: {message} ({inserted} rows committed before failure)")]
    Decode {
        line: u64,
        message: String,
        inserted: u64,
    },

    #[error("Upload exceeds the {limit} byte import cap")]
    PayloadTooLarge { limit: usize },

    #[error("Bulk pipeline timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result type alias for convenience
pub type RegistryResult<T> = Result<T, RegistryError>;

impl From<sqlx::Error> for RegistryError {
    fn from(err: sqlx::Error) -> Self {
        // Unique violations surface as conflicts so callers see a 409 with the
        // offending constraint instead of an opaque storage failure.
        if let sqlx::Error::Database(ref db) = err {
            if db.code().as_deref() == Some("23505") {
                return RegistryError::Conflict(format!(
                    "duplicate value violates unique constraint {}",
                    db.constraint().unwrap_or("<unknown>")
                ));
            }
            // FK RESTRICT on entity_attributes -> meta_keys: the key is live.
            if db.code().as_deref() == Some("23503") {
                return RegistryError::Conflict(
                    "metadata key is still referenced by attribute assignments".to_string(),
                );
            }
        }
        RegistryError::Database(err)
    }
}

impl RegistryError {
    /// Whether this error is caused by the caller's input
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RegistryError::MissingAttributeField { .. }
                | RegistryError::InvalidAttributeValue { .. }
                | RegistryError::UnknownFacetKey { .. }
                | RegistryError::Validation(_)
                | RegistryError::MetadataNotFound { .. }
                | RegistryError::NotFound { .. }
                | RegistryError::Conflict(_)
                | RegistryError::PayloadTooLarge { .. }
        )
    }
}

#[cfg(feature = "server")]
mod http {
    use super::RegistryError;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::Json;

    impl RegistryError {
        pub fn status_code(&self) -> StatusCode {
            match self {
                RegistryError::MissingAttributeField { .. }
                | RegistryError::InvalidAttributeValue { .. }
                | RegistryError::Validation(_)
                | RegistryError::Decode { .. } => StatusCode::BAD_REQUEST,
                RegistryError::MetadataNotFound { .. }
                | RegistryError::UnknownFacetKey { .. }
                | RegistryError::NotFound { .. } => StatusCode::NOT_FOUND,
                RegistryError::Conflict(_) => StatusCode::CONFLICT,
                RegistryError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                RegistryError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                RegistryError::Internal(_)
                | RegistryError::Database(_)
                | RegistryError::Io(_)
                | RegistryError::Csv(_) => StatusCode::INTERNAL_SERVER_ERROR,
            }
        }
    }

    impl IntoResponse for RegistryError {
        fn into_response(self) -> Response {
            let status = self.status_code();
            if status.is_server_error() {
                tracing::error!("request failed: {self}");
            }
            let body = Json(serde_json::json!({ "error": self.to_string() }));
            (status, body).into_response()
        }
    }
}
