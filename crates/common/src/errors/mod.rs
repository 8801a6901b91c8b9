//! Error types for Newsguard services
//!
//! Provides a single error enum for the pipeline with:
//! - Distinct variants for each external collaborator
//! - Machine-readable error codes for structured logs
//! - Classification helpers the loops use to pick a recovery path

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Data errors (1xxx)
    InvalidPayload,
    InvalidFormat,

    // Feed errors (2xxx)
    FeedError,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,

    // External service errors (8xxx)
    UpstreamError,
    ClassifierError,
    RecognizerError,
    GeocoderError,
    QueueError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::InvalidPayload => 1001,
            ErrorCode::InvalidFormat => 1002,

            ErrorCode::FeedError => 2001,

            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,

            ErrorCode::UpstreamError => 8001,
            ErrorCode::ClassifierError => 8002,
            ErrorCode::RecognizerError => 8003,
            ErrorCode::GeocoderError => 8004,
            ErrorCode::QueueError => 8005,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Data errors
    #[error("Invalid payload: {message}")]
    InvalidPayload { message: String },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    // Feed errors
    #[error("Feed error for {url}: {message}")]
    Feed { url: String, message: String },

    // Database errors
    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // External service errors
    #[error("Classifier error: {message}")]
    Classifier { message: String },

    #[error("Entity recognizer error: {message}")]
    Recognizer { message: String },

    #[error("Geocoder error: {message}")]
    Geocoder { message: String },

    #[error("Queue error: {message}")]
    QueueError { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::InvalidPayload { .. } => ErrorCode::InvalidPayload,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::Feed { .. } => ErrorCode::FeedError,
            AppError::Database { .. } => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::Classifier { .. } => ErrorCode::ClassifierError,
            AppError::Recognizer { .. } => ErrorCode::RecognizerError,
            AppError::Geocoder { .. } => ErrorCode::GeocoderError,
            AppError::QueueError { .. } => ErrorCode::QueueError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// True when the database connection should be considered lost and
    /// re-established before the next attempt.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, AppError::DatabaseConnection { .. })
    }

    /// True for failures of external services that may succeed on a later try
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::DatabaseConnection { .. }
                | AppError::Feed { .. }
                | AppError::Classifier { .. }
                | AppError::Recognizer { .. }
                | AppError::Geocoder { .. }
                | AppError::QueueError { .. }
                | AppError::HttpClient(_)
        )
    }

    /// True for malformed input that will never succeed on redelivery
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            AppError::InvalidPayload { .. } | AppError::InvalidFormat { .. }
        )
    }
}

impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        if is_connection_db_err(&err) {
            AppError::DatabaseConnection {
                message: err.to_string(),
            }
        } else {
            AppError::Database {
                message: err.to_string(),
            }
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

/// Decide whether a SeaORM error means the connection itself is gone.
fn is_connection_db_err(err: &sea_orm::DbErr) -> bool {
    use sea_orm::{DbErr, RuntimeErr};

    match err {
        DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => true,
        DbErr::Exec(RuntimeErr::SqlxError(e)) | DbErr::Query(RuntimeErr::SqlxError(e)) => {
            is_connection_sqlx_err(e)
        }
        _ => false,
    }
}

fn is_connection_sqlx_err(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| is_connection_sqlstate(&code))
            .unwrap_or(false),
        _ => false,
    }
}

/// SQLSTATE class 08 (connection exception) and the admin/crash shutdown codes
fn is_connection_sqlstate(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "57P01" | "57P02" | "57P03")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::Geocoder {
            message: "429".into(),
        };
        assert_eq!(err.code(), ErrorCode::GeocoderError);
        assert_eq!(err.code().as_code(), 8004);
    }

    #[test]
    fn test_connection_classification() {
        let err = AppError::DatabaseConnection {
            message: "broken pipe".into(),
        };
        assert!(err.is_connection_error());
        assert!(err.is_transient());

        let err = AppError::Database {
            message: "value too long".into(),
        };
        assert!(!err.is_connection_error());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_db_err_conversion() {
        let err: AppError = sea_orm::DbErr::Conn(sea_orm::RuntimeErr::Internal(
            "connection refused".into(),
        ))
        .into();
        assert!(err.is_connection_error());

        let err: AppError = sea_orm::DbErr::Custom("constraint".into()).into();
        assert!(matches!(err, AppError::Database { .. }));

        let err: AppError = sea_orm::DbErr::Exec(sea_orm::RuntimeErr::SqlxError(
            sqlx::Error::PoolClosed,
        ))
        .into();
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_sqlstate_classes() {
        assert!(is_connection_sqlstate("08006"));
        assert!(is_connection_sqlstate("57P01"));
        assert!(!is_connection_sqlstate("23505"));
    }

    #[test]
    fn test_data_error() {
        let err = AppError::InvalidPayload {
            message: "missing field `id`".into(),
        };
        assert!(err.is_data_error());
        assert!(!err.is_transient());
    }
}
