use thiserror::Error;
use actix_web::{ResponseError, HttpResponse, http::StatusCode};
use serde::Serialize;

use crate::auth::TokenError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    AuthError(#[from] AuthError),

    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),

    #[error("Identity provider error: {0}")]
    FederationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl AppError {
    /// Message shown to clients. Server-side failures never leak details.
    pub fn client_message(&self) -> String {
        match self {
            AppError::AuthError(e) => e.to_string(),
            AppError::ValidationError(msg) => msg.clone(),
            AppError::FederationError(_) => "Identity provider request failed".to_string(),
            _ => "Internal server error".to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::DatabaseError(DatabaseError::NotFound),
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AppError::DatabaseError(DatabaseError::Duplicate)
            }
            _ => AppError::DatabaseError(DatabaseError::QueryError(err.to_string())),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::DatabaseError(DatabaseError::MigrationError(err.to_string()))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::FederationError(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(err.to_string())
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        AppError::AuthError(AuthError::InvalidToken(err.to_string()))
    }
}

/// The one response shape shared by every error and by status-only replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct StatusEnvelope {
    pub status: bool,
    pub message: String,
    pub code: String,
}

impl StatusEnvelope {
    pub fn success(message: impl Into<String>, status: StatusCode) -> Self {
        Self {
            status: true,
            message: message.into(),
            code: status.as_u16().to_string(),
        }
    }

    pub fn failure(message: impl Into<String>, status: StatusCode) -> Self {
        Self {
            status: false,
            message: message.into(),
            code: status.as_u16().to_string(),
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        HttpResponse::build(status).json(StatusEnvelope::failure(self.client_message(), status))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::AuthError(e) => match e {
                AuthError::DuplicateAccount(_) => StatusCode::CONFLICT,
                AuthError::AccountNotFound => StatusCode::NOT_FOUND,
                AuthError::InvalidToken(_) => StatusCode::NOT_FOUND,
                AuthError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                AuthError::AuthenticationFailed => StatusCode::UNAUTHORIZED,
                AuthError::Unauthorized => StatusCode::UNAUTHORIZED,
                AuthError::Forbidden => StatusCode::FORBIDDEN,
            },
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::FederationError(_) => StatusCode::BAD_GATEWAY,
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("An account already exists for {0}")]
    DuplicateAccount(String),

    #[error("Account not found")]
    AccountNotFound,

    #[error("{0}")]
    InvalidInput(String),

    #[error("Invalid email or password")]
    AuthenticationFailed,

    #[error("{0}")]
    InvalidToken(String),

    #[error("Unauthorized access. Please log in.")]
    Unauthorized,

    #[error("You do not have permission to access this resource")]
    Forbidden,
}

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    #[error("Record not found")]
    NotFound,

    #[error("Duplicate record")]
    Duplicate,
}
