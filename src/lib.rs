pub mod auth;
pub mod config;
pub mod db;
pub mod error;

use actix_web::{error::JsonPayloadError, web, HttpRequest, HttpResponse};
use std::sync::Arc;
use std::time::Duration;

pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;
pub use config::Settings;

use auth::{handlers, oauth, AuthService, CredentialVerifier, IdentityAsserter, OAuth2Client, TokenCodec};
use db::{CredentialStore, DbOperations};

/// Health check endpoint handler
/// Returns a JSON response with server status and timestamp
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Application state shared across all workers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub store: Arc<dyn CredentialStore>,
    pub tokens: TokenCodec,
    pub auth_service: Arc<AuthService>,
    pub identity: Arc<dyn IdentityAsserter>,
}

impl AppState {
    /// Connects to Postgres, applies migrations and wires the OAuth2 client.
    pub async fn new(config: Settings) -> Result<Self> {
        let db = DbOperations::new_with_options(
            &config.database.url,
            config.database.max_connections,
            Duration::from_secs(config.database.acquire_timeout_secs),
        )
        .await?;
        db.migrate().await?;

        let identity = OAuth2Client::new(&config.oauth)?;
        Self::from_parts(config, Arc::new(db), Arc::new(identity))
    }

    pub fn from_parts(
        config: Settings,
        store: Arc<dyn CredentialStore>,
        identity: Arc<dyn IdentityAsserter>,
    ) -> Result<Self> {
        let tokens = TokenCodec::new(&config.auth)?;
        let passwords = CredentialVerifier::new(&config.auth)?;
        let auth_service = AuthService::new(
            store.clone(),
            tokens.clone(),
            passwords,
            config.auth.allow_federated_api_login,
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            tokens,
            auth_service: Arc::new(auth_service),
            identity,
        })
    }
}

fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    AppError::ValidationError(format!("Invalid request body: {}", err)).into()
}

/// Registers every route. Authentication itself is applied by wrapping the
/// app in `auth::authenticate_request`.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error_handler))
        .route("/health", web::get().to(health_check))
        .service(
            web::scope("/auth")
                .route("/register", web::post().to(handlers::register))
                .route("/authenticate", web::post().to(handlers::authenticate))
                .route("/refresh", web::post().to(handlers::refresh))
                .route("/logout", web::post().to(handlers::logout))
                .route("/me", web::get().to(handlers::me)),
        )
        .service(
            web::scope("/oauth2")
                .route("/authorization/{provider}", web::get().to(oauth::authorize))
                .route("/callback/{provider}", web::get().to(oauth::callback)),
        );
}
