use actix_web::{http::StatusCode, web, HttpResponse};
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::auth::middleware::Principal;
use crate::db::models::{AuthProvider, Role};
use crate::error::{AppError, StatusEnvelope};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: Option<String>,
    #[serde(alias = "authProvider")]
    pub provider: AuthProvider,
    pub role: Role,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: Option<String>,
    #[serde(alias = "authProvider")]
    pub provider: Option<AuthProvider>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

impl RefreshTokenRequest {
    fn token(&self) -> Result<&str, AppError> {
        let token = self.refresh_token.trim();
        if token.is_empty() {
            return Err(AppError::ValidationError("refreshToken must not be blank".into()));
        }
        Ok(token)
    }
}

pub async fn register(
    req: web::Json<RegisterRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    info!(provider = %req.provider, "Received registration request");

    match state
        .auth_service
        .register(
            &req.name,
            &req.email,
            req.password.as_deref(),
            req.provider,
            req.role,
            req.avatar_url.as_deref(),
        )
        .await
    {
        Ok(response) => Ok(HttpResponse::Created().json(response)),
        Err(e) => {
            warn!(provider = %req.provider, error = %e, "Registration failed");
            Err(e)
        }
    }
}

pub async fn authenticate(
    req: web::Json<LoginRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    match state
        .auth_service
        .login(&req.email, req.password.as_deref(), req.provider)
        .await
    {
        Ok(response) => Ok(HttpResponse::Ok().json(response)),
        Err(e) => {
            warn!(error = %e, "Login failed");
            Err(e)
        }
    }
}

pub async fn refresh(
    req: web::Json<RefreshTokenRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let response = state.auth_service.refresh_access_token(req.token()?).await?;
    Ok(HttpResponse::Ok().json(response))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Always answers 200. A missing token is a no-op; a store failure is logged, not reported.
pub async fn logout(
    req: web::Json<LogoutRequest>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let token = req
        .refresh_token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());

    if let Some(token) = token {
        if let Err(e) = state.auth_service.logout(token).await {
            error!(error = %e, "Failed to clear refresh token on logout");
        }
    }

    HttpResponse::Ok().json(StatusEnvelope::success("Logged out successfully", StatusCode::OK))
}

pub async fn me(principal: Principal, state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let profile = state.auth_service.current_account(&principal).await?;
    Ok(HttpResponse::Ok().json(profile))
}
