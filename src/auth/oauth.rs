//! OAuth2 sign-in with Google and GitHub
//!
//! `IdentityAsserter` is the trust boundary: whatever it returns is treated as
//! a proven identity and handed to `AuthService::federated_login`.

use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::http::header::LOCATION;
use actix_web::{web, HttpRequest, HttpResponse, ResponseError};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use crate::auth::service::AuthenticationResponse;
use crate::config::{OAuthConfig, OAuthProviderConfig};
use crate::db::models::AuthProvider;
use crate::error::{AppError, AuthError};
use crate::{AppState, Result};

pub const STATE_COOKIE: &str = "oauth2_state";
const STATE_TTL_MINUTES: i64 = 10;
const CLIENT_USER_AGENT: &str = "eventhub-auth";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederatedIdentity {
    pub email: String,
    pub name: String,
    pub avatar_url: Option<String>,
}

#[async_trait]
pub trait IdentityAsserter: Send + Sync {
    /// Where to send the browser to start the provider's consent flow.
    fn authorization_url(&self, provider: AuthProvider, state: &str) -> Result<Url>;

    /// Redeems an authorization code for the caller's verified identity.
    async fn assert_identity(&self, provider: AuthProvider, code: &str) -> Result<FederatedIdentity>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

/// Authorization-code client for the configured providers.
pub struct OAuth2Client {
    http: reqwest::Client,
    google: OAuthProviderConfig,
    github: OAuthProviderConfig,
}

impl OAuth2Client {
    pub fn new(config: &OAuthConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            google: config.google.clone(),
            github: config.github.clone(),
        })
    }

    fn provider_config(&self, provider: AuthProvider) -> Result<&OAuthProviderConfig> {
        match provider {
            AuthProvider::Google => Ok(&self.google),
            AuthProvider::Github => Ok(&self.github),
            AuthProvider::Local => Err(AuthError::InvalidInput(
                "LOCAL accounts do not sign in through OAuth2".into(),
            )
            .into()),
        }
    }

    async fn exchange_code_for_token(&self, config: &OAuthProviderConfig, code: &str) -> Result<String> {
        let res = self
            .http
            .post(&config.token_url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", config.client_id.as_str()),
                ("client_secret", config.client_secret.as_str()),
                ("redirect_uri", config.redirect_uri.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?;

        // GitHub reports a bad code as a 200 with an `error` field.
        let token: TokenResponse = res.json().await?;
        match (token.access_token, token.error) {
            (Some(access_token), None) => Ok(access_token),
            (_, Some(error)) => Err(AppError::FederationError(format!(
                "Token exchange rejected: {} {}",
                error,
                token.error_description.unwrap_or_default()
            ))),
            (None, None) => Err(AppError::FederationError("Token response has no access_token".into())),
        }
    }

    async fn get_json(&self, url: &str, access_token: &str) -> Result<Value> {
        let res = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .send()
            .await?
            .error_for_status()?;

        Ok(res.json().await?)
    }

    async fn github_primary_email(&self, emails_url: &str, access_token: &str) -> Result<Option<String>> {
        let emails: Vec<GithubEmail> = serde_json::from_value(self.get_json(emails_url, access_token).await?)
            .map_err(|e| AppError::FederationError(format!("Unexpected emails payload: {}", e)))?;

        Ok(emails
            .into_iter()
            .find(|e| e.primary && e.verified)
            .map(|e| e.email))
    }
}

#[async_trait]
impl IdentityAsserter for OAuth2Client {
    fn authorization_url(&self, provider: AuthProvider, state: &str) -> Result<Url> {
        let config = self.provider_config(provider)?;
        Url::parse_with_params(
            &config.authorize_url,
            &[
                ("client_id", config.client_id.as_str()),
                ("redirect_uri", config.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", config.scopes.as_str()),
                ("state", state),
            ],
        )
        .map_err(|e| AppError::ConfigError(format!("Invalid authorize_url for {}: {}", provider, e)))
    }

    async fn assert_identity(&self, provider: AuthProvider, code: &str) -> Result<FederatedIdentity> {
        let config = self.provider_config(provider)?;
        let access_token = self.exchange_code_for_token(config, code).await?;
        let profile = self.get_json(&config.userinfo_url, &access_token).await?;

        match provider {
            AuthProvider::Google => google_identity(&profile),
            AuthProvider::Github => {
                let fallback = match (profile_email(&profile), config.emails_url.as_deref()) {
                    (None, Some(emails_url)) => self.github_primary_email(emails_url, &access_token).await?,
                    _ => None,
                };
                github_identity(&profile, fallback)
            }
            AuthProvider::Local => Err(AuthError::InvalidInput("LOCAL is not a federated provider".into()).into()),
        }
    }
}

fn profile_email(profile: &Value) -> Option<String> {
    profile["email"]
        .as_str()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_string)
}

fn display_name(profile: &Value, email: &str) -> String {
    profile["name"]
        .as_str()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(email)
        .to_string()
}

fn google_identity(profile: &Value) -> Result<FederatedIdentity> {
    let email = profile_email(profile)
        .ok_or_else(|| AppError::FederationError("Google profile has no email".into()))?;
    // OIDC userinfo says `email_verified`, the v2 endpoint `verified_email`.
    let verified = profile["email_verified"]
        .as_bool()
        .or_else(|| profile["verified_email"].as_bool());
    if verified != Some(true) {
        return Err(AppError::FederationError("Google account email is not verified".into()));
    }

    Ok(FederatedIdentity {
        name: display_name(profile, &email),
        avatar_url: profile["picture"].as_str().map(str::to_string),
        email,
    })
}

fn github_identity(profile: &Value, fallback_email: Option<String>) -> Result<FederatedIdentity> {
    let email = profile_email(profile)
        .or(fallback_email)
        .ok_or_else(|| AppError::FederationError("GitHub account has no verified primary email".into()))?;

    Ok(FederatedIdentity {
        name: display_name(profile, &email),
        avatar_url: profile["avatar_url"].as_str().map(str::to_string),
        email,
    })
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

fn new_state() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn state_cookie(value: String) -> Cookie<'static> {
    Cookie::build(STATE_COOKIE, value)
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(CookieDuration::minutes(STATE_TTL_MINUTES))
        .finish()
}

fn removal_cookie() -> Cookie<'static> {
    let mut cookie = Cookie::build(STATE_COOKIE, "").path("/").finish();
    cookie.make_removal();
    cookie
}

fn redirect(base: &str, params: &[(&str, &str)], cookie: Cookie<'static>) -> HttpResponse {
    match Url::parse_with_params(base, params) {
        Ok(location) => HttpResponse::Found()
            .insert_header((LOCATION, location.as_str()))
            .cookie(cookie)
            .finish(),
        Err(e) => AppError::ConfigError(format!("Invalid redirect URL {}: {}", base, e)).error_response(),
    }
}

fn error_redirect(config: &OAuthConfig, err: &AppError) -> HttpResponse {
    let message = err.client_message();
    redirect(&config.error_redirect_url, &[("error", message.as_str())], removal_cookie())
}

fn success_redirect(config: &OAuthConfig, auth: &AuthenticationResponse) -> HttpResponse {
    let user_id = auth.user_id.to_string();
    redirect(
        &config.frontend_redirect_url,
        &[
            ("token", auth.token.as_str()),
            ("refreshToken", auth.refresh_token.as_str()),
            ("userId", user_id.as_str()),
            ("email", auth.email.as_str()),
            ("role", auth.role.as_str()),
        ],
        removal_cookie(),
    )
}

fn parse_provider(registration_id: &str) -> Result<AuthProvider> {
    AuthProvider::from_registration_id(registration_id)
        .ok_or_else(|| AppError::ValidationError(format!("Unsupported identity provider: {}", registration_id)))
}

pub async fn authorize(path: web::Path<String>, state: web::Data<AppState>) -> HttpResponse {
    let nonce = new_state();
    let url = parse_provider(&path).and_then(|provider| state.identity.authorization_url(provider, &nonce));

    match url {
        Ok(url) => HttpResponse::Found()
            .insert_header((LOCATION, url.as_str()))
            .cookie(state_cookie(nonce))
            .finish(),
        Err(e) => {
            warn!(provider = %path, error = %e, "Could not start OAuth2 sign-in");
            error_redirect(&state.config.oauth, &e)
        }
    }
}

async fn complete_sign_in(
    registration_id: &str,
    query: &CallbackQuery,
    expected_state: Option<&str>,
    state: &AppState,
) -> Result<AuthenticationResponse> {
    let provider = parse_provider(registration_id)?;

    if let Some(error) = &query.error {
        return Err(AppError::ValidationError(format!("Sign-in was not completed: {}", error)));
    }

    match (query.state.as_deref(), expected_state) {
        (Some(received), Some(expected)) if received == expected => {}
        _ => return Err(AppError::ValidationError("OAuth2 state mismatch".into())),
    }

    let code = query
        .code
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::ValidationError("Missing authorization code".into()))?;

    let identity = state.identity.assert_identity(provider, code).await?;
    info!(provider = %provider, "Federated identity asserted");

    state
        .auth_service
        .federated_login(&identity.email, &identity.name, provider, identity.avatar_url.as_deref())
        .await
}

pub async fn callback(
    req: HttpRequest,
    path: web::Path<String>,
    query: web::Query<CallbackQuery>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let expected = req.cookie(STATE_COOKIE).map(|c| c.value().to_string());

    match complete_sign_in(&path, &query, expected.as_deref(), &state).await {
        Ok(auth) => success_redirect(&state.config.oauth, &auth),
        Err(e) => {
            warn!(provider = %path, error = %e, "OAuth2 sign-in failed");
            error_redirect(&state.config.oauth, &e)
        }
    }
}
