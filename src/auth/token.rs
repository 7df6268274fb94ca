//! Signed, time-bounded access and refresh tokens

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::db::models::{Account, Role};
use crate::error::AppError;
use crate::Result;

const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,  // Account email
    pub role: Role,
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// Anything a token can be issued for.
pub trait ClaimsSource {
    fn subject(&self) -> &str;
    fn role(&self) -> Role;
}

impl ClaimsSource for Account {
    fn subject(&self) -> &str {
        &self.email
    }

    fn role(&self) -> Role {
        self.role
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Token has expired")]
    Expired,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Expected a {expected:?} token but got a {found:?} token")]
    WrongKind { expected: TokenKind, found: TokenKind },
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    // Current key first, then retired keys still inside their grace window.
    decoding_keys: Vec<DecodingKey>,
    validation: Validation,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenCodec {
    pub fn new(config: &AuthConfig) -> Result<Self> {
        Self::from_secrets(
            &config.jwt_secret,
            &config.previous_jwt_secrets,
            Duration::minutes(config.access_token_ttl_minutes),
            Duration::hours(config.refresh_token_ttl_hours),
        )
    }

    pub fn from_secrets(
        secret: &str,
        previous_secrets: &[String],
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Result<Self> {
        if secret.is_empty() {
            return Err(AppError::ConfigError("auth.jwt_secret must not be empty".into()));
        }
        if secret.len() < MIN_SECRET_LEN {
            warn!("auth.jwt_secret is shorter than {} bytes", MIN_SECRET_LEN);
        }
        if access_ttl <= Duration::zero() || refresh_ttl <= Duration::zero() {
            return Err(AppError::ConfigError("token TTLs must be positive".into()));
        }

        let decoding_keys = std::iter::once(secret)
            .chain(previous_secrets.iter().map(String::as_str))
            .filter(|s| !s.is_empty())
            .map(|s| DecodingKey::from_secret(s.as_bytes()))
            .collect();

        // Expiry is checked by hand so the boundary is inclusive.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.required_spec_claims = ["exp", "sub"].iter().map(|c| c.to_string()).collect();

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_keys,
            validation,
            access_ttl,
            refresh_ttl,
        })
    }

    pub fn ttl(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        }
    }

    pub fn issue(&self, subject: &str, role: Role, kind: TokenKind) -> Result<String> {
        self.issue_at(subject, role, kind, Utc::now())
    }

    fn issue_at(&self, subject: &str, role: Role, kind: TokenKind, now: DateTime<Utc>) -> Result<String> {
        let claims = Claims {
            sub: subject.to_string(),
            role,
            kind,
            iat: now.timestamp(),
            exp: (now + self.ttl(kind)).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::InternalError(format!("Failed to sign token: {}", e)))
    }

    pub fn issue_for(&self, source: &dyn ClaimsSource, kind: TokenKind) -> Result<String> {
        self.issue(source.subject(), source.role(), kind)
    }

    pub fn issue_pair(&self, source: &dyn ClaimsSource) -> Result<TokenPair> {
        Ok(TokenPair {
            access_token: self.issue_for(source, TokenKind::Access)?,
            refresh_token: self.issue_for(source, TokenKind::Refresh)?,
        })
    }

    pub fn verify(&self, token: &str) -> std::result::Result<Claims, TokenError> {
        self.verify_at(token, Utc::now())
    }

    fn verify_at(&self, token: &str, now: DateTime<Utc>) -> std::result::Result<Claims, TokenError> {
        let mut last_error = TokenError::InvalidSignature;

        for key in &self.decoding_keys {
            match decode::<Claims>(token, key, &self.validation) {
                Ok(data) => {
                    if now.timestamp() >= data.claims.exp {
                        return Err(TokenError::Expired);
                    }
                    return Ok(data.claims);
                }
                Err(e) if matches!(e.kind(), ErrorKind::InvalidSignature) => {
                    last_error = TokenError::InvalidSignature;
                }
                Err(e) => return Err(TokenError::Malformed(e.to_string())),
            }
        }

        Err(last_error)
    }

    pub fn verify_kind(&self, token: &str, kind: TokenKind) -> std::result::Result<Claims, TokenError> {
        let claims = self.verify(token)?;
        if claims.kind != kind {
            return Err(TokenError::WrongKind { expected: kind, found: claims.kind });
        }
        Ok(claims)
    }

    pub fn subject_of(&self, token: &str) -> std::result::Result<String, TokenError> {
        self.verify(token).map(|claims| claims.sub)
    }
}

/// Digest stored in the refresh-token slot instead of the raw token.
pub fn refresh_token_digest(token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes()))
}
