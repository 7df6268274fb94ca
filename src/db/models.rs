use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

use crate::error::{AppError, DatabaseError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Organizer,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Organizer => "ORGANIZER",
            Role::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USER" => Ok(Role::User),
            "ORGANIZER" => Ok(Role::Organizer),
            "ADMIN" => Ok(Role::Admin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthProvider {
    Local,
    Google,
    Github,
}

impl AuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthProvider::Local => "LOCAL",
            AuthProvider::Google => "GOOGLE",
            AuthProvider::Github => "GITHUB",
        }
    }

    /// Maps an OAuth2 client registration id (`google`, `github`) to a provider.
    pub fn from_registration_id(id: &str) -> Option<Self> {
        match id.to_ascii_lowercase().as_str() {
            "google" => Some(AuthProvider::Google),
            "github" => Some(AuthProvider::Github),
            _ => None,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, AuthProvider::Local)
    }
}

impl fmt::Display for AuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOCAL" => Ok(AuthProvider::Local),
            "GOOGLE" => Ok(AuthProvider::Google),
            "GITHUB" => Ok(AuthProvider::Github),
            other => Err(format!("unknown auth provider: {}", other)),
        }
    }
}

/// An identity record.
///
/// `password_hash` is present only for `LOCAL` accounts, and
/// `refresh_token_hash` holds the digest of the single live refresh token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub role: Role,
    pub provider: AuthProvider,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub refresh_token_hash: Option<String>,
}

/// Fields for an account that has not been persisted yet.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub role: Role,
    pub provider: AuthProvider,
    pub avatar_url: Option<String>,
}

impl NewAccount {
    pub fn into_account(self, id: i64, created_at: DateTime<Utc>) -> Account {
        Account {
            id,
            name: self.name,
            email: self.email,
            password_hash: self.password_hash,
            role: self.role,
            provider: self.provider,
            avatar_url: self.avatar_url,
            created_at,
            refresh_token_hash: None,
        }
    }
}

/// Row shape of the `accounts` table; enums are stored as text.
#[derive(Debug, Clone, FromRow)]
pub struct AccountRow {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub role: String,
    pub provider: String,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub refresh_token_hash: Option<String>,
}

impl TryFrom<AccountRow> for Account {
    type Error = AppError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        let corrupt = |e: String| AppError::DatabaseError(DatabaseError::CorruptRecord(e));
        Ok(Account {
            id: row.id,
            name: row.name,
            email: row.email,
            password_hash: row.password_hash,
            role: row.role.parse().map_err(corrupt)?,
            provider: row.provider.parse().map_err(corrupt)?,
            avatar_url: row.avatar_url,
            created_at: row.created_at,
            refresh_token_hash: row.refresh_token_hash,
        })
    }
}

/// Trims and lowercases an email so uniqueness is case-insensitive.
pub fn normalize_email(email: &str) -> Option<String> {
    let trimmed = email.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}
