use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;

use crate::config::AuthConfig;
use crate::db::models::Account;
use crate::error::{AppError, AuthError};
use crate::Result;

/// Outcome of checking a presented password against an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordCheck {
    Verified,
    Rejected,
    /// Federated accounts have no password; nothing was checked.
    NotApplicable,
}

#[derive(Debug, Clone)]
pub struct CredentialVerifier {
    params: Params,
}

impl CredentialVerifier {
    pub fn new(config: &AuthConfig) -> Result<Self> {
        Self::with_cost(config.argon2_memory_kib, config.argon2_iterations)
    }

    pub fn with_cost(memory_kib: u32, iterations: u32) -> Result<Self> {
        let params = Params::new(memory_kib, iterations, Params::DEFAULT_P_COST, None)
            .map_err(|e| AppError::ConfigError(format!("invalid argon2 parameters: {}", e)))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hashes with a fresh random salt; runs on the blocking pool.
    pub async fn hash_password(&self, plain: &str) -> Result<String> {
        let argon2 = self.argon2();
        let plain = plain.to_owned();
        tokio::task::spawn_blocking(move || hash_with(&argon2, &plain))
            .await
            .map_err(|e| AppError::InternalError(format!("password hashing task failed: {}", e)))?
    }

    /// Compares against a stored PHC hash. A malformed hash never verifies.
    pub async fn verify_password(&self, plain: &str, stored_hash: &str) -> Result<bool> {
        let argon2 = self.argon2();
        let plain = plain.to_owned();
        let stored_hash = stored_hash.to_owned();
        tokio::task::spawn_blocking(move || verify_with(&argon2, &plain, &stored_hash))
            .await
            .map_err(|e| AppError::InternalError(format!("password verification task failed: {}", e)))
    }

    pub async fn check(&self, account: &Account, presented: Option<&str>) -> Result<PasswordCheck> {
        if !account.provider.is_local() {
            return Ok(PasswordCheck::NotApplicable);
        }

        let password = presented
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| AuthError::InvalidInput("Password is required for LOCAL accounts".into()))?;

        let Some(stored_hash) = account.password_hash.as_deref() else {
            return Ok(PasswordCheck::Rejected);
        };

        if self.verify_password(password, stored_hash).await? {
            Ok(PasswordCheck::Verified)
        } else {
            Ok(PasswordCheck::Rejected)
        }
    }
}

fn hash_with(argon2: &Argon2<'_>, plain: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| AppError::InternalError(e.to_string()))?;

    argon2
        .hash_password(plain.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::InternalError(format!("password hashing failed: {}", e)))
}

fn verify_with(argon2: &Argon2<'_>, plain: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => argon2.verify_password(plain.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}
