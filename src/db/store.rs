use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::db::models::{Account, NewAccount};
use crate::error::AuthError;
use crate::Result;

/// Persistence for account records and their refresh-token slot.
///
/// Implementations must keep `email` unique and must apply each write to a
/// single account atomically. Refresh tokens are handled as digests; the
/// store never sees a raw token.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>>;

    async fn find_by_refresh_token(&self, token_hash: &str) -> Result<Option<Account>>;

    /// Inserts a new account, failing with `DuplicateAccount` if the email is taken.
    async fn insert(&self, account: NewAccount) -> Result<Account>;

    /// Persists name, avatar, provider and password hash of an existing account.
    async fn update_identity(&self, account: &Account) -> Result<()>;

    /// Overwrites the refresh-token slot unconditionally.
    async fn set_refresh_token(&self, account_id: i64, token_hash: Option<String>) -> Result<()>;

    /// Replaces the slot only if it still holds `expected`. Returns whether
    /// the swap happened.
    async fn swap_refresh_token(
        &self,
        account_id: i64,
        expected: &str,
        replacement: Option<String>,
    ) -> Result<bool>;
}

#[derive(Debug, Default)]
struct Accounts {
    next_id: i64,
    by_id: HashMap<i64, Account>,
}

impl Accounts {
    fn find(&self, predicate: impl Fn(&Account) -> bool) -> Option<Account> {
        self.by_id.values().find(|a| predicate(a)).cloned()
    }
}

/// Process-local store used by tests and single-node development runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCredentialStore {
    accounts: Arc<RwLock<Accounts>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.accounts.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.find(|a| a.email == email))
    }

    async fn find_by_refresh_token(&self, token_hash: &str) -> Result<Option<Account>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.find(|a| a.refresh_token_hash.as_deref() == Some(token_hash)))
    }

    async fn insert(&self, account: NewAccount) -> Result<Account> {
        let mut accounts = self.accounts.write().await;
        if accounts.by_id.values().any(|a| a.email == account.email) {
            return Err(AuthError::DuplicateAccount(account.email).into());
        }

        accounts.next_id += 1;
        let id = accounts.next_id;
        let account = account.into_account(id, Utc::now());
        accounts.by_id.insert(id, account.clone());
        Ok(account)
    }

    async fn update_identity(&self, account: &Account) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        let stored = accounts
            .by_id
            .get_mut(&account.id)
            .ok_or(AuthError::AccountNotFound)?;

        stored.name = account.name.clone();
        stored.avatar_url = account.avatar_url.clone();
        stored.provider = account.provider;
        stored.password_hash = account.password_hash.clone();
        Ok(())
    }

    async fn set_refresh_token(&self, account_id: i64, token_hash: Option<String>) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        let stored = accounts
            .by_id
            .get_mut(&account_id)
            .ok_or(AuthError::AccountNotFound)?;

        stored.refresh_token_hash = token_hash;
        Ok(())
    }

    async fn swap_refresh_token(
        &self,
        account_id: i64,
        expected: &str,
        replacement: Option<String>,
    ) -> Result<bool> {
        let mut accounts = self.accounts.write().await;
        match accounts.by_id.get_mut(&account_id) {
            Some(stored) if stored.refresh_token_hash.as_deref() == Some(expected) => {
                stored.refresh_token_hash = replacement;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
