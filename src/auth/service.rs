use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::middleware::Principal;
use crate::auth::password::{CredentialVerifier, PasswordCheck};
use crate::auth::token::{refresh_token_digest, TokenCodec, TokenKind};
use crate::db::models::{normalize_email, Account, AuthProvider, NewAccount, Role};
use crate::db::store::CredentialStore;
use crate::error::AuthError;
use crate::Result;

/// Role given to accounts created by a first federated login.
pub const DEFAULT_FEDERATED_ROLE: Role = Role::User;

/// Token envelope returned by every credential-issuing operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationResponse {
    pub token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub user_id: i64,
    pub email: String,
    pub role: Role,
}

/// Public profile of an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub auth_provider: AuthProvider,
    pub avatar_url: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl From<Account> for UserResponse {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            name: account.name,
            email: account.email,
            auth_provider: account.provider,
            avatar_url: account.avatar_url,
            role: account.role,
            created_at: account.created_at,
        }
    }
}

pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    tokens: TokenCodec,
    passwords: CredentialVerifier,
    allow_federated_api_login: bool,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        tokens: TokenCodec,
        passwords: CredentialVerifier,
        allow_federated_api_login: bool,
    ) -> Self {
        Self {
            store,
            tokens,
            passwords,
            allow_federated_api_login,
        }
    }

    pub fn tokens(&self) -> &TokenCodec {
        &self.tokens
    }

    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: Option<&str>,
        provider: AuthProvider,
        role: Role,
        avatar_url: Option<&str>,
    ) -> Result<AuthenticationResponse> {
        let email = require_email(email)?;

        if self.store.find_by_email(&email).await?.is_some() {
            return Err(AuthError::DuplicateAccount(email).into());
        }

        let password_hash = if provider.is_local() {
            let password = password
                .filter(|p| !p.trim().is_empty())
                .ok_or_else(|| AuthError::InvalidInput("Password is required for LOCAL accounts".into()))?;
            Some(self.passwords.hash_password(password).await?)
        } else {
            None
        };

        let account = self
            .store
            .insert(NewAccount {
                name: name.trim().to_string(),
                email,
                password_hash,
                role,
                provider,
                avatar_url: avatar_url.map(str::to_string),
            })
            .await?;

        info!(account_id = account.id, provider = %provider, "Account registered");
        self.start_session(account).await
    }

    pub async fn login(
        &self,
        email: &str,
        password: Option<&str>,
        provider: Option<AuthProvider>,
    ) -> Result<AuthenticationResponse> {
        let email = require_email(email)?;
        let account = self
            .store
            .find_by_email(&email)
            .await?
            .ok_or(AuthError::AccountNotFound)?;

        let requested = provider.unwrap_or(AuthProvider::Local);
        if account.provider != requested {
            return Err(AuthError::InvalidInput(format!(
                "This email is registered with the {} provider",
                account.provider
            ))
            .into());
        }

        match self.passwords.check(&account, password).await? {
            PasswordCheck::Verified => {}
            PasswordCheck::Rejected => {
                warn!(account_id = account.id, "Password verification failed");
                return Err(AuthError::AuthenticationFailed.into());
            }
            PasswordCheck::NotApplicable => {
                if !self.allow_federated_api_login {
                    return Err(AuthError::InvalidInput(format!(
                        "Sign in with {} to access this account",
                        account.provider
                    ))
                    .into());
                }
            }
        }

        info!(account_id = account.id, "Login successful");
        self.start_session(account).await
    }

    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<AuthenticationResponse> {
        let digest = refresh_token_digest(refresh_token);
        let account = self
            .store
            .find_by_refresh_token(&digest)
            .await?
            .ok_or_else(|| AuthError::InvalidToken("Invalid refresh token".into()))?;

        if let Err(e) = self.tokens.verify_kind(refresh_token, TokenKind::Refresh) {
            warn!(account_id = account.id, error = %e, "Stored refresh token failed verification");
            self.store.swap_refresh_token(account.id, &digest, None).await?;
            return Err(e.into());
        }

        let pair = self.tokens.issue_pair(&account)?;
        let rotated = self
            .store
            .swap_refresh_token(account.id, &digest, Some(refresh_token_digest(&pair.refresh_token)))
            .await?;
        if !rotated {
            warn!(account_id = account.id, "Refresh token was superseded concurrently");
            return Err(AuthError::InvalidToken("Invalid refresh token".into()).into());
        }

        info!(account_id = account.id, "Refresh token rotated");
        Ok(envelope(&account, pair.access_token, pair.refresh_token))
    }

    /// Clears the refresh-token slot. Unknown or already-cleared tokens are not an error.
    pub async fn logout(&self, refresh_token: &str) -> Result<()> {
        let digest = refresh_token_digest(refresh_token);
        if let Some(account) = self.store.find_by_refresh_token(&digest).await? {
            self.store.swap_refresh_token(account.id, &digest, None).await?;
            info!(account_id = account.id, "Logged out");
        }
        Ok(())
    }

    /// Signs in an identity already asserted by an external provider,
    /// creating the account or taking over an existing one with the same email.
    pub async fn federated_login(
        &self,
        email: &str,
        display_name: &str,
        provider: AuthProvider,
        avatar_url: Option<&str>,
    ) -> Result<AuthenticationResponse> {
        if provider.is_local() {
            return Err(AuthError::InvalidInput("Federated login requires an external provider".into()).into());
        }
        let email = require_email(email)?;

        let account = match self.store.find_by_email(&email).await? {
            Some(mut account) => {
                account.name = display_name.to_string();
                account.avatar_url = avatar_url.map(str::to_string);
                if account.provider != provider {
                    warn!(
                        account_id = account.id,
                        from = %account.provider,
                        to = %provider,
                        "Account provider switched by federated login"
                    );
                    account.provider = provider;
                    account.password_hash = None;
                }
                self.store.update_identity(&account).await?;
                account
            }
            None => {
                let account = self
                    .store
                    .insert(NewAccount {
                        name: display_name.to_string(),
                        email,
                        password_hash: None,
                        role: DEFAULT_FEDERATED_ROLE,
                        provider,
                        avatar_url: avatar_url.map(str::to_string),
                    })
                    .await?;
                info!(account_id = account.id, provider = %provider, "Account created by federated login");
                account
            }
        };

        self.start_session(account).await
    }

    pub async fn current_account(&self, principal: &Principal) -> Result<UserResponse> {
        self.store
            .find_by_email(&principal.email)
            .await?
            .map(UserResponse::from)
            .ok_or_else(|| AuthError::AccountNotFound.into())
    }

    /// Issues a token pair and overwrites the account's refresh-token slot.
    async fn start_session(&self, account: Account) -> Result<AuthenticationResponse> {
        let pair = self.tokens.issue_pair(&account)?;
        self.store
            .set_refresh_token(account.id, Some(refresh_token_digest(&pair.refresh_token)))
            .await?;
        Ok(envelope(&account, pair.access_token, pair.refresh_token))
    }
}

fn require_email(email: &str) -> Result<String> {
    normalize_email(email).ok_or_else(|| AuthError::InvalidInput("Email must not be blank".into()).into())
}

fn envelope(account: &Account, token: String, refresh_token: String) -> AuthenticationResponse {
    AuthenticationResponse {
        token,
        refresh_token,
        token_type: "Bearer".to_string(),
        user_id: account.id,
        email: account.email.clone(),
        role: account.role,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::TokenError;
    use crate::db::store::{InMemoryCredentialStore, MockCredentialStore};
    use crate::error::{AppError, DatabaseError};
    use chrono::Duration;

    const SECRET: &str = "service_test_secret_0123456789abcdefgh";

    fn codec() -> TokenCodec {
        TokenCodec::from_secrets(SECRET, &[], Duration::minutes(30), Duration::hours(24)).unwrap()
    }

    fn service_with(store: Arc<dyn CredentialStore>, codec: TokenCodec) -> AuthService {
        AuthService::new(store, codec, CredentialVerifier::with_cost(1024, 1).unwrap(), true)
    }

    fn service() -> (AuthService, InMemoryCredentialStore) {
        let store = InMemoryCredentialStore::new();
        (service_with(Arc::new(store.clone()), codec()), store)
    }

    async fn register_local(service: &AuthService, email: &str) -> AuthenticationResponse {
        service
            .register("Test User", email, Some("Secret123!"), AuthProvider::Local, Role::User, None)
            .await
            .unwrap()
    }

    fn auth_error(result: Result<impl std::fmt::Debug>) -> AuthError {
        match result {
            Err(AppError::AuthError(e)) => e,
            other => panic!("expected an auth error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_register_local_issues_verifiable_tokens() {
        let (service, store) = service();
        let response = register_local(&service, "u@test.com").await;

        assert!(response.user_id > 0);
        assert_eq!(response.token_type, "Bearer");
        assert_eq!(response.role, Role::User);
        let claims = service.tokens().verify(&response.token).unwrap();
        assert_eq!(claims.sub, "u@test.com");
        assert_eq!(claims.kind, TokenKind::Access);

        let stored = store.find_by_email("u@test.com").await.unwrap().unwrap();
        assert!(stored.password_hash.as_deref().unwrap().starts_with("$argon2id$"));
        assert_eq!(
            stored.refresh_token_hash.as_deref(),
            Some(refresh_token_digest(&response.refresh_token).as_str())
        );
    }

    #[tokio::test]
    async fn test_register_normalizes_email() {
        let (service, _) = service();
        let response = register_local(&service, "  Mixed@Test.COM ").await;
        assert_eq!(response.email, "mixed@test.com");

        let duplicate = service
            .register("Other", "mixed@test.com", Some("pw"), AuthProvider::Local, Role::User, None)
            .await;
        assert!(matches!(auth_error(duplicate), AuthError::DuplicateAccount(_)));
    }

    #[tokio::test]
    async fn test_register_local_requires_password() {
        let (service, store) = service();
        let result = service
            .register("Test", "u@test.com", Some("  "), AuthProvider::Local, Role::User, None)
            .await;

        assert!(matches!(auth_error(result), AuthError::InvalidInput(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_register_federated_ignores_password() {
        let (service, store) = service();
        service
            .register("G User", "g@test.com", Some("ignored"), AuthProvider::Google, Role::Organizer, Some("https://img/g.png"))
            .await
            .unwrap();

        let stored = store.find_by_email("g@test.com").await.unwrap().unwrap();
        assert_eq!(stored.password_hash, None);
        assert_eq!(stored.provider, AuthProvider::Google);
        assert_eq!(stored.avatar_url.as_deref(), Some("https://img/g.png"));
    }

    #[tokio::test]
    async fn test_login_with_wrong_password_keeps_refresh_slot() {
        let (service, store) = service();
        register_local(&service, "u@test.com").await;
        let before = store.find_by_email("u@test.com").await.unwrap().unwrap();

        let result = service.login("u@test.com", Some("wrong"), Some(AuthProvider::Local)).await;
        assert!(matches!(auth_error(result), AuthError::AuthenticationFailed));

        let after = store.find_by_email("u@test.com").await.unwrap().unwrap();
        assert_eq!(before.refresh_token_hash, after.refresh_token_hash);
    }

    #[tokio::test]
    async fn test_login_replaces_refresh_token() {
        let (service, _) = service();
        let registered = register_local(&service, "u@test.com").await;

        let logged_in = service.login("u@test.com", Some("Secret123!"), None).await.unwrap();
        assert_ne!(logged_in.refresh_token, registered.refresh_token);

        let stale = service.refresh_access_token(&registered.refresh_token).await;
        assert!(matches!(auth_error(stale), AuthError::InvalidToken(_)));
        assert!(service.refresh_access_token(&logged_in.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_login_unknown_email() {
        let (service, _) = service();
        let result = service.login("nobody@test.com", Some("pw"), None).await;
        assert!(matches!(auth_error(result), AuthError::AccountNotFound));
    }

    #[tokio::test]
    async fn test_login_local_requires_password() {
        let (service, _) = service();
        register_local(&service, "u@test.com").await;
        let result = service.login("u@test.com", None, Some(AuthProvider::Local)).await;
        assert!(matches!(auth_error(result), AuthError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_federated_account_rejects_local_login_by_provider() {
        let (service, _) = service();
        service
            .register("G User", "g@test.com", None, AuthProvider::Google, Role::User, None)
            .await
            .unwrap();

        let result = service.login("g@test.com", Some("Secret123!"), Some(AuthProvider::Local)).await;
        match auth_error(result) {
            AuthError::InvalidInput(msg) => assert!(msg.contains("GOOGLE")),
            other => panic!("expected provider mismatch, got {:?}", other),
        }

        let response = service.login("g@test.com", None, Some(AuthProvider::Google)).await.unwrap();
        assert_eq!(response.email, "g@test.com");
    }

    #[tokio::test]
    async fn test_federated_api_login_can_be_disabled() {
        let store = InMemoryCredentialStore::new();
        let service = AuthService::new(
            Arc::new(store),
            codec(),
            CredentialVerifier::with_cost(1024, 1).unwrap(),
            false,
        );
        service
            .register("G User", "g@test.com", None, AuthProvider::Google, Role::User, None)
            .await
            .unwrap();

        let result = service.login("g@test.com", None, Some(AuthProvider::Google)).await;
        assert!(matches!(auth_error(result), AuthError::InvalidInput(_)));
        assert!(service.federated_login("g@test.com", "G", AuthProvider::Google, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_old_token_dies() {
        let (service, _) = service();
        let registered = register_local(&service, "u@test.com").await;

        let refreshed = service.refresh_access_token(&registered.refresh_token).await.unwrap();
        assert_ne!(refreshed.refresh_token, registered.refresh_token);
        assert_eq!(refreshed.user_id, registered.user_id);
        assert_eq!(service.tokens().subject_of(&refreshed.token).unwrap(), "u@test.com");

        let reuse = service.refresh_access_token(&registered.refresh_token).await;
        assert!(matches!(auth_error(reuse), AuthError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_refresh_with_unknown_token() {
        let (service, _) = service();
        register_local(&service, "u@test.com").await;

        let forged = codec().issue("u@test.com", Role::User, TokenKind::Refresh).unwrap();
        let result = service.refresh_access_token(&forged).await;
        assert!(matches!(auth_error(result), AuthError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_refresh_with_unverifiable_token_clears_slot() {
        let store = InMemoryCredentialStore::new();
        let account = store
            .insert(NewAccount {
                name: "Test".into(),
                email: "u@test.com".into(),
                password_hash: None,
                role: Role::User,
                provider: AuthProvider::Github,
                avatar_url: None,
            })
            .await
            .unwrap();

        // A refresh token signed with a key this service no longer trusts.
        let retired = TokenCodec::from_secrets(
            "retired_secret_0123456789abcdefghijklm",
            &[],
            Duration::minutes(30),
            Duration::hours(24),
        )
        .unwrap();
        let token = retired.issue("u@test.com", Role::User, TokenKind::Refresh).unwrap();
        store
            .set_refresh_token(account.id, Some(refresh_token_digest(&token)))
            .await
            .unwrap();

        let service = service_with(Arc::new(store.clone()), codec());
        let result = service.refresh_access_token(&token).await;
        assert!(matches!(
            auth_error(result),
            AuthError::InvalidToken(message) if message == TokenError::InvalidSignature.to_string()
        ));

        let stored = store.find_by_email("u@test.com").await.unwrap().unwrap();
        assert_eq!(stored.refresh_token_hash, None);
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let (service, store) = service();
        let registered = register_local(&service, "u@test.com").await;

        service.logout(&registered.refresh_token).await.unwrap();
        service.logout(&registered.refresh_token).await.unwrap();
        service.logout("never-issued").await.unwrap();

        let stored = store.find_by_email("u@test.com").await.unwrap().unwrap();
        assert_eq!(stored.refresh_token_hash, None);

        let after_logout = service.refresh_access_token(&registered.refresh_token).await;
        assert!(matches!(auth_error(after_logout), AuthError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_federated_login_takes_over_local_account() {
        let (service, store) = service();
        let registered = register_local(&service, "a@x.com").await;

        let federated = service
            .federated_login("a@x.com", "Alice", AuthProvider::Github, Some("https://avatars/a.png"))
            .await
            .unwrap();
        assert_eq!(federated.user_id, registered.user_id);

        let stored = store.find_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(stored.provider, AuthProvider::Github);
        assert_eq!(stored.password_hash, None);
        assert_eq!(stored.name, "Alice");
        assert_eq!(stored.avatar_url.as_deref(), Some("https://avatars/a.png"));

        let local = service.login("a@x.com", Some("Secret123!"), Some(AuthProvider::Local)).await;
        assert!(matches!(auth_error(local), AuthError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_federated_login_creates_account_with_default_role() {
        let (service, store) = service();
        let response = service
            .federated_login("New@X.com", "New User", AuthProvider::Google, None)
            .await
            .unwrap();

        assert_eq!(response.role, DEFAULT_FEDERATED_ROLE);
        assert_eq!(response.email, "new@x.com");
        let stored = store.find_by_email("new@x.com").await.unwrap().unwrap();
        assert_eq!(stored.password_hash, None);
        assert_eq!(stored.provider, AuthProvider::Google);
    }

    #[tokio::test]
    async fn test_federated_login_rejects_local_provider() {
        let (service, _) = service();
        let result = service.federated_login("a@x.com", "A", AuthProvider::Local, None).await;
        assert!(matches!(auth_error(result), AuthError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_store_failure_aborts_before_mutation() {
        let mut store = MockCredentialStore::new();
        store
            .expect_find_by_email()
            .times(1)
            .returning(|_| Err(AppError::DatabaseError(DatabaseError::QueryError("down".into()))));
        store.expect_insert().never();
        store.expect_set_refresh_token().never();

        let service = service_with(Arc::new(store), codec());
        let result = service
            .register("Test", "u@test.com", Some("pw"), AuthProvider::Local, Role::User, None)
            .await;
        assert!(matches!(result, Err(AppError::DatabaseError(_))));
    }

    #[tokio::test]
    async fn test_current_account() {
        let (service, _) = service();
        let registered = register_local(&service, "u@test.com").await;
        let principal = Principal {
            account_id: registered.user_id,
            email: registered.email.clone(),
            role: registered.role,
        };

        let profile = service.current_account(&principal).await.unwrap();
        assert_eq!(profile.id, registered.user_id);
        assert_eq!(profile.auth_provider, AuthProvider::Local);
    }
}
