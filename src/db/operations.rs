use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;

use crate::db::models::{Account, AccountRow, NewAccount};
use crate::db::store::CredentialStore;
use crate::error::{AppError, AuthError, DatabaseError};
use crate::Result;

const ACCOUNT_COLUMNS: &str =
    "id, name, email, password_hash, role, provider, avatar_url, created_at, refresh_token_hash";

/// Postgres-backed credential store.
#[derive(Clone)]
pub struct DbOperations {
    pool: Arc<PgPool>,
}

impl DbOperations {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn new_with_options(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .map_err(|e| AppError::DatabaseError(DatabaseError::ConnectionError(e.to_string())))?;

        Ok(Self { pool: Arc::new(pool) })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(self.pool.as_ref()).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn fetch_one_where(&self, column: &str, value: &str) -> Result<Option<Account>> {
        let sql = format!("SELECT {} FROM accounts WHERE {} = $1", ACCOUNT_COLUMNS, column);
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(value)
            .fetch_optional(self.pool.as_ref())
            .await?;

        row.map(Account::try_from).transpose()
    }
}

#[async_trait]
impl CredentialStore for DbOperations {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        self.fetch_one_where("email", email).await
    }

    async fn find_by_refresh_token(&self, token_hash: &str) -> Result<Option<Account>> {
        self.fetch_one_where("refresh_token_hash", token_hash).await
    }

    async fn insert(&self, account: NewAccount) -> Result<Account> {
        let sql = format!(
            r#"
            INSERT INTO accounts (name, email, password_hash, role, provider, avatar_url)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        );

        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(&account.name)
            .bind(&account.email)
            .bind(&account.password_hash)
            .bind(account.role.as_str())
            .bind(account.provider.as_str())
            .bind(&account.avatar_url)
            .fetch_one(self.pool.as_ref())
            .await
            .map_err(|e| match AppError::from(e) {
                AppError::DatabaseError(DatabaseError::Duplicate) => {
                    AppError::AuthError(AuthError::DuplicateAccount(account.email.clone()))
                }
                other => other,
            })?;

        Account::try_from(row)
    }

    async fn update_identity(&self, account: &Account) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET name = $2, avatar_url = $3, provider = $4, password_hash = $5
            WHERE id = $1
            "#,
        )
        .bind(account.id)
        .bind(&account.name)
        .bind(&account.avatar_url)
        .bind(account.provider.as_str())
        .bind(&account.password_hash)
        .execute(self.pool.as_ref())
        .await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::AccountNotFound.into());
        }
        Ok(())
    }

    async fn set_refresh_token(&self, account_id: i64, token_hash: Option<String>) -> Result<()> {
        let result = sqlx::query("UPDATE accounts SET refresh_token_hash = $2 WHERE id = $1")
            .bind(account_id)
            .bind(token_hash)
            .execute(self.pool.as_ref())
            .await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::AccountNotFound.into());
        }
        Ok(())
    }

    async fn swap_refresh_token(
        &self,
        account_id: i64,
        expected: &str,
        replacement: Option<String>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE accounts SET refresh_token_hash = $3 WHERE id = $1 AND refresh_token_hash = $2",
        )
        .bind(account_id)
        .bind(expected)
        .bind(replacement)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
