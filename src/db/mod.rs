//! Credential store for the authentication server
//!
//! `CredentialStore` is the persistence seam; `DbOperations` backs it with
//! Postgres and `InMemoryCredentialStore` with a process-local map.

pub mod models;
pub mod operations;
pub mod store;

pub use models::{normalize_email, Account, AuthProvider, NewAccount, Role};
pub use operations::DbOperations;
pub use store::{CredentialStore, InMemoryCredentialStore};
