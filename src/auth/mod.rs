//! Authentication for the EventHub API
//!
//! Token issuing and verification, password hashing, the account
//! lifecycle service, per-request authentication and OAuth2 sign-in.

pub mod handlers;
pub mod middleware;
pub mod oauth;
pub mod password;
pub mod service;
pub mod token;

pub use middleware::{authenticate_request, Principal};
pub use oauth::{FederatedIdentity, IdentityAsserter, OAuth2Client};
pub use password::{CredentialVerifier, PasswordCheck};
pub use service::{AuthService, AuthenticationResponse, UserResponse};
pub use token::{Claims, ClaimsSource, TokenCodec, TokenError, TokenKind};
