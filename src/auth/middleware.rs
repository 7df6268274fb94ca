use actix_web::body::MessageBody;
use actix_web::dev::{Payload, ServiceRequest, ServiceResponse};
use actix_web::http::header::AUTHORIZATION;
use actix_web::middleware::Next;
use actix_web::{web, Error, FromRequest, HttpMessage, HttpRequest};
use std::future::{ready, Ready};
use tracing::{debug, warn};

use crate::auth::token::{TokenCodec, TokenKind};
use crate::db::models::Role;
use crate::db::store::CredentialStore;
use crate::error::{AppError, AuthError};
use crate::AppState;

/// Authenticated caller of the current request.
///
/// Taking a `Principal` as a handler argument makes the route protected:
/// extraction fails with a 401 when the request carried no valid access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub account_id: i64,
    pub email: String,
    pub role: Role,
}

impl Principal {
    pub fn require_any_role(&self, roles: &[Role]) -> crate::Result<()> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            Err(AuthError::Forbidden.into())
        }
    }
}

impl FromRequest for Principal {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<Principal>()
                .cloned()
                .ok_or_else(|| AuthError::Unauthorized.into()),
        )
    }
}

pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Resolves an `Authorization` header to a principal. Every failure means
/// "unauthenticated"; nothing here produces an error response.
pub async fn resolve_principal(
    header: Option<&str>,
    tokens: &TokenCodec,
    store: &dyn CredentialStore,
) -> Option<Principal> {
    let token = bearer_token(header?)?;

    let claims = match tokens.verify_kind(token, TokenKind::Access) {
        Ok(claims) => claims,
        Err(e) => {
            debug!(error = %e, "Ignoring unusable bearer token");
            return None;
        }
    };

    match store.find_by_email(&claims.sub).await {
        Ok(Some(account)) => Some(Principal {
            account_id: account.id,
            email: account.email,
            role: account.role,
        }),
        Ok(None) => {
            debug!("Bearer token subject has no account");
            None
        }
        Err(e) => {
            warn!(error = %e, "Account lookup failed during request authentication");
            None
        }
    }
}

pub async fn authenticate_request(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    // An earlier layer may already have established the caller.
    let resolved = req.extensions().contains::<Principal>();

    if !resolved {
        let header = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .map(str::to_owned);

        if let Some(state) = req.app_data::<web::Data<AppState>>().cloned() {
            let principal =
                resolve_principal(header.as_deref(), &state.tokens, state.store.as_ref()).await;
            if let Some(principal) = principal {
                req.extensions_mut().insert(principal);
            }
        }
    }

    next.call(req).await
}
