// =============================================================================
// Caller Authorization — admin token or access-listed account
// =============================================================================
//
// One rule for every entry point: a caller is admitted either by presenting
// the admin token (`REVERSION_ADMIN_TOKEN`) or by naming an account that the
// access list marks as a member.  Admins may drive the engine; members may
// only watch it.
//
// REST handlers take the `Authorized` extractor, which reads
//   Authorization: Bearer <admin token>
//   X-Account-Id: <account id>
// and the WebSocket upgrade passes the same two values from its query string.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::access::AccessList;
use crate::app_state::AppState;

const ADMIN_TOKEN_VAR: &str = "REVERSION_ADMIN_TOKEN";
const ACCOUNT_HEADER: &str = "x-account-id";

/// Who is calling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Admin,
    Member(String),
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl std::fmt::Display for Caller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Admin => write!(f, "admin"),
            Self::Member(account) => write!(f, "account:{account}"),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct AuthRejection {
    status: StatusCode,
    message: &'static str,
}

impl AuthRejection {
    fn forbidden(message: &'static str) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message,
        }
    }

    /// Rejection for an authenticated caller lacking admin rights.
    pub fn admin_required() -> Self {
        Self::forbidden("Admin token required")
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, axum::Json(body)).into_response()
    }
}

// =============================================================================
// The rule
// =============================================================================

/// Admit a caller by admin token or access-list membership.
pub fn authorize(
    state: &AppState,
    token: Option<&str>,
    account: Option<&str>,
) -> Result<Caller, AuthRejection> {
    let expected = std::env::var(ADMIN_TOKEN_VAR).unwrap_or_default();
    authorize_against(&expected, &state.access_list.read(), token, account)
}

fn authorize_against(
    admin_token: &str,
    access: &AccessList,
    token: Option<&str>,
    account: Option<&str>,
) -> Result<Caller, AuthRejection> {
    if let Some(token) = token {
        if !admin_token.is_empty() && constant_time_eq(token.as_bytes(), admin_token.as_bytes()) {
            return Ok(Caller::Admin);
        }
        warn!("invalid admin token presented");
    }

    if let Some(account) = account.map(str::trim).filter(|a| !a.is_empty()) {
        if access.is_member(account) {
            return Ok(Caller::Member(account.to_string()));
        }
        warn!(account = %account, "account not on the access list");
    }

    if token.is_none() && account.is_none() {
        return Err(AuthRejection::forbidden("Missing admin token or account id"));
    }
    Err(AuthRejection::forbidden("Invalid token or account not on the access list"))
}

/// Compare two byte slices without short-circuiting on the first mismatch.
/// Only the length leaks; callers never choose the expected length.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// =============================================================================
// REST extractor
// =============================================================================

/// Extractor yielding the authorized [`Caller`]; rejects with 403 otherwise.
pub struct Authorized(pub Caller);

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for Authorized {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;
        let token = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        let account = headers.get(ACCOUNT_HEADER).and_then(|v| v.to_str().ok());

        authorize(state, token, account).map(Authorized)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn access() -> AccessList {
        AccessList::from_json(r#"{ "CR1": true, "CR2": false }"#).unwrap()
    }

    #[test]
    fn admin_token_admits_admin() {
        let caller = authorize_against("s3cret", &access(), Some("s3cret"), None);
        assert_eq!(caller, Ok(Caller::Admin));
    }

    #[test]
    fn listed_account_admits_member() {
        let caller = authorize_against("s3cret", &access(), None, Some("CR1"));
        assert_eq!(caller, Ok(Caller::Member("CR1".to_string())));
        assert!(!caller.unwrap().is_admin());
    }

    #[test]
    fn bad_token_still_falls_back_to_account() {
        let caller = authorize_against("s3cret", &access(), Some("wrong"), Some("CR1"));
        assert_eq!(caller, Ok(Caller::Member("CR1".to_string())));
    }

    #[test]
    fn disabled_or_unknown_accounts_are_rejected() {
        assert!(authorize_against("s3cret", &access(), None, Some("CR2")).is_err());
        assert!(authorize_against("s3cret", &access(), None, Some("CR9")).is_err());
        assert!(authorize_against("s3cret", &access(), None, None).is_err());
    }

    #[test]
    fn unset_admin_token_matches_nothing() {
        assert!(authorize_against("", &access(), Some(""), None).is_err());
        assert!(authorize_against("", &access(), Some("anything"), None).is_err());
    }

    #[test]
    fn constant_time_eq_compares_whole_slices() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(constant_time_eq(b"", b""));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"short", b"longer_string"));
        assert!(!constant_time_eq(b"\x00", b"\x01"));
    }
}
