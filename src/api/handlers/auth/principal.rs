//! Request guards shared by handlers that need a resolved identity.

use axum::http::{HeaderMap, StatusCode};
use std::sync::Arc;
use tracing::error;

use super::csrf::CSRF_COOKIE_NAME;
use super::extract::RequestCarriers;
use super::orchestrator::{AuthError, AuthOrchestrator, Principal};
use super::state::AuthState;

/// Resolve the request into a [`Principal`] or the status handlers should
/// return. Downstream handlers never re-implement extraction or
/// verification.
pub(super) async fn require_auth(
    headers: &HeaderMap,
    orchestrator: &Arc<AuthOrchestrator>,
) -> Result<Principal, StatusCode> {
    let carriers = RequestCarriers::from_headers(headers);
    match orchestrator.authenticate(&carriers).await {
        Ok(principal) => Ok(principal),
        Err(AuthError::Unauthorized) => Err(StatusCode::UNAUTHORIZED),
        Err(err) => {
            error!("authentication failed: {err}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Enforce the anti-forgery check on a state-changing, cookie-authenticated
/// request. Bearer-authenticated requests pass through.
pub(super) fn require_csrf(
    headers: &HeaderMap,
    auth_state: &AuthState,
    principal: &Principal,
) -> Result<(), StatusCode> {
    let carriers = RequestCarriers::from_headers(headers);
    let (cookie, _) = carriers.find_token(CSRF_COOKIE_NAME, false);
    let header_value = headers
        .get(super::csrf::CSRF_HEADER_NAME)
        .and_then(|value| value.to_str().ok());

    auth_state
        .csrf()
        .validate(
            principal.source,
            cookie.as_ref().map(|extraction| extraction.value.as_str()),
            header_value,
        )
        .map_err(|_| StatusCode::FORBIDDEN)
}
