//! Authentication and session-security endpoints.
//!
//! Flow Overview:
//! 1) `register` creates an account (policy-gated) and issues a single-use
//!    verification token.
//! 2) `verify-email` consumes the token and marks the account verified.
//! 3) `login` checks credentials, then either issues the token pair or
//!    parks the caller in a two-factor challenge.
//! 4) `two-factor/verify` accepts a TOTP or recovery code and completes the
//!    login.
//! 5) `refresh` re-issues access tokens from a still-valid refresh token.
//!
//! Security boundaries:
//! - Authentication failures are uniform 401s; nothing distinguishes
//!   unknown accounts from wrong passwords.
//! - Refresh tokens are cookie-scoped; the bearer header never carries one.
//! - CSRF failures are a distinct 403, never conflated with auth failures.

pub mod cookies;
pub mod csrf;
pub mod extract;
pub mod login;
pub mod mfa;
pub mod orchestrator;
pub mod password;
pub mod principal;
pub mod register;
pub mod state;
pub mod types;
pub mod utils;

pub use orchestrator::{AuthError, AuthOrchestrator, RegistrationPolicy};
pub use state::{AuthConfig, AuthState};

use axum::http::{HeaderValue, StatusCode, header::RETRY_AFTER};
use axum::response::{IntoResponse, Response};
use tracing::error;

/// `HttpOnly` cookie carrying the access token.
pub const ACCESS_COOKIE_NAME: &str = "sesamo_access";
/// `HttpOnly` cookie carrying the refresh token.
pub const REFRESH_COOKIE_NAME: &str = "sesamo_refresh";

/// Map the typed failure taxonomy to external responses in one place.
pub(crate) fn error_response(err: &AuthError) -> Response {
    match err {
        AuthError::InvalidInput(message) => {
            (StatusCode::BAD_REQUEST, (*message).to_string()).into_response()
        }
        AuthError::Unauthorized => {
            (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()).into_response()
        }
        AuthError::Forbidden => {
            (StatusCode::FORBIDDEN, "Forbidden".to_string()).into_response()
        }
        AuthError::Csrf(_) => {
            (StatusCode::FORBIDDEN, "CSRF validation failed".to_string()).into_response()
        }
        AuthError::RateLimited { retry_after } => {
            let mut response =
                (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response();
            let seconds = retry_after.as_secs().max(1);
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
            response
        }
        AuthError::Internal(err) => {
            error!("internal auth error: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::error_response;
    use super::orchestrator::AuthError;
    use crate::api::handlers::auth::csrf::CsrfError;
    use axum::http::{StatusCode, header::RETRY_AFTER};
    use std::time::Duration;

    #[test]
    fn taxonomy_maps_to_expected_statuses() {
        assert_eq!(
            error_response(&AuthError::InvalidInput("bad")).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_response(&AuthError::Unauthorized).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            error_response(&AuthError::Forbidden).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            error_response(&AuthError::Csrf(CsrfError::Mismatch)).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            error_response(&AuthError::Internal(anyhow::anyhow!("boom"))).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn rate_limited_carries_retry_after() {
        let response = error_response(&AuthError::RateLimited {
            retry_after: Duration::from_secs(42),
        });
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok()),
            Some("42")
        );
    }

    #[test]
    fn sub_second_retry_after_rounds_up_to_one() {
        let response = error_response(&AuthError::RateLimited {
            retry_after: Duration::from_millis(200),
        });
        assert_eq!(
            response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok()),
            Some("1")
        );
    }
}
