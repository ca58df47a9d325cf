//! Anti-forgery tokens for cookie-based session flows.
//!
//! The CSRF value is delivered in a cookie that client-side code can read
//! (unlike the HttpOnly access/refresh cookies) and must be echoed back in a
//! request header on state-changing calls. Bearer-only flows are inherently
//! resistant to cross-site request forgery; requests that authenticated via
//! the `Authorization` header skip the check, and deployments that only
//! serve bearer clients can disable the guard outright in configuration.

use anyhow::{Context, Result};
use base64::Engine;
use rand::{RngCore, rngs::OsRng};
use subtle::ConstantTimeEq;

use super::extract::CarrierSource;

pub const CSRF_COOKIE_NAME: &str = "sesamo_csrf";
pub const CSRF_HEADER_NAME: &str = "x-sesamo-csrf";

/// Distinct failure kind; never conflated with authentication failures.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum CsrfError {
    #[error("missing CSRF token")]
    Missing,
    #[error("CSRF token mismatch")]
    Mismatch,
}

#[derive(Clone, Copy, Debug)]
pub struct CsrfGuard {
    enabled: bool,
}

impl CsrfGuard {
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Mint a fresh per-session anti-forgery value.
    ///
    /// # Errors
    /// Returns an error if randomness is unavailable.
    pub fn issue(&self) -> Result<String> {
        let mut bytes = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut bytes)
            .context("failed to generate CSRF token")?;
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Validate the header value against the session's cookie value.
    /// Requests authenticated through the bearer carrier are exempt.
    ///
    /// # Errors
    /// Returns the distinct [`CsrfError`] on absence or mismatch.
    pub fn validate(
        &self,
        auth_source: CarrierSource,
        cookie_value: Option<&str>,
        header_value: Option<&str>,
    ) -> Result<(), CsrfError> {
        if !self.enabled || auth_source == CarrierSource::BearerHeader {
            return Ok(());
        }
        let (Some(cookie), Some(header)) = (cookie_value, header_value) else {
            return Err(CsrfError::Missing);
        };
        if cookie.as_bytes().ct_eq(header.as_bytes()).into() {
            Ok(())
        } else {
            Err(CsrfError::Mismatch)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::{CsrfError, CsrfGuard};
    use crate::api::handlers::auth::extract::CarrierSource;

    #[test]
    fn issued_tokens_are_random_and_url_safe() {
        let guard = CsrfGuard::new(true);
        let first = guard.issue().unwrap();
        let second = guard.issue().unwrap();
        assert_ne!(first, second);
        assert_eq!(first.len(), 43);
        assert!(first.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_'));
    }

    #[test]
    fn matching_values_pass() {
        let guard = CsrfGuard::new(true);
        let token = guard.issue().unwrap();
        assert!(
            guard
                .validate(CarrierSource::CookieEntry, Some(&token), Some(&token))
                .is_ok()
        );
    }

    #[test]
    fn absence_and_mismatch_are_distinct_failures() {
        let guard = CsrfGuard::new(true);
        assert_eq!(
            guard.validate(CarrierSource::CookieEntry, Some("a"), None),
            Err(CsrfError::Missing)
        );
        assert_eq!(
            guard.validate(CarrierSource::CookieEntry, None, Some("a")),
            Err(CsrfError::Missing)
        );
        assert_eq!(
            guard.validate(CarrierSource::CookieEntry, Some("a"), Some("b")),
            Err(CsrfError::Mismatch)
        );
    }

    #[test]
    fn bearer_authenticated_requests_are_exempt() {
        let guard = CsrfGuard::new(true);
        assert!(
            guard
                .validate(CarrierSource::BearerHeader, None, None)
                .is_ok()
        );
    }

    #[test]
    fn disabled_guard_is_a_bypass() {
        let guard = CsrfGuard::new(false);
        assert!(
            guard
                .validate(CarrierSource::CookieEntry, None, None)
                .is_ok()
        );
    }
}
