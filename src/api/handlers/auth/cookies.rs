//! Cookie construction for token and CSRF delivery.
//!
//! Access and refresh cookies are `HttpOnly`; the CSRF cookie is not, since
//! client-side code must read it to echo the value in a request header.

use axum::http::{HeaderValue, header::InvalidHeaderValue};

use super::csrf::CSRF_COOKIE_NAME;
use super::state::AuthConfig;
use super::{ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME};

pub(super) fn access_cookie(
    config: &AuthConfig,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    build(
        config,
        ACCESS_COOKIE_NAME,
        token,
        config.access_ttl_seconds(),
        true,
        "/",
    )
}

pub(super) fn refresh_cookie(
    config: &AuthConfig,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    // Scoped to the auth routes so the long-lived token rides along as
    // rarely as possible.
    build(
        config,
        REFRESH_COOKIE_NAME,
        token,
        config.refresh_ttl_seconds(),
        true,
        "/v1/auth",
    )
}

pub(super) fn csrf_cookie(
    config: &AuthConfig,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    build(
        config,
        CSRF_COOKIE_NAME,
        token,
        config.refresh_ttl_seconds(),
        false,
        "/",
    )
}

/// Expired variants of all three cookies, for logout.
pub(super) fn clear_cookies(config: &AuthConfig) -> Vec<HeaderValue> {
    [
        build(config, ACCESS_COOKIE_NAME, "", 0, true, "/"),
        build(config, REFRESH_COOKIE_NAME, "", 0, true, "/v1/auth"),
        build(config, CSRF_COOKIE_NAME, "", 0, false, "/"),
    ]
    .into_iter()
    .flatten()
    .collect()
}

fn build(
    config: &AuthConfig,
    name: &str,
    value: &str,
    max_age: i64,
    http_only: bool,
    path: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{name}={value}; Path={path}; SameSite=Lax; Max-Age={max_age}");
    if http_only {
        cookie.push_str("; HttpOnly");
    }
    if config.cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::state::AuthConfig;
    use super::{access_cookie, clear_cookies, csrf_cookie, refresh_cookie};

    fn config() -> AuthConfig {
        AuthConfig::new(
            "https://api.sesamo.dev".to_string(),
            "https://sesamo.dev".to_string(),
        )
    }

    #[test]
    fn access_cookie_is_http_only_and_secure() {
        let cookie = access_cookie(&config(), "tok").unwrap();
        let rendered = cookie.to_str().unwrap();
        assert!(rendered.starts_with("sesamo_access=tok;"));
        assert!(rendered.contains("HttpOnly"));
        assert!(rendered.contains("Secure"));
        assert!(rendered.contains("SameSite=Lax"));
    }

    #[test]
    fn refresh_cookie_is_path_scoped() {
        let cookie = refresh_cookie(&config(), "tok").unwrap();
        assert!(cookie.to_str().unwrap().contains("Path=/v1/auth"));
    }

    #[test]
    fn csrf_cookie_is_script_readable() {
        let cookie = csrf_cookie(&config(), "tok").unwrap();
        let rendered = cookie.to_str().unwrap();
        assert!(rendered.starts_with("sesamo_csrf=tok;"));
        assert!(!rendered.contains("HttpOnly"));
    }

    #[test]
    fn insecure_frontend_omits_secure() {
        let config = AuthConfig::new(
            "http://localhost:8080".to_string(),
            "http://localhost:3000".to_string(),
        );
        let cookie = access_cookie(&config, "tok").unwrap();
        assert!(!cookie.to_str().unwrap().contains("Secure"));
    }

    #[test]
    fn clear_cookies_expire_all_three() {
        let cleared = clear_cookies(&config());
        assert_eq!(cleared.len(), 3);
        for cookie in cleared {
            assert!(cookie.to_str().unwrap().contains("Max-Age=0"));
        }
    }
}
