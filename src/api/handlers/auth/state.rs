//! Auth configuration and shared request state.

use crate::api::handlers::auth::csrf::CsrfGuard;

const DEFAULT_ACCESS_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_REFRESH_TTL_SECONDS: i64 = 14 * 24 * 60 * 60;
const DEFAULT_VERIFICATION_TTL_SECONDS: i64 = 30 * 60;
const DEFAULT_CHALLENGE_TTL_SECONDS: i64 = 5 * 60;
const DEFAULT_AUDIT_RETENTION_DAYS: i64 = 90;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    issuer: String,
    frontend_base_url: String,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
    verification_ttl_seconds: i64,
    challenge_ttl_seconds: i64,
    /// CSRF protection applies to cookie-session flows. Deployments serving
    /// only bearer clients may disable it; bearer-authenticated requests are
    /// exempt either way.
    csrf_enabled: bool,
    registration_enabled: bool,
    registration_allowlist: Vec<String>,
    audit_retention_days: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(issuer: String, frontend_base_url: String) -> Self {
        Self {
            issuer,
            frontend_base_url,
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
            verification_ttl_seconds: DEFAULT_VERIFICATION_TTL_SECONDS,
            challenge_ttl_seconds: DEFAULT_CHALLENGE_TTL_SECONDS,
            csrf_enabled: true,
            registration_enabled: true,
            registration_allowlist: Vec::new(),
            audit_retention_days: DEFAULT_AUDIT_RETENTION_DAYS,
        }
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_verification_ttl_seconds(mut self, seconds: i64) -> Self {
        self.verification_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_challenge_ttl_seconds(mut self, seconds: i64) -> Self {
        self.challenge_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_csrf_enabled(mut self, enabled: bool) -> Self {
        self.csrf_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_registration_enabled(mut self, enabled: bool) -> Self {
        self.registration_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_registration_allowlist(mut self, allowlist: Vec<String>) -> Self {
        self.registration_allowlist = allowlist;
        self
    }

    #[must_use]
    pub fn with_audit_retention_days(mut self, days: i64) -> Self {
        self.audit_retention_days = days;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    #[must_use]
    pub fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }

    #[must_use]
    pub fn verification_ttl_seconds(&self) -> i64 {
        self.verification_ttl_seconds
    }

    #[must_use]
    pub fn challenge_ttl_seconds(&self) -> i64 {
        self.challenge_ttl_seconds
    }

    #[must_use]
    pub fn csrf_enabled(&self) -> bool {
        self.csrf_enabled
    }

    #[must_use]
    pub fn registration_enabled(&self) -> bool {
        self.registration_enabled
    }

    #[must_use]
    pub fn registration_allowlist(&self) -> &[String] {
        &self.registration_allowlist
    }

    #[must_use]
    pub fn audit_retention_days(&self) -> i64 {
        self.audit_retention_days
    }

    /// Only mark cookies secure when the frontend is served over HTTPS.
    pub(super) fn cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }
}

pub struct AuthState {
    config: AuthConfig,
    csrf: CsrfGuard,
}

impl AuthState {
    #[must_use]
    pub fn new(config: AuthConfig) -> Self {
        let csrf = CsrfGuard::new(config.csrf_enabled());
        Self { config, csrf }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn csrf(&self) -> &CsrfGuard {
        &self.csrf
    }
}
