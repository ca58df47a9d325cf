//! # Sesamo (Authentication & Session Security)
//!
//! `sesamo` is the authentication and session-security authority for the
//! social-networking backend. It owns credential extraction, signed-token
//! issuance and verification, two-factor (TOTP) enrollment and verification,
//! CSRF token issuance, brute-force rate limiting, and security audit
//! logging. Downstream CRUD services receive a resolved principal and never
//! re-implement any of this.
//!
//! ## Tokens
//!
//! Access and refresh tokens are compact HS256 JWTs with a `type` claim; an
//! access token never satisfies a refresh check and vice versa. Refresh
//! tokens are cookie-scoped; the `Authorization` header never carries one.
//!
//! ## Two-Factor
//!
//! TOTP secrets are stored only under authenticated encryption, bound to the
//! owning account. Recovery codes are single-use, Argon2id-hashed, and
//! replaced as a whole batch on regeneration.
//!
//! ## Failure discipline
//!
//! Authentication failures are uniform `401`s: callers cannot distinguish an
//! unknown account from a wrong password or a bad token. Policy rejections
//! return a generic `403` that never confirms allowlist membership. Audit
//! writes are fire-and-forget and can never fail a request.

pub mod api;
pub mod audit;
pub mod cli;
pub mod rate_limit;
pub mod store;
pub mod token;
pub mod totp;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
