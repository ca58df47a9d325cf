//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the appropriate
//! action, such as starting the API server with its full configuration state.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::auth;
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(Box::new(Args {
        port,
        dsn,
        token_secret: SecretString::from(auth_opts.token_secret),
        totp_encryption_key: auth_opts.totp_encryption_key,
        recovery_pepper: auth_opts.recovery_pepper,
        issuer: auth_opts.issuer,
        frontend_base_url: auth_opts.frontend_base_url,
        access_ttl_seconds: auth_opts.access_ttl_seconds,
        refresh_ttl_seconds: auth_opts.refresh_ttl_seconds,
        verification_ttl_seconds: auth_opts.verification_ttl_seconds,
        challenge_ttl_seconds: auth_opts.challenge_ttl_seconds,
        enable_registration: auth_opts.enable_registration,
        registration_allowlist: auth_opts.registration_allowlist,
        disable_csrf: auth_opts.disable_csrf,
        audit_retention_days: auth_opts.audit_retention_days,
    })))
}
