//! Auth-related CLI arguments: signing secret, TOTP encryption key, token
//! lifetimes, and registration policy.

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};

pub const ARG_TOKEN_SECRET: &str = "token-secret";
pub const ARG_TOTP_ENCRYPTION_KEY: &str = "totp-encryption-key";
pub const ARG_RECOVERY_PEPPER: &str = "recovery-pepper";
pub const ARG_ISSUER: &str = "issuer";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_ACCESS_TTL: &str = "access-ttl-seconds";
pub const ARG_REFRESH_TTL: &str = "refresh-ttl-seconds";
pub const ARG_VERIFICATION_TTL: &str = "verification-ttl-seconds";
pub const ARG_CHALLENGE_TTL: &str = "challenge-ttl-seconds";
pub const ARG_ENABLE_REGISTRATION: &str = "enable-registration";
pub const ARG_REGISTRATION_ALLOWLIST: &str = "registration-allowlist";
pub const ARG_DISABLE_CSRF: &str = "disable-csrf";
pub const ARG_AUDIT_RETENTION_DAYS: &str = "audit-retention-days";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TOKEN_SECRET)
                .long(ARG_TOKEN_SECRET)
                .help("Secret used to sign access/refresh tokens")
                .long_help(
                    "Secret used to sign access/refresh tokens. Required at startup; secrets shorter than 32 bytes log a warning.",
                )
                .env("SESAMO_TOKEN_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_TOTP_ENCRYPTION_KEY)
                .long(ARG_TOTP_ENCRYPTION_KEY)
                .help("Base64 key (32 bytes) for encrypting stored TOTP secrets")
                .env("SESAMO_TOTP_ENCRYPTION_KEY")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_RECOVERY_PEPPER)
                .long(ARG_RECOVERY_PEPPER)
                .help("Optional server-side pepper for recovery-code hashes")
                .env("SESAMO_RECOVERY_PEPPER")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_ISSUER)
                .long(ARG_ISSUER)
                .help("Issuer embedded in signed tokens and provisioning URIs")
                .env("SESAMO_ISSUER")
                .default_value("https://api.sesamo.dev"),
        )
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend origin for CORS and cookie security")
                .env("SESAMO_FRONTEND_BASE_URL")
                .default_value("https://sesamo.dev"),
        )
        .arg(
            Arg::new(ARG_ACCESS_TTL)
                .long(ARG_ACCESS_TTL)
                .help("Access token lifetime in seconds")
                .env("SESAMO_ACCESS_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TTL)
                .long(ARG_REFRESH_TTL)
                .help("Refresh token lifetime in seconds")
                .env("SESAMO_REFRESH_TTL_SECONDS")
                .default_value("1209600")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_VERIFICATION_TTL)
                .long(ARG_VERIFICATION_TTL)
                .help("Email verification / password reset token lifetime in seconds")
                .env("SESAMO_VERIFICATION_TTL_SECONDS")
                .default_value("1800")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_CHALLENGE_TTL)
                .long(ARG_CHALLENGE_TTL)
                .help("Two-factor challenge lifetime in seconds")
                .env("SESAMO_CHALLENGE_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_ENABLE_REGISTRATION)
                .long(ARG_ENABLE_REGISTRATION)
                .help("Allow open registration; the allowlist still applies when disabled")
                .env("SESAMO_ENABLE_REGISTRATION")
                .default_value("true")
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new(ARG_REGISTRATION_ALLOWLIST)
                .long(ARG_REGISTRATION_ALLOWLIST)
                .help("Comma-separated emails allowed to register when registration is disabled")
                .env("SESAMO_REGISTRATION_ALLOWLIST"),
        )
        .arg(
            Arg::new(ARG_DISABLE_CSRF)
                .long(ARG_DISABLE_CSRF)
                .help("Disable CSRF validation (bearer-token-only deployments)")
                .long_help(
                    "Disable CSRF validation. Only safe for deployments that serve no cookie-based session flows; bearer-token-only clients are inherently resistant to cross-site request forgery.",
                )
                .env("SESAMO_DISABLE_CSRF")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_AUDIT_RETENTION_DAYS)
                .long(ARG_AUDIT_RETENTION_DAYS)
                .help("Days to keep audit records before purge")
                .env("SESAMO_AUDIT_RETENTION_DAYS")
                .default_value("90")
                .value_parser(clap::value_parser!(i64)),
        )
}

pub struct Options {
    pub token_secret: String,
    pub totp_encryption_key: String,
    pub recovery_pepper: Option<String>,
    pub issuer: String,
    pub frontend_base_url: String,
    pub access_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
    pub verification_ttl_seconds: i64,
    pub challenge_ttl_seconds: i64,
    pub enable_registration: bool,
    pub registration_allowlist: Vec<String>,
    pub disable_csrf: bool,
    pub audit_retention_days: i64,
}

impl Options {
    /// Extract auth options from parsed matches.
    ///
    /// # Errors
    /// Returns an error if a required argument is missing.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let token_secret = matches
            .get_one::<String>(ARG_TOKEN_SECRET)
            .cloned()
            .context("missing required argument: --token-secret")?;
        let totp_encryption_key = matches
            .get_one::<String>(ARG_TOTP_ENCRYPTION_KEY)
            .cloned()
            .context("missing required argument: --totp-encryption-key")?;

        let registration_allowlist = matches
            .get_one::<String>(ARG_REGISTRATION_ALLOWLIST)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|entry| !entry.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            token_secret,
            totp_encryption_key,
            recovery_pepper: matches.get_one::<String>(ARG_RECOVERY_PEPPER).cloned(),
            issuer: matches
                .get_one::<String>(ARG_ISSUER)
                .cloned()
                .unwrap_or_default(),
            frontend_base_url: matches
                .get_one::<String>(ARG_FRONTEND_BASE_URL)
                .cloned()
                .unwrap_or_default(),
            access_ttl_seconds: matches.get_one::<i64>(ARG_ACCESS_TTL).copied().unwrap_or(900),
            refresh_ttl_seconds: matches
                .get_one::<i64>(ARG_REFRESH_TTL)
                .copied()
                .unwrap_or(1_209_600),
            verification_ttl_seconds: matches
                .get_one::<i64>(ARG_VERIFICATION_TTL)
                .copied()
                .unwrap_or(1800),
            challenge_ttl_seconds: matches
                .get_one::<i64>(ARG_CHALLENGE_TTL)
                .copied()
                .unwrap_or(300),
            enable_registration: matches
                .get_one::<bool>(ARG_ENABLE_REGISTRATION)
                .copied()
                .unwrap_or(true),
            registration_allowlist,
            disable_csrf: matches.get_flag(ARG_DISABLE_CSRF),
            audit_retention_days: matches
                .get_one::<i64>(ARG_AUDIT_RETENTION_DAYS)
                .copied()
                .unwrap_or(90),
        })
    }
}
