use crate::api;
use anyhow::{Context, Result, anyhow};
use base64::Engine;
use secrecy::SecretString;
use std::sync::Arc;

pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub token_secret: SecretString,
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

/// Execute the server action.
///
/// # Errors
/// Returns an error if the TOTP key is malformed or the server fails to
/// start.
pub async fn execute(args: Args) -> Result<()> {
    let totp_encryption_key = decode_totp_key(&args.totp_encryption_key)?;
    let recovery_pepper: Option<Arc<[u8]>> = args
        .recovery_pepper
        .map(|pepper| Arc::from(pepper.into_bytes().into_boxed_slice()));

    let auth_config = api::handlers::auth::AuthConfig::new(args.issuer, args.frontend_base_url)
        .with_access_ttl_seconds(args.access_ttl_seconds)
        .with_refresh_ttl_seconds(args.refresh_ttl_seconds)
        .with_verification_ttl_seconds(args.verification_ttl_seconds)
        .with_challenge_ttl_seconds(args.challenge_ttl_seconds)
        .with_csrf_enabled(!args.disable_csrf)
        .with_registration_enabled(args.enable_registration)
        .with_registration_allowlist(args.registration_allowlist)
        .with_audit_retention_days(args.audit_retention_days);

    api::new(
        args.port,
        args.dsn,
        &args.token_secret,
        totp_encryption_key,
        recovery_pepper,
        auth_config,
    )
    .await
}

fn decode_totp_key(encoded: &str) -> Result<[u8; 32]> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .context("TOTP encryption key is not valid base64")?;
    let key: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow!("TOTP encryption key must decode to exactly 32 bytes"))?;
    Ok(key)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::decode_totp_key;
    use base64::Engine;

    #[test]
    fn decodes_a_32_byte_key() {
        let encoded = base64::engine::general_purpose::STANDARD.encode([7u8; 32]);
        assert_eq!(decode_totp_key(&encoded).unwrap(), [7u8; 32]);
    }

    #[test]
    fn rejects_wrong_length() {
        let encoded = base64::engine::general_purpose::STANDARD.encode([7u8; 16]);
        assert!(decode_totp_key(&encoded).is_err());
    }

    #[test]
    fn rejects_invalid_base64() {
        assert!(decode_totp_key("not base64!").is_err());
    }
}
