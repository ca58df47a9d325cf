//! Signed access/refresh token issuance and verification.
//!
//! Tokens are compact HS256 JWTs (`header.payload.signature`). Verification is
//! the single chokepoint for every call site: signature first, then expiry,
//! then the `type` claim against the caller's expectation. Secret rotation can
//! be added here later without touching callers.

use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Secrets shorter than 256 bits trigger a startup warning.
pub const MIN_SECRET_BYTES: usize = 32;

const DEFAULT_ACCESS_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_REFRESH_TTL_SECONDS: i64 = 14 * 24 * 60 * 60;

/// Token type discriminator embedded in the `type` claim.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated claim set returned by [`TokenService::verify`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub iss: String,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
}

/// Tagged verification failures. Callers map all of these to a uniform
/// unauthorized response; the tags exist for logging and tests.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("bad token signature")]
    BadSignature,
    #[error("malformed token")]
    Malformed,
    #[error("wrong token type: expected {expected}, got {actual}")]
    WrongType {
        expected: TokenKind,
        actual: TokenKind,
    },
}

/// Access/refresh pair minted at login and two-factor completion.
#[derive(Clone, Debug)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
    pub access_expires_in: i64,
}

#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
}

impl TokenService {
    /// Build the service from the process-wide signing secret.
    ///
    /// The secret is required configuration; a missing secret never reaches
    /// this constructor (clap rejects startup). A short secret is tolerated
    /// with a warning so existing deployments keep working.
    #[must_use]
    pub fn new(secret: &SecretString, issuer: String) -> Self {
        let secret_bytes = secret.expose_secret().as_bytes();
        if secret_bytes.len() < MIN_SECRET_BYTES {
            warn!(
                "token signing secret is {} bytes, below the recommended {MIN_SECRET_BYTES}",
                secret_bytes.len()
            );
        }
        Self {
            encoding_key: EncodingKey::from_secret(secret_bytes),
            decoding_key: DecodingKey::from_secret(secret_bytes),
            issuer,
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
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
    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    /// Issue a signed token for `subject` with the given type and lifetime.
    ///
    /// # Errors
    /// Returns an error if JWT encoding fails.
    pub fn issue(&self, subject: Uuid, kind: TokenKind, ttl_seconds: i64) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: subject,
            iss: self.issuer.clone(),
            kind,
            iat: now,
            exp: now + ttl_seconds,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to encode token")
    }

    /// Issue the access/refresh pair with the configured lifetimes.
    ///
    /// # Errors
    /// Returns an error if JWT encoding fails.
    pub fn issue_pair(&self, subject: Uuid) -> Result<TokenPair> {
        let access = self.issue(subject, TokenKind::Access, self.access_ttl_seconds)?;
        let refresh = self.issue(subject, TokenKind::Refresh, self.refresh_ttl_seconds)?;
        Ok(TokenPair {
            access,
            refresh,
            access_expires_in: self.access_ttl_seconds,
        })
    }

    /// Verify signature, expiry, and token type, in that order.
    ///
    /// # Errors
    /// Returns the tagged [`TokenError`] describing the first check that failed.
    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Exact expiry; the default 60s leeway would stretch short-lived tokens.
        validation.leeway = 0;
        validation.set_issuer(&[&self.issuer]);

        let data =
            decode::<Claims>(token, &self.decoding_key, &validation).map_err(map_jwt_error)?;

        let claims = data.claims;
        if claims.kind != expected {
            return Err(TokenError::WrongType {
                expected,
                actual: claims.kind,
            });
        }
        Ok(claims)
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> TokenError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::InvalidSignature => TokenError::BadSignature,
        _ => TokenError::Malformed,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::{TokenError, TokenKind, TokenService};
    use secrecy::SecretString;
    use uuid::Uuid;

    fn service() -> TokenService {
        TokenService::new(
            &SecretString::from("a-test-signing-secret-of-32-bytes!!"),
            "https://sesamo.test".to_string(),
        )
    }

    #[test]
    fn issue_then_verify_round_trips() {
        let service = service();
        let subject = Uuid::new_v4();
        let token = service.issue(subject, TokenKind::Access, 60).unwrap();
        let claims = service.verify(&token, TokenKind::Access).unwrap();
        assert_eq!(claims.sub, subject);
        assert_eq!(claims.kind, TokenKind::Access);
        assert_eq!(claims.iss, "https://sesamo.test");
        assert_eq!(claims.exp - claims.iat, 60);
    }

    #[test]
    fn expired_token_is_tagged_expired() {
        let service = service();
        let token = service
            .issue(Uuid::new_v4(), TokenKind::Access, -30)
            .unwrap();
        assert_eq!(
            service.verify(&token, TokenKind::Access),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn access_token_never_satisfies_refresh_check() {
        let service = service();
        let access = service.issue(Uuid::new_v4(), TokenKind::Access, 60).unwrap();
        assert_eq!(
            service.verify(&access, TokenKind::Refresh),
            Err(TokenError::WrongType {
                expected: TokenKind::Refresh,
                actual: TokenKind::Access,
            })
        );

        let refresh = service
            .issue(Uuid::new_v4(), TokenKind::Refresh, 60)
            .unwrap();
        assert_eq!(
            service.verify(&refresh, TokenKind::Access),
            Err(TokenError::WrongType {
                expected: TokenKind::Access,
                actual: TokenKind::Refresh,
            })
        );
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let service = service();
        let token = service.issue(Uuid::new_v4(), TokenKind::Access, 60).unwrap();
        let mut tampered = token.clone();
        // Flip high bits of the last signature character so the segment still
        // base64url-decodes but no longer matches.
        let last = tampered.pop().unwrap();
        tampered.push(if last == 'Q' { 'A' } else { 'Q' });
        assert_eq!(
            service.verify(&tampered, TokenKind::Access),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn garbage_is_malformed() {
        let service = service();
        assert_eq!(
            service.verify("not-a-token", TokenKind::Access),
            Err(TokenError::Malformed)
        );
        assert_eq!(
            service.verify("", TokenKind::Refresh),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn other_secret_is_bad_signature() {
        let issued = service()
            .issue(Uuid::new_v4(), TokenKind::Access, 60)
            .unwrap();
        let other = TokenService::new(
            &SecretString::from("another-signing-secret-of-32-byte!!"),
            "https://sesamo.test".to_string(),
        );
        assert_eq!(
            other.verify(&issued, TokenKind::Access),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn issue_pair_uses_configured_ttls() {
        let service = service()
            .with_access_ttl_seconds(120)
            .with_refresh_ttl_seconds(3600);
        let pair = service.issue_pair(Uuid::new_v4()).unwrap();
        assert_eq!(pair.access_expires_in, 120);
        let access = service.verify(&pair.access, TokenKind::Access).unwrap();
        assert_eq!(access.exp - access.iat, 120);
        let refresh = service.verify(&pair.refresh, TokenKind::Refresh).unwrap();
        assert_eq!(refresh.exp - refresh.iat, 3600);
    }
}
