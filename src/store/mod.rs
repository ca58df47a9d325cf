//! Persistence interface for accounts, verification tokens, recovery codes,
//! and audit records.
//!
//! The orchestrator only ever sees the [`AuthStore`] trait, so the Postgres
//! store and the in-memory test double are interchangeable. All raw tokens
//! (verification, two-factor challenges) are stored as SHA-256 hashes.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Identity record. `totp_secret_enc` holds the AEAD-encrypted TOTP secret
/// (nonce‖ciphertext) once two-factor enrollment has started.
#[derive(Clone, Debug)]
pub struct AccountRecord {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub email_verified: bool,
    pub two_factor_enabled: bool,
    pub totp_secret_enc: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
}

/// Outcome when attempting to create a new account.
#[derive(Debug)]
pub enum CreateOutcome {
    Created(Uuid),
    Conflict,
}

/// What a single-use verification token is good for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TokenPurpose {
    EmailVerify,
    PasswordReset,
}

impl TokenPurpose {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmailVerify => "email-verify",
            Self::PasswordReset => "password-reset",
        }
    }
}

/// An unused recovery-code hash, identified for atomic consumption.
#[derive(Clone, Debug)]
pub struct RecoveryCodeRow {
    pub id: Uuid,
    pub code_hash: String,
}

/// Append-only audit record, already redacted by the caller.
#[derive(Clone, Debug)]
pub struct AuditEntry {
    pub account_id: Option<Uuid>,
    pub action: String,
    pub resource: String,
    pub resource_id: Option<String>,
    pub changes: serde_json::Value,
    pub source_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait AuthStore: Send + Sync {
    async fn create_account(&self, email: &str, password_hash: &str) -> Result<CreateOutcome>;

    async fn account_by_email(&self, email: &str) -> Result<Option<AccountRecord>>;

    async fn account_by_id(&self, id: Uuid) -> Result<Option<AccountRecord>>;

    async fn set_password_hash(&self, account_id: Uuid, password_hash: &str) -> Result<()>;

    async fn insert_verification_token(
        &self,
        account_id: Uuid,
        token_hash: &[u8],
        purpose: TokenPurpose,
        ttl_seconds: i64,
    ) -> Result<()>;

    /// Atomically consume an unexpired, unconsumed token and return its owner.
    /// For [`TokenPurpose::EmailVerify`] the owning account is marked verified
    /// in the same transaction.
    async fn consume_verification_token(
        &self,
        token_hash: &[u8],
        purpose: TokenPurpose,
    ) -> Result<Option<Uuid>>;

    /// Memory hygiene only; consumption already checks expiry.
    async fn sweep_expired_verification_tokens(&self) -> Result<u64>;

    /// Stage the encrypted secret during enrollment, before the first code
    /// confirms it.
    async fn set_pending_totp_secret(&self, account_id: Uuid, secret_enc: &[u8]) -> Result<()>;

    /// Flip the two-factor flag and install the initial recovery-code batch
    /// as one atomic unit.
    async fn enable_two_factor(&self, account_id: Uuid, code_hashes: &[String]) -> Result<()>;

    /// Clears the flag, the stored secret, and outstanding recovery codes.
    async fn disable_two_factor(&self, account_id: Uuid) -> Result<()>;

    /// Replace the entire recovery batch; no window where old and new codes
    /// are both valid.
    async fn replace_recovery_codes(&self, account_id: Uuid, code_hashes: &[String]) -> Result<()>;

    async fn unused_recovery_codes(&self, account_id: Uuid) -> Result<Vec<RecoveryCodeRow>>;

    /// Mark a code used if and only if it is still unused; returns whether
    /// this caller won the update. Used codes are kept for audit history.
    async fn consume_recovery_code(&self, code_id: Uuid) -> Result<bool>;

    async fn insert_two_factor_challenge(
        &self,
        account_id: Uuid,
        challenge_hash: &[u8],
        ttl_seconds: i64,
    ) -> Result<()>;

    /// Non-consuming lookup of an unexpired, unconsumed challenge. A failed
    /// second-factor attempt leaves the challenge usable for a retry.
    async fn two_factor_challenge_account(&self, challenge_hash: &[u8]) -> Result<Option<Uuid>>;

    /// Atomically consume an unexpired challenge and return its owner.
    async fn consume_two_factor_challenge(&self, challenge_hash: &[u8]) -> Result<Option<Uuid>>;

    async fn insert_audit(&self, entry: &AuditEntry) -> Result<()>;

    /// Retention purge; returns the number of records removed.
    async fn purge_audit_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::{CreateOutcome, TokenPurpose};

    #[test]
    fn create_outcome_debug_names() {
        assert!(format!("{:?}", CreateOutcome::Conflict).contains("Conflict"));
    }

    #[test]
    fn token_purpose_keys() {
        assert_eq!(TokenPurpose::EmailVerify.as_str(), "email-verify");
        assert_eq!(TokenPurpose::PasswordReset.as_str(), "password-reset");
    }
}
