//! In-memory store: the injectable test double for [`AuthStore`].
//!
//! Every method takes the single mutex once, so the compound updates
//! (consume-and-mark, enable-and-replace) are atomic exactly like their
//! transactional Postgres counterparts.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use super::{
    AccountRecord, AuditEntry, AuthStore, CreateOutcome, RecoveryCodeRow, TokenPurpose,
};

struct VerificationRow {
    account_id: Uuid,
    token_hash: Vec<u8>,
    purpose: TokenPurpose,
    expires_at: DateTime<Utc>,
    consumed: bool,
}

struct RecoveryRow {
    id: Uuid,
    account_id: Uuid,
    code_hash: String,
    used: bool,
}

struct ChallengeRow {
    account_id: Uuid,
    challenge_hash: Vec<u8>,
    expires_at: DateTime<Utc>,
    consumed: bool,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<Uuid, AccountRecord>,
    verification_tokens: Vec<VerificationRow>,
    recovery_codes: Vec<RecoveryRow>,
    challenges: Vec<ChallengeRow>,
    audit_records: Vec<AuditEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted audit records. Test observability helper.
    ///
    /// # Errors
    /// Returns an error if the store mutex is poisoned.
    pub fn audit_record_count(&self) -> Result<usize> {
        Ok(self.lock()?.audit_records.len())
    }

    /// Snapshot of persisted audit records. Test observability helper.
    ///
    /// # Errors
    /// Returns an error if the store mutex is poisoned.
    pub fn audit_records(&self) -> Result<Vec<AuditEntry>> {
        Ok(self.lock()?.audit_records.clone())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store mutex poisoned"))
    }
}

#[async_trait]
impl AuthStore for MemoryStore {
    async fn create_account(&self, email: &str, password_hash: &str) -> Result<CreateOutcome> {
        let mut inner = self.lock()?;
        if inner.accounts.values().any(|account| account.email == email) {
            return Ok(CreateOutcome::Conflict);
        }
        let id = Uuid::new_v4();
        inner.accounts.insert(
            id,
            AccountRecord {
                id,
                email: email.to_string(),
                password_hash: password_hash.to_string(),
                email_verified: false,
                two_factor_enabled: false,
                totp_secret_enc: None,
                created_at: Utc::now(),
            },
        );
        Ok(CreateOutcome::Created(id))
    }

    async fn account_by_email(&self, email: &str) -> Result<Option<AccountRecord>> {
        let inner = self.lock()?;
        Ok(inner
            .accounts
            .values()
            .find(|account| account.email == email)
            .cloned())
    }

    async fn account_by_id(&self, id: Uuid) -> Result<Option<AccountRecord>> {
        let inner = self.lock()?;
        Ok(inner.accounts.get(&id).cloned())
    }

    async fn set_password_hash(&self, account_id: Uuid, password_hash: &str) -> Result<()> {
        let mut inner = self.lock()?;
        let account = inner
            .accounts
            .get_mut(&account_id)
            .ok_or_else(|| anyhow::anyhow!("account not found"))?;
        account.password_hash = password_hash.to_string();
        Ok(())
    }

    async fn insert_verification_token(
        &self,
        account_id: Uuid,
        token_hash: &[u8],
        purpose: TokenPurpose,
        ttl_seconds: i64,
    ) -> Result<()> {
        let mut inner = self.lock()?;
        inner.verification_tokens.push(VerificationRow {
            account_id,
            token_hash: token_hash.to_vec(),
            purpose,
            expires_at: Utc::now() + Duration::seconds(ttl_seconds),
            consumed: false,
        });
        Ok(())
    }

    async fn consume_verification_token(
        &self,
        token_hash: &[u8],
        purpose: TokenPurpose,
    ) -> Result<Option<Uuid>> {
        let mut inner = self.lock()?;
        let now = Utc::now();
        let Some(row) = inner.verification_tokens.iter_mut().find(|row| {
            row.token_hash == token_hash
                && row.purpose == purpose
                && !row.consumed
                && row.expires_at > now
        }) else {
            return Ok(None);
        };
        row.consumed = true;
        let account_id = row.account_id;
        if purpose == TokenPurpose::EmailVerify
            && let Some(account) = inner.accounts.get_mut(&account_id)
        {
            account.email_verified = true;
        }
        Ok(Some(account_id))
    }

    async fn sweep_expired_verification_tokens(&self) -> Result<u64> {
        let mut inner = self.lock()?;
        let now = Utc::now();
        let before = inner.verification_tokens.len();
        inner
            .verification_tokens
            .retain(|row| row.expires_at > now && !row.consumed);
        Ok((before - inner.verification_tokens.len()) as u64)
    }

    async fn set_pending_totp_secret(&self, account_id: Uuid, secret_enc: &[u8]) -> Result<()> {
        let mut inner = self.lock()?;
        let account = inner
            .accounts
            .get_mut(&account_id)
            .ok_or_else(|| anyhow::anyhow!("account not found"))?;
        account.totp_secret_enc = Some(secret_enc.to_vec());
        Ok(())
    }

    async fn enable_two_factor(&self, account_id: Uuid, code_hashes: &[String]) -> Result<()> {
        let mut inner = self.lock()?;
        inner
            .recovery_codes
            .retain(|row| row.account_id != account_id);
        for hash in code_hashes {
            inner.recovery_codes.push(RecoveryRow {
                id: Uuid::new_v4(),
                account_id,
                code_hash: hash.clone(),
                used: false,
            });
        }
        let account = inner
            .accounts
            .get_mut(&account_id)
            .ok_or_else(|| anyhow::anyhow!("account not found"))?;
        account.two_factor_enabled = true;
        Ok(())
    }

    async fn disable_two_factor(&self, account_id: Uuid) -> Result<()> {
        let mut inner = self.lock()?;
        inner
            .recovery_codes
            .retain(|row| row.account_id != account_id);
        let account = inner
            .accounts
            .get_mut(&account_id)
            .ok_or_else(|| anyhow::anyhow!("account not found"))?;
        account.two_factor_enabled = false;
        account.totp_secret_enc = None;
        Ok(())
    }

    async fn replace_recovery_codes(
        &self,
        account_id: Uuid,
        code_hashes: &[String],
    ) -> Result<()> {
        let mut inner = self.lock()?;
        inner
            .recovery_codes
            .retain(|row| row.account_id != account_id);
        for hash in code_hashes {
            inner.recovery_codes.push(RecoveryRow {
                id: Uuid::new_v4(),
                account_id,
                code_hash: hash.clone(),
                used: false,
            });
        }
        Ok(())
    }

    async fn unused_recovery_codes(&self, account_id: Uuid) -> Result<Vec<RecoveryCodeRow>> {
        let inner = self.lock()?;
        Ok(inner
            .recovery_codes
            .iter()
            .filter(|row| row.account_id == account_id && !row.used)
            .map(|row| RecoveryCodeRow {
                id: row.id,
                code_hash: row.code_hash.clone(),
            })
            .collect())
    }

    async fn consume_recovery_code(&self, code_id: Uuid) -> Result<bool> {
        let mut inner = self.lock()?;
        let Some(row) = inner
            .recovery_codes
            .iter_mut()
            .find(|row| row.id == code_id && !row.used)
        else {
            return Ok(false);
        };
        row.used = true;
        Ok(true)
    }

    async fn insert_two_factor_challenge(
        &self,
        account_id: Uuid,
        challenge_hash: &[u8],
        ttl_seconds: i64,
    ) -> Result<()> {
        let mut inner = self.lock()?;
        inner.challenges.push(ChallengeRow {
            account_id,
            challenge_hash: challenge_hash.to_vec(),
            expires_at: Utc::now() + Duration::seconds(ttl_seconds),
            consumed: false,
        });
        Ok(())
    }

    async fn two_factor_challenge_account(&self, challenge_hash: &[u8]) -> Result<Option<Uuid>> {
        let inner = self.lock()?;
        let now = Utc::now();
        Ok(inner
            .challenges
            .iter()
            .find(|row| {
                row.challenge_hash == challenge_hash && !row.consumed && row.expires_at > now
            })
            .map(|row| row.account_id))
    }

    async fn consume_two_factor_challenge(&self, challenge_hash: &[u8]) -> Result<Option<Uuid>> {
        let mut inner = self.lock()?;
        let now = Utc::now();
        let Some(row) = inner.challenges.iter_mut().find(|row| {
            row.challenge_hash == challenge_hash && !row.consumed && row.expires_at > now
        }) else {
            return Ok(None);
        };
        row.consumed = true;
        Ok(Some(row.account_id))
    }

    async fn insert_audit(&self, entry: &AuditEntry) -> Result<()> {
        let mut inner = self.lock()?;
        inner.audit_records.push(entry.clone());
        Ok(())
    }

    async fn purge_audit_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.lock()?;
        let before = inner.audit_records.len();
        inner.audit_records.retain(|row| row.created_at >= cutoff);
        Ok((before - inner.audit_records.len()) as u64)
    }
}
