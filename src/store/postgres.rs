//! Postgres-backed [`AuthStore`].
//!
//! Every statement runs inside a `db.query` span. Compound updates (token
//! consumption + account activation, two-factor enablement + recovery batch)
//! are single transactions so concurrent callers cannot observe half-applied
//! state.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::Instrument;
use uuid::Uuid;

use super::{
    AccountRecord, AuditEntry, AuthStore, CreateOutcome, RecoveryCodeRow, TokenPurpose,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn query_span(operation: &'static str, statement: &str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn map_account(row: &PgRow) -> AccountRecord {
    AccountRecord {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        email_verified: row.get("email_verified"),
        two_factor_enabled: row.get("two_factor_enabled"),
        totp_secret_enc: row.get("totp_secret_enc"),
        created_at: row.get("created_at"),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

const ACCOUNT_COLUMNS: &str = r"
    id, email, password_hash, email_verified, two_factor_enabled,
    totp_secret_enc, created_at
";

#[async_trait]
impl AuthStore for PgStore {
    async fn create_account(&self, email: &str, password_hash: &str) -> Result<CreateOutcome> {
        let query = r"
            INSERT INTO accounts (email, password_hash)
            VALUES ($1, $2)
            RETURNING id
        ";
        let row = sqlx::query(query)
            .bind(email)
            .bind(password_hash)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", query))
            .await;

        match row {
            Ok(row) => Ok(CreateOutcome::Created(row.get("id"))),
            Err(err) if is_unique_violation(&err) => Ok(CreateOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert account"),
        }
    }

    async fn account_by_email(&self, email: &str) -> Result<Option<AccountRecord>> {
        let query = &format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = $1 AND deleted_at IS NULL"
        );
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup account by email")?;
        Ok(row.as_ref().map(map_account))
    }

    async fn account_by_id(&self, id: Uuid) -> Result<Option<AccountRecord>> {
        let query = &format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 AND deleted_at IS NULL"
        );
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup account by id")?;
        Ok(row.as_ref().map(map_account))
    }

    async fn set_password_hash(&self, account_id: Uuid, password_hash: &str) -> Result<()> {
        let query = r"
            UPDATE accounts
            SET password_hash = $2, updated_at = NOW()
            WHERE id = $1
        ";
        sqlx::query(query)
            .bind(account_id)
            .bind(password_hash)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update password hash")?;
        Ok(())
    }

    async fn insert_verification_token(
        &self,
        account_id: Uuid,
        token_hash: &[u8],
        purpose: TokenPurpose,
        ttl_seconds: i64,
    ) -> Result<()> {
        let query = r"
            INSERT INTO verification_tokens (account_id, token_hash, purpose, expires_at)
            VALUES ($1, $2, $3, NOW() + ($4 * INTERVAL '1 second'))
        ";
        sqlx::query(query)
            .bind(account_id)
            .bind(token_hash)
            .bind(purpose.as_str())
            .bind(ttl_seconds)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to insert verification token")?;
        Ok(())
    }

    async fn consume_verification_token(
        &self,
        token_hash: &[u8],
        purpose: TokenPurpose,
    ) -> Result<Option<Uuid>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin token consume transaction")?;

        let query = r"
            UPDATE verification_tokens
            SET consumed_at = NOW()
            WHERE token_hash = $1
              AND purpose = $2
              AND consumed_at IS NULL
              AND expires_at > NOW()
            RETURNING account_id
        ";
        let row = sqlx::query(query)
            .bind(token_hash)
            .bind(purpose.as_str())
            .fetch_optional(&mut *tx)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to consume verification token")?;

        let Some(row) = row else {
            tx.rollback().await.ok();
            return Ok(None);
        };
        let account_id: Uuid = row.get("account_id");

        if purpose == TokenPurpose::EmailVerify {
            let query = r"
                UPDATE accounts
                SET email_verified = TRUE, updated_at = NOW()
                WHERE id = $1
            ";
            sqlx::query(query)
                .bind(account_id)
                .execute(&mut *tx)
                .instrument(query_span("UPDATE", query))
                .await
                .context("failed to mark email verified")?;
        }

        tx.commit().await.context("commit token consume")?;
        Ok(Some(account_id))
    }

    async fn sweep_expired_verification_tokens(&self) -> Result<u64> {
        let query = r"
            DELETE FROM verification_tokens
            WHERE expires_at <= NOW() OR consumed_at IS NOT NULL
        ";
        let result = sqlx::query(query)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to sweep verification tokens")?;
        Ok(result.rows_affected())
    }

    async fn set_pending_totp_secret(&self, account_id: Uuid, secret_enc: &[u8]) -> Result<()> {
        let query = r"
            UPDATE accounts
            SET totp_secret_enc = $2, updated_at = NOW()
            WHERE id = $1
        ";
        sqlx::query(query)
            .bind(account_id)
            .bind(secret_enc)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to stage TOTP secret")?;
        Ok(())
    }

    async fn enable_two_factor(&self, account_id: Uuid, code_hashes: &[String]) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin two-factor enable transaction")?;

        let query = r"
            UPDATE accounts
            SET two_factor_enabled = TRUE, updated_at = NOW()
            WHERE id = $1
        ";
        sqlx::query(query)
            .bind(account_id)
            .execute(&mut *tx)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to enable two-factor")?;

        replace_codes_in_tx(&mut tx, account_id, code_hashes).await?;

        tx.commit().await.context("commit two-factor enable")?;
        Ok(())
    }

    async fn disable_two_factor(&self, account_id: Uuid) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin two-factor disable transaction")?;

        let query = r"
            UPDATE accounts
            SET two_factor_enabled = FALSE, totp_secret_enc = NULL, updated_at = NOW()
            WHERE id = $1
        ";
        sqlx::query(query)
            .bind(account_id)
            .execute(&mut *tx)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to disable two-factor")?;

        let query = "DELETE FROM recovery_codes WHERE account_id = $1";
        sqlx::query(query)
            .bind(account_id)
            .execute(&mut *tx)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to drop recovery codes")?;

        tx.commit().await.context("commit two-factor disable")?;
        Ok(())
    }

    async fn replace_recovery_codes(
        &self,
        account_id: Uuid,
        code_hashes: &[String],
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin recovery replace transaction")?;
        replace_codes_in_tx(&mut tx, account_id, code_hashes).await?;
        tx.commit().await.context("commit recovery replace")?;
        Ok(())
    }

    async fn unused_recovery_codes(&self, account_id: Uuid) -> Result<Vec<RecoveryCodeRow>> {
        let query = r"
            SELECT id, code_hash
            FROM recovery_codes
            WHERE account_id = $1 AND used_at IS NULL
        ";
        let rows = sqlx::query(query)
            .bind(account_id)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to list recovery codes")?;
        Ok(rows
            .iter()
            .map(|row| RecoveryCodeRow {
                id: row.get("id"),
                code_hash: row.get("code_hash"),
            })
            .collect())
    }

    async fn consume_recovery_code(&self, code_id: Uuid) -> Result<bool> {
        // Single conditional update; two concurrent submissions of the same
        // code race on the row and only one sees it returned.
        let query = r"
            UPDATE recovery_codes
            SET used_at = NOW()
            WHERE id = $1 AND used_at IS NULL
            RETURNING id
        ";
        let row = sqlx::query(query)
            .bind(code_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to consume recovery code")?;
        Ok(row.is_some())
    }

    async fn insert_two_factor_challenge(
        &self,
        account_id: Uuid,
        challenge_hash: &[u8],
        ttl_seconds: i64,
    ) -> Result<()> {
        let query = r"
            INSERT INTO two_factor_challenges (account_id, challenge_hash, expires_at)
            VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
        ";
        sqlx::query(query)
            .bind(account_id)
            .bind(challenge_hash)
            .bind(ttl_seconds)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to insert two-factor challenge")?;
        Ok(())
    }

    async fn two_factor_challenge_account(&self, challenge_hash: &[u8]) -> Result<Option<Uuid>> {
        let query = r"
            SELECT account_id
            FROM two_factor_challenges
            WHERE challenge_hash = $1
              AND consumed_at IS NULL
              AND expires_at > NOW()
        ";
        let row = sqlx::query(query)
            .bind(challenge_hash)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup two-factor challenge")?;
        Ok(row.map(|row| row.get("account_id")))
    }

    async fn consume_two_factor_challenge(&self, challenge_hash: &[u8]) -> Result<Option<Uuid>> {
        let query = r"
            UPDATE two_factor_challenges
            SET consumed_at = NOW()
            WHERE challenge_hash = $1
              AND consumed_at IS NULL
              AND expires_at > NOW()
            RETURNING account_id
        ";
        let row = sqlx::query(query)
            .bind(challenge_hash)
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to consume two-factor challenge")?;
        Ok(row.map(|row| row.get("account_id")))
    }

    async fn insert_audit(&self, entry: &AuditEntry) -> Result<()> {
        let query = r"
            INSERT INTO audit_records
                (account_id, action, resource, resource_id, changes,
                 source_address, user_agent, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ";
        sqlx::query(query)
            .bind(entry.account_id)
            .bind(&entry.action)
            .bind(&entry.resource)
            .bind(&entry.resource_id)
            .bind(&entry.changes)
            .bind(&entry.source_address)
            .bind(&entry.user_agent)
            .bind(entry.created_at)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to insert audit record")?;
        Ok(())
    }

    async fn purge_audit_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let query = "DELETE FROM audit_records WHERE created_at < $1";
        let result = sqlx::query(query)
            .bind(cutoff)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to purge audit records")?;
        Ok(result.rows_affected())
    }
}

async fn replace_codes_in_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    account_id: Uuid,
    code_hashes: &[String],
) -> Result<()> {
    let query = "DELETE FROM recovery_codes WHERE account_id = $1";
    sqlx::query(query)
        .bind(account_id)
        .execute(&mut **tx)
        .instrument(query_span("DELETE", query))
        .await
        .context("failed to clear recovery batch")?;

    let query = r"
        INSERT INTO recovery_codes (account_id, code_hash)
        VALUES ($1, $2)
    ";
    for hash in code_hashes {
        sqlx::query(query)
            .bind(account_id)
            .bind(hash)
            .execute(&mut **tx)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to insert recovery code")?;
    }
    Ok(())
}
