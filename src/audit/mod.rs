//! Best-effort security audit logging.
//!
//! Records are redacted, then dispatched on a spawned task so a slow or
//! failing store can never delay or fail the triggering request. A periodic
//! worker purges records past the retention window and sweeps expired
//! verification tokens.

use chrono::{Duration, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{debug, error};
use uuid::Uuid;

use crate::store::{AuditEntry, AuthStore};

/// Placeholder written over every denylisted value.
pub const REDACTED: &str = "[REDACTED]";

/// Field-name stems whose values are never persisted. Matching is
/// case-insensitive and ignores `_`/`-`, so `refreshToken`, `api_key`, and
/// `X-Api-Key` are all caught.
const DENYLIST: &[&str] = &[
    "password",
    "token",
    "secret",
    "apikey",
    "authorization",
    "cookie",
    "credential",
];

/// Default audit retention, in days.
pub const DEFAULT_RETENTION_DAYS: i64 = 90;

#[derive(Clone)]
pub struct AuditLogger {
    store: Arc<dyn AuthStore>,
}

impl AuditLogger {
    #[must_use]
    pub fn new(store: Arc<dyn AuthStore>) -> Self {
        Self { store }
    }

    /// Record a security event. Fire-and-forget: the insert runs on its own
    /// task and a persistence failure is logged locally, never surfaced.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        account_id: Option<Uuid>,
        action: &str,
        resource: &str,
        resource_id: Option<String>,
        changes: Value,
        source_address: Option<String>,
        user_agent: Option<String>,
    ) {
        let entry = AuditEntry {
            account_id,
            action: action.to_string(),
            resource: resource.to_string(),
            resource_id,
            changes: redact(changes),
            source_address,
            user_agent,
            created_at: Utc::now(),
        };
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(err) = store.insert_audit(&entry).await {
                error!("failed to persist audit record for {}: {err}", entry.action);
            }
        });
    }
}

/// Replace values for denylisted field names, recursively through nested
/// objects and arrays.
#[must_use]
pub fn redact(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    if is_denylisted(&key) {
                        (key, Value::String(REDACTED.to_string()))
                    } else {
                        (key, redact(value))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(redact).collect()),
        other => other,
    }
}

fn is_denylisted(field: &str) -> bool {
    let normalized: String = field
        .chars()
        .filter(|ch| *ch != '_' && *ch != '-')
        .map(|ch| ch.to_ascii_lowercase())
        .collect();
    DENYLIST.iter().any(|stem| normalized.contains(stem))
}

/// Spawn the retention worker: purges audit records older than
/// `retention_days` and sweeps expired verification tokens on `interval`.
/// Failures are logged and the worker keeps running.
pub fn spawn_retention_worker(
    store: Arc<dyn AuthStore>,
    retention_days: i64,
    interval: StdDuration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let cutoff = Utc::now() - Duration::days(retention_days);
            match store.purge_audit_before(cutoff).await {
                Ok(purged) if purged > 0 => debug!("purged {purged} audit records"),
                Ok(_) => {}
                Err(err) => error!("audit purge failed: {err}"),
            }
            match store.sweep_expired_verification_tokens().await {
                Ok(swept) if swept > 0 => debug!("swept {swept} verification tokens"),
                Ok(_) => {}
                Err(err) => error!("verification token sweep failed: {err}"),
            }
        }
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::{AuditLogger, REDACTED, redact};
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;
    use uuid::Uuid;

    #[test]
    fn redacts_denylisted_fields() {
        let redacted = redact(json!({
            "email": "alice@example.com",
            "password": "hunter2",
            "apiKey": "abc",
            "x-api-key": "abc",
            "refresh_token": "abc",
        }));
        assert_eq!(redacted["email"], "alice@example.com");
        assert_eq!(redacted["password"], REDACTED);
        assert_eq!(redacted["apiKey"], REDACTED);
        assert_eq!(redacted["x-api-key"], REDACTED);
        assert_eq!(redacted["refresh_token"], REDACTED);
    }

    #[test]
    fn redacts_nested_structures() {
        let redacted = redact(json!({
            "profile": { "display_name": "alice", "totp_secret": "JBSWY3DP" },
            "attempts": [ { "password": "a" }, { "note": "kept" } ],
        }));
        assert_eq!(redacted["profile"]["display_name"], "alice");
        assert_eq!(redacted["profile"]["totp_secret"], REDACTED);
        assert_eq!(redacted["attempts"][0]["password"], REDACTED);
        assert_eq!(redacted["attempts"][1]["note"], "kept");
    }

    #[test]
    fn scalars_pass_through() {
        assert_eq!(redact(json!(42)), json!(42));
        assert_eq!(redact(json!("password")), json!("password"));
    }

    #[tokio::test]
    async fn record_persists_redacted_changes() {
        let store = Arc::new(MemoryStore::new());
        let logger = AuditLogger::new(store.clone());

        logger.record(
            Some(Uuid::new_v4()),
            "auth.register",
            "account",
            None,
            json!({ "email": "a@example.com", "password": "hunter2" }),
            Some("192.0.2.1".to_string()),
            None,
        );

        // The write is dispatched without awaiting; give the task a beat.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let records = store.audit_records().unwrap();
        assert_eq!(records.len(), 1);
        let entry = records.first().unwrap();
        assert_eq!(entry.changes["password"], REDACTED);
        assert_eq!(entry.changes["email"], "a@example.com");
    }
}
