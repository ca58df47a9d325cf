//! End-to-end auth flows over the orchestrator with the in-memory store.

use anyhow::{Context, Result};
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use sesamo::api::handlers::auth::extract::RequestCarriers;
use sesamo::api::handlers::auth::orchestrator::{
    AuthError, AuthOrchestrator, LoginOutcome, RegisterOutcome,
};
use sesamo::api::handlers::auth::{ACCESS_COOKIE_NAME, RegistrationPolicy};
use sesamo::audit::REDACTED;
use sesamo::rate_limit::{MemoryRateLimiter, NoopRateLimiter, RateLimiter};
use sesamo::store::MemoryStore;
use sesamo::token::{TokenKind, TokenService};
use sesamo::totp::TwoFactorService;

const TOTP_KEY: [u8; 32] = [7u8; 32];

fn token_service() -> TokenService {
    TokenService::new(
        &SecretString::from("an-integration-signing-secret-32b!!"),
        "https://sesamo.test".to_string(),
    )
}

fn orchestrator_with(
    store: Arc<MemoryStore>,
    limiter: Arc<dyn RateLimiter>,
    policy: RegistrationPolicy,
) -> AuthOrchestrator {
    AuthOrchestrator::new(
        store,
        token_service(),
        TwoFactorService::new(TOTP_KEY, "sesamo".to_string()),
        limiter,
        policy,
    )
    .with_recovery_pepper(Arc::from(b"integration-pepper".as_slice()))
}

fn open_orchestrator(store: Arc<MemoryStore>) -> AuthOrchestrator {
    orchestrator_with(store, Arc::new(NoopRateLimiter), RegistrationPolicy::new(true, vec![]))
}

fn unix_now() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("clock before epoch")?
        .as_secs())
}

/// Register, verify email, log in, and authenticate with the issued access
/// token through the cookie carrier.
#[tokio::test]
async fn register_verify_login_authenticate() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = open_orchestrator(store.clone());

    let outcome = orchestrator
        .register("Alice@Example.com", "hunter2hunter2", Some("192.0.2.1"), None)
        .await?;
    let RegisterOutcome::Created {
        account_id,
        verification_token,
    } = outcome
    else {
        panic!("expected created outcome");
    };

    orchestrator
        .verify_email(&verification_token, Some("192.0.2.1"))
        .await?;

    let outcome = orchestrator
        .login("alice@example.com", "hunter2hunter2", Some("192.0.2.1"), None)
        .await?;
    let LoginOutcome::Authenticated(pair) = outcome else {
        panic!("expected authenticated outcome");
    };

    let carriers = RequestCarriers {
        cookie_entries: Some(vec![(ACCESS_COOKIE_NAME.to_string(), pair.access.clone())]),
        ..RequestCarriers::default()
    };
    let principal = orchestrator.authenticate(&carriers).await?;
    assert_eq!(principal.account_id, account_id);
    assert!(principal.email_verified);
    assert_eq!(principal.token_kind, TokenKind::Access);
    Ok(())
}

/// Duplicate registration is a conflict, not an error.
#[tokio::test]
async fn duplicate_registration_conflicts() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = open_orchestrator(store);

    let first = orchestrator
        .register("bob@example.com", "hunter2hunter2", None, None)
        .await?;
    assert!(matches!(first, RegisterOutcome::Created { .. }));

    let second = orchestrator
        .register("bob@example.com", "another-password", None, None)
        .await?;
    assert!(matches!(second, RegisterOutcome::Conflict));
    Ok(())
}

/// With registration disabled and an allowlist containing only the owner,
/// the owner registers and everyone else gets a generic forbidden.
#[tokio::test]
async fn closed_registration_honors_allowlist() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = orchestrator_with(
        store,
        Arc::new(NoopRateLimiter),
        RegistrationPolicy::new(false, vec!["owner@example.com".to_string()]),
    );

    let owner = orchestrator
        .register("owner@example.com", "hunter2hunter2", None, None)
        .await?;
    assert!(matches!(owner, RegisterOutcome::Created { .. }));

    let other = orchestrator
        .register("other@example.com", "hunter2hunter2", None, None)
        .await;
    assert!(matches!(other, Err(AuthError::Forbidden)));
    Ok(())
}

/// A verification token is single-use.
#[tokio::test]
async fn verification_token_is_single_use() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = open_orchestrator(store);

    let RegisterOutcome::Created {
        verification_token, ..
    } = orchestrator
        .register("carol@example.com", "hunter2hunter2", None, None)
        .await?
    else {
        panic!("expected created outcome");
    };

    orchestrator.verify_email(&verification_token, None).await?;
    let second = orchestrator.verify_email(&verification_token, None).await;
    assert!(matches!(second, Err(AuthError::InvalidInput(_))));
    Ok(())
}

/// Unknown accounts and wrong passwords are the same uniform failure.
#[tokio::test]
async fn login_failures_are_uniform() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = open_orchestrator(store);

    orchestrator
        .register("dave@example.com", "hunter2hunter2", None, None)
        .await?;

    let unknown = orchestrator
        .login("nobody@example.com", "hunter2hunter2", None, None)
        .await;
    let wrong = orchestrator
        .login("dave@example.com", "wrong-password!", None, None)
        .await;

    assert!(matches!(unknown, Err(AuthError::Unauthorized)));
    assert!(matches!(wrong, Err(AuthError::Unauthorized)));
    Ok(())
}

async fn enroll_two_factor(
    orchestrator: &AuthOrchestrator,
    account_id: uuid::Uuid,
) -> Result<(String, Vec<String>)> {
    let start = orchestrator.enroll_two_factor_start(account_id).await?;
    assert!(start.otpauth_url.starts_with("otpauth://totp/"));

    let totp = TwoFactorService::new(TOTP_KEY, "sesamo".to_string());
    let code = totp.generate_code_at(&start.secret, unix_now()?)?;
    let recovery_codes = orchestrator
        .enroll_two_factor_confirm(account_id, &code, None)
        .await?;
    assert_eq!(recovery_codes.len(), 8);
    Ok((start.secret, recovery_codes))
}

async fn register_and_login_outcome(
    orchestrator: &AuthOrchestrator,
    email: &str,
) -> Result<(uuid::Uuid, LoginOutcome)> {
    let RegisterOutcome::Created { account_id, .. } = orchestrator
        .register(email, "hunter2hunter2", None, None)
        .await?
    else {
        panic!("expected created outcome");
    };
    let outcome = orchestrator
        .login(email, "hunter2hunter2", None, None)
        .await?;
    Ok((account_id, outcome))
}

/// Login with two-factor enabled parks the caller in the pending state; a
/// valid TOTP code completes it.
#[tokio::test]
async fn two_factor_login_requires_a_code() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = open_orchestrator(store);

    let (account_id, _) =
        register_and_login_outcome(&orchestrator, "erin@example.com").await?;
    let (secret, _) = enroll_two_factor(&orchestrator, account_id).await?;

    let outcome = orchestrator
        .login("erin@example.com", "hunter2hunter2", None, None)
        .await?;
    let LoginOutcome::TwoFactorRequired { challenge } = outcome else {
        panic!("expected a two-factor challenge, not tokens");
    };

    let totp = TwoFactorService::new(TOTP_KEY, "sesamo".to_string());
    let code = totp.generate_code_at(&secret, unix_now()?)?;

    // A wrong code leaves the challenge pending for a retry.
    let mut wrong: Vec<u8> = code.clone().into_bytes();
    wrong[0] = if wrong[0] == b'9' { b'0' } else { wrong[0] + 1 };
    let wrong = String::from_utf8(wrong)?;
    let failed = orchestrator
        .verify_two_factor(&challenge, &wrong, None, None)
        .await;
    assert!(matches!(failed, Err(AuthError::Unauthorized)));
    let pair = orchestrator
        .verify_two_factor(&challenge, &code, None, None)
        .await?;

    let service = token_service();
    let claims = service
        .verify(&pair.access, TokenKind::Access)
        .expect("issued access token should verify");
    assert_eq!(claims.sub, account_id);
    Ok(())
}

/// A recovery code completes the pending login exactly once.
#[tokio::test]
async fn recovery_code_is_single_use() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = open_orchestrator(store);

    let (account_id, _) =
        register_and_login_outcome(&orchestrator, "frank@example.com").await?;
    let (_, recovery_codes) = enroll_two_factor(&orchestrator, account_id).await?;
    let code = recovery_codes.first().context("missing recovery code")?;

    let outcome = orchestrator
        .login("frank@example.com", "hunter2hunter2", None, None)
        .await?;
    let LoginOutcome::TwoFactorRequired { challenge } = outcome else {
        panic!("expected a two-factor challenge");
    };
    orchestrator
        .verify_two_factor(&challenge, code, None, None)
        .await?;

    // Second attempt with the same code on a fresh challenge must fail.
    let outcome = orchestrator
        .login("frank@example.com", "hunter2hunter2", None, None)
        .await?;
    let LoginOutcome::TwoFactorRequired { challenge } = outcome else {
        panic!("expected a two-factor challenge");
    };
    let replay = orchestrator
        .verify_two_factor(&challenge, code, None, None)
        .await;
    assert!(matches!(replay, Err(AuthError::Unauthorized)));
    Ok(())
}

/// Regeneration invalidates the entire prior batch.
#[tokio::test]
async fn recovery_regeneration_replaces_the_batch() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = open_orchestrator(store);

    let (account_id, _) =
        register_and_login_outcome(&orchestrator, "grace@example.com").await?;
    let (_, old_codes) = enroll_two_factor(&orchestrator, account_id).await?;

    let new_codes = orchestrator
        .regenerate_recovery_codes(account_id, None)
        .await?;
    assert_eq!(new_codes.len(), 8);

    let outcome = orchestrator
        .login("grace@example.com", "hunter2hunter2", None, None)
        .await?;
    let LoginOutcome::TwoFactorRequired { challenge } = outcome else {
        panic!("expected a two-factor challenge");
    };

    let old = orchestrator
        .verify_two_factor(
            &challenge,
            old_codes.first().context("missing old code")?,
            None,
            None,
        )
        .await;
    assert!(matches!(old, Err(AuthError::Unauthorized)));

    orchestrator
        .verify_two_factor(
            &challenge,
            new_codes.first().context("missing new code")?,
            None,
            None,
        )
        .await?;
    Ok(())
}

/// Refresh re-issues an access token; an access token never refreshes.
#[tokio::test]
async fn refresh_enforces_token_type() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = open_orchestrator(store);

    let (account_id, outcome) =
        register_and_login_outcome(&orchestrator, "heidi@example.com").await?;
    let LoginOutcome::Authenticated(pair) = outcome else {
        panic!("expected authenticated outcome");
    };

    let refreshed = orchestrator.refresh(&pair.refresh, None).await?;
    let claims = token_service()
        .verify(&refreshed.access, TokenKind::Access)
        .expect("refreshed access token should verify");
    assert_eq!(claims.sub, account_id);

    let wrong_type = orchestrator.refresh(&pair.access, None).await;
    assert!(matches!(wrong_type, Err(AuthError::Unauthorized)));
    Ok(())
}

/// The refresh cookie is the only refresh carrier: a bearer header holding a
/// perfectly valid refresh token never authenticates anything.
#[tokio::test]
async fn bearer_carrier_never_authenticates_with_refresh_token() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = open_orchestrator(store);

    let (_, outcome) = register_and_login_outcome(&orchestrator, "ivan@example.com").await?;
    let LoginOutcome::Authenticated(pair) = outcome else {
        panic!("expected authenticated outcome");
    };

    let carriers = RequestCarriers {
        authorization: Some(format!("Bearer {}", pair.refresh)),
        ..RequestCarriers::default()
    };
    // The bearer carrier is consulted for access lookups, but the refresh
    // token fails the type check.
    let result = orchestrator.authenticate(&carriers).await;
    assert!(matches!(result, Err(AuthError::Unauthorized)));

    let carriers = RequestCarriers {
        authorization: Some(format!("Bearer {}", pair.access)),
        ..RequestCarriers::default()
    };
    assert!(orchestrator.authenticate(&carriers).await.is_ok());
    Ok(())
}

/// Repeated failed logins trip the per-identity limiter with a retry hint.
#[tokio::test]
async fn repeated_logins_are_rate_limited() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = orchestrator_with(
        store,
        Arc::new(MemoryRateLimiter::new()),
        RegistrationPolicy::new(true, vec![]),
    );

    // Default login budget is 10 per window per subject.
    for _ in 0..10 {
        let result = orchestrator
            .login("mallory@example.com", "wrong-password!", None, None)
            .await;
        assert!(matches!(result, Err(AuthError::Unauthorized)));
    }

    let limited = orchestrator
        .login("mallory@example.com", "wrong-password!", None, None)
        .await;
    match limited {
        Err(AuthError::RateLimited { retry_after }) => {
            assert!(retry_after.as_secs() <= 5 * 60);
        }
        other => panic!("expected rate limit, got {other:?}"),
    }
    Ok(())
}

/// Audit history records the flow, and denylisted fields never persist
/// unredacted.
#[tokio::test]
async fn audit_records_are_persisted_and_redacted() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = open_orchestrator(store.clone());

    let RegisterOutcome::Created { .. } = orchestrator
        .register("judy@example.com", "hunter2hunter2", Some("192.0.2.9"), Some("test-agent"))
        .await?
    else {
        panic!("expected created outcome");
    };

    let reset_token = orchestrator
        .request_password_reset("judy@example.com", None)
        .await?
        .context("expected a reset token")?;
    orchestrator
        .reset_password(&reset_token, "a-new-password!", None)
        .await?;

    // Audit writes are dispatched without awaiting; give the tasks a beat.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let records = store.audit_records()?;
    assert!(records.iter().any(|entry| entry.action == "auth.register"));
    let reset = records
        .iter()
        .find(|entry| entry.action == "auth.password_reset")
        .context("expected a password reset record")?;
    assert_eq!(reset.changes["password"], REDACTED);

    // No record anywhere carries the plaintext password.
    let serialized = serde_json::to_string(
        &records
            .iter()
            .map(|entry| entry.changes.clone())
            .collect::<Vec<_>>(),
    )?;
    assert!(!serialized.contains("a-new-password!"));
    assert!(!serialized.contains("hunter2hunter2"));
    Ok(())
}

/// Disabling two-factor requires a final proof and drops the requirement.
#[tokio::test]
async fn disable_two_factor_restores_plain_login() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = open_orchestrator(store);

    let (account_id, _) =
        register_and_login_outcome(&orchestrator, "niaj@example.com").await?;
    let (secret, _) = enroll_two_factor(&orchestrator, account_id).await?;

    let totp = TwoFactorService::new(TOTP_KEY, "sesamo".to_string());
    let code = totp.generate_code_at(&secret, unix_now()?)?;
    orchestrator
        .disable_two_factor(account_id, &code, None)
        .await?;

    let outcome = orchestrator
        .login("niaj@example.com", "hunter2hunter2", None, None)
        .await?;
    assert!(matches!(outcome, LoginOutcome::Authenticated(_)));
    Ok(())
}

/// The multi-value header carrier feeds authentication when no structured
/// cookie list is present.
#[tokio::test]
async fn multi_value_header_carrier_authenticates() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = open_orchestrator(store);

    let (_, outcome) = register_and_login_outcome(&orchestrator, "olivia@example.com").await?;
    let LoginOutcome::Authenticated(pair) = outcome else {
        panic!("expected authenticated outcome");
    };

    let carriers = RequestCarriers {
        multi_headers: Some(HashMap::from([(
            "cookie".to_string(),
            vec![format!("{ACCESS_COOKIE_NAME}={}; theme=dark", pair.access)],
        )])),
        ..RequestCarriers::default()
    };
    assert!(orchestrator.authenticate(&carriers).await.is_ok());
    Ok(())
}
