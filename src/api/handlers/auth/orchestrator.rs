//! Auth flow orchestration.
//!
//! Composes the extractor, token service, two-factor service, rate limiter,
//! audit logger, and store into the register → verify → login →
//! two-factor → authenticated state machine, and emits typed outcomes so
//! handlers map failures to responses without inspecting internals.
//!
//! Security boundaries:
//! - Unknown-account and wrong-password failures are indistinguishable to
//!   callers, and both paths do comparable hashing work.
//! - Policy rejections never confirm or deny allowlist membership.
//! - Rate limits are enforced before any credential work.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::audit::AuditLogger;
use crate::rate_limit::{RateLimitAction, RateLimitDecision, RateLimiter};
use crate::store::{AccountRecord, AuthStore, CreateOutcome, TokenPurpose};
use crate::token::{TokenKind, TokenPair, TokenService};
use crate::totp::{TwoFactorService, recovery};

use super::csrf::CsrfError;
use super::extract::{CarrierSource, RequestCarriers};
use super::password::{hash_password, verify_against_dummy, verify_password};
use super::utils::{generate_opaque_token, hash_opaque_token, normalize_email, valid_email};
use super::{ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME};

const DEFAULT_VERIFICATION_TTL_SECONDS: i64 = 30 * 60;
const DEFAULT_CHALLENGE_TTL_SECONDS: i64 = 5 * 60;
const MIN_PASSWORD_LEN: usize = 8;

/// The failure taxonomy handlers map to external responses.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Malformed payload or missing field; client fault.
    #[error("{0}")]
    InvalidInput(&'static str),
    /// Uniform authentication failure; deliberately does not distinguish
    /// unknown accounts, wrong passwords, or bad tokens.
    #[error("unauthorized")]
    Unauthorized,
    /// Policy rejection (registration disabled, allowlist miss) with a
    /// generic message.
    #[error("forbidden")]
    Forbidden,
    /// Anti-forgery failure, kept distinct from authentication failures.
    #[error(transparent)]
    Csrf(#[from] CsrfError),
    #[error("rate limited")]
    RateLimited { retry_after: Duration },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Who may register when the instance is not open.
#[derive(Clone, Debug, Default)]
pub struct RegistrationPolicy {
    enabled: bool,
    allowlist: Vec<String>,
}

impl RegistrationPolicy {
    #[must_use]
    pub fn new(enabled: bool, allowlist: Vec<String>) -> Self {
        Self {
            enabled,
            allowlist: allowlist
                .into_iter()
                .map(|email| normalize_email(&email))
                .collect(),
        }
    }

    fn permits(&self, email_normalized: &str) -> bool {
        self.enabled || self.allowlist.iter().any(|entry| entry == email_normalized)
    }
}

#[derive(Debug)]
pub enum RegisterOutcome {
    /// The raw verification token is handed to the caller; delivering it to
    /// the user (email fan-out) is an external collaborator's job.
    Created {
        account_id: Uuid,
        verification_token: String,
    },
    Conflict,
}

#[derive(Debug)]
pub enum LoginOutcome {
    Authenticated(TokenPair),
    /// Two-factor is enabled: the caller must come back with this challenge
    /// and a TOTP or recovery code before any tokens are issued.
    TwoFactorRequired { challenge: String },
}

/// Re-issued access credential from a still-valid refresh token.
#[derive(Debug)]
pub struct RefreshedAccess {
    pub access: String,
    pub access_expires_in: i64,
}

/// Enrollment payload for the client: the plaintext secret (shown once) and
/// the provisioning URI rendered externally as a scannable code.
#[derive(Debug)]
pub struct EnrollmentStart {
    pub secret: String,
    pub otpauth_url: String,
}

/// Resolved identity handed to downstream handlers, which must not
/// re-implement extraction or verification.
#[derive(Clone, Copy, Debug)]
pub struct Principal {
    pub account_id: Uuid,
    pub token_kind: TokenKind,
    /// Unverified accounts may authenticate but stay distinguishable.
    pub email_verified: bool,
    /// Which carrier authenticated the request; bearer-authenticated
    /// requests are exempt from the CSRF check.
    pub source: CarrierSource,
}

enum SecondFactor {
    Totp,
    Recovery,
}

impl SecondFactor {
    const fn as_str(&self) -> &'static str {
        match self {
            Self::Totp => "totp",
            Self::Recovery => "recovery",
        }
    }
}

pub struct AuthOrchestrator {
    store: Arc<dyn AuthStore>,
    tokens: TokenService,
    totp: TwoFactorService,
    limiter: Arc<dyn RateLimiter>,
    audit: AuditLogger,
    policy: RegistrationPolicy,
    recovery_pepper: Option<Arc<[u8]>>,
    verification_ttl_seconds: i64,
    challenge_ttl_seconds: i64,
}

impl AuthOrchestrator {
    #[must_use]
    pub fn new(
        store: Arc<dyn AuthStore>,
        tokens: TokenService,
        totp: TwoFactorService,
        limiter: Arc<dyn RateLimiter>,
        policy: RegistrationPolicy,
    ) -> Self {
        let audit = AuditLogger::new(Arc::clone(&store));
        Self {
            store,
            tokens,
            totp,
            limiter,
            audit,
            policy,
            recovery_pepper: None,
            verification_ttl_seconds: DEFAULT_VERIFICATION_TTL_SECONDS,
            challenge_ttl_seconds: DEFAULT_CHALLENGE_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_recovery_pepper(mut self, pepper: Arc<[u8]>) -> Self {
        self.recovery_pepper = Some(pepper);
        self
    }

    #[must_use]
    pub fn with_verification_ttl_seconds(mut self, seconds: i64) -> Self {
        self.verification_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_challenge_ttl_seconds(mut self, seconds: i64) -> Self {
        self.challenge_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Anonymous → Registered. Gated by the registration policy; the
    /// verification token starts the Registered → Verified transition.
    ///
    /// # Errors
    /// Returns the typed [`AuthError`] for policy, input, and limiter
    /// rejections.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<RegisterOutcome, AuthError> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(AuthError::InvalidInput("invalid email"));
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::InvalidInput("password too short"));
        }

        self.check_limit(self.limiter.check_source(ip, RateLimitAction::Register))?;
        self.check_limit(self.limiter.check_subject(&email, RateLimitAction::Register))?;

        if !self.policy.permits(&email) {
            // Generic rejection; never confirms which emails are permitted.
            return Err(AuthError::Forbidden);
        }

        let password_hash = hash_password(password)?;
        let account_id = match self.store.create_account(&email, &password_hash).await? {
            CreateOutcome::Created(id) => id,
            CreateOutcome::Conflict => return Ok(RegisterOutcome::Conflict),
        };

        let token = generate_opaque_token()?;
        self.store
            .insert_verification_token(
                account_id,
                &hash_opaque_token(&token),
                TokenPurpose::EmailVerify,
                self.verification_ttl_seconds,
            )
            .await?;

        self.audit.record(
            Some(account_id),
            "auth.register",
            "account",
            Some(account_id.to_string()),
            json!({ "email": email }),
            ip.map(str::to_string),
            user_agent.map(str::to_string),
        );

        Ok(RegisterOutcome::Created {
            account_id,
            verification_token: token,
        })
    }

    /// Registered → Verified via the single-use emailed token.
    ///
    /// # Errors
    /// Returns `InvalidInput` for unknown/expired/reused tokens.
    pub async fn verify_email(&self, token: &str, ip: Option<&str>) -> Result<(), AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::InvalidInput("missing token"));
        }
        self.check_limit(self.limiter.check_source(ip, RateLimitAction::VerifyEmail))?;

        let account_id = self
            .store
            .consume_verification_token(&hash_opaque_token(token), TokenPurpose::EmailVerify)
            .await?
            .ok_or(AuthError::InvalidInput("invalid or expired token"))?;

        self.audit.record(
            Some(account_id),
            "auth.verify_email",
            "account",
            Some(account_id.to_string()),
            json!({ "email_verified": true }),
            ip.map(str::to_string),
            None,
        );
        Ok(())
    }

    /// Issue a fresh verification token for a still-unverified account.
    /// Returns `None` when there is nothing to resend; callers stay opaque
    /// either way to avoid account probing.
    ///
    /// # Errors
    /// Returns `RateLimited` or an internal error.
    pub async fn resend_verification(
        &self,
        email: &str,
        ip: Option<&str>,
    ) -> Result<Option<String>, AuthError> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Ok(None);
        }
        self.check_limit(
            self.limiter
                .check_source(ip, RateLimitAction::ResendVerification),
        )?;
        self.check_limit(
            self.limiter
                .check_subject(&email, RateLimitAction::ResendVerification),
        )?;

        let Some(account) = self.store.account_by_email(&email).await? else {
            return Ok(None);
        };
        if account.email_verified {
            return Ok(None);
        }

        let token = generate_opaque_token()?;
        self.store
            .insert_verification_token(
                account.id,
                &hash_opaque_token(&token),
                TokenPurpose::EmailVerify,
                self.verification_ttl_seconds,
            )
            .await?;
        Ok(Some(token))
    }

    /// Verified → LoggedIn, or → TwoFactorPending when 2FA is enabled.
    ///
    /// # Errors
    /// Returns a uniform `Unauthorized` for any credential failure.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<LoginOutcome, AuthError> {
        let email = normalize_email(email);
        self.check_limit(self.limiter.check_source(ip, RateLimitAction::Login))?;
        self.check_limit(self.limiter.check_subject(&email, RateLimitAction::Login))?;

        let Some(account) = self.store.account_by_email(&email).await? else {
            verify_against_dummy(password);
            self.record_login_failure(None, ip, user_agent);
            return Err(AuthError::Unauthorized);
        };

        if !verify_password(password, &account.password_hash) {
            self.record_login_failure(Some(account.id), ip, user_agent);
            return Err(AuthError::Unauthorized);
        }

        if account.two_factor_enabled {
            let challenge = generate_opaque_token()?;
            self.store
                .insert_two_factor_challenge(
                    account.id,
                    &hash_opaque_token(&challenge),
                    self.challenge_ttl_seconds,
                )
                .await?;
            self.audit.record(
                Some(account.id),
                "auth.login",
                "session",
                Some(account.id.to_string()),
                json!({ "outcome": "two-factor-pending" }),
                ip.map(str::to_string),
                user_agent.map(str::to_string),
            );
            return Ok(LoginOutcome::TwoFactorRequired { challenge });
        }

        let pair = self.tokens.issue_pair(account.id)?;
        self.audit.record(
            Some(account.id),
            "auth.login",
            "session",
            Some(account.id.to_string()),
            json!({ "outcome": "authenticated", "email_verified": account.email_verified }),
            ip.map(str::to_string),
            user_agent.map(str::to_string),
        );
        Ok(LoginOutcome::Authenticated(pair))
    }

    /// TwoFactorPending → Authenticated via a TOTP code or a single recovery
    /// code. The challenge is consumed only on success, so a mistyped code
    /// within the TTL does not force a fresh login.
    ///
    /// # Errors
    /// Returns a uniform `Unauthorized` for unknown challenges and failed
    /// codes.
    pub async fn verify_two_factor(
        &self,
        challenge: &str,
        code: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<TokenPair, AuthError> {
        self.check_limit(self.limiter.check_source(ip, RateLimitAction::TwoFactor))?;

        let challenge_hash = hash_opaque_token(challenge.trim());
        let Some(account_id) = self
            .store
            .two_factor_challenge_account(&challenge_hash)
            .await?
        else {
            return Err(AuthError::Unauthorized);
        };

        self.check_limit(
            self.limiter
                .check_subject(&account_id.to_string(), RateLimitAction::TwoFactor),
        )?;

        let account = self
            .store
            .account_by_id(account_id)
            .await?
            .ok_or(AuthError::Unauthorized)?;

        let method = match self.check_second_factor(&account, code).await {
            Ok(method) => method,
            Err(err) => {
                self.audit.record(
                    Some(account_id),
                    "auth.two_factor",
                    "session",
                    Some(account_id.to_string()),
                    json!({ "outcome": "failed" }),
                    ip.map(str::to_string),
                    user_agent.map(str::to_string),
                );
                return Err(err);
            }
        };

        // Another concurrent submission may have won the challenge.
        if self
            .store
            .consume_two_factor_challenge(&challenge_hash)
            .await?
            .is_none()
        {
            return Err(AuthError::Unauthorized);
        }

        let pair = self.tokens.issue_pair(account_id)?;
        self.audit.record(
            Some(account_id),
            "auth.two_factor",
            "session",
            Some(account_id.to_string()),
            json!({ "outcome": "authenticated", "method": method.as_str() }),
            ip.map(str::to_string),
            user_agent.map(str::to_string),
        );
        Ok(pair)
    }

    /// Authenticated: mint a new access token from a still-valid refresh
    /// token, without re-entering two-factor.
    ///
    /// # Errors
    /// Returns a uniform `Unauthorized` for expired/invalid/wrong-type
    /// tokens.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        ip: Option<&str>,
    ) -> Result<RefreshedAccess, AuthError> {
        self.check_limit(self.limiter.check_source(ip, RateLimitAction::Refresh))?;

        let claims = self
            .tokens
            .verify(refresh_token, TokenKind::Refresh)
            .map_err(|err| {
                debug!("refresh token rejected: {err}");
                AuthError::Unauthorized
            })?;

        // The account must still exist; soft-deleted accounts stop refreshing.
        if self.store.account_by_id(claims.sub).await?.is_none() {
            return Err(AuthError::Unauthorized);
        }

        let access = self.tokens.issue(
            claims.sub,
            TokenKind::Access,
            self.tokens.access_ttl_seconds(),
        )?;
        Ok(RefreshedAccess {
            access,
            access_expires_in: self.tokens.access_ttl_seconds(),
        })
    }

    /// Resolve the request's carriers into a [`Principal`] for downstream
    /// handlers. This is the only place extraction meets verification.
    ///
    /// # Errors
    /// Returns a uniform `Unauthorized` when no carrier yields a valid
    /// access token.
    pub async fn authenticate(&self, carriers: &RequestCarriers) -> Result<Principal, AuthError> {
        let (found, diagnostics) = carriers.find_token(ACCESS_COOKIE_NAME, true);
        debug!(%diagnostics, "access token lookup");
        let Some(extraction) = found else {
            return Err(AuthError::Unauthorized);
        };

        let claims = self
            .tokens
            .verify(&extraction.value, TokenKind::Access)
            .map_err(|err| {
                debug!("access token rejected: {err}");
                AuthError::Unauthorized
            })?;

        let account = self
            .store
            .account_by_id(claims.sub)
            .await?
            .ok_or(AuthError::Unauthorized)?;

        Ok(Principal {
            account_id: account.id,
            token_kind: claims.kind,
            email_verified: account.email_verified,
            source: extraction.source,
        })
    }

    /// Start a password reset. Returns the raw token for external delivery,
    /// or `None` when the email matches no account; callers respond
    /// identically either way.
    ///
    /// # Errors
    /// Returns `RateLimited` or an internal error.
    pub async fn request_password_reset(
        &self,
        email: &str,
        ip: Option<&str>,
    ) -> Result<Option<String>, AuthError> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Ok(None);
        }
        self.check_limit(
            self.limiter
                .check_source(ip, RateLimitAction::PasswordReset),
        )?;
        self.check_limit(
            self.limiter
                .check_subject(&email, RateLimitAction::PasswordReset),
        )?;

        let Some(account) = self.store.account_by_email(&email).await? else {
            return Ok(None);
        };

        let token = generate_opaque_token()?;
        self.store
            .insert_verification_token(
                account.id,
                &hash_opaque_token(&token),
                TokenPurpose::PasswordReset,
                self.verification_ttl_seconds,
            )
            .await?;
        self.audit.record(
            Some(account.id),
            "auth.password_reset_request",
            "account",
            Some(account.id.to_string()),
            json!({ "email": email }),
            ip.map(str::to_string),
            None,
        );
        Ok(Some(token))
    }

    /// Complete a password reset with the single-use token.
    ///
    /// # Errors
    /// Returns `InvalidInput` for bad tokens or weak passwords.
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
        ip: Option<&str>,
    ) -> Result<(), AuthError> {
        if new_password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::InvalidInput("password too short"));
        }
        self.check_limit(
            self.limiter
                .check_source(ip, RateLimitAction::PasswordReset),
        )?;

        let account_id = self
            .store
            .consume_verification_token(
                &hash_opaque_token(token.trim()),
                TokenPurpose::PasswordReset,
            )
            .await?
            .ok_or(AuthError::InvalidInput("invalid or expired token"))?;

        let password_hash = hash_password(new_password)?;
        self.store
            .set_password_hash(account_id, &password_hash)
            .await?;

        self.audit.record(
            Some(account_id),
            "auth.password_reset",
            "account",
            Some(account_id.to_string()),
            json!({ "password": "[rotated]" }),
            ip.map(str::to_string),
            None,
        );
        Ok(())
    }

    /// Begin TOTP enrollment: generate a secret, stage it encrypted, and
    /// return the plaintext + provisioning URI for the client.
    ///
    /// # Errors
    /// Returns `Unauthorized` for unknown accounts.
    pub async fn enroll_two_factor_start(
        &self,
        account_id: Uuid,
    ) -> Result<EnrollmentStart, AuthError> {
        let account = self
            .store
            .account_by_id(account_id)
            .await?
            .ok_or(AuthError::Unauthorized)?;

        let secret = self.totp.generate_secret()?;
        let secret_enc = self.totp.encrypt_secret(&secret, account_id)?;
        self.store
            .set_pending_totp_secret(account_id, &secret_enc)
            .await?;

        let otpauth_url = self.totp.provisioning_uri(&account.email, &secret)?;
        Ok(EnrollmentStart {
            secret,
            otpauth_url,
        })
    }

    /// Confirm enrollment with the first code; flips the two-factor flag and
    /// installs the initial recovery batch atomically. Returns the plaintext
    /// recovery codes, shown exactly once.
    ///
    /// # Errors
    /// Returns `Unauthorized` when the code does not verify.
    pub async fn enroll_two_factor_confirm(
        &self,
        account_id: Uuid,
        code: &str,
        ip: Option<&str>,
    ) -> Result<Vec<String>, AuthError> {
        let account = self
            .store
            .account_by_id(account_id)
            .await?
            .ok_or(AuthError::Unauthorized)?;
        let Some(secret_enc) = &account.totp_secret_enc else {
            return Err(AuthError::InvalidInput("enrollment not started"));
        };

        let secret = self.totp.decrypt_secret(secret_enc, account_id)?;
        if !self.totp.verify_code(code, &secret)? {
            return Err(AuthError::Unauthorized);
        }

        let batch = recovery::RecoveryCodeBatch::generate(self.recovery_pepper.as_deref())?;
        self.store
            .enable_two_factor(account_id, &batch.code_hashes)
            .await?;

        self.audit.record(
            Some(account_id),
            "auth.two_factor_enroll",
            "account",
            Some(account_id.to_string()),
            json!({ "two_factor_enabled": true, "recovery_batch": batch.batch_id }),
            ip.map(str::to_string),
            None,
        );
        Ok(batch.codes)
    }

    /// Atomically replace the recovery batch; prior codes stop verifying the
    /// moment the new batch lands.
    ///
    /// # Errors
    /// Returns `InvalidInput` if two-factor is not enabled.
    pub async fn regenerate_recovery_codes(
        &self,
        account_id: Uuid,
        ip: Option<&str>,
    ) -> Result<Vec<String>, AuthError> {
        let account = self
            .store
            .account_by_id(account_id)
            .await?
            .ok_or(AuthError::Unauthorized)?;
        if !account.two_factor_enabled {
            return Err(AuthError::InvalidInput("two-factor not enabled"));
        }

        let batch = recovery::RecoveryCodeBatch::generate(self.recovery_pepper.as_deref())?;
        self.store
            .replace_recovery_codes(account_id, &batch.code_hashes)
            .await?;

        self.audit.record(
            Some(account_id),
            "auth.recovery_regenerate",
            "account",
            Some(account_id.to_string()),
            json!({ "recovery_batch": batch.batch_id }),
            ip.map(str::to_string),
            None,
        );
        Ok(batch.codes)
    }

    /// Turn off two-factor after a final second-factor proof.
    ///
    /// # Errors
    /// Returns `Unauthorized` when the code does not verify.
    pub async fn disable_two_factor(
        &self,
        account_id: Uuid,
        code: &str,
        ip: Option<&str>,
    ) -> Result<(), AuthError> {
        let account = self
            .store
            .account_by_id(account_id)
            .await?
            .ok_or(AuthError::Unauthorized)?;
        if !account.two_factor_enabled {
            return Err(AuthError::InvalidInput("two-factor not enabled"));
        }

        self.check_second_factor(&account, code).await?;
        self.store.disable_two_factor(account_id).await?;

        self.audit.record(
            Some(account_id),
            "auth.two_factor_disable",
            "account",
            Some(account_id.to_string()),
            json!({ "two_factor_enabled": false }),
            ip.map(str::to_string),
            None,
        );
        Ok(())
    }

    /// Check a TOTP or recovery code for `account`. A matching recovery code
    /// is consumed here: the mark-used update is atomic, so a concurrently
    /// repeated code verifies at most once.
    async fn check_second_factor(
        &self,
        account: &AccountRecord,
        code: &str,
    ) -> Result<SecondFactor, AuthError> {
        if recovery::looks_like_recovery_code(code) {
            let pepper = self.recovery_pepper.as_deref();
            for row in self.store.unused_recovery_codes(account.id).await? {
                if recovery::verify_recovery_code(code, &row.code_hash, pepper)? {
                    if self.store.consume_recovery_code(row.id).await? {
                        return Ok(SecondFactor::Recovery);
                    }
                    // Lost the race; the code is already spent.
                    return Err(AuthError::Unauthorized);
                }
            }
            return Err(AuthError::Unauthorized);
        }

        let Some(secret_enc) = &account.totp_secret_enc else {
            return Err(AuthError::Unauthorized);
        };
        let secret = self.totp.decrypt_secret(secret_enc, account.id)?;
        if self.totp.verify_code(code, &secret)? {
            Ok(SecondFactor::Totp)
        } else {
            Err(AuthError::Unauthorized)
        }
    }

    fn record_login_failure(
        &self,
        account_id: Option<Uuid>,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) {
        self.audit.record(
            account_id,
            "auth.login",
            "session",
            account_id.map(|id| id.to_string()),
            json!({ "outcome": "failed" }),
            ip.map(str::to_string),
            user_agent.map(str::to_string),
        );
    }

    fn check_limit(&self, decision: RateLimitDecision) -> Result<(), AuthError> {
        match decision {
            RateLimitDecision::Allowed => Ok(()),
            RateLimitDecision::Limited { retry_after } => {
                Err(AuthError::RateLimited { retry_after })
            }
        }
    }
}

/// Cookie name consumed by refresh lookups; the bearer carrier is never
/// consulted for these.
pub(crate) fn find_refresh_token(carriers: &RequestCarriers) -> Option<String> {
    let (found, diagnostics) = carriers.find_token(REFRESH_COOKIE_NAME, false);
    debug!(%diagnostics, "refresh token lookup");
    found.map(|extraction| extraction.value)
}
