//! Brute-force rate limiting for auth flows.
//!
//! Two independent axes defend against different attacker shapes: per-source
//! address before the account is known, per-account identity after. Counters
//! are windowed and expire at the window boundary without an external sweep.

mod memory;

pub use memory::MemoryRateLimiter;

use std::time::Duration;

/// Auth endpoints subject to limiting, each with its own default budget.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RateLimitAction {
    Register,
    Login,
    VerifyEmail,
    ResendVerification,
    TwoFactor,
    PasswordReset,
    Refresh,
}

impl RateLimitAction {
    #[must_use]
    pub const fn endpoint_key(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Login => "login",
            Self::VerifyEmail => "verify-email",
            Self::ResendVerification => "resend-verification",
            Self::TwoFactor => "two-factor",
            Self::PasswordReset => "password-reset",
            Self::Refresh => "refresh",
        }
    }

    /// Default attempts allowed per window.
    #[must_use]
    pub const fn limit(self) -> u32 {
        match self {
            Self::Register | Self::PasswordReset => 5,
            Self::Login | Self::TwoFactor => 10,
            Self::VerifyEmail | Self::ResendVerification => 6,
            Self::Refresh => 60,
        }
    }

    /// Default window length.
    #[must_use]
    pub const fn window(self) -> Duration {
        match self {
            Self::Register | Self::PasswordReset => Duration::from_secs(10 * 60),
            Self::Login | Self::TwoFactor | Self::VerifyEmail | Self::ResendVerification => {
                Duration::from_secs(5 * 60)
            }
            Self::Refresh => Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited { retry_after: Duration },
}

impl RateLimitDecision {
    #[must_use]
    pub const fn is_limited(&self) -> bool {
        matches!(self, Self::Limited { .. })
    }
}

/// Concurrency-safe attempt counting keyed by `(subject, endpoint)`.
///
/// Implementations must increment atomically (no read-then-write window)
/// and expire counters at the window boundary on their own.
pub trait RateLimiter: Send + Sync {
    fn check_and_increment(
        &self,
        subject_key: &str,
        endpoint_key: &str,
        limit: u32,
        window: Duration,
    ) -> RateLimitDecision;

    /// Pre-identification axis: the request source address. An unknown source
    /// is allowed through; the per-account axis still applies afterwards.
    fn check_source(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision {
        match ip {
            Some(ip) => self.check_and_increment(
                &format!("ip:{ip}"),
                action.endpoint_key(),
                action.limit(),
                action.window(),
            ),
            None => RateLimitDecision::Allowed,
        }
    }

    /// Post-identification axis: the account identity (normalized email or id).
    fn check_subject(&self, subject: &str, action: RateLimitAction) -> RateLimitDecision {
        self.check_and_increment(
            &format!("subject:{subject}"),
            action.endpoint_key(),
            action.limit(),
            action.window(),
        )
    }
}

/// Limiter that allows everything. Used in tests and when limiting is
/// delegated to an upstream proxy.
#[derive(Clone, Copy, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check_and_increment(
        &self,
        _subject_key: &str,
        _endpoint_key: &str,
        _limit: u32,
        _window: Duration,
    ) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::{NoopRateLimiter, RateLimitAction, RateLimitDecision, RateLimiter};

    #[test]
    fn noop_rate_limiter_allows() {
        let limiter = NoopRateLimiter;
        assert_eq!(
            limiter.check_source(Some("192.0.2.1"), RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_subject("user@example.com", RateLimitAction::Register),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn missing_source_is_allowed() {
        let limiter = NoopRateLimiter;
        assert_eq!(
            limiter.check_source(None, RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn actions_have_distinct_keys() {
        let keys = [
            RateLimitAction::Register,
            RateLimitAction::Login,
            RateLimitAction::VerifyEmail,
            RateLimitAction::ResendVerification,
            RateLimitAction::TwoFactor,
            RateLimitAction::PasswordReset,
            RateLimitAction::Refresh,
        ]
        .map(RateLimitAction::endpoint_key);
        let mut deduped = keys.to_vec();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(deduped.len(), keys.len());
    }
}
