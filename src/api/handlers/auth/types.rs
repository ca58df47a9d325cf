//! Request/response types for auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterResponse {
    pub account_id: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyEmailRequest {
    pub token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ResendVerificationRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PasswordResetConfirmRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Issued token pair; also delivered as `HttpOnly` cookies for browser
/// clients.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Login answer when the account has two-factor enabled: no tokens yet.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TwoFactorChallengeResponse {
    pub two_factor_required: bool,
    pub challenge: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TwoFactorVerifyRequest {
    pub challenge: String,
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct RefreshRequest {
    /// Bearer clients pass the refresh token here; browser clients rely on
    /// the refresh cookie instead.
    pub refresh_token: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RefreshResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionResponse {
    pub account_id: String,
    pub email_verified: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CsrfResponse {
    pub csrf_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct EnrollStartResponse {
    /// Base32 secret, shown exactly once for manual entry.
    pub secret: String,
    /// `otpauth://` provisioning URI for QR rendering.
    pub otpauth_url: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct EnrollFinishRequest {
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RecoveryCodesResponse {
    pub recovery_codes: Vec<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct DisableTwoFactorRequest {
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};

    #[test]
    fn register_request_round_trips() -> Result<()> {
        let request = RegisterRequest {
            email: "alice@example.com".to_string(),
            password: "hunter2hunter2".to_string(),
        };
        let value = serde_json::to_value(&request)?;
        let email = value
            .get("email")
            .and_then(serde_json::Value::as_str)
            .context("missing email")?;
        assert_eq!(email, "alice@example.com");
        let decoded: RegisterRequest = serde_json::from_value(value)?;
        assert_eq!(decoded.password, "hunter2hunter2");
        Ok(())
    }

    #[test]
    fn refresh_request_tolerates_empty_body() -> Result<()> {
        let decoded: RefreshRequest = serde_json::from_str("{}")?;
        assert_eq!(decoded.refresh_token, None);
        Ok(())
    }

    #[test]
    fn token_response_round_trips() -> Result<()> {
        let response = TokenResponse {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            token_type: "Bearer".to_string(),
            expires_in: 900,
        };
        let value = serde_json::to_value(&response)?;
        let decoded: TokenResponse = serde_json::from_value(value)?;
        assert_eq!(decoded.token_type, "Bearer");
        assert_eq!(decoded.expires_in, 900);
        Ok(())
    }
}
