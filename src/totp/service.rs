use crate::totp::crypto;
use anyhow::{Result, anyhow};
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

/// Time-step length in seconds; the skew of 1 step gives a ±30s drift
/// allowance, bounding the replay window to roughly 90 seconds.
const TOTP_STEP_SECONDS: u64 = 30;
const TOTP_DIGITS: usize = 6;
const TOTP_SKEW: u8 = 1;

#[derive(Clone)]
pub struct TwoFactorService {
    encryption_key: [u8; 32],
    issuer: String,
}

impl TwoFactorService {
    #[must_use]
    pub fn new(encryption_key: [u8; 32], issuer: String) -> Self {
        Self {
            encryption_key,
            issuer,
        }
    }

    /// Generates a fresh random base32 secret. The plaintext is only ever
    /// handed to the enrolling client; storage goes through
    /// [`Self::encrypt_secret`].
    ///
    /// # Errors
    /// Returns an error if secret generation fails.
    pub fn generate_secret(&self) -> Result<String> {
        match Secret::generate_secret().to_encoded() {
            Secret::Encoded(secret) => Ok(secret),
            Secret::Raw(_) => Err(anyhow!("secret generation returned raw bytes")),
        }
    }

    /// Encrypts a base32 secret for storage, bound to the owning account.
    ///
    /// # Errors
    /// Returns an error if encryption fails.
    pub fn encrypt_secret(&self, secret_base32: &str, account_id: Uuid) -> Result<Vec<u8>> {
        crypto::encrypt_secret(&self.encryption_key, secret_base32.as_bytes(), account_id)
    }

    /// Decrypts a stored secret back to its base32 form.
    ///
    /// # Errors
    /// Returns an error if decryption fails or the plaintext is not UTF-8.
    pub fn decrypt_secret(&self, data: &[u8], account_id: Uuid) -> Result<String> {
        let plaintext = crypto::decrypt_secret(&self.encryption_key, data, account_id)?;
        String::from_utf8(plaintext).map_err(|_| anyhow!("decrypted secret is not valid base32"))
    }

    /// Builds the `otpauth://` provisioning URI for enrollment. Rendering it
    /// as a scannable code is the caller's concern.
    ///
    /// # Errors
    /// Returns an error if the secret cannot be parsed.
    pub fn provisioning_uri(&self, account_label: &str, secret_base32: &str) -> Result<String> {
        Ok(self.totp(account_label, secret_base32)?.get_url())
    }

    /// Verifies a submitted code against the current time step, allowing one
    /// step of clock drift either way.
    ///
    /// # Errors
    /// Returns an error if the secret cannot be parsed or system time is
    /// unavailable.
    pub fn verify_code(&self, code: &str, secret_base32: &str) -> Result<bool> {
        let totp = self.totp("account", secret_base32)?;
        Ok(totp.check_current(code.trim()).unwrap_or(false))
    }

    /// Verification against an explicit Unix timestamp. Used by tests to pin
    /// the clock; the drift window is identical to [`Self::verify_code`].
    ///
    /// # Errors
    /// Returns an error if the secret cannot be parsed.
    pub fn verify_code_at(&self, code: &str, secret_base32: &str, time: u64) -> Result<bool> {
        let totp = self.totp("account", secret_base32)?;
        Ok(totp.check(code.trim(), time))
    }

    /// Generates the code for an explicit time step. Test helper; production
    /// code never generates codes server-side.
    ///
    /// # Errors
    /// Returns an error if the secret cannot be parsed.
    pub fn generate_code_at(&self, secret_base32: &str, time: u64) -> Result<String> {
        Ok(self.totp("account", secret_base32)?.generate(time))
    }

    fn totp(&self, account_label: &str, secret_base32: &str) -> Result<TOTP> {
        let secret_bytes = Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .map_err(|e| anyhow!("invalid TOTP secret: {e:?}"))?;
        TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW,
            TOTP_STEP_SECONDS,
            secret_bytes,
            Some(self.issuer.clone()),
            account_label.to_string(),
        )
        .map_err(|e| anyhow!("TOTP init error: {e}"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::TwoFactorService;
    use uuid::Uuid;

    fn service() -> TwoFactorService {
        TwoFactorService::new([7u8; 32], "sesamo".to_string())
    }

    #[test]
    fn generated_secret_round_trips_through_encryption() {
        let service = service();
        let account_id = Uuid::new_v4();
        let secret = service.generate_secret().unwrap();

        let encrypted = service.encrypt_secret(&secret, account_id).unwrap();
        let decrypted = service.decrypt_secret(&encrypted, account_id).unwrap();
        assert_eq!(decrypted, secret);
    }

    #[test]
    fn provisioning_uri_is_otpauth() {
        let service = service();
        let secret = service.generate_secret().unwrap();
        let uri = service
            .provisioning_uri("alice@example.com", &secret)
            .unwrap();
        assert!(uri.starts_with("otpauth://totp/"));
        assert!(uri.contains("issuer=sesamo"));
    }

    #[test]
    fn code_valid_within_one_step_of_drift() {
        let service = service();
        let secret = service.generate_secret().unwrap();
        let now = 1_700_000_000u64;

        let code = service.generate_code_at(&secret, now).unwrap();
        assert!(service.verify_code_at(&code, &secret, now).unwrap());
        assert!(service.verify_code_at(&code, &secret, now + 30).unwrap());
        assert!(service.verify_code_at(&code, &secret, now - 30).unwrap());
    }

    #[test]
    fn code_rejected_outside_the_drift_window() {
        let service = service();
        let secret = service.generate_secret().unwrap();
        // Align to a step boundary so the window edges are exact.
        let now = 1_700_000_010u64 / 30 * 30;

        let code = service.generate_code_at(&secret, now).unwrap();
        assert!(!service.verify_code_at(&code, &secret, now + 90).unwrap());
        assert!(!service.verify_code_at(&code, &secret, now.saturating_sub(90)).unwrap());
    }

    #[test]
    fn wrong_code_is_rejected() {
        let service = service();
        let secret = service.generate_secret().unwrap();
        let now = 1_700_000_000u64;
        let code = service.generate_code_at(&secret, now).unwrap();

        // Flip one digit to guarantee a mismatch.
        let mut wrong: Vec<u8> = code.into_bytes();
        wrong[0] = if wrong[0] == b'9' { b'0' } else { wrong[0] + 1 };
        let wrong = String::from_utf8(wrong).unwrap();
        assert!(!service.verify_code_at(&wrong, &secret, now).unwrap());
    }
}
