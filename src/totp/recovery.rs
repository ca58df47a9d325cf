//! Recovery code generation and verification.
//!
//! Recovery codes are the single-use fallback when the TOTP device is
//! unavailable. Only Argon2id hashes are persisted; an optional server-side
//! pepper hardens them against database-only compromise.

use anyhow::{Context, Result};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use rand::{RngCore, rngs::OsRng};
use uuid::Uuid;

/// Codes per batch; regeneration replaces the whole batch.
pub const RECOVERY_CODE_COUNT: usize = 8;
const RECOVERY_CODE_LEN: usize = 12;
const RECOVERY_CODE_GROUP_SIZE: usize = 4;

/// A freshly generated recovery-code batch (plaintext + hashes).
#[derive(Debug)]
pub struct RecoveryCodeBatch {
    pub batch_id: Uuid,
    pub codes: Vec<String>,
    pub code_hashes: Vec<String>,
}

impl RecoveryCodeBatch {
    /// Generate a new batch of [`RECOVERY_CODE_COUNT`] codes.
    ///
    /// # Errors
    /// Returns an error if randomness or hashing fails.
    pub fn generate(pepper: Option<&[u8]>) -> Result<Self> {
        let mut rng = OsRng;
        Self::generate_with_rng(&mut rng, pepper)
    }

    fn generate_with_rng<R: RngCore + ?Sized>(rng: &mut R, pepper: Option<&[u8]>) -> Result<Self> {
        let mut codes = Vec::with_capacity(RECOVERY_CODE_COUNT);
        let mut code_hashes = Vec::with_capacity(RECOVERY_CODE_COUNT);
        for _ in 0..RECOVERY_CODE_COUNT {
            let code = generate_code(rng)?;
            let hash = hash_recovery_code(&code, pepper)?;
            codes.push(code);
            code_hashes.push(hash);
        }
        Ok(Self {
            batch_id: Uuid::new_v4(),
            codes,
            code_hashes,
        })
    }
}

/// Normalize a submitted recovery code: strip separators, lowercase, and
/// validate the 12-hex-character shape.
///
/// # Errors
/// Returns an error when the input cannot be a recovery code.
pub fn normalize_recovery_code(input: &str) -> Result<String> {
    let normalized: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_lowercase())
        .collect();

    if normalized.len() != RECOVERY_CODE_LEN {
        return Err(anyhow::anyhow!("invalid recovery code length"));
    }

    if !normalized.bytes().all(|ch| ch.is_ascii_hexdigit()) {
        return Err(anyhow::anyhow!("invalid recovery code characters"));
    }

    Ok(normalized)
}

/// Format a normalized code for display: three hyphen-separated hex groups.
///
/// # Errors
/// Returns an error if the input is not a normalized code.
pub fn format_recovery_code(normalized: &str) -> Result<String> {
    if normalized.len() != RECOVERY_CODE_LEN {
        return Err(anyhow::anyhow!("invalid recovery code length"));
    }
    let mut out = String::with_capacity(RECOVERY_CODE_LEN + 2);
    for (idx, chunk) in normalized
        .as_bytes()
        .chunks(RECOVERY_CODE_GROUP_SIZE)
        .enumerate()
    {
        if idx > 0 {
            out.push('-');
        }
        out.push_str(std::str::from_utf8(chunk).context("invalid recovery code chunk")?);
    }
    Ok(out)
}

/// Verify a recovery code against a stored hash.
///
/// # Errors
/// Returns an error if the stored hash is unparseable or Argon2 setup fails.
pub fn verify_recovery_code(code: &str, stored_hash: &str, pepper: Option<&[u8]>) -> Result<bool> {
    let Ok(normalized) = normalize_recovery_code(code) else {
        return Ok(false);
    };
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|_| anyhow::anyhow!("invalid recovery code hash"))?;
    Ok(argon2(pepper)?
        .verify_password(normalized.as_bytes(), &parsed)
        .is_ok())
}

/// Quick shape check used to route a submitted second factor: recovery codes
/// are grouped hex, TOTP codes are six digits.
#[must_use]
pub fn looks_like_recovery_code(input: &str) -> bool {
    normalize_recovery_code(input).is_ok() && input.trim().len() != 6
}

fn generate_code<R: RngCore + ?Sized>(rng: &mut R) -> Result<String> {
    let mut raw = [0u8; RECOVERY_CODE_LEN / 2];
    rng.fill_bytes(&mut raw);
    let mut normalized = String::with_capacity(RECOVERY_CODE_LEN);
    for byte in raw {
        normalized.push_str(&format!("{byte:02x}"));
    }
    format_recovery_code(&normalized)
}

fn hash_recovery_code(code: &str, pepper: Option<&[u8]>) -> Result<String> {
    let normalized = normalize_recovery_code(code)?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = argon2(pepper)?
        .hash_password(normalized.as_bytes(), &salt)
        .map_err(|_| anyhow::anyhow!("failed to hash recovery code"))?
        .to_string();
    Ok(hash)
}

fn argon2(pepper: Option<&[u8]>) -> Result<Argon2<'_>> {
    match pepper {
        Some(pepper) => Argon2::new_with_secret(
            pepper,
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            argon2::Params::default(),
        )
        .map_err(|_| anyhow::anyhow!("failed to initialize Argon2id")),
        None => Ok(Argon2::default()),
    }
}
