//! Authenticated encryption for stored TOTP secrets.

use anyhow::Result;
use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::{RngCore, rngs::OsRng};
use uuid::Uuid;

/// Encrypts a TOTP secret under the process-wide key, binding the ciphertext
/// to the owning account via AAD. Returns `nonce (12 bytes) || ciphertext`.
///
/// # Errors
/// Returns an error if encryption fails.
pub fn encrypt_secret(key: &[u8; 32], secret: &[u8], account_id: Uuid) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let mut nonce_bytes = [0u8; 12];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let aad = construct_aad(account_id);
    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: secret,
                aad: &aad,
            },
        )
        .map_err(|e| anyhow::anyhow!("encryption failure: {e}"))?;

    let mut out = Vec::with_capacity(nonce_bytes.len() + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts `nonce (12 bytes) || ciphertext` produced by [`encrypt_secret`].
/// Tampering with the ciphertext or presenting another account's record fails
/// authentication.
///
/// # Errors
/// Returns an error if the input is too short or decryption fails.
pub fn decrypt_secret(key: &[u8; 32], data: &[u8], account_id: Uuid) -> Result<Vec<u8>> {
    if data.len() < 12 {
        return Err(anyhow::anyhow!("invalid ciphertext length"));
    }

    let (nonce_bytes, ciphertext) = data.split_at(12);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let aad = construct_aad(account_id);
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad: &aad,
            },
        )
        .map_err(|e| anyhow::anyhow!("decryption failure: {e}"))?;

    Ok(plaintext)
}

fn construct_aad(account_id: Uuid) -> Vec<u8> {
    format!("totp-secret:v1|{account_id}").into_bytes()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::{decrypt_secret, encrypt_secret};
    use uuid::Uuid;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let key = [42u8; 32];
        let secret = b"JBSWY3DPEHPK3PXP";
        let account_id = Uuid::new_v4();

        let encrypted = encrypt_secret(&key, secret, account_id).unwrap();
        assert_ne!(encrypted.as_slice(), secret.as_slice());
        assert!(encrypted.len() > secret.len());

        let decrypted = decrypt_secret(&key, &encrypted, account_id).unwrap();
        assert_eq!(decrypted, secret);
    }

    #[test]
    fn decrypt_fails_for_other_account() {
        let key = [42u8; 32];
        let encrypted = encrypt_secret(&key, b"secret", Uuid::new_v4()).unwrap();
        assert!(decrypt_secret(&key, &encrypted, Uuid::new_v4()).is_err());
    }

    #[test]
    fn decrypt_fails_on_tampered_ciphertext() {
        let key = [42u8; 32];
        let account_id = Uuid::new_v4();
        let mut encrypted = encrypt_secret(&key, b"secret", account_id).unwrap();

        let len = encrypted.len();
        if let Some(byte) = encrypted.get_mut(len - 1) {
            *byte ^= 0xFF;
        }

        assert!(decrypt_secret(&key, &encrypted, account_id).is_err());
    }

    #[test]
    fn decrypt_rejects_truncated_input() {
        let key = [42u8; 32];
        assert!(decrypt_secret(&key, &[0u8; 5], Uuid::new_v4()).is_err());
    }
}
