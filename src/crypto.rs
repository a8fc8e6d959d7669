//! Symmetric encryption for provider tokens at rest: access token, refresh
//! token, and expiry are stored as one encrypted blob.
//!
//! AES-256-GCM, with key material coming from `SecretResolver` (the
//! `oauth.providerTokenKey` config reference), hashed to 32 bytes with
//! SHA-256 so operators can supply a passphrase of any length.

use crate::error::{GatewayError, Result};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use sha2::{Digest, Sha256};

const NONCE_LEN: usize = 12;

#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    pub fn new(key_material: &str) -> Self {
        let digest = Sha256::digest(key_material.as_bytes());
        let key = Key::<Aes256Gcm>::from_slice(&digest);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Encrypt `plaintext`, returning `nonce || ciphertext`.
    pub fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| GatewayError::internal("failed to encrypt provider token"))?;
        let mut out = nonce.to_vec();
        out.append(&mut ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, blob: &[u8]) -> Result<String> {
        if blob.len() < NONCE_LEN {
            return Err(GatewayError::internal("provider token blob too short"));
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| GatewayError::internal("failed to decrypt provider token"))?;
        String::from_utf8(plaintext).map_err(|_| GatewayError::internal("decrypted provider token was not utf8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let cipher = TokenCipher::new("correct-horse-battery-staple");
        let blob = cipher.encrypt("ya29.a0AfH6...").unwrap();
        assert_eq!(cipher.decrypt(&blob).unwrap(), "ya29.a0AfH6...");
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let blob = TokenCipher::new("key-one").encrypt("secret").unwrap();
        assert!(TokenCipher::new("key-two").decrypt(&blob).is_err());
    }
}
