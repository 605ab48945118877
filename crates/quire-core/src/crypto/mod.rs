//! Field-level encryption for private note bodies.
//!
//! The dual store only sees the [`Cipher`] contract. [`AesGcmCipher`] is the
//! implementation used by the binaries.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{Error, Result};

/// Encrypts and decrypts individual text fields
pub trait Cipher: Send + Sync {
    /// Returns `(ciphertext, iv)`, both as printable text
    fn encrypt(&self, plaintext: &str) -> Result<(String, String)>;

    fn decrypt(&self, ciphertext: &str, iv: &str) -> Result<String>;
}

/// AES-256-GCM with a random 96-bit nonce per value. Ciphertext (with tag)
/// and nonce are base64 encoded.
pub struct AesGcmCipher {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl fmt::Debug for AesGcmCipher {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AesGcmCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl AesGcmCipher {
    /// Build from a raw 32-byte key
    pub fn new(key: &[u8]) -> Result<Self> {
        let unbound = UnboundKey::new(&AES_256_GCM, key)
            .map_err(|_| Error::Crypto("encryption key must be 32 bytes".to_string()))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    /// Build from a base64-encoded 32-byte key
    pub fn from_base64_key(encoded: &str) -> Result<Self> {
        let key = STANDARD
            .decode(encoded.trim())
            .map_err(|error| Error::Crypto(format!("invalid base64 key: {error}")))?;
        Self::new(&key)
    }
}

impl Cipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &str) -> Result<(String, String)> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| Error::Crypto("failed to generate nonce".to_string()))?;

        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| Error::Crypto("encryption failed".to_string()))?;

        Ok((STANDARD.encode(in_out), STANDARD.encode(nonce_bytes)))
    }

    fn decrypt(&self, ciphertext: &str, iv: &str) -> Result<String> {
        let nonce_bytes: [u8; NONCE_LEN] = STANDARD
            .decode(iv)
            .map_err(|error| Error::Crypto(format!("invalid iv encoding: {error}")))?
            .try_into()
            .map_err(|_| Error::Crypto("iv has the wrong length".to_string()))?;
        let mut in_out = STANDARD
            .decode(ciphertext)
            .map_err(|error| Error::Crypto(format!("invalid ciphertext encoding: {error}")))?;

        let plaintext = self
            .key
            .open_in_place(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| Error::Crypto("decryption failed".to_string()))?;

        String::from_utf8(plaintext.to_vec())
            .map_err(|error| Error::Crypto(format!("plaintext is not UTF-8: {error}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> AesGcmCipher {
        AesGcmCipher::new(&[7u8; 32]).unwrap()
    }

    #[test]
    fn encrypt_then_decrypt_returns_plaintext() {
        let cipher = cipher();
        let (ciphertext, iv) = cipher.encrypt("secret body").unwrap();
        assert_ne!(ciphertext, "secret body");
        assert_eq!(cipher.decrypt(&ciphertext, &iv).unwrap(), "secret body");
    }

    #[test]
    fn each_encryption_uses_a_fresh_iv() {
        let cipher = cipher();
        let (first, first_iv) = cipher.encrypt("same").unwrap();
        let (second, second_iv) = cipher.encrypt("same").unwrap();
        assert_ne!(first_iv, second_iv);
        assert_ne!(first, second);
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let (ciphertext, iv) = cipher().encrypt("secret").unwrap();
        let other = AesGcmCipher::new(&[9u8; 32]).unwrap();
        assert!(matches!(other.decrypt(&ciphertext, &iv), Err(Error::Crypto(_))));
    }

    #[test]
    fn rejects_short_keys() {
        assert!(AesGcmCipher::new(&[1u8; 16]).is_err());
        assert!(AesGcmCipher::from_base64_key("not base64!").is_err());
    }
}
