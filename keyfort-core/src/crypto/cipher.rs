//! AES-256-GCM bundle encryption.
//!
//! The wire format is `nonce(12) || ciphertext || auth_tag(16)` with a
//! fresh random nonce per encryption.

use crate::crypto::{CryptoError, Result};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use zeroize::Zeroize;

/// Keyed encrypt/decrypt capability consumed by the data manager and the
/// attachment store. Implementations must already hold their key material;
/// the manager reports invalid state when no cipher has been supplied.
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Default [`Cipher`] backed by AES-256-GCM.
///
/// The key is zeroized when the cipher is dropped.
pub struct AesGcmCipher {
    key: [u8; 32],
}

impl AesGcmCipher {
    /// Generate a cipher with a fresh random key.
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        Self { key: key.into() }
    }

    /// Build a cipher from existing key material.
    pub fn from_key(key: [u8; 32]) -> Self {
        Self { key }
    }
}

impl Drop for AesGcmCipher {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl Cipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        if plaintext.is_empty() {
            return Err(CryptoError::EncryptionFailed(
                "Cannot encrypt empty data".to_string(),
            ));
        }

        let cipher = Aes256Gcm::new(&self.key.into());
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let nonce_bytes: [u8; 12] = nonce.into();

        // aes-gcm appends the tag to the ciphertext
        let ciphertext_with_tag = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut result = Vec::with_capacity(12 + ciphertext_with_tag.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext_with_tag);

        Ok(result)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        // Minimum: 12 (nonce) + 1 (ciphertext) + 16 (tag)
        if ciphertext.len() < 29 {
            return Err(CryptoError::DecryptionFailed(
                "Ciphertext too short".to_string(),
            ));
        }

        let nonce_bytes: [u8; 12] = ciphertext[..12]
            .try_into()
            .map_err(|_| CryptoError::InvalidNonce("Invalid nonce length".to_string()))?;
        let body = &ciphertext[12..];

        let cipher = Aes256Gcm::new(&self.key.into());
        let nonce = Nonce::from(nonce_bytes);

        cipher
            .decrypt(&nonce, body)
            .map_err(|_| CryptoError::AuthenticationFailed)
    }
}
