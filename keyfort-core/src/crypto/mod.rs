//! Encryption seam and secret-handling utilities.
//!
//! The rest of the crate only sees the [`Cipher`] trait; the bundled
//! [`AesGcmCipher`] is the default implementation hosts use unless they
//! supply their own keyed capability.

pub mod cipher;
pub mod secret;

pub use cipher::{AesGcmCipher, Cipher};
pub use secret::SecretString;

use thiserror::Error;

/// Result type for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors from encryption and decryption
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Authentication failed - data may be corrupted or tampered")]
    AuthenticationFailed,

    #[error("Invalid nonce: {0}")]
    InvalidNonce(String),
}
