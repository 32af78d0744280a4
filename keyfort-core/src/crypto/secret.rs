//! Zeroizing wrapper for in-memory secret values.
//!
//! Domain fields hold plaintext while resident; encryption happens only at
//! the serialization boundary. The wrapper guarantees the backing memory is
//! wiped when the value is dropped and keeps secrets out of Debug output.

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// A secret string that zeroizes its backing buffer on drop.
///
/// Serializes transparently as a plain string so the encrypted bundle
/// round-trips without a wrapper layer in the on-disk format.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the plaintext. Callers must not copy it into long-lived
    /// unmanaged buffers.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Zeroize for SecretString {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

impl Drop for SecretString {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretString(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_is_redacted() {
        let secret = SecretString::new("hunter2");
        assert_eq!(format!("{:?}", secret), "SecretString(<redacted>)");
    }

    #[test]
    fn zeroize_clears_contents() {
        let mut secret = SecretString::new("hunter2");
        secret.zeroize();
        assert!(secret.is_empty());
    }

    #[test]
    fn serde_transparent_roundtrip() {
        let secret = SecretString::new("hunter2");
        let json = serde_json::to_string(&secret).unwrap();
        assert_eq!(json, "\"hunter2\"");

        let back: SecretString = serde_json::from_str(&json).unwrap();
        assert_eq!(back, secret);
    }
}
