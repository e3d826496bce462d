//! Error type shared by every primitive in this crate.

use thiserror::Error;

/// Errors from key handling, derivation and authenticated encryption.
///
/// `DecryptionFailed` deliberately carries no detail: a tag mismatch, a
/// truncated ciphertext and a wrong key are indistinguishable to the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("invalid nonce length: expected {expected}, got {got}")]
    InvalidNonceLength { expected: usize, got: usize },

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("key agreement produced a non-contributory shared secret")]
    NonContributory,

    #[error("RNG failed")]
    Rng,

    #[error("base64 decode failed: {0}")]
    Base64Decode(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Reject any buffer that is not exactly `expected` bytes long.
pub(crate) fn check_key_len(bytes: &[u8], expected: usize) -> CryptoResult<()> {
    if bytes.len() != expected {
        return Err(CryptoError::InvalidKeyLength {
            expected,
            got: bytes.len(),
        });
    }
    Ok(())
}
