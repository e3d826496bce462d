//! Error types for Tandem Core.
//!
//! Each layer has its own enum. Messages are safe to show to the user; none
//! of them carries key material or the reason an authorization was denied.

use thiserror::Error;

use crate::config::ConfigError;
use crate::keystore::KeyStoreError;
use crate::store::StoreError;
use tandem_crypto::CryptoError;

// ============================================================================
// Payload Validation
// ============================================================================

/// Why a scanned QR payload or a received response was rejected.
///
/// Returned before any secret is computed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unsupported payload version: {0}")]
    UnsupportedVersion(u32),

    /// The initiator belongs to another account.
    #[error("payload is for a different account")]
    AccountMismatch,

    #[error("payload expired")]
    Expired,

    #[error("payload timestamp is too far in the future")]
    TimestampInFuture,

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("malformed payload")]
    MalformedPayload,
}

// ============================================================================
// Pairing
// ============================================================================

/// Errors from the pairing state machines (V1 and V2).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PairingError {
    /// The pairing attempt timed out; start a new one.
    #[error("pairing session expired, please retry")]
    Expired,

    #[error("invalid pairing payload: {0}")]
    Validation(#[from] ValidationError),

    /// The responder's ciphertext did not authenticate.
    #[error("failed to decrypt pairing response")]
    DecryptionFailed,

    /// The peer could not prove possession of its long-term key.
    #[error("pairing key confirmation failed")]
    KeyConfirmationFailed,

    #[error("invalid pairing state: {0}")]
    InvalidState(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl PairingError {
    /// Stable short code for the `Failed` state and for logs.
    pub fn code(&self) -> &'static str {
        match self {
            PairingError::Expired => "expired",
            PairingError::Validation(_) => "invalid_payload",
            PairingError::DecryptionFailed => "decryption_failed",
            PairingError::KeyConfirmationFailed => "key_confirmation_failed",
            PairingError::InvalidState(_) => "invalid_state",
            PairingError::Crypto(_) => "crypto",
        }
    }
}

// ============================================================================
// Web Sessions
// ============================================================================

/// Errors from the web-session authorization state machine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WebSessionError {
    /// Generic refusal. The specific reason is only logged locally.
    #[error("access denied")]
    AccessDenied,

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl From<StoreError> for WebSessionError {
    fn from(err: StoreError) -> Self {
        WebSessionError::Store(err.to_string())
    }
}

// ============================================================================
// Top-level
// ============================================================================

/// Umbrella error for callers that drive several layers at once.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Pairing(#[from] PairingError),

    #[error(transparent)]
    WebSession(#[from] WebSessionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_denied_has_no_detail() {
        assert_eq!(WebSessionError::AccessDenied.to_string(), "access denied");
    }

    #[test]
    fn test_expired_is_user_facing() {
        assert!(PairingError::Expired.to_string().contains("retry"));
    }

    #[test]
    fn test_validation_converts() {
        let err: PairingError = ValidationError::AccountMismatch.into();
        assert_eq!(err, PairingError::Validation(ValidationError::AccountMismatch));
        assert_eq!(err.code(), "invalid_payload");
    }

    #[test]
    fn test_store_error_converts() {
        let err: WebSessionError = StoreError::NotFound("ws-1".into()).into();
        assert!(matches!(err, WebSessionError::Store(msg) if msg.contains("ws-1")));
    }
}
