//! Sealed-box encryption to an X25519 public key.
//!
//! X25519 (fresh ephemeral sender key) + HKDF-SHA256 + ChaCha20-Poly1305.
//! The context id is the HKDF salt and the AEAD associated data, so a blob
//! sealed for one web session does not open under another.

use crate::aead::{open, seal};
use crate::error::CryptoResult;
use crate::kdf::derive_key_32;
use crate::keys::{KeyPair, KEY_SIZE};

const HYBRID_INFO: &[u8] = b"tandem-hybrid-v1";

/// Output of [`seal_for_recipient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HybridSealed {
    /// Sender ephemeral public key, needed by the recipient to open.
    pub ephemeral_public: [u8; KEY_SIZE],
    /// nonce(12) || ciphertext+tag
    pub blob: Vec<u8>,
}

/// Seal `plaintext` so only the holder of `recipient_public`'s private key can read it.
pub fn seal_for_recipient(
    plaintext: &[u8],
    recipient_public: &[u8],
    context_id: &str,
) -> CryptoResult<HybridSealed> {
    let eph = KeyPair::generate();
    let shared = eph.diffie_hellman(recipient_public)?;
    let key = derive_key_32(&shared[..], Some(context_id.as_bytes()), HYBRID_INFO);
    let blob = seal(&key[..], plaintext, context_id.as_bytes())?;
    Ok(HybridSealed {
        ephemeral_public: *eph.public_key(),
        blob,
    })
}

/// Open a blob produced by [`seal_for_recipient`].
pub fn open_from_sender(
    recipient: &KeyPair,
    ephemeral_public: &[u8],
    blob: &[u8],
    context_id: &str,
) -> CryptoResult<Vec<u8>> {
    let shared = recipient.diffie_hellman(ephemeral_public)?;
    let key = derive_key_32(&shared[..], Some(context_id.as_bytes()), HYBRID_INFO);
    open(&key[..], blob, context_id.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CryptoError;

    #[test]
    fn test_seal_open() {
        let recipient = KeyPair::generate();
        let sealed = seal_for_recipient(b"session key", recipient.public_key(), "ws-1").unwrap();
        let plain =
            open_from_sender(&recipient, &sealed.ephemeral_public, &sealed.blob, "ws-1").unwrap();
        assert_eq!(plain, b"session key");
    }

    #[test]
    fn test_wrong_context_fails() {
        let recipient = KeyPair::generate();
        let sealed = seal_for_recipient(b"session key", recipient.public_key(), "ws-1").unwrap();
        assert_eq!(
            open_from_sender(&recipient, &sealed.ephemeral_public, &sealed.blob, "ws-2"),
            Err(CryptoError::DecryptionFailed)
        );
    }

    #[test]
    fn test_wrong_recipient_fails() {
        let recipient = KeyPair::generate();
        let other = KeyPair::generate();
        let sealed = seal_for_recipient(b"session key", recipient.public_key(), "ws-1").unwrap();
        assert!(open_from_sender(&other, &sealed.ephemeral_public, &sealed.blob, "ws-1").is_err());
    }
}
