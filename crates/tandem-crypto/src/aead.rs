//! Authenticated encryption with ChaCha20-Poly1305.
//!
//! Every call takes the raw 32-byte key and validates its length. Nonces are
//! 12 random bytes. Decryption fails closed: any tag mismatch or truncation
//! yields [`CryptoError::DecryptionFailed`] and no plaintext at all.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};

use crate::error::{check_key_len, CryptoError, CryptoResult};
use crate::random::random_array;

/// Symmetric key size in bytes.
pub const AEAD_KEY_SIZE: usize = 32;
/// Nonce size in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;
/// Poly1305 tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Output of [`encrypt`]: the nonce travels next to the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext with the 16-byte tag appended.
    pub ciphertext: Vec<u8>,
}

fn cipher(key: &[u8]) -> CryptoResult<ChaCha20Poly1305> {
    check_key_len(key, AEAD_KEY_SIZE)?;
    Ok(ChaCha20Poly1305::new(Key::from_slice(key)))
}

/// Encrypt under a fresh random nonce.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> CryptoResult<Sealed> {
    let nonce = random_array::<NONCE_SIZE>()?;
    encrypt_with_nonce(key, &nonce, plaintext, b"")
}

/// Encrypt with a caller-provided nonce and associated data.
///
/// Reusing a nonce under the same key breaks confidentiality; outside of
/// deterministic tests use [`encrypt`].
pub fn encrypt_with_nonce(
    key: &[u8],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> CryptoResult<Sealed> {
    let ciphertext = cipher(key)?
        .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::EncryptionFailed)?;
    Ok(Sealed {
        nonce: *nonce,
        ciphertext,
    })
}

/// Decrypt and authenticate.
pub fn decrypt(key: &[u8], nonce: &[u8], ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
    decrypt_with_aad(key, nonce, ciphertext, b"")
}

/// Decrypt and authenticate with associated data.
pub fn decrypt_with_aad(
    key: &[u8],
    nonce: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> CryptoResult<Vec<u8>> {
    let aead = cipher(key)?;
    if nonce.len() != NONCE_SIZE {
        return Err(CryptoError::InvalidNonceLength {
            expected: NONCE_SIZE,
            got: nonce.len(),
        });
    }
    if ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }
    aead.decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Encrypt into a single blob.
///
/// Returns: nonce(12) || ciphertext+tag
pub fn seal(key: &[u8], plaintext: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>> {
    let nonce = random_array::<NONCE_SIZE>()?;
    let sealed = encrypt_with_nonce(key, &nonce, plaintext, aad)?;
    let mut out = Vec::with_capacity(NONCE_SIZE + sealed.ciphertext.len());
    out.extend_from_slice(&sealed.nonce);
    out.extend_from_slice(&sealed.ciphertext);
    Ok(out)
}

/// Decrypt a blob produced by [`seal`].
///
/// Expects: nonce(12) || ciphertext+tag
pub fn open(key: &[u8], blob: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>> {
    if blob.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }
    let (nonce, ct) = blob.split_at(NONCE_SIZE);
    decrypt_with_aad(key, nonce, ct, aad)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let key = [0x42u8; 32];
        let sealed = encrypt(&key, b"master key bytes").unwrap();
        let plain = decrypt(&key, &sealed.nonce, &sealed.ciphertext).unwrap();
        assert_eq!(plain, b"master key bytes");
    }

    #[test]
    fn test_nonces_are_fresh() {
        let key = [0x42u8; 32];
        let a = encrypt(&key, b"same").unwrap();
        let b = encrypt(&key, b"same").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_one_bit_key_difference_fails() {
        let key = [0x42u8; 32];
        let mut other = key;
        other[31] ^= 0x01;

        let sealed = encrypt(&key, b"secret").unwrap();
        assert_eq!(
            decrypt(&other, &sealed.nonce, &sealed.ciphertext),
            Err(CryptoError::DecryptionFailed)
        );
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = [0x42u8; 32];
        let mut sealed = encrypt(&key, b"secret").unwrap();
        sealed.ciphertext[0] ^= 0xFF;
        assert_eq!(
            decrypt(&key, &sealed.nonce, &sealed.ciphertext),
            Err(CryptoError::DecryptionFailed)
        );
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        let key = [0x42u8; 32];
        let sealed = encrypt(&key, b"secret").unwrap();
        let truncated = &sealed.ciphertext[..sealed.ciphertext.len() - 1];
        assert_eq!(
            decrypt(&key, &sealed.nonce, truncated),
            Err(CryptoError::DecryptionFailed)
        );
        assert_eq!(
            decrypt(&key, &sealed.nonce, &[0u8; 4]),
            Err(CryptoError::DecryptionFailed)
        );
    }

    #[test]
    fn test_length_validation() {
        assert_eq!(
            encrypt(&[0u8; 16], b"x").unwrap_err(),
            CryptoError::InvalidKeyLength { expected: 32, got: 16 }
        );
        assert_eq!(
            decrypt(&[0u8; 32], &[0u8; 8], &[0u8; 32]).unwrap_err(),
            CryptoError::InvalidNonceLength { expected: 12, got: 8 }
        );
    }

    #[test]
    fn test_seal_open_with_aad() {
        let key = [7u8; 32];
        let blob = seal(&key, b"payload", b"session-1").unwrap();
        assert_eq!(open(&key, &blob, b"session-1").unwrap(), b"payload");
        assert!(open(&key, &blob, b"session-2").is_err());
        assert!(open(&key, &blob[..20], b"session-1").is_err());
    }

    #[test]
    fn test_deterministic_nonce_is_reproducible() {
        let key = [1u8; 32];
        let nonce = [2u8; NONCE_SIZE];
        let a = encrypt_with_nonce(&key, &nonce, b"m", b"").unwrap();
        let b = encrypt_with_nonce(&key, &nonce, b"m", b"").unwrap();
        assert_eq!(a, b);
    }
}
