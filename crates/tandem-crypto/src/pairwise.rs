//! The long-lived secret shared by two paired devices.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoResult;
use crate::kdf::derive_key_32;
use crate::keys::{KeyPair, KEY_SIZE};
use crate::session_keys::order_device_ids;
use crate::utils::constant_time_compare_array;

type HmacSha256 = Hmac<Sha256>;

const CONFIRM_INFO: &[u8] = b"pairing-v2-confirm";

/// Raw X25519 output between two long-term device keys.
///
/// Both sides compute the same value from opposite halves, so
/// `PairwiseSecret(A, B) == PairwiseSecret(B, A)`. There is no serde impl;
/// the bytes never leave the process except through derived keys.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PairwiseSecret {
    bytes: [u8; KEY_SIZE],
    #[zeroize(skip)]
    device_ids: Option<(String, String)>,
}

impl PairwiseSecret {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self {
            bytes,
            device_ids: None,
        }
    }

    /// Tag the secret with the two device ids, smaller id first.
    pub fn with_device_ids(mut self, a: &str, b: &str) -> Self {
        let (lo, hi) = order_device_ids(a, b);
        self.device_ids = Some((lo.to_string(), hi.to_string()));
        self
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    pub fn device_ids(&self) -> Option<(&str, &str)> {
        self.device_ids
            .as_ref()
            .map(|(a, b)| (a.as_str(), b.as_str()))
    }

    /// HMAC-SHA256 over `transcript`, keyed from this secret.
    ///
    /// Proves possession of the long-term private key behind the public key
    /// the peer advertised.
    pub fn confirmation_tag(&self, transcript: &[u8]) -> [u8; 32] {
        let key = derive_key_32(&self.bytes, None, CONFIRM_INFO);
        let mut mac =
            HmacSha256::new_from_slice(&key[..]).expect("HMAC can take keys of any size");
        mac.update(transcript);
        mac.finalize().into_bytes().into()
    }

    /// Constant-time check of a tag produced by [`Self::confirmation_tag`].
    pub fn verify_confirmation_tag(&self, transcript: &[u8], tag: &[u8]) -> bool {
        let Ok(tag) = <[u8; 32]>::try_from(tag) else {
            return false;
        };
        constant_time_compare_array(&self.confirmation_tag(transcript), &tag)
    }
}

impl PartialEq for PairwiseSecret {
    fn eq(&self, other: &Self) -> bool {
        constant_time_compare_array(&self.bytes, &other.bytes)
    }
}

impl Eq for PairwiseSecret {}

impl fmt::Debug for PairwiseSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairwiseSecret")
            .field("bytes", &"<redacted>")
            .field("device_ids", &self.device_ids)
            .finish()
    }
}

/// ECDH between our long-term key and the peer's long-term public key.
pub fn compute_pairwise_secret(
    local: &KeyPair,
    peer_public_key: &[u8],
) -> CryptoResult<PairwiseSecret> {
    let shared = local.diffie_hellman(peer_public_key)?;
    Ok(PairwiseSecret::from_bytes(*shared))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pairwise_symmetric() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let ab = compute_pairwise_secret(&a, b.public_key()).unwrap();
        let ba = compute_pairwise_secret(&b, a.public_key()).unwrap();
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_device_ids_ordered() {
        let s = PairwiseSecret::from_bytes([1u8; 32]).with_device_ids("phone", "laptop");
        assert_eq!(s.device_ids(), Some(("laptop", "phone")));
    }

    #[test]
    fn test_debug_redacts_bytes() {
        let s = PairwiseSecret::from_bytes([0xABu8; 32]);
        let dbg = format!("{s:?}");
        assert!(dbg.contains("redacted"));
        assert!(!dbg.contains("171"));
        assert!(!dbg.to_lowercase().contains("abab"));
    }

    #[test]
    fn test_confirmation_tag() {
        let s = PairwiseSecret::from_bytes([7u8; 32]);
        let tag = s.confirmation_tag(b"transcript");
        assert!(s.verify_confirmation_tag(b"transcript", &tag));
        assert!(!s.verify_confirmation_tag(b"transcript2", &tag));
        assert!(!s.verify_confirmation_tag(b"transcript", &tag[..31]));

        let other = PairwiseSecret::from_bytes([8u8; 32]);
        assert!(!other.verify_confirmation_tag(b"transcript", &tag));
    }
}
