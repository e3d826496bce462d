//! Long-term and ephemeral X25519 key pairs.
//!
//! A [`KeyPair`] is the only type in the workspace that owns private key
//! material. It has no `Serialize` impl and its `Debug` output shows a
//! fingerprint of the public half only. The secret is zeroized on drop.

use std::fmt;

use rand_core::OsRng;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::{check_key_len, CryptoError, CryptoResult};
use crate::hash::fingerprint;

/// Size in bytes of X25519 public keys, private keys and shared secrets.
pub const KEY_SIZE: usize = 32;

/// An X25519 key pair bound to one device (long-term) or one attempt (ephemeral).
pub struct KeyPair {
    secret: StaticSecret,
    public: [u8; KEY_SIZE],
}

impl KeyPair {
    /// Generate a new random key pair from the OS RNG.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret).to_bytes();
        Self { secret, public }
    }

    /// Rebuild a key pair from a stored private key.
    ///
    /// Clamping happens inside the scalar multiplication, so any 32 bytes
    /// are accepted.
    pub fn from_private_bytes(private_key: &[u8]) -> CryptoResult<Self> {
        check_key_len(private_key, KEY_SIZE)?;
        let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
        bytes.copy_from_slice(private_key);
        let secret = StaticSecret::from(*bytes);
        let public = X25519PublicKey::from(&secret).to_bytes();
        Ok(Self { secret, public })
    }

    /// The public half, safe to put on the wire.
    pub fn public_key(&self) -> &[u8; KEY_SIZE] {
        &self.public
    }

    /// Copy of the private half for the key store. Zeroized when dropped.
    pub fn private_key_bytes(&self) -> Zeroizing<[u8; KEY_SIZE]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    /// X25519 agreement with a peer public key.
    pub fn diffie_hellman(&self, their_public: &[u8]) -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>> {
        check_key_len(their_public, KEY_SIZE)?;
        let mut peer = [0u8; KEY_SIZE];
        peer.copy_from_slice(their_public);
        let shared = self.secret.diffie_hellman(&X25519PublicKey::from(peer));
        if !shared.was_contributory() {
            return Err(CryptoError::NonContributory);
        }
        Ok(Zeroizing::new(*shared.as_bytes()))
    }

    /// Short hex fingerprint of the public key, for logs.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.public)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

/// Generate a fresh key pair.
pub fn generate_key_pair() -> KeyPair {
    KeyPair::generate()
}

/// X25519 Diffie-Hellman from raw key bytes.
///
/// Both inputs must be exactly 32 bytes; nothing is padded or truncated.
pub fn compute_shared_secret(
    private_key: &[u8],
    their_public: &[u8],
) -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>> {
    KeyPair::from_private_bytes(private_key)?.diffie_hellman(their_public)
}
