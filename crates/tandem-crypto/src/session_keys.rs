//! Session and message keys derived from a pairwise secret, plus the
//! separate derivation used for web sessions.
//!
//! Every derivation here uses its own HKDF `info` label, so a key from one
//! domain never equals a key from another for the same input secret.

use zeroize::Zeroizing;

use crate::error::CryptoResult;
use crate::kdf::derive_key_32;
use crate::keys::KeyPair;
use crate::pairwise::PairwiseSecret;
use crate::random::random_array;

/// Default `info` label for [`derive_session_key_from_pair`].
pub const SESSION_CONTEXT_V1: &str = "session-v1";
/// `info` label for web-session keys.
pub const WEB_SESSION_CONTEXT_V1: &str = "web-session-v1";

pub type SessionKey = Zeroizing<[u8; 32]>;

/// Per-session key between two paired devices.
///
/// The session id is the HKDF salt, so distinct sessions get unrelated keys.
pub fn derive_session_key_from_pair(
    pairwise: &PairwiseSecret,
    session_id: &str,
    context: &str,
) -> SessionKey {
    derive_key_32(
        pairwise.as_bytes(),
        Some(session_id.as_bytes()),
        context.as_bytes(),
    )
}

/// Key for one message purpose and counter: info is `message-v1:<purpose>:<counter>`.
pub fn derive_message_key(pairwise: &PairwiseSecret, purpose: &str, counter: u64) -> SessionKey {
    let info = format!("message-v1:{purpose}:{counter}");
    derive_key_32(pairwise.as_bytes(), None, info.as_bytes())
}

/// A fresh random 32-byte session key.
pub fn generate_session_key() -> CryptoResult<SessionKey> {
    Ok(Zeroizing::new(random_array::<32>()?))
}

/// Key shared between a trusted device and a web client's ephemeral key.
///
/// The web side computes the same value from its ephemeral private key and
/// the device public key.
pub fn derive_web_session_key_from_device(
    device_key: &KeyPair,
    web_ephemeral_public: &[u8],
    session_id: &str,
) -> CryptoResult<SessionKey> {
    let shared = device_key.diffie_hellman(web_ephemeral_public)?;
    Ok(derive_key_32(
        &shared[..],
        Some(session_id.as_bytes()),
        WEB_SESSION_CONTEXT_V1.as_bytes(),
    ))
}

/// Lexicographic order of two device ids, smaller first.
pub fn order_device_ids<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
