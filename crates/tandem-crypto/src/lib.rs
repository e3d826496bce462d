#![forbid(unsafe_code)]

pub mod error;
pub mod hash;
pub mod keys;
pub mod kdf;
pub mod aead;
pub mod random;
pub mod encoding;
pub mod utils;

pub mod transcript;
pub mod sas;
pub mod hybrid;
pub mod pairwise;
pub mod session_keys;

#[cfg(test)]
mod proptests;

pub use error::{CryptoError, CryptoResult};
pub use keys::{compute_shared_secret, generate_key_pair, KeyPair, KEY_SIZE};
pub use pairwise::{compute_pairwise_secret, PairwiseSecret};
