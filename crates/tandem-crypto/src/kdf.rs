//! HKDF-SHA256 key derivation (RFC 5869, extract-then-expand).

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};

/// Largest output HKDF-SHA256 can produce (255 * hash length).
pub const MAX_OUTPUT_LEN: usize = 255 * 32;

/// Derive `length` bytes from `ikm`.
///
/// An empty salt behaves exactly like an absent salt: both are replaced by a
/// block of zeros during extract.
pub fn derive_key(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    length: usize,
) -> CryptoResult<Zeroizing<Vec<u8>>> {
    if length == 0 || length > MAX_OUTPUT_LEN {
        return Err(CryptoError::KeyDerivation(format!(
            "output length {length} outside 1..={MAX_OUTPUT_LEN}"
        )));
    }
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = Zeroizing::new(vec![0u8; length]);
    hk.expand(info, &mut okm[..])
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(okm)
}

/// Derive a single 32-byte symmetric key.
pub fn derive_key_32(ikm: &[u8], salt: Option<&[u8]>, info: &[u8]) -> Zeroizing<[u8; 32]> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = Zeroizing::new([0u8; 32]);
    hk.expand(info, &mut okm[..])
        .expect("32-byte hkdf output is within limits");
    okm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc5869_case_1() {
        let ikm = [0x0bu8; 22];
        let salt = hex::decode("000102030405060708090a0b0c").unwrap();
        let info = hex::decode("f0f1f2f3f4f5f6f7f8f9").unwrap();

        let okm = derive_key(&ikm, Some(&salt), &info, 42).unwrap();
        assert_eq!(
            hex::encode(&*okm),
            "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865"
        );
    }

    #[test]
    fn test_empty_salt_equals_no_salt() {
        let a = derive_key(b"ikm", None, b"pairing", 32).unwrap();
        let b = derive_key(b"ikm", Some(&[]), b"pairing", 32).unwrap();
        assert_eq!(*a, *b);
    }

    #[test]
    fn test_derive_key_32_matches_derive_key() {
        let a = derive_key(b"ikm", Some(b"salt"), b"info", 32).unwrap();
        let b = derive_key_32(b"ikm", Some(b"salt"), b"info");
        assert_eq!(a.as_slice(), b.as_slice());
    }

    #[test]
    fn test_info_separates_outputs() {
        let a = derive_key_32(b"ikm", None, b"pairing");
        let b = derive_key_32(b"ikm", None, b"web-session-v1");
        assert_ne!(*a, *b);
    }

    #[test]
    fn test_length_bounds() {
        assert!(derive_key(b"ikm", None, b"", 0).is_err());
        assert!(derive_key(b"ikm", None, b"", MAX_OUTPUT_LEN + 1).is_err());
        assert_eq!(derive_key(b"ikm", None, b"", MAX_OUTPUT_LEN).unwrap().len(), MAX_OUTPUT_LEN);
    }
}
