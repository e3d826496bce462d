//! Base64 helpers for keys carried in JSON payloads.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::error::{CryptoError, CryptoResult};
use crate::keys::KEY_SIZE;

/// Encode bytes to standard, padded base64.
pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode standard base64 of any length.
pub fn decode_base64(encoded: &str) -> CryptoResult<Vec<u8>> {
    BASE64
        .decode(encoded)
        .map_err(|e| CryptoError::Base64Decode(e.to_string()))
}

/// Decode a base64 string that must hold exactly one 32-byte key.
pub fn decode_key_base64(encoded: &str) -> CryptoResult<[u8; KEY_SIZE]> {
    let bytes = decode_base64(encoded)?;
    if bytes.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            got: bytes.len(),
        });
    }
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&bytes);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_key_base64_valid() {
        let key = [42u8; 32];
        assert_eq!(decode_key_base64(&encode_base64(&key)).unwrap(), key);
    }

    #[test]
    fn decode_key_base64_wrong_length() {
        let short = encode_base64(&[1u8; 16]);
        assert_eq!(
            decode_key_base64(&short),
            Err(CryptoError::InvalidKeyLength { expected: 32, got: 16 })
        );
        let long = encode_base64(&[1u8; 64]);
        assert_eq!(
            decode_key_base64(&long),
            Err(CryptoError::InvalidKeyLength { expected: 32, got: 64 })
        );
    }

    #[test]
    fn decode_key_base64_empty_string() {
        assert_eq!(
            decode_key_base64(""),
            Err(CryptoError::InvalidKeyLength { expected: 32, got: 0 })
        );
    }

    #[test]
    fn decode_base64_invalid() {
        assert!(matches!(
            decode_base64("not valid base64!!!"),
            Err(CryptoError::Base64Decode(_))
        ));
    }
}
