//! OS-backed random bytes.

use crate::error::{CryptoError, CryptoResult};

/// `n` bytes from the OS CSPRNG.
pub fn random_bytes(n: usize) -> CryptoResult<Vec<u8>> {
    let mut out = vec![0u8; n];
    getrandom::getrandom(&mut out).map_err(|_| CryptoError::Rng)?;
    Ok(out)
}

/// A fixed-size random array.
pub fn random_array<const N: usize>() -> CryptoResult<[u8; N]> {
    let mut out = [0u8; N];
    getrandom::getrandom(&mut out).map_err(|_| CryptoError::Rng)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lengths() {
        assert_eq!(random_bytes(0).unwrap().len(), 0);
        assert_eq!(random_bytes(48).unwrap().len(), 48);
    }

    #[test]
    fn test_not_constant() {
        let a = random_array::<32>().unwrap();
        let b = random_array::<32>().unwrap();
        assert_ne!(a, b);
    }
}
