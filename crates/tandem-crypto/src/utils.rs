//! Constant-time comparison for secrets, tags and key snapshots.

use constant_time_eq::constant_time_eq;

/// Compare two byte slices without leaking where they differ.
///
/// Slices of different length compare unequal; the length itself is not
/// treated as secret.
///
/// ```rust
/// use tandem_crypto::utils::constant_time_compare;
///
/// assert!(constant_time_compare(&[0u8; 32], &[0u8; 32]));
/// assert!(!constant_time_compare(&[0u8; 32], &[1u8; 32]));
/// ```
pub fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    constant_time_eq(a, b)
}

/// Fixed-size variant of [`constant_time_compare`].
pub fn constant_time_compare_array<const N: usize>(a: &[u8; N], b: &[u8; N]) -> bool {
    constant_time_eq(a, b)
}
