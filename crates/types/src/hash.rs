//! Cryptographic hash type using Blake3.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte cryptographic hash using Blake3.
///
/// Used for in-values, out-values, consensus signatures and round
/// fingerprints. The all-zero hash doubles as the "empty" sentinel for a
/// previous in-value that has not been revealed.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hash([u8; 32]);

impl Hash {
    /// Size of hash in bytes.
    pub const BYTES: usize = 32;

    /// Zero hash (all bytes are 0x00).
    pub const ZERO: Self = Self([0u8; 32]);

    /// Sentinel for "previous in value not revealed".
    pub const EMPTY: Self = Self::ZERO;

    /// Max hash (all bytes are 0xFF).
    pub const MAX: Self = Self([0xFFu8; 32]);

    /// Create hash from bytes using Blake3.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let hash = blake3::hash(bytes);
        Self(*hash.as_bytes())
    }

    /// Wrap raw hash bytes (without hashing).
    pub const fn from_raw(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create a Hash from a raw slice (without hashing).
    ///
    /// Returns `None` if the slice is not exactly 32 bytes.
    pub fn from_hash_bytes(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Create hash from multiple byte slices.
    pub fn from_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Hash of another hash.
    pub fn of(hash: &Hash) -> Self {
        Self::from_bytes(&hash.0)
    }

    /// Byte-wise XOR of two hashes (no hashing).
    pub fn xor(&self, other: &Hash) -> Self {
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Self(out)
    }

    /// XOR two hashes and hash the result.
    ///
    /// This is the combine step of the consensus signature fold.
    pub fn xor_and_compute(a: &Hash, b: &Hash) -> Self {
        Self::from_bytes(&a.xor(b).0)
    }

    /// Hash the concatenation of two hashes.
    pub fn concat_and_compute(a: &Hash, b: &Hash) -> Self {
        Self::from_parts(&[&a.0, &b.0])
    }

    /// Parse hash from hex string.
    pub fn from_hex(hex: &str) -> Result<Self, HexError> {
        if hex.len() != 64 {
            return Err(HexError::InvalidLength {
                expected: 64,
                actual: hex.len(),
            });
        }

        let mut bytes = [0u8; 32];
        hex::decode_to_slice(hex, &mut bytes).map_err(|_| HexError::InvalidHex)?;

        Ok(Self(bytes))
    }

    /// Convert hash to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Get bytes as slice reference.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to bytes array.
    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }

    /// Interpret the first 8 bytes as a big-endian i64.
    ///
    /// Used to turn a consensus signature into a next-round order.
    pub fn to_i64(&self) -> i64 {
        let mut head = [0u8; 8];
        head.copy_from_slice(&self.0[0..8]);
        i64::from_be_bytes(head)
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "Hash({}..{})", &hex[..8], &hex[56..])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// `|value % modulus|`, the order derivation used for signatures.
///
/// `modulus` must be positive; a non-positive modulus yields 0.
pub fn abs_modulus(value: i64, modulus: i32) -> i32 {
    if modulus <= 0 {
        return 0;
    }
    // |x % m| < m, so the narrowing is lossless.
    (value % i64::from(modulus)).unsigned_abs() as i32
}

/// Errors that can occur when parsing hex strings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HexError {
    /// Invalid hex string length.
    #[error("Invalid hex length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// Invalid hex characters.
    #[error("Invalid hex string")]
    InvalidHex,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let data = b"hello world";
        let hash1 = Hash::from_bytes(data);
        let hash2 = Hash::from_bytes(data);
        assert_eq!(hash1, hash2);
    }

    #[test]
    fn test_hex_roundtrip() {
        let original = Hash::from_bytes(b"test data");
        let hex = original.to_hex();
        assert_eq!(hex.len(), 64);

        let parsed = Hash::from_hex(&hex).unwrap();
        assert_eq!(original, parsed);
        assert!(matches!(
            Hash::from_hex("abcd"),
            Err(HexError::InvalidLength { expected: 64, actual: 4 })
        ));
    }

    #[test]
    fn test_is_zero() {
        assert!(Hash::ZERO.is_zero());
        assert!(Hash::EMPTY.is_zero());
        assert!(!Hash::MAX.is_zero());
        assert!(!Hash::from_bytes(b"test").is_zero());
    }

    #[test]
    fn test_xor_is_self_inverse() {
        let a = Hash::from_bytes(b"a");
        let b = Hash::from_bytes(b"b");
        assert_eq!(a.xor(&b).xor(&b), a);
        assert_eq!(a.xor(&a), Hash::ZERO);
        assert_eq!(Hash::xor_and_compute(&a, &b), Hash::xor_and_compute(&b, &a));
    }

    #[test]
    fn test_to_i64_reads_leading_bytes() {
        let mut raw = [0u8; 32];
        raw[7] = 5;
        assert_eq!(Hash::from_raw(raw).to_i64(), 5);
        raw[0] = 0x80;
        assert!(Hash::from_raw(raw).to_i64() < 0);
    }

    #[test]
    fn test_abs_modulus() {
        assert_eq!(abs_modulus(7, 5), 2);
        assert_eq!(abs_modulus(-7, 5), 2);
        assert_eq!(abs_modulus(i64::MIN, 5), 3);
        assert_eq!(abs_modulus(10, 0), 0);
    }
}
