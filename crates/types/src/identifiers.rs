//! Domain-specific identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Miner public key, hex-encoded.
///
/// Ordering is lexicographic on the hex string, which is the order used
/// whenever miners have to be sorted "by public key".
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pubkey(String);

impl Pubkey {
    /// Wrap an already hex-encoded key.
    pub fn new(hex: impl Into<String>) -> Self {
        Pubkey(hex.into())
    }

    /// Hex-encode raw key bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Pubkey(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw bytes used when the key is mixed into a hash.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.char_indices().nth(12) {
            Some((end, _)) => write!(f, "Pubkey({}..)", &self.0[..end]),
            None => write!(f, "Pubkey({})", self.0),
        }
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Pubkey {
    fn from(value: &str) -> Self {
        Pubkey(value.to_string())
    }
}

/// Wall-clock time in milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Unix epoch.
    pub const ZERO: Self = Timestamp(0);

    /// Latest representable time, used as "never".
    pub const MAX: Self = Timestamp(i64::MAX);

    pub fn from_millis(millis: i64) -> Self {
        Timestamp(millis)
    }

    pub fn from_seconds(seconds: i64) -> Self {
        Timestamp(seconds.saturating_mul(1000))
    }

    pub fn as_millis(self) -> i64 {
        self.0
    }

    /// Whole seconds, truncated toward negative infinity.
    pub fn seconds(self) -> i64 {
        self.0.div_euclid(1000)
    }

    /// Add a (possibly negative) number of milliseconds, saturating.
    pub fn add_millis(self, millis: i64) -> Self {
        Timestamp(self.0.saturating_add(millis))
    }

    /// Milliseconds elapsed from `earlier` to `self` (negative if `earlier` is later).
    pub fn millis_since(self, earlier: Timestamp) -> i64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Whole seconds elapsed from `earlier` to `self`.
    pub fn seconds_since(self, earlier: Timestamp) -> i64 {
        self.millis_since(earlier) / 1000
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
