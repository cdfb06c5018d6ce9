//! Threshold secret sharing for AEDPoS in-values.
//!
//! Every miner splits the in-value it commits to into one share per peer.
//! If the miner goes silent before revealing the in-value, any
//! [`minimum_count`] peers can publish their decrypted shares and the
//! value is rebuilt by Lagrange interpolation over the prime field
//! 2^1279 - 1.
//!
//! Interpolation never fails on well-formed input, even when shares are
//! wrong, so [`reconstruct_in_value`] always checks the result against the
//! owner's out value before handing it back.

mod error;
mod in_value;
mod shamir;

pub use error::SecretSharingError;
pub use in_value::{minimum_count, reconstruct_in_value, split_in_value};
pub use shamir::{decode_secret, encode_secret, prime, MAX_SECRET_BYTES};
