//! Secret sharing errors.

use aedpos_types::Pubkey;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecretSharingError {
    /// Threshold is zero or larger than the number of shares.
    #[error("Invalid threshold {threshold} for {total} shares")]
    InvalidThreshold { threshold: usize, total: usize },

    #[error("Secret of {len} bytes exceeds the field size ({max} bytes)")]
    SecretTooLarge { len: usize, max: usize },

    #[error("Not enough shares: {provided} provided, {required} required")]
    NotEnoughShares { provided: usize, required: usize },

    /// Two shares claim the same evaluation point.
    #[error("Duplicate share order {order}")]
    DuplicateOrder { order: i32 },

    #[error("Share order must be positive, got {order}")]
    InvalidOrder { order: i32 },

    /// Decrypting peer has no slot in the round the pieces belong to.
    #[error("Piece holder {pubkey} is not a miner of the round")]
    UnknownPieceHolder { pubkey: Pubkey },

    /// Interpolation produced a value that does not hash to the commitment.
    #[error("Reconstructed in value of {pubkey} does not match its out value")]
    CommitmentMismatch { pubkey: Pubkey },
}
