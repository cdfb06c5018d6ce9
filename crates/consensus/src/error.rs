//! Error types for consensus validation and processing.

use aedpos_secret_sharing::SecretSharingError;
use aedpos_types::CodecError;
use thiserror::Error;

/// Reasons a block's consensus information is rejected.
///
/// Every validator returns one of these instead of panicking; a malformed
/// header (e.g. a provided round missing an expected miner) is an input
/// error, not a programming error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Sender is not a miner of the relevant round.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Block outside the sender's slot, or round/term numbers not advancing
    /// by exactly one.
    #[error("Timing violation: {0}")]
    TimingViolation(String),

    /// Missing out value or signature, or a revealed in-value that does not
    /// match its commitment.
    #[error("Malformed commitment: {0}")]
    MalformedCommitment(String),

    /// Next-round orders differ from the expected computation.
    #[error("Order conflict: {0}")]
    OrderConflict(String),

    /// LIB height or round number would move backward.
    #[error("LIB regression: {0}")]
    LibRegression(String),

    /// Declared and recovered state diverge.
    #[error("Structural mismatch: {0}")]
    StructuralMismatch(String),

    /// Arithmetic overflow or a budget that has run out.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl ValidationError {
    /// Get the failure kind for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::PermissionDenied(_) => "PermissionDenied",
            ValidationError::TimingViolation(_) => "TimingViolation",
            ValidationError::MalformedCommitment(_) => "MalformedCommitment",
            ValidationError::OrderConflict(_) => "OrderConflict",
            ValidationError::LibRegression(_) => "LibRegression",
            ValidationError::StructuralMismatch(_) => "StructuralMismatch",
            ValidationError::ResourceExhausted(_) => "ResourceExhausted",
        }
    }
}

/// Errors outside header validation: setup, storage and apply-time faults.
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("Consensus state not initialized")]
    NotInitialized,

    #[error("Consensus state already initialized")]
    AlreadyInitialized,

    #[error("Round {0} not found")]
    RoundNotFound(i64),

    #[error("Round {0} already stored")]
    RoundAlreadyExists(i64),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Header generation or processing hit an input it cannot apply.
    #[error("Cannot apply consensus information: {0}")]
    Apply(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    SecretSharing(#[from] SecretSharingError),
}
