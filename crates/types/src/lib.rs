//! Core types for AEDPoS consensus.
//!
//! This crate holds the data model shared by every consensus component:
//!
//! - [`Round`] / [`MinerInRound`]: one mining round and its miner slots,
//!   with the round-level operations (time-slot checks, signature fold,
//!   next-round order derivation, header simplification and recovery)
//! - [`MinerList`]: the ordered miners of a term
//! - [`Behaviour`] / [`ConsensusCommand`]: scheduling decisions
//! - [`HeaderInformation`] and the consensus transaction inputs
//!
//! Everything here is plain data with deterministic serde encodings; no
//! component in this crate holds state across calls.

mod behaviour;
mod hash;
mod identifiers;
mod input;
mod miner_list;
mod round;
mod round_update;

pub use behaviour::{Behaviour, ConsensusCommand};
pub use hash::{abs_modulus, Hash, HexError};
pub use identifiers::{Pubkey, Timestamp};
pub use input::{
    BlockContext, CodecError, ConsensusTransaction, HeaderInformation, TinyBlockInput,
    TriggerInformation, UpdateValueInput,
};
pub use miner_list::MinerList;
pub use round::{MinerInRound, Round, RoundError};
