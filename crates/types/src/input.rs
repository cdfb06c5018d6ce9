//! Header payloads and consensus transaction inputs.

use crate::{Behaviour, Hash, Pubkey, Round, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Off-chain information a miner feeds into header generation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TriggerInformation {
    pub pubkey: Pubkey,

    /// Behaviour of the command this block is produced for.
    pub behaviour: Behaviour,

    /// Fresh in-value for this round (UpdateValue only).
    pub in_value: Option<Hash>,

    /// In-value the miner committed to in the previous round.
    pub previous_in_value: Option<Hash>,

    /// Shares of `in_value` for each peer.
    pub encrypted_pieces: BTreeMap<Pubkey, Vec<u8>>,

    /// Pieces this miner decrypted for others, keyed by the owner.
    pub decrypted_pieces: BTreeMap<Pubkey, Vec<u8>>,

    /// Previous in-values of other miners this miner reconstructed.
    pub revealed_in_values: BTreeMap<Pubkey, Hash>,
}

impl TriggerInformation {
    pub fn new(pubkey: Pubkey) -> Self {
        Self {
            pubkey,
            ..Default::default()
        }
    }

    pub fn with_behaviour(mut self, behaviour: Behaviour) -> Self {
        self.behaviour = behaviour;
        self
    }

    pub fn with_in_value(mut self, in_value: Hash) -> Self {
        self.in_value = Some(in_value);
        self
    }

    pub fn with_previous_in_value(mut self, previous_in_value: Hash) -> Self {
        self.previous_in_value = Some(previous_in_value);
        self
    }
}

/// Consensus information embedded in a block header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderInformation {
    pub sender: Pubkey,
    pub behaviour: Behaviour,
    /// Full round for round changes, simplified round otherwise.
    pub round: Round,
}

impl HeaderInformation {
    /// Canonical header bytes.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Payload of the UpdateValue transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateValueInput {
    pub out_value: Hash,
    pub signature: Hash,
    pub round_id: i64,
    pub previous_in_value: Hash,
    pub actual_mining_time: Timestamp,
    pub supposed_order_of_next_round: i32,
    /// Final next-round orders of the other miners.
    pub tune_order_information: BTreeMap<Pubkey, i32>,
    pub encrypted_pieces: BTreeMap<Pubkey, Vec<u8>>,
    /// Pieces decrypted by the sender, keyed by the owner of the secret.
    pub decrypted_pieces: BTreeMap<Pubkey, Vec<u8>>,
    pub produced_blocks: i64,
    pub miners_previous_in_values: BTreeMap<Pubkey, Hash>,
    pub implied_irreversible_block_height: i64,
}

/// Payload of the TinyBlock transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TinyBlockInput {
    pub round_number: i64,
    pub round_id: i64,
    pub actual_mining_time: Timestamp,
    pub produced_blocks: i64,
}

/// The single consensus transaction carried by every block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusTransaction {
    UpdateValue(UpdateValueInput),
    TinyBlock(TinyBlockInput),
    NextRound(Round),
    NextTerm(Round),
}

impl ConsensusTransaction {
    pub fn behaviour(&self) -> Behaviour {
        match self {
            ConsensusTransaction::UpdateValue(_) => Behaviour::UpdateValue,
            ConsensusTransaction::TinyBlock(_) => Behaviour::TinyBlock,
            ConsensusTransaction::NextRound(_) => Behaviour::NextRound,
            ConsensusTransaction::NextTerm(_) => Behaviour::NextTerm,
        }
    }
}

/// Facts about the block being produced or processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockContext {
    pub sender: Pubkey,
    pub height: i64,
    pub time: Timestamp,
}

impl BlockContext {
    pub fn new(sender: Pubkey, height: i64, time: Timestamp) -> Self {
        Self {
            sender,
            height,
            time,
        }
    }
}

/// Header encoding errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Consensus header encoding failed: {0}")]
    Bincode(#[from] bincode::Error),
}
