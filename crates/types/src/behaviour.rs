//! Consensus behaviours and the command handed to the block producer.

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a miner should do at a given moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Behaviour {
    /// Produce the normal block of this slot, publishing commitments.
    UpdateValue,
    /// Produce an additional block inside the slot.
    TinyBlock,
    /// Terminate the round.
    NextRound,
    /// Terminate the round and the term.
    NextTerm,
    /// Wait.
    #[default]
    Nothing,
}

impl Behaviour {
    /// Get the behaviour name for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Behaviour::UpdateValue => "UpdateValue",
            Behaviour::TinyBlock => "TinyBlock",
            Behaviour::NextRound => "NextRound",
            Behaviour::NextTerm => "NextTerm",
            Behaviour::Nothing => "Nothing",
        }
    }

    /// Whether this behaviour produces a new round.
    pub fn is_round_change(&self) -> bool {
        matches!(self, Behaviour::NextRound | Behaviour::NextTerm)
    }
}

impl fmt::Display for Behaviour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Instruction to the block producer: what to mine and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusCommand {
    pub behaviour: Behaviour,
    pub arranged_mining_time: Timestamp,
    /// Block production must finish before this time.
    pub mining_due_time: Timestamp,
    /// Time budget for executing the block.
    pub limit_milliseconds_of_mining_block: i64,
}

impl ConsensusCommand {
    /// Command telling a miner to do nothing, ever.
    pub fn invalid() -> Self {
        Self {
            behaviour: Behaviour::Nothing,
            arranged_mining_time: Timestamp::MAX,
            mining_due_time: Timestamp::MAX,
            limit_milliseconds_of_mining_block: 0,
        }
    }

    pub fn is_invalid(&self) -> bool {
        self.behaviour == Behaviour::Nothing
    }
}
