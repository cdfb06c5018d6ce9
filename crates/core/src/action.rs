//! Outbound actions produced by consensus processing.

use aedpos_types::{MinerList, Pubkey};
use serde::{Deserialize, Serialize};

/// Effects consensus processing asks the host to perform.
///
/// Block processing never calls other contracts or services directly; it
/// returns these for the runner to dispatch. None of them feed back into
/// consensus state, so the runner may perform them fire-and-forget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    // ═══════════════════════════════════════════════════════════════════════
    // Economics
    // ═══════════════════════════════════════════════════════════════════════
    /// Release mining rewards for a finished term.
    DistributeMiningReward {
        /// Term that just ended.
        term_number: i64,
        /// Blocks produced in the last round of that term.
        mined_blocks: i64,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Election
    // ═══════════════════════════════════════════════════════════════════════
    /// Miners that missed too many slots; the election service should
    /// drop them from candidacy.
    ReportEvilMiners { pubkeys: Vec<Pubkey> },

    /// A new term started with a (possibly) different miner list.
    MinerListChanged {
        term_number: i64,
        miners: MinerList,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Finality
    // ═══════════════════════════════════════════════════════════════════════
    /// The last irreversible block advanced.
    IrreversibleBlockFound {
        height: i64,
        /// Round in which the new LIB was computed.
        round_number: i64,
    },

    /// Distance between the current height and the LIB became unacceptable,
    /// or returned to normal (distance 0).
    IrreversibleBlockHeightUnacceptable { distance_to_lib: i64 },
}

impl Action {
    /// Get a human-readable name for this action type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::DistributeMiningReward { .. } => "DistributeMiningReward",
            Action::ReportEvilMiners { .. } => "ReportEvilMiners",
            Action::MinerListChanged { .. } => "MinerListChanged",
            Action::IrreversibleBlockFound { .. } => "IrreversibleBlockFound",
            Action::IrreversibleBlockHeightUnacceptable { .. } => {
                "IrreversibleBlockHeightUnacceptable"
            }
        }
    }

    /// Check if this action concerns the last irreversible block.
    pub fn is_finality(&self) -> bool {
        matches!(
            self,
            Action::IrreversibleBlockFound { .. } | Action::IrreversibleBlockHeightUnacceptable { .. }
        )
    }
}
