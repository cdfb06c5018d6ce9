//! AEDPoS consensus core.
//!
//! A miner's life in a round, as implemented here:
//!
//! - [`ConsensusState::get_consensus_command`] schedules the next block
//!   ([`BehaviourScheduler`] decides the behaviour, [`CommandArranger`] the
//!   time)
//! - [`ConsensusState::get_consensus_extra_data`] builds the header: the
//!   miner's commitment and revealed in-values, or the next round from the
//!   [`transition`] engine
//! - every node runs the [`ValidationPipeline`] before execution,
//!   [`ConsensusState::process_consensus_transaction`] to apply the block
//!   and the after-execution check once it has run
//!
//! Processing returns [`Action`](aedpos_core::Action)s instead of calling
//! other services.

mod behaviour;
mod command;
mod config;
mod error;
mod extra_data;
mod irreversible;
mod mining_status;
mod process;
mod reveal;
mod state;
mod store;

pub mod transition;
pub mod validation;

pub use behaviour::{may_terminate, need_to_change_term, BehaviourScheduler, ChainPolicy};
pub use command::{is_solitary_miner, CommandArranger, MiningLimits};
pub use config::{AedposConfig, ChainType, RoundIdentityPolicy, TerminationPolicy};
pub use error::{ConsensusError, ValidationError};
pub use irreversible::calculate_lib_height;
pub use mining_status::{maximum_blocks_count, MaximumBlocksCount, MiningStatus, MiningStatusEvaluator};
pub use reveal::reveal_shared_in_values;
pub use state::ConsensusState;
pub use store::{ConsensusStateStore, LatestProviderToTinyBlocksCount};
pub use validation::{HeaderValidator, ValidationContext, ValidationPipeline};
