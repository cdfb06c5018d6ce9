//! Consensus state machine for one chain.
//!
//! [`ConsensusState`] owns the persisted store and answers the calls a
//! block producer and a block validator make, in the order they make them:
//!
//! 1. [`get_consensus_command`](ConsensusState::get_consensus_command):
//!    what a miner should do next and when
//! 2. [`get_consensus_extra_data`](ConsensusState::get_consensus_extra_data):
//!    the header information for that behaviour
//! 3. [`generate_consensus_transaction`](ConsensusState::generate_consensus_transaction):
//!    the transaction carried by the block
//! 4. [`validate_consensus_before_execution`](ConsensusState::validate_consensus_before_execution)
//! 5. [`process_consensus_transaction`](ConsensusState::process_consensus_transaction):
//!    the only call that writes the store
//! 6. [`validate_consensus_after_execution`](ConsensusState::validate_consensus_after_execution)
//!
//! Header generation lives in `extra_data.rs` and processing in
//! `process.rs`; both are further `impl` blocks of the same type.

use crate::behaviour::{BehaviourScheduler, ChainPolicy};
use crate::command::{is_solitary_miner, CommandArranger, MiningLimits};
use crate::mining_status::{maximum_blocks_count, MaximumBlocksCount};
use crate::store::ConsensusStateStore;
use crate::transition::TransitionParams;
use crate::validation::{validate_after_execution, ValidationContext, ValidationPipeline};
use crate::{AedposConfig, ChainType, ConsensusError, ValidationError};
use aedpos_core::ElectionProvider;
use aedpos_types::{
    Behaviour, BlockContext, ConsensusCommand, HeaderInformation, MinerList, Pubkey, Round, Timestamp,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// AEDPoS consensus state for a single chain.
pub struct ConsensusState {
    pub(crate) config: AedposConfig,

    /// Round history and scalar pointers. Written only by genesis and
    /// block processing.
    pub(crate) store: ConsensusStateStore,

    /// Consulted for the miners of the next term.
    pub(crate) election: Arc<dyn ElectionProvider>,
}

impl std::fmt::Debug for ConsensusState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusState")
            .field("config", &self.config)
            .field("current_round_number", &self.store.current_round_number())
            .field("current_term_number", &self.store.current_term_number())
            .finish_non_exhaustive()
    }
}

impl ConsensusState {
    /// Create an uninitialized state. Fails on an invalid config.
    pub fn new(config: AedposConfig, election: Arc<dyn ElectionProvider>) -> Result<Self, ConsensusError> {
        config.validate()?;
        Ok(Self {
            config,
            store: ConsensusStateStore::new(),
            election,
        })
    }

    /// Seed the store with the genesis round (term 1, round 1).
    pub fn first_round(&mut self, round: Round) -> Result<(), ConsensusError> {
        if round.round_number != 1 || round.term_number != 1 {
            return Err(ConsensusError::Apply(format!(
                "genesis round must be round 1 of term 1, got round {} of term {}",
                round.round_number, round.term_number
            )));
        }
        if round.miners.is_empty() {
            return Err(ConsensusError::Apply("genesis round has no miners".to_string()));
        }
        round
            .check_time_slots()
            .map_err(|e| ConsensusError::Apply(e.to_string()))?;

        let mining_interval_ms = if round.miners.len() > 1 {
            round.mining_interval()
        } else {
            self.config.mining_interval_ms
        };
        if mining_interval_ms != self.config.mining_interval_ms {
            warn!(
                round_interval = mining_interval_ms,
                config_interval = self.config.mining_interval_ms,
                "Genesis round interval differs from config"
            );
        }

        info!(
            miners = round.miners.len(),
            mining_interval_ms,
            start = %round.round_start_time(),
            "Initialized consensus from genesis round"
        );
        self.store.initialize(round, mining_interval_ms)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Views
    // ═══════════════════════════════════════════════════════════════════════

    pub fn config(&self) -> &AedposConfig {
        &self.config
    }

    pub fn store(&self) -> &ConsensusStateStore {
        &self.store
    }

    pub fn is_initialized(&self) -> bool {
        self.store.is_initialized()
    }

    pub fn current_round(&self) -> Result<&Round, ConsensusError> {
        self.store.current_round()
    }

    pub fn previous_round(&self) -> Option<&Round> {
        self.store.previous_round()
    }

    pub fn round(&self, round_number: i64) -> Result<&Round, ConsensusError> {
        self.store
            .round(round_number)
            .ok_or(ConsensusError::RoundNotFound(round_number))
    }

    pub fn current_round_number(&self) -> i64 {
        self.store.current_round_number()
    }

    pub fn current_term_number(&self) -> i64 {
        self.store.current_term_number()
    }

    pub fn current_miner_list(&self) -> Option<&MinerList> {
        self.store.current_miner_list()
    }

    pub fn miner_list_of_term(&self, term_number: i64) -> Option<&MinerList> {
        self.store.miner_list_of_term(term_number)
    }

    pub fn first_round_number_of_term(&self, term_number: i64) -> Option<i64> {
        self.store.first_round_number_of_term(term_number)
    }

    /// Miners that produced their normal block in `round_number`, recorded
    /// when that round ended.
    pub fn mined_miner_list(&self, round_number: i64) -> Option<&MinerList> {
        self.store.mined_miner_list(round_number)
    }

    /// Confirmed LIB height and the round it was computed for.
    pub fn irreversible_block(&self) -> Result<(i64, i64), ConsensusError> {
        let round = self.store.current_round()?;
        Ok((
            round.confirmed_irreversible_block_height,
            round.confirmed_irreversible_block_round_number,
        ))
    }

    /// Block budget of the current slot (GetMaximumBlocksCount), never
    /// below 1.
    pub fn get_maximum_blocks_count(&self) -> Result<i32, ConsensusError> {
        Ok(self.evaluate_mining_status()?.count.max(1))
    }

    pub(crate) fn evaluate_mining_status(&self) -> Result<MaximumBlocksCount, ConsensusError> {
        let current = self.store.current_round()?;
        Ok(maximum_blocks_count(
            current,
            self.store.mined_miner_list(current.round_number - 1),
            self.store.mined_miner_list(current.round_number - 2),
            self.config.maximum_tiny_blocks_count,
        ))
    }

    pub(crate) fn chain_policy(&self) -> ChainPolicy {
        match self.config.chain_type {
            ChainType::MainChain => ChainPolicy::MainChain {
                blockchain_start: self.store.blockchain_start_timestamp(),
                period_seconds: self.config.period_seconds,
            },
            ChainType::SideChain => ChainPolicy::SideChain,
        }
    }

    pub(crate) fn transition_params(&self, now: Timestamp) -> TransitionParams {
        TransitionParams {
            mining_interval_ms: self.store.mining_interval_ms(),
            now,
            blockchain_start: self.store.blockchain_start_timestamp(),
            missed_reveal_penalty: self.config.missed_reveal_penalty,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Side chain
    // ═══════════════════════════════════════════════════════════════════════

    /// Record the main chain's round number and miners. Returns whether the
    /// information was newer than what is already mirrored.
    ///
    /// The mirrored list takes effect at this chain's next round change.
    pub fn update_main_chain_information(
        &mut self,
        round_number: i64,
        miners: MinerList,
    ) -> Result<bool, ConsensusError> {
        if self.config.chain_type != ChainType::SideChain {
            return Err(ConsensusError::Apply(
                "only side chains mirror main chain miners".to_string(),
            ));
        }
        if miners.is_empty() {
            return Err(ConsensusError::Apply("mirrored miner list is empty".to_string()));
        }
        let miners_count = miners.len();
        let updated = self.store.set_main_chain_information(round_number, miners);
        if updated {
            info!(round_number, miners = miners_count, "Mirrored main chain information");
        } else {
            debug!(
                round_number,
                mirrored = self.store.main_chain_round_number(),
                "Ignored stale main chain information"
            );
        }
        Ok(updated)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Command
    // ═══════════════════════════════════════════════════════════════════════

    /// What `pubkey` should do next, and when (GetConsensusCommand).
    ///
    /// Non-miners, miners with nothing to do and miners mining alone get the
    /// invalid command.
    pub fn get_consensus_command(&self, pubkey: &Pubkey, now: Timestamp) -> Result<ConsensusCommand, ConsensusError> {
        let current = self.store.current_round()?;
        if !current.is_in_miner_list(pubkey) {
            debug!(pubkey = %pubkey, round_number = current.round_number, "Not a miner of the current round");
            return Ok(ConsensusCommand::invalid());
        }

        let budget = self.get_maximum_blocks_count()?;
        let mut behaviour = BehaviourScheduler::new(current, pubkey, budget, now, self.chain_policy())
            .with_termination_policy(self.config.termination_policy)
            .behaviour();

        if matches!(behaviour, Behaviour::UpdateValue | Behaviour::TinyBlock)
            && self.continuous_budget_spent(current, pubkey)
        {
            debug!(pubkey = %pubkey, "Continuous block budget spent, terminating round instead");
            behaviour = Behaviour::NextRound;
        }

        if behaviour == Behaviour::Nothing {
            return Ok(ConsensusCommand::invalid());
        }

        let previous = self.store.round(current.round_number - 1);
        let before_previous = self.store.round(current.round_number - 2);
        if is_solitary_miner(current, previous, before_previous, pubkey) {
            warn!(
                pubkey = %pubkey,
                round_number = current.round_number,
                "Only miner producing blocks for two rounds, stopping"
            );
            return Ok(ConsensusCommand::invalid());
        }

        let mining_interval_ms = self.store.mining_interval_ms();
        let arranger = CommandArranger {
            round: current,
            pubkey,
            now,
            mining_interval_ms,
            maximum_blocks_count: budget,
            tiny_block_minimum_interval_ms: self.config.tiny_block_minimum_interval_ms,
            limits: MiningLimits::new(mining_interval_ms, self.config.maximum_tiny_blocks_count),
        };
        Ok(arranger.arrange(behaviour))
    }

    fn continuous_budget_spent(&self, current: &Round, pubkey: &Pubkey) -> bool {
        if current.round_number <= 2 || current.miners.len() == 1 {
            return false;
        }
        self.store
            .latest_provider()
            .is_some_and(|latest| &latest.pubkey == pubkey && latest.blocks_count <= 0)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Validation
    // ═══════════════════════════════════════════════════════════════════════

    /// Check a block's header against the stored state before its
    /// transactions run.
    pub fn validate_consensus_before_execution(
        &self,
        header: &HeaderInformation,
        block: &BlockContext,
    ) -> Result<(), ValidationError> {
        let base = self
            .store
            .current_round()
            .map_err(|e| ValidationError::StructuralMismatch(e.to_string()))?;

        if header.sender != block.sender {
            return Err(ValidationError::PermissionDenied(format!(
                "header sender {} did not sign the block, {} did",
                header.sender, block.sender
            )));
        }

        let recovered_in_round;
        let recovered = match header.behaviour {
            Behaviour::UpdateValue => {
                recovered_in_round = base.recover_from_update_value(&header.round, &header.sender);
                &recovered_in_round
            }
            Behaviour::TinyBlock => {
                recovered_in_round = base.recover_from_tiny_block(&header.round, &header.sender);
                &recovered_in_round
            }
            Behaviour::NextRound | Behaviour::NextTerm | Behaviour::Nothing => &header.round,
        };
        let victories = (header.behaviour == Behaviour::NextTerm).then(|| self.election.victories());

        let ctx = ValidationContext {
            sender: &header.sender,
            behaviour: header.behaviour,
            provided: &header.round,
            base,
            recovered,
            previous: self.store.previous_round(),
            is_first_round_of_current_term: self.store.is_first_round_of_current_term(),
            latest_provider: self.store.latest_provider(),
            block_time: block.time,
            chain_type: self.config.chain_type,
            main_chain_miner_list: self.store.main_chain_miner_list(),
            victories: victories.as_ref(),
            round_identity: self.config.time_slot_check,
            termination: self.config.termination_policy,
        };
        ValidationPipeline::for_behaviour(header.behaviour).run(&ctx)
    }

    /// Compare the header's round with the stored round once the block's
    /// consensus transaction has been processed.
    pub fn validate_consensus_after_execution(&self, header: &HeaderInformation) -> Result<(), ValidationError> {
        let stored = self
            .store
            .current_round()
            .map_err(|e| ValidationError::StructuralMismatch(e.to_string()))?;
        validate_after_execution(stored, header)
    }
}
