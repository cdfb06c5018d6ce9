//! Persisted consensus state: round history plus scalar pointers.

use crate::ConsensusError;
use aedpos_types::{MinerList, Pubkey, Round, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Who produced the latest block and how many more blocks in a row they may
/// still produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestProviderToTinyBlocksCount {
    pub pubkey: Pubkey,
    pub blocks_count: i32,
}

/// Single owner of all persisted consensus state.
///
/// Rounds are keyed by round number and never removed. Reads are public;
/// writes are only reachable from block processing and genesis, so every
/// other component works on immutable snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsensusStateStore {
    rounds: BTreeMap<i64, Round>,

    current_round_number: i64,
    current_term_number: i64,

    /// Term number -> first round number of that term.
    first_round_number_of_term: BTreeMap<i64, i64>,

    /// Term number -> miners of that term.
    miner_lists: BTreeMap<i64, MinerList>,

    /// Round number -> miners that produced their normal block in it.
    mined_miner_lists: BTreeMap<i64, MinerList>,

    /// Side-chain mirror of the main chain.
    main_chain_round_number: i64,
    main_chain_miner_list: Option<MinerList>,

    latest_provider: Option<LatestProviderToTinyBlocksCount>,

    blockchain_start_timestamp: Timestamp,

    is_previous_block_in_severe_status: bool,

    mining_interval_ms: i64,
}

impl ConsensusStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.current_round_number > 0
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Reads
    // ═══════════════════════════════════════════════════════════════════════

    pub fn current_round_number(&self) -> i64 {
        self.current_round_number
    }

    pub fn current_term_number(&self) -> i64 {
        self.current_term_number
    }

    pub fn round(&self, round_number: i64) -> Option<&Round> {
        self.rounds.get(&round_number)
    }

    pub fn current_round(&self) -> Result<&Round, ConsensusError> {
        if !self.is_initialized() {
            return Err(ConsensusError::NotInitialized);
        }
        self.rounds
            .get(&self.current_round_number)
            .ok_or(ConsensusError::RoundNotFound(self.current_round_number))
    }

    /// Round before the current one, if any.
    pub fn previous_round(&self) -> Option<&Round> {
        self.rounds.get(&(self.current_round_number - 1))
    }

    pub fn first_round_number_of_term(&self, term_number: i64) -> Option<i64> {
        self.first_round_number_of_term.get(&term_number).copied()
    }

    /// Whether the current round opened the current term.
    pub fn is_first_round_of_current_term(&self) -> bool {
        self.first_round_number_of_term(self.current_term_number)
            == Some(self.current_round_number)
    }

    pub fn miner_list_of_term(&self, term_number: i64) -> Option<&MinerList> {
        self.miner_lists.get(&term_number)
    }

    pub fn current_miner_list(&self) -> Option<&MinerList> {
        self.miner_lists.get(&self.current_term_number)
    }

    pub fn mined_miner_list(&self, round_number: i64) -> Option<&MinerList> {
        self.mined_miner_lists.get(&round_number)
    }

    pub fn main_chain_round_number(&self) -> i64 {
        self.main_chain_round_number
    }

    pub fn main_chain_miner_list(&self) -> Option<&MinerList> {
        self.main_chain_miner_list.as_ref()
    }

    pub fn latest_provider(&self) -> Option<&LatestProviderToTinyBlocksCount> {
        self.latest_provider.as_ref()
    }

    pub fn blockchain_start_timestamp(&self) -> Timestamp {
        self.blockchain_start_timestamp
    }

    pub fn is_previous_block_in_severe_status(&self) -> bool {
        self.is_previous_block_in_severe_status
    }

    pub fn mining_interval_ms(&self) -> i64 {
        self.mining_interval_ms
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Writes
    // ═══════════════════════════════════════════════════════════════════════

    /// Seed the store with the genesis round.
    pub(crate) fn initialize(&mut self, round: Round, mining_interval_ms: i64) -> Result<(), ConsensusError> {
        if self.is_initialized() {
            return Err(ConsensusError::AlreadyInitialized);
        }
        self.current_round_number = round.round_number;
        self.current_term_number = round.term_number;
        self.first_round_number_of_term
            .insert(round.term_number, round.round_number);
        self.miner_lists.insert(round.term_number, round.miner_list());
        self.mining_interval_ms = mining_interval_ms;
        self.rounds.insert(round.round_number, round);
        Ok(())
    }

    /// Append a new round. Existing rounds are never overwritten.
    pub(crate) fn add_round(&mut self, round: Round) -> Result<(), ConsensusError> {
        if self.rounds.contains_key(&round.round_number) {
            return Err(ConsensusError::RoundAlreadyExists(round.round_number));
        }
        self.rounds.insert(round.round_number, round);
        Ok(())
    }

    /// Replace the current round after an in-round update.
    pub(crate) fn update_current_round(&mut self, round: Round) -> Result<(), ConsensusError> {
        if round.round_number != self.current_round_number {
            return Err(ConsensusError::Apply(format!(
                "round {} is not the current round {}",
                round.round_number, self.current_round_number
            )));
        }
        self.rounds.insert(round.round_number, round);
        Ok(())
    }

    /// Advance the current round number by exactly one.
    pub(crate) fn try_update_round_number(&mut self, round_number: i64) -> Result<(), ConsensusError> {
        if self.current_round_number.checked_add(1) != Some(round_number) {
            return Err(ConsensusError::Apply(format!(
                "round number must advance from {} by one, got {}",
                self.current_round_number, round_number
            )));
        }
        self.current_round_number = round_number;
        Ok(())
    }

    /// Advance the current term number by exactly one.
    pub(crate) fn try_update_term_number(&mut self, term_number: i64) -> Result<(), ConsensusError> {
        if self.current_term_number.checked_add(1) != Some(term_number) {
            return Err(ConsensusError::Apply(format!(
                "term number must advance from {} by one, got {}",
                self.current_term_number, term_number
            )));
        }
        self.current_term_number = term_number;
        Ok(())
    }

    pub(crate) fn set_term_start(&mut self, term_number: i64, round_number: i64, miners: MinerList) {
        self.first_round_number_of_term.insert(term_number, round_number);
        self.miner_lists.insert(term_number, miners);
    }

    /// Replace the miners of a running term (side-chain mirror changes).
    pub(crate) fn set_miner_list(&mut self, term_number: i64, miners: MinerList) {
        self.miner_lists.insert(term_number, miners);
    }

    pub(crate) fn record_mined_miner_list(&mut self, round_number: i64, miners: MinerList) {
        self.mined_miner_lists.insert(round_number, miners);
    }

    /// Mirror newer main-chain facts. Returns whether anything changed.
    pub(crate) fn set_main_chain_information(&mut self, round_number: i64, miners: MinerList) -> bool {
        if round_number <= self.main_chain_round_number {
            return false;
        }
        self.main_chain_round_number = round_number;
        self.main_chain_miner_list = Some(miners);
        true
    }

    pub(crate) fn set_blockchain_start_timestamp(&mut self, timestamp: Timestamp) {
        self.blockchain_start_timestamp = timestamp;
    }

    pub(crate) fn set_previous_block_in_severe_status(&mut self, severe: bool) {
        self.is_previous_block_in_severe_status = severe;
    }

    /// Charge one block to `pubkey`'s continuous-block budget.
    ///
    /// A new producer starts with `maximum_blocks_count - 1` remaining; the
    /// same producer again spends one more.
    pub(crate) fn reset_latest_provider(&mut self, pubkey: &Pubkey, maximum_blocks_count: i32) {
        let next = match self.latest_provider.take() {
            Some(current) if &current.pubkey == pubkey => LatestProviderToTinyBlocksCount {
                pubkey: current.pubkey,
                blocks_count: current.blocks_count.saturating_sub(1),
            },
            _ => LatestProviderToTinyBlocksCount {
                pubkey: pubkey.clone(),
                blocks_count: maximum_blocks_count.saturating_sub(1),
            },
        };
        self.latest_provider = Some(next);
    }
}
