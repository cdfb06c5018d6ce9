//! Behaviour scheduling: what a miner should do at a given moment.

use crate::TerminationPolicy;
use aedpos_types::{Behaviour, Pubkey, Round, Timestamp};
use tracing::debug;

/// How a round terminates on this chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainPolicy {
    /// Terms change when most miners' latest blocks fall past the current
    /// term's wall-clock period.
    MainChain {
        blockchain_start: Timestamp,
        period_seconds: i64,
    },
    /// No terms of its own.
    SideChain,
}

/// Per-miner decision function over a snapshot of the current round.
///
/// Pure: the same round, key, block budget and time always produce the
/// same behaviour.
#[derive(Debug, Clone)]
pub struct BehaviourScheduler<'a> {
    round: &'a Round,
    pubkey: &'a Pubkey,
    maximum_blocks_count: i32,
    now: Timestamp,
    chain: ChainPolicy,
    termination: TerminationPolicy,
}

impl<'a> BehaviourScheduler<'a> {
    /// `maximum_blocks_count` is floored at 1.
    pub fn new(
        round: &'a Round,
        pubkey: &'a Pubkey,
        maximum_blocks_count: i32,
        now: Timestamp,
        chain: ChainPolicy,
    ) -> Self {
        Self {
            round,
            pubkey,
            maximum_blocks_count: maximum_blocks_count.max(1),
            now,
            chain,
            termination: TerminationPolicy::AnyMinerAfterSlot,
        }
    }

    pub fn with_termination_policy(mut self, termination: TerminationPolicy) -> Self {
        self.termination = termination;
        self
    }

    pub fn behaviour(&self) -> Behaviour {
        let Some(miner) = self.round.miner(self.pubkey) else {
            return Behaviour::Nothing;
        };
        let slot_passed = self.round.is_time_slot_passed(self.pubkey, self.now);
        let produced = i32::try_from(miner.actual_mining_times.len()).unwrap_or(i32::MAX);

        let behaviour = if !miner.has_mined() {
            match self.behaviour_in_new_round(miner.order, produced, slot_passed) {
                Behaviour::Nothing => self.terminate(),
                behaviour => behaviour,
            }
        } else if !slot_passed {
            if produced < self.maximum_blocks_count {
                Behaviour::TinyBlock
            } else if self.has_bonus_tiny_block(produced) {
                Behaviour::TinyBlock
            } else {
                self.terminate()
            }
        } else {
            self.terminate()
        };

        debug!(
            pubkey = %self.pubkey,
            round_number = self.round.round_number,
            produced,
            slot_passed,
            behaviour = %behaviour,
            "Scheduled behaviour"
        );
        behaviour
    }

    /// Decision for a miner that has not published this round.
    fn behaviour_in_new_round(&self, order: i32, produced: i32, slot_passed: bool) -> Behaviour {
        // Nobody mines round 1 before its first miner does.
        if self.round.round_number == 1
            && order != 1
            && self.round.first_miner().is_some_and(|m| !m.has_mined())
        {
            return Behaviour::NextRound;
        }

        if self.is_previous_extra_block_producer()
            && self.now < self.round.round_start_time()
            && produced < self.maximum_blocks_count
        {
            return Behaviour::TinyBlock;
        }

        if slot_passed {
            Behaviour::Nothing
        } else {
            Behaviour::UpdateValue
        }
    }

    /// One extra tiny block for the miner that terminated the previous round,
    /// covering the blocks it produced before this round started.
    fn has_bonus_tiny_block(&self, produced: i32) -> bool {
        if !self.is_previous_extra_block_producer() || self.round.is_miner_list_just_changed {
            return false;
        }
        let start = self.round.round_start_time();
        let blocks_before_round = self
            .round
            .miner(self.pubkey)
            .map(|m| m.actual_mining_times.iter().filter(|t| **t <= start).count())
            .unwrap_or(0);
        let blocks_before_round = i32::try_from(blocks_before_round).unwrap_or(i32::MAX);
        produced.saturating_add(1) < self.maximum_blocks_count.saturating_add(blocks_before_round)
    }

    fn is_previous_extra_block_producer(&self) -> bool {
        self.round.extra_block_producer_of_previous_round.as_ref() == Some(self.pubkey)
    }

    fn terminate(&self) -> Behaviour {
        if !may_terminate(self.round, self.pubkey, self.now, self.termination) {
            return Behaviour::Nothing;
        }
        match self.chain {
            ChainPolicy::SideChain => Behaviour::NextRound,
            ChainPolicy::MainChain {
                blockchain_start,
                period_seconds,
            } => {
                if self.round.round_number == 1
                    || self.round.miners.len() == 1
                    || !need_to_change_term(self.round, blockchain_start, period_seconds)
                {
                    Behaviour::NextRound
                } else {
                    Behaviour::NextTerm
                }
            }
        }
    }
}

/// Whether `pubkey` may produce a round-terminating block at `now`.
///
/// Under [`TerminationPolicy::ExtraBlockProducerOnly`] other miners are
/// allowed only after a full round length has passed since the extra block
/// slot.
pub fn may_terminate(round: &Round, pubkey: &Pubkey, now: Timestamp, policy: TerminationPolicy) -> bool {
    match policy {
        TerminationPolicy::AnyMinerAfterSlot => true,
        TerminationPolicy::ExtraBlockProducerOnly => {
            if round.round_number == 1 {
                return true;
            }
            if round
                .extra_block_producer()
                .is_some_and(|m| &m.pubkey == pubkey)
            {
                return true;
            }
            let round_length = round
                .mining_interval()
                .saturating_mul(i64::from(round.miners_count()) + 1);
            now >= round.extra_block_mining_time().add_millis(round_length)
        }
    }
}

/// Whether enough miners have produced blocks past the current term's
/// period for the term to change.
pub fn need_to_change_term(round: &Round, blockchain_start: Timestamp, period_seconds: i64) -> bool {
    if period_seconds <= 0 {
        return false;
    }
    let past_period = round
        .miners
        .values()
        .filter_map(|m| m.latest_actual_mining_time())
        .filter(|t| t.seconds_since(blockchain_start) / period_seconds != round.term_number - 1)
        .count();
    i32::try_from(past_period).unwrap_or(i32::MAX) >= round.miners_count_of_consent()
}
