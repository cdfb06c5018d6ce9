//! Round model: the ordered miner slots of one mining round.

use crate::{abs_modulus, Hash, MinerList, Pubkey, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One miner's slot in a round.
///
/// Commitments follow a commit-reveal chain: `out_value = H(in_value)` is
/// published while mining in round R, and `in_value` itself is published as
/// `previous_in_value` in round R+1.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MinerInRound {
    pub pubkey: Pubkey,

    /// 1-based slot position.
    pub order: i32,

    pub expected_mining_time: Option<Timestamp>,

    /// Only ever set on the miner's own node; never persisted in shared state.
    pub in_value: Option<Hash>,

    /// Commitment, `H(in_value)`.
    pub out_value: Option<Hash>,

    /// Seed for the next-round order; see [`Round::calculate_signature`].
    pub signature: Option<Hash>,

    /// In-value of the previous round. `None` or [`Hash::EMPTY`] mean
    /// "not revealed".
    pub previous_in_value: Option<Hash>,

    /// Order derived from `signature`. Zero means the miner has not mined
    /// in this round.
    pub supposed_order_of_next_round: i32,

    /// `supposed_order_of_next_round` after collision tuning.
    pub final_order_of_next_round: i32,

    pub is_extra_block_producer: bool,

    pub produced_blocks: i64,

    /// Blocks this miner produced in this round, the UpdateValue block
    /// included. A round change block opens the count of the new round at 1.
    pub produced_tiny_blocks: i64,

    pub missed_time_slots: i64,

    /// Every time this miner produced a block in this round, in order.
    pub actual_mining_times: Vec<Timestamp>,

    /// Shares of this miner's in-value, keyed by the peer they are for.
    pub encrypted_pieces: BTreeMap<Pubkey, Vec<u8>>,

    /// Shares of this miner's previous in-value that peers decrypted,
    /// keyed by the decrypting peer.
    pub decrypted_pieces: BTreeMap<Pubkey, Vec<u8>>,

    pub implied_irreversible_block_height: i64,
}

impl MinerInRound {
    /// Empty slot for `pubkey` at `order`.
    pub fn new(pubkey: Pubkey, order: i32) -> Self {
        Self {
            pubkey,
            order,
            ..Default::default()
        }
    }

    /// Whether this miner has published a commitment in this round.
    pub fn has_mined(&self) -> bool {
        self.out_value.is_some()
    }

    /// Revealed previous in-value, treating the empty sentinel as absent.
    pub fn revealed_previous_in_value(&self) -> Option<Hash> {
        self.previous_in_value.filter(|v| !v.is_zero())
    }

    pub fn latest_actual_mining_time(&self) -> Option<Timestamp> {
        self.actual_mining_times.last().copied()
    }
}

/// One mining round.
///
/// Miners are keyed by public key; `order` inside each slot is the
/// scheduling position.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Round {
    pub round_number: i64,
    pub term_number: i64,
    pub miners: BTreeMap<Pubkey, MinerInRound>,
    pub extra_block_producer_of_previous_round: Option<Pubkey>,
    pub confirmed_irreversible_block_height: i64,
    pub confirmed_irreversible_block_round_number: i64,
    pub is_miner_list_just_changed: bool,

    /// Seconds since the blockchain started, as of this round's creation.
    pub blockchain_age: i64,

    /// Identity used when some expected mining times are missing
    /// (header-simplified rounds).
    pub round_id_for_validation: i64,
}

impl Round {
    /// Interval reported for rounds too small to derive one.
    pub const DEFAULT_MINING_INTERVAL_MS: i64 = 4000;

    pub fn miners_count(&self) -> i32 {
        i32::try_from(self.miners.len()).unwrap_or(i32::MAX)
    }

    pub fn miner(&self, pubkey: &Pubkey) -> Option<&MinerInRound> {
        self.miners.get(pubkey)
    }

    pub fn miner_mut(&mut self, pubkey: &Pubkey) -> Option<&mut MinerInRound> {
        self.miners.get_mut(pubkey)
    }

    pub fn is_in_miner_list(&self, pubkey: &Pubkey) -> bool {
        self.miners.contains_key(pubkey)
    }

    /// Miners sorted by slot order.
    pub fn miners_by_order(&self) -> Vec<&MinerInRound> {
        let mut miners: Vec<_> = self.miners.values().collect();
        miners.sort_by_key(|m| m.order);
        miners
    }

    /// Miner list of this round, in slot order.
    pub fn miner_list(&self) -> MinerList {
        MinerList::new(self.miners_by_order().into_iter().map(|m| m.pubkey.clone()))
    }

    /// Cheap fingerprint: sum of expected mining times in seconds.
    ///
    /// Falls back to `round_id_for_validation` if any miner lacks an
    /// expected mining time.
    pub fn round_id(&self) -> Result<i64, RoundError> {
        if self
            .miners
            .values()
            .any(|m| m.expected_mining_time.is_none())
        {
            return Ok(self.round_id_for_validation);
        }
        self.miners
            .values()
            .filter_map(|m| m.expected_mining_time)
            .try_fold(0i64, |acc, t| acc.checked_add(t.seconds()))
            .ok_or(RoundError::Overflow { what: "round id" })
    }

    /// Gap in milliseconds between the order-1 and order-2 slots.
    pub fn mining_interval(&self) -> i64 {
        if self.miners.len() <= 1 {
            return Self::DEFAULT_MINING_INTERVAL_MS;
        }
        let first = self.miner_at_order(1).and_then(|m| m.expected_mining_time);
        let second = self.miner_at_order(2).and_then(|m| m.expected_mining_time);
        match (first, second) {
            (Some(a), Some(b)) => b.millis_since(a),
            _ => 0,
        }
    }

    /// Verify the expected mining times are evenly spread.
    ///
    /// Each gap between consecutive slots must stay within 100% of the
    /// first gap, which itself must be positive.
    pub fn check_time_slots(&self) -> Result<(), RoundError> {
        let miners = self.miners_by_order();
        if miners.len() <= 1 {
            return Ok(());
        }

        let mut times = Vec::with_capacity(miners.len());
        for miner in &miners {
            let time = miner
                .expected_mining_time
                .ok_or_else(|| RoundError::MissingExpectedMiningTime {
                    pubkey: miner.pubkey.clone(),
                })?;
            times.push(time);
        }

        let base = times[1].millis_since(times[0]);
        if base <= 0 {
            return Err(RoundError::NonPositiveMiningInterval { interval_ms: base });
        }

        for i in 1..times.len() - 1 {
            let gap = times[i + 1].millis_since(times[i]);
            if gap.saturating_sub(base).saturating_abs() > base {
                return Err(RoundError::TimeSlotsDiverge {
                    pubkey: miners[i + 1].pubkey.clone(),
                    gap_ms: gap,
                    base_ms: base,
                });
            }
        }
        Ok(())
    }

    pub fn miner_at_order(&self, order: i32) -> Option<&MinerInRound> {
        self.miners.values().find(|m| m.order == order)
    }

    pub fn first_miner(&self) -> Option<&MinerInRound> {
        self.miner_at_order(1)
    }

    /// First miner, by order, that has published a commitment.
    pub fn first_actual_miner(&self) -> Option<&MinerInRound> {
        self.miners_by_order().into_iter().find(|m| m.has_mined())
    }

    pub fn extra_block_producer(&self) -> Option<&MinerInRound> {
        self.miners.values().find(|m| m.is_extra_block_producer)
    }

    /// Expected mining time of the order-1 slot.
    pub fn round_start_time(&self) -> Timestamp {
        self.first_miner()
            .and_then(|m| m.expected_mining_time)
            .unwrap_or_default()
    }

    /// One interval after the last regular slot.
    pub fn extra_block_mining_time(&self) -> Timestamp {
        self.miners_by_order()
            .last()
            .and_then(|m| m.expected_mining_time)
            .unwrap_or_default()
            .add_millis(self.mining_interval())
    }

    pub fn expected_mining_time(&self, pubkey: &Pubkey) -> Option<Timestamp> {
        self.miners.get(pubkey).and_then(|m| m.expected_mining_time)
    }

    /// Miners that produced their normal block in this round.
    pub fn mined_miners(&self) -> Vec<&MinerInRound> {
        self.miners
            .values()
            .filter(|m| m.supposed_order_of_next_round != 0)
            .collect()
    }

    pub fn not_mined_miners(&self) -> Vec<&MinerInRound> {
        self.miners
            .values()
            .filter(|m| m.supposed_order_of_next_round == 0)
            .collect()
    }

    /// Two thirds plus one.
    pub fn miners_count_of_consent(&self) -> i32 {
        self.miners_count() * 2 / 3 + 1
    }

    /// Sum of blocks produced by every miner.
    pub fn get_mined_blocks(&self) -> i64 {
        self.miners
            .values()
            .fold(0i64, |acc, m| acc.saturating_add(m.produced_blocks))
    }

    /// Miners whose missed slot count reached `threshold`.
    pub fn detect_evil_miners(&self, threshold: i64) -> BTreeSet<Pubkey> {
        self.miners
            .values()
            .filter(|m| m.missed_time_slots >= threshold)
            .map(|m| m.pubkey.clone())
            .collect()
    }

    /// Implied irreversible heights of the given miners, ascending.
    ///
    /// Keys not present in this round and miners that never implied a
    /// height are skipped.
    pub fn sorted_implied_irreversible_block_heights<'a>(
        &self,
        pubkeys: impl IntoIterator<Item = &'a Pubkey>,
    ) -> Vec<i64> {
        let mut heights: Vec<i64> = pubkeys
            .into_iter()
            .filter_map(|k| self.miners.get(k))
            .map(|m| m.implied_irreversible_block_height)
            .filter(|h| *h > 0)
            .collect();
        heights.sort_unstable();
        heights
    }

    /// Whether `pubkey`'s slot in this round is already over at `now`.
    ///
    /// Round 1 has no reliable expected times, so the elapsed time since
    /// the first miner actually started decides which order is due.
    pub fn is_time_slot_passed(&self, pubkey: &Pubkey, now: Timestamp) -> bool {
        let Some(miner) = self.miners.get(pubkey) else {
            return false;
        };
        let interval = self.mining_interval();

        if self.round_number != 1 {
            return match miner.expected_mining_time {
                Some(expected) => expected.add_millis(interval) < now,
                None => false,
            };
        }

        let Some(started) = self
            .first_miner()
            .and_then(|m| m.actual_mining_times.first().copied())
        else {
            return false;
        };
        let slot_seconds = (interval / 1000).max(1);
        let expected_order = now.seconds_since(started) / slot_seconds + 1;
        i64::from(miner.order) < expected_order
    }

    /// Fold every existing signature into `in_value`.
    ///
    /// Missing signatures count as [`Hash::ZERO`]. The result depends on
    /// which signatures are populated, so only call this against a round
    /// whose signatures are final.
    pub fn calculate_signature(&self, in_value: &Hash) -> Hash {
        let folded = self.miners.values().fold(Hash::ZERO, |acc, m| {
            Hash::xor_and_compute(&acc, &m.signature.unwrap_or(Hash::ZERO))
        });
        Hash::xor_and_compute(in_value, &folded)
    }

    /// Slot for a miner that missed its own time.
    ///
    /// The extra-block producer keeps the extra block slot while it is
    /// still reachable; everyone else is placed at their order inside the
    /// next virtual round that starts after `now`.
    pub fn arrange_abnormal_mining_time(&self, pubkey: &Pubkey, now: Timestamp) -> Option<Timestamp> {
        let miner = self.miners.get(pubkey)?;
        let interval = self.mining_interval();

        if miner.is_extra_block_producer {
            let extra = self.extra_block_mining_time();
            if extra.add_millis(interval).millis_since(now) > 0 {
                return Some(extra);
            }
        }

        let round_length = interval.checked_mul(i64::from(self.miners_count()) + 1)?;
        if round_length <= 0 {
            return None;
        }
        let start = self.round_start_time();
        let missed_rounds = now.millis_since(start) / round_length;
        let future_start = start.add_millis(round_length.saturating_mul(missed_rounds.saturating_add(1)));
        Some(future_start.add_millis(interval.saturating_mul(i64::from(miner.order))))
    }

    /// Next-round order implied by a signature in a round of `miners_count`.
    pub fn order_from_signature(signature: &Hash, miners_count: i32) -> i32 {
        abs_modulus(signature.to_i64(), miners_count) + 1
    }
}

/// Round structure errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoundError {
    #[error("Miner {pubkey} has no expected mining time")]
    MissingExpectedMiningTime { pubkey: Pubkey },

    #[error("Mining interval must be positive, got {interval_ms}ms")]
    NonPositiveMiningInterval { interval_ms: i64 },

    #[error("Time slot of {pubkey} is {gap_ms}ms after the previous one, base interval is {base_ms}ms")]
    TimeSlotsDiverge {
        pubkey: Pubkey,
        gap_ms: i64,
        base_ms: i64,
    },

    #[error("Arithmetic overflow computing {what}")]
    Overflow { what: &'static str },
}
