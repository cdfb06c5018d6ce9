//! Chain health and the per-slot block budget derived from it.

use aedpos_types::{MinerList, Round};
use std::collections::BTreeSet;
use std::fmt;

/// Rounds the LIB may lag before the chain counts as abnormal.
const ABNORMAL_THRESHOLD_ROUNDS: i64 = 2;

/// Lower bound of the severe threshold, in rounds.
const MINIMUM_SEVERE_THRESHOLD_ROUNDS: i64 = 8;

/// How far the current round is ahead of the LIB round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiningStatus {
    Normal,
    /// Lagging: the block budget shrinks with the lag.
    Abnormal,
    /// Lagging badly: one block per slot until the LIB catches up.
    Severe,
}

impl MiningStatus {
    pub fn type_name(&self) -> &'static str {
        match self {
            MiningStatus::Normal => "Normal",
            MiningStatus::Abnormal => "Abnormal",
            MiningStatus::Severe => "Severe",
        }
    }
}

impl fmt::Display for MiningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Classifies chain health from the LIB round and the current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiningStatusEvaluator {
    lib_round_number: i64,
    current_round_number: i64,
    maximum_tiny_blocks_count: i32,
}

impl MiningStatusEvaluator {
    pub fn new(lib_round_number: i64, current_round_number: i64, maximum_tiny_blocks_count: i32) -> Self {
        Self {
            lib_round_number,
            current_round_number,
            maximum_tiny_blocks_count,
        }
    }

    pub fn severe_status_rounds_threshold(&self) -> i64 {
        MINIMUM_SEVERE_THRESHOLD_ROUNDS.max(i64::from(self.maximum_tiny_blocks_count))
    }

    pub fn status(&self) -> MiningStatus {
        let severe = self.lib_round_number.saturating_add(self.severe_status_rounds_threshold());
        if self.current_round_number >= severe {
            MiningStatus::Severe
        } else if self.lib_round_number.saturating_add(ABNORMAL_THRESHOLD_ROUNDS) < self.current_round_number {
            MiningStatus::Abnormal
        } else {
            MiningStatus::Normal
        }
    }
}

/// Block budget for the current slot and the status it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaximumBlocksCount {
    pub count: i32,
    pub status: MiningStatus,
}

/// Block budget for `current`.
///
/// `mined_previous` and `mined_before_previous` are the miners that mined
/// in the two rounds before `current`; an abnormal chain only grants blocks
/// in proportion to the miners active in both.
pub fn maximum_blocks_count(
    current: &Round,
    mined_previous: Option<&MinerList>,
    mined_before_previous: Option<&MinerList>,
    maximum_tiny_blocks_count: i32,
) -> MaximumBlocksCount {
    let lib_round_number = current.confirmed_irreversible_block_round_number;
    if lib_round_number == 0 {
        return MaximumBlocksCount {
            count: maximum_tiny_blocks_count.max(1),
            status: MiningStatus::Normal,
        };
    }

    let evaluator = MiningStatusEvaluator::new(lib_round_number, current.round_number, maximum_tiny_blocks_count);
    let status = evaluator.status();
    let count = match status {
        MiningStatus::Normal => maximum_tiny_blocks_count.max(1),
        MiningStatus::Severe => 1,
        MiningStatus::Abnormal => {
            let previous: BTreeSet<_> = mined_previous.map(|l| l.pubkeys.iter().collect()).unwrap_or_default();
            let steady = mined_before_previous
                .map(|l| l.pubkeys.iter().filter(|k| previous.contains(k)).count())
                .unwrap_or(0);
            let steady = i64::try_from(steady).unwrap_or(i64::MAX);

            let remaining_rounds = evaluator.severe_status_rounds_threshold()
                - (current.round_number - lib_round_number);
            let factor = steady.saturating_mul(remaining_rounds);
            let miners = i64::from(current.miners_count().max(1));
            let ceiling = (factor + miners - 1).div_euclid(miners);
            let count = ceiling.min(i64::from(maximum_tiny_blocks_count)).max(1);
            i32::try_from(count).unwrap_or(1)
        }
    };
    MaximumBlocksCount { count, status }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aedpos_test_helpers::{first_round, miner_keys};
    use aedpos_types::Timestamp;

    #[test]
    fn test_status_boundaries() {
        let status = |lib, current| MiningStatusEvaluator::new(lib, current, 8).status();
        assert_eq!(status(10, 12), MiningStatus::Normal);
        assert_eq!(status(10, 13), MiningStatus::Abnormal);
        assert_eq!(status(10, 17), MiningStatus::Abnormal);
        assert_eq!(status(10, 18), MiningStatus::Severe);

        // A larger tiny block budget widens the abnormal band.
        assert_eq!(MiningStatusEvaluator::new(10, 18, 12).status(), MiningStatus::Abnormal);
        assert_eq!(MiningStatusEvaluator::new(10, 22, 12).status(), MiningStatus::Severe);
    }

    #[test]
    fn test_no_lib_round_means_full_budget() {
        let round = first_round(&miner_keys(5), Timestamp::ZERO, 4000);
        let budget = maximum_blocks_count(&round, None, None, 8);
        assert_eq!(budget.count, 8);
        assert_eq!(budget.status, MiningStatus::Normal);
    }

    #[test]
    fn test_abnormal_budget_shrinks_with_lag() {
        let keys = miner_keys(5);
        let mut round = first_round(&keys, Timestamp::ZERO, 4000);
        round.confirmed_irreversible_block_round_number = 10;
        round.round_number = 13;

        let previous = MinerList::new(keys[..4].iter().cloned());
        let before = MinerList::new(keys[1..].iter().cloned());
        // Three miners in both rounds, five rounds left: ceil(3 * 5 / 5) = 3.
        let budget = maximum_blocks_count(&round, Some(&previous), Some(&before), 8);
        assert_eq!(budget.status, MiningStatus::Abnormal);
        assert_eq!(budget.count, 3);

        round.round_number = 17;
        // ceil(3 * 1 / 5) = 1.
        assert_eq!(maximum_blocks_count(&round, Some(&previous), Some(&before), 8).count, 1);

        // Nobody mined in both rounds: still one block.
        round.round_number = 14;
        assert_eq!(maximum_blocks_count(&round, Some(&previous), None, 8).count, 1);
    }

    #[test]
    fn test_abnormal_budget_capped_by_tiny_blocks() {
        let keys = miner_keys(2);
        let mut round = first_round(&keys, Timestamp::ZERO, 4000);
        round.confirmed_irreversible_block_round_number = 10;
        round.round_number = 13;
        let both = MinerList::new(keys.iter().cloned());
        // ceil(2 * 5 / 2) = 5, capped at 4.
        assert_eq!(maximum_blocks_count(&round, Some(&both), Some(&both), 4).count, 4);
    }

    #[test]
    fn test_severe_budget_is_one() {
        let mut round = first_round(&miner_keys(3), Timestamp::ZERO, 4000);
        round.confirmed_irreversible_block_round_number = 1;
        round.round_number = 9;
        let budget = maximum_blocks_count(&round, None, None, 8);
        assert_eq!(budget.status, MiningStatus::Severe);
        assert_eq!(budget.count, 1);
    }
}
