//! Turning a behaviour into a concrete mining command.

use aedpos_types::{Behaviour, ConsensusCommand, MinerInRound, Pubkey, Round, Timestamp};
use tracing::{debug, warn};

/// Time budgets for executing a block, derived from the mining interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiningLimits {
    pub default_block_ms: i64,
    pub last_tiny_block_ms: i64,
    pub last_block_of_term_ms: i64,
}

impl MiningLimits {
    pub fn new(mining_interval_ms: i64, maximum_tiny_blocks_count: i32) -> Self {
        let tiny_slot = mining_interval_ms / i64::from(maximum_tiny_blocks_count.max(1));
        Self {
            default_block_ms: tiny_slot * 3 / 5,
            last_tiny_block_ms: tiny_slot / 2,
            last_block_of_term_ms: mining_interval_ms * 3 / 5,
        }
    }
}

/// Arranges commands for one miner over a snapshot of the current round.
#[derive(Debug, Clone)]
pub struct CommandArranger<'a> {
    pub round: &'a Round,
    pub pubkey: &'a Pubkey,
    pub now: Timestamp,
    pub mining_interval_ms: i64,
    /// Block budget of the current slot.
    pub maximum_blocks_count: i32,
    pub tiny_block_minimum_interval_ms: i64,
    pub limits: MiningLimits,
}

impl<'a> CommandArranger<'a> {
    /// Command for `behaviour`, or the invalid command if it cannot be
    /// arranged.
    pub fn arrange(&self, behaviour: Behaviour) -> ConsensusCommand {
        let Some(miner) = self.round.miner(self.pubkey) else {
            return ConsensusCommand::invalid();
        };
        let command = match behaviour {
            Behaviour::Nothing => None,
            Behaviour::UpdateValue if self.round.round_number == 1 => Some(self.first_round(miner, behaviour)),
            Behaviour::NextRound | Behaviour::NextTerm if self.round.round_number == 1 => {
                Some(self.first_round(miner, behaviour))
            }
            Behaviour::UpdateValue => self.normal_block(miner),
            Behaviour::TinyBlock => self.tiny_block(miner),
            Behaviour::NextRound => self.terminate(false),
            Behaviour::NextTerm => self.terminate(true),
        };

        match command {
            Some(command) => {
                debug!(
                    pubkey = %self.pubkey,
                    behaviour = %command.behaviour,
                    arranged = command.arranged_mining_time.as_millis(),
                    due = command.mining_due_time.as_millis(),
                    "Arranged consensus command"
                );
                command
            }
            None => ConsensusCommand::invalid(),
        }
    }

    /// Round 1 has no trustworthy schedule yet: miners line up behind the
    /// first one by order.
    fn first_round(&self, miner: &MinerInRound, behaviour: Behaviour) -> ConsensusCommand {
        let interval = self.mining_interval_ms;
        let offset = if behaviour == Behaviour::UpdateValue && miner.order == 1 {
            interval
        } else {
            i64::from(miner.order + self.round.miners_count() - 1).saturating_mul(interval)
        };
        let arranged = self.now.add_millis(offset);
        ConsensusCommand {
            behaviour,
            arranged_mining_time: arranged,
            mining_due_time: arranged.add_millis(interval),
            limit_milliseconds_of_mining_block: self.limits.default_block_ms,
        }
    }

    fn normal_block(&self, miner: &MinerInRound) -> Option<ConsensusCommand> {
        let Some(expected) = miner.expected_mining_time else {
            warn!(pubkey = %self.pubkey, "No expected mining time for normal block");
            return None;
        };
        Some(ConsensusCommand {
            behaviour: Behaviour::UpdateValue,
            arranged_mining_time: expected.max(self.now),
            mining_due_time: expected.add_millis(self.mining_interval_ms),
            limit_milliseconds_of_mining_block: self.limits.default_block_ms,
        })
    }

    fn tiny_block(&self, miner: &MinerInRound) -> Option<ConsensusCommand> {
        let interval = self.mining_interval_ms;
        let round_start = self.round.round_start_time();
        let slot_start = if self.now < round_start {
            round_start.add_millis(-interval)
        } else if self.round.round_number == 1 {
            miner.actual_mining_times.first().copied()?
        } else {
            miner.expected_mining_time?
        };
        let slot_end = slot_start.add_millis(interval);

        let arranged = self.now.add_millis(self.tiny_block_minimum_interval_ms);
        if arranged >= slot_end {
            debug!(pubkey = %self.pubkey, "Slot exhausted, terminating instead of tiny block");
            return self.terminate(false);
        }

        let limit = if self.is_last_tiny_block(miner, round_start) {
            self.limits.last_tiny_block_ms
        } else {
            self.limits.default_block_ms
        };
        Some(ConsensusCommand {
            behaviour: Behaviour::TinyBlock,
            arranged_mining_time: arranged,
            mining_due_time: slot_end,
            limit_milliseconds_of_mining_block: limit,
        })
    }

    fn is_last_tiny_block(&self, miner: &MinerInRound, round_start: Timestamp) -> bool {
        let produced = miner.actual_mining_times.len();
        let maximum = usize::try_from(self.maximum_blocks_count.max(1)).unwrap_or(1);
        if self.now < round_start {
            return produced == maximum;
        }
        let before_round = miner
            .actual_mining_times
            .iter()
            .filter(|t| **t <= round_start)
            .count();
        produced == before_round + maximum
    }

    fn terminate(&self, is_new_term: bool) -> Option<ConsensusCommand> {
        let arranged = self
            .round
            .arrange_abnormal_mining_time(self.pubkey, self.now)?;
        Some(ConsensusCommand {
            behaviour: if is_new_term {
                Behaviour::NextTerm
            } else {
                Behaviour::NextRound
            },
            arranged_mining_time: arranged,
            mining_due_time: arranged.add_millis(self.mining_interval_ms),
            limit_milliseconds_of_mining_block: if is_new_term {
                self.limits.last_block_of_term_ms
            } else {
                self.limits.default_block_ms
            },
        })
    }
}

/// Whether `pubkey` has been the only active miner for the last two rounds
/// while nobody mined the current one.
///
/// Such a node is most likely partitioned from the network and should stop
/// extending its own fork. Checked only from round 4 on with more than two
/// miners.
pub fn is_solitary_miner(
    current: &Round,
    previous: Option<&Round>,
    before_previous: Option<&Round>,
    pubkey: &Pubkey,
) -> bool {
    if current.round_number <= 3 || current.miners.len() <= 2 {
        return false;
    }
    if !current.mined_miners().is_empty() {
        return false;
    }
    let only_miner = |round: &Round| {
        let mined = round.mined_miners();
        mined.len() == 1 && &mined[0].pubkey == pubkey
    };
    previous.map_or(true, only_miner) && before_previous.map_or(true, only_miner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aedpos_test_helpers::{first_round, mark_mined, miner_keys, signature_for_order};
    use tracing_test::traced_test;

    const INTERVAL: i64 = 4000;

    fn arranger<'a>(round: &'a Round, pubkey: &'a Pubkey, now: Timestamp) -> CommandArranger<'a> {
        CommandArranger {
            round,
            pubkey,
            now,
            mining_interval_ms: INTERVAL,
            maximum_blocks_count: 8,
            tiny_block_minimum_interval_ms: 50,
            limits: MiningLimits::new(INTERVAL, 8),
        }
    }

    fn round_two(keys: &[Pubkey]) -> Round {
        let mut round = first_round(keys, Timestamp::ZERO, INTERVAL);
        round.round_number = 2;
        round.is_miner_list_just_changed = false;
        round
    }

    #[test]
    fn test_limits() {
        let limits = MiningLimits::new(4000, 8);
        assert_eq!(limits.default_block_ms, 300);
        assert_eq!(limits.last_tiny_block_ms, 250);
        assert_eq!(limits.last_block_of_term_ms, 2400);
    }

    #[traced_test]
    #[test]
    fn test_first_round_offsets() {
        let keys = miner_keys(3);
        let round = first_round(&keys, Timestamp::ZERO, INTERVAL);
        let now = Timestamp(1_000);

        let first = arranger(&round, &keys[0], now).arrange(Behaviour::UpdateValue);
        assert_eq!(first.arranged_mining_time, Timestamp(5_000));
        assert_eq!(first.mining_due_time, Timestamp(9_000));

        // Order 3 of 3: (3 + 3 - 1) * interval.
        let third = arranger(&round, &keys[2], now).arrange(Behaviour::NextRound);
        assert_eq!(third.behaviour, Behaviour::NextRound);
        assert_eq!(third.arranged_mining_time, Timestamp(21_000));
    }

    #[traced_test]
    #[test]
    fn test_normal_block_waits_for_slot() {
        let keys = miner_keys(3);
        let round = round_two(&keys);

        let early = arranger(&round, &keys[1], Timestamp(5_000)).arrange(Behaviour::UpdateValue);
        assert_eq!(early.arranged_mining_time, Timestamp(8_000));
        assert_eq!(early.mining_due_time, Timestamp(12_000));

        let late = arranger(&round, &keys[1], Timestamp(9_000)).arrange(Behaviour::UpdateValue);
        assert_eq!(late.arranged_mining_time, Timestamp(9_000));
    }

    #[traced_test]
    #[test]
    fn test_tiny_block_inside_slot_and_fallback() {
        let keys = miner_keys(3);
        let mut round = round_two(&keys);
        mark_mined(&mut round, &keys[1], signature_for_order(1, 3), Timestamp(8_000));

        let tiny = arranger(&round, &keys[1], Timestamp(8_100)).arrange(Behaviour::TinyBlock);
        assert_eq!(tiny.behaviour, Behaviour::TinyBlock);
        assert_eq!(tiny.arranged_mining_time, Timestamp(8_150));
        assert_eq!(tiny.mining_due_time, Timestamp(12_000));
        assert_eq!(tiny.limit_milliseconds_of_mining_block, 300);

        // 11_950 + 50 reaches the slot end.
        let fallback = arranger(&round, &keys[1], Timestamp(11_950)).arrange(Behaviour::TinyBlock);
        assert_eq!(fallback.behaviour, Behaviour::NextRound);
        // Order 2 inside the next virtual round starting at 20s.
        assert_eq!(fallback.arranged_mining_time, Timestamp(28_000));
    }

    #[traced_test]
    #[test]
    fn test_last_tiny_block_gets_shorter_limit() {
        let keys = miner_keys(3);
        let mut round = round_two(&keys);
        mark_mined(&mut round, &keys[1], signature_for_order(1, 3), Timestamp(8_000));
        let miner = round.miner_mut(&keys[1]).unwrap();
        for i in 1..8 {
            miner.actual_mining_times.push(Timestamp(8_000 + i * 100));
        }

        let command = arranger(&round, &keys[1], Timestamp(8_800)).arrange(Behaviour::TinyBlock);
        assert_eq!(command.limit_milliseconds_of_mining_block, 250);
    }

    #[traced_test]
    #[test]
    fn test_tiny_block_before_round_start() {
        let keys = miner_keys(3);
        let mut round = round_two(&keys);
        round.extra_block_producer_of_previous_round = Some(keys[2].clone());

        let command = arranger(&round, &keys[2], Timestamp(1_000)).arrange(Behaviour::TinyBlock);
        assert_eq!(command.arranged_mining_time, Timestamp(1_050));
        assert_eq!(command.mining_due_time, Timestamp(4_000));
    }

    #[traced_test]
    #[test]
    fn test_terminate_commands() {
        let keys = miner_keys(3);
        let round = round_two(&keys);
        // keys[0] is the extra block producer: extra slot at 16s.
        let next_term = arranger(&round, &keys[0], Timestamp(13_000)).arrange(Behaviour::NextTerm);
        assert_eq!(next_term.behaviour, Behaviour::NextTerm);
        assert_eq!(next_term.arranged_mining_time, Timestamp(16_000));
        assert_eq!(next_term.mining_due_time, Timestamp(20_000));
        assert_eq!(next_term.limit_milliseconds_of_mining_block, 2400);

        assert!(arranger(&round, &keys[0], Timestamp(13_000))
            .arrange(Behaviour::Nothing)
            .is_invalid());
        let stranger = Pubkey::from("stranger");
        assert!(arranger(&round, &stranger, Timestamp(0))
            .arrange(Behaviour::UpdateValue)
            .is_invalid());
    }

    #[test]
    fn test_solitary_miner_detection() {
        let keys = miner_keys(3);
        let mut lonely = round_two(&keys);
        mark_mined(&mut lonely, &keys[0], signature_for_order(1, 3), Timestamp(4_000));

        let mut current = round_two(&keys);
        current.round_number = 4;
        assert!(is_solitary_miner(&current, Some(&lonely), Some(&lonely), &keys[0]));
        assert!(!is_solitary_miner(&current, Some(&lonely), Some(&lonely), &keys[1]));

        let mut busy = lonely.clone();
        mark_mined(&mut busy, &keys[1], signature_for_order(2, 3), Timestamp(8_000));
        assert!(!is_solitary_miner(&current, Some(&lonely), Some(&busy), &keys[0]));

        current.round_number = 3;
        assert!(!is_solitary_miner(&current, Some(&lonely), Some(&lonely), &keys[0]));
    }
}
