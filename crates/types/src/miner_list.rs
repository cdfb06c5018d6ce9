//! Ordered miner list of a term.

use crate::{Hash, MinerInRound, Pubkey, Round, Timestamp};
use serde::{Deserialize, Serialize};

/// Ordered list of miner public keys.
///
/// The order is significant: it becomes the slot order of the first round
/// of the term the list is used for.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MinerList {
    pub pubkeys: Vec<Pubkey>,
}

impl MinerList {
    pub fn new(pubkeys: impl IntoIterator<Item = Pubkey>) -> Self {
        Self {
            pubkeys: pubkeys.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.pubkeys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pubkeys.is_empty()
    }

    pub fn contains(&self, pubkey: &Pubkey) -> bool {
        self.pubkeys.contains(pubkey)
    }

    /// Whether both lists hold the same keys, regardless of order.
    pub fn same_members(&self, other: &MinerList) -> bool {
        let mut a = self.pubkeys.clone();
        let mut b = other.pubkeys.clone();
        a.sort();
        b.sort();
        a == b
    }

    /// First round of a new term built from this list.
    ///
    /// Slots follow list order, one interval apart starting one interval
    /// after `now`; the first miner is the extra-block producer.
    pub fn generate_first_round_of_new_term(
        &self,
        mining_interval_ms: i64,
        now: Timestamp,
        current_round_number: i64,
        current_term_number: i64,
    ) -> Round {
        let mut round = Round {
            round_number: current_round_number.saturating_add(1),
            term_number: current_term_number.saturating_add(1),
            is_miner_list_just_changed: true,
            ..Default::default()
        };

        for (i, pubkey) in self.pubkeys.iter().enumerate() {
            let order = i32::try_from(i + 1).unwrap_or(i32::MAX);
            let mut miner = MinerInRound::new(pubkey.clone(), order);
            miner.is_extra_block_producer = i == 0;
            miner.expected_mining_time =
                Some(now.add_millis(mining_interval_ms.saturating_mul(i64::from(order))));
            miner.previous_in_value = Some(Hash::EMPTY);
            round.miners.insert(pubkey.clone(), miner);
        }

        round
    }
}

impl FromIterator<Pubkey> for MinerList {
    fn from_iter<T: IntoIterator<Item = Pubkey>>(iter: T) -> Self {
        MinerList::new(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_round_of_new_term() {
        let list: MinerList = ["aa", "cc", "bb"].into_iter().map(Pubkey::from).collect();
        let round = list.generate_first_round_of_new_term(4000, Timestamp(1_000), 10, 2);

        assert_eq!(round.round_number, 11);
        assert_eq!(round.term_number, 3);
        assert!(round.is_miner_list_just_changed);
        assert!(round.check_time_slots().is_ok());

        let cc = round.miner(&Pubkey::from("cc")).unwrap();
        assert_eq!(cc.order, 2);
        assert_eq!(cc.expected_mining_time, Some(Timestamp(9_000)));
        assert_eq!(round.extra_block_producer().unwrap().pubkey, Pubkey::from("aa"));
        assert_eq!(round.miner_list(), list);
    }

    #[test]
    fn test_same_members_ignores_order() {
        let a: MinerList = ["x", "y"].into_iter().map(Pubkey::from).collect();
        let b: MinerList = ["y", "x"].into_iter().map(Pubkey::from).collect();
        let c: MinerList = ["y", "z"].into_iter().map(Pubkey::from).collect();
        assert!(a.same_members(&b));
        assert!(!a.same_members(&c));
    }
}
