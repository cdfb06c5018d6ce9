//! Test helpers for AEDPoS consensus.
//!
//! Everything here is deterministic: the same arguments always give the
//! same keys, in-values and rounds, so tests on different nodes of a
//! simulated network agree without sharing state.

use aedpos_core::ElectionProvider;
use aedpos_types::{Hash, MinerList, Pubkey, Round, Timestamp};
use parking_lot::RwLock;

/// `count` distinct miner keys, in index order (not sorted by key).
pub fn miner_keys(count: usize) -> Vec<Pubkey> {
    (0..count)
        .map(|i| Pubkey::from_bytes(Hash::from_parts(&[b"miner", &(i as u64).to_le_bytes()]).as_bytes()))
        .collect()
}

/// In-value `pubkey` commits to in `round_number`.
pub fn in_value(pubkey: &Pubkey, round_number: i64) -> Hash {
    Hash::from_parts(&[pubkey.as_bytes(), b"in", &round_number.to_le_bytes()])
}

/// Genesis round for `keys`: term 1, round 1, slots one interval apart
/// after `start`.
pub fn first_round(keys: &[Pubkey], start: Timestamp, mining_interval_ms: i64) -> Round {
    MinerList::new(keys.iter().cloned()).generate_first_round_of_new_term(mining_interval_ms, start, 0, 0)
}

/// Signature whose derived next-round order among `miners_count` miners is
/// `order`.
pub fn signature_for_order(order: i32, miners_count: i32) -> Hash {
    let value = i64::from(order - 1) + i64::from(miners_count) * 1_000;
    let mut raw = [0u8; 32];
    raw[..8].copy_from_slice(&value.to_be_bytes());
    raw[8..].copy_from_slice(&Hash::from_bytes(&value.to_le_bytes()).as_bytes()[8..]);
    Hash::from_raw(raw)
}

/// Mark `pubkey` as having mined in `round` with the given signature:
/// out value, signature, orders, one produced block and one actual time.
pub fn mark_mined(round: &mut Round, pubkey: &Pubkey, signature: Hash, at: Timestamp) {
    let out_value = Hash::of(&in_value(pubkey, round.round_number));
    round.apply_normal_consensus_data(pubkey, None, out_value, signature);
    if let Some(miner) = round.miner_mut(pubkey) {
        miner.produced_blocks += 1;
        miner.actual_mining_times.push(at);
    }
}

/// Election service returning a fixed, replaceable list.
#[derive(Debug, Default)]
pub struct StaticElectionProvider {
    victories: RwLock<MinerList>,
}

impl StaticElectionProvider {
    pub fn new(victories: MinerList) -> Self {
        Self {
            victories: RwLock::new(victories),
        }
    }

    /// Provider with no election result.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Replace the list returned from now on.
    pub fn set_victories(&self, victories: MinerList) {
        *self.victories.write() = victories;
    }
}

impl ElectionProvider for StaticElectionProvider {
    fn victories(&self) -> MinerList {
        self.victories.read().clone()
    }
}
