//! One simulated miner.

use crate::SimulationError;
use aedpos_consensus::{ConsensusError, ConsensusState};
use aedpos_secret_sharing::split_in_value;
use aedpos_types::{Behaviour, ConsensusCommand, Hash, Pubkey, Timestamp, TriggerInformation};
use rand::Rng;
use std::collections::BTreeMap;

/// A miner: its key, its view of the chain and the secrets only it knows.
#[derive(Debug)]
pub struct SimNode {
    pubkey: Pubkey,
    state: ConsensusState,
    /// In-values this miner committed to, by round number. Only values of
    /// accepted blocks are kept.
    in_values: BTreeMap<i64, Hash>,
    online: bool,
}

impl SimNode {
    pub fn new(pubkey: Pubkey, state: ConsensusState) -> Self {
        Self {
            pubkey,
            state,
            in_values: BTreeMap::new(),
            online: true,
        }
    }

    pub fn pubkey(&self) -> &Pubkey {
        &self.pubkey
    }

    pub fn state(&self) -> &ConsensusState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ConsensusState {
        &mut self.state
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn set_online(&mut self, online: bool) {
        self.online = online;
    }

    /// In-value committed in `round_number`, if this miner published one.
    pub fn in_value(&self, round_number: i64) -> Option<Hash> {
        self.in_values.get(&round_number).copied()
    }

    pub(crate) fn remember_in_value(&mut self, round_number: i64, in_value: Hash) {
        self.in_values.insert(round_number, in_value);
    }

    /// The next command, or `None` when offline or told to do nothing.
    pub fn command(&self, now: Timestamp) -> Result<Option<ConsensusCommand>, ConsensusError> {
        if !self.online {
            return Ok(None);
        }
        let command = self.state.get_consensus_command(&self.pubkey, now)?;
        Ok((!command.is_invalid()).then_some(command))
    }

    /// Trigger information for a block of `behaviour`.
    ///
    /// UpdateValue gets a fresh in-value, the value committed last round,
    /// shares of the new value for every peer and the pieces peers shared
    /// with this miner in the current round.
    pub fn trigger<R: Rng + ?Sized>(
        &self,
        behaviour: Behaviour,
        rng: &mut R,
    ) -> Result<TriggerInformation, SimulationError> {
        let mut trigger = TriggerInformation::new(self.pubkey.clone()).with_behaviour(behaviour);
        if behaviour != Behaviour::UpdateValue {
            return Ok(trigger);
        }

        let current = self.state.current_round()?;
        let seed: u64 = rng.gen();
        let in_value = Hash::from_parts(&[
            self.pubkey.as_bytes(),
            &current.round_number.to_le_bytes(),
            &seed.to_le_bytes(),
        ]);
        trigger = trigger.with_in_value(in_value);
        if let Some(previous) = self.in_value(current.round_number - 1) {
            trigger = trigger.with_previous_in_value(previous);
        }

        if self.state.config().secret_sharing_enabled && current.miners.len() > 1 {
            trigger.encrypted_pieces = split_in_value(&in_value, &self.pubkey, current, rng)?;
            trigger.decrypted_pieces = current
                .miners
                .values()
                .filter(|m| m.pubkey != self.pubkey)
                .filter_map(|m| {
                    m.encrypted_pieces
                        .get(&self.pubkey)
                        .map(|piece| (m.pubkey.clone(), piece.clone()))
                })
                .collect();
        }
        Ok(trigger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aedpos_consensus::AedposConfig;
    use aedpos_test_helpers::{first_round, miner_keys, StaticElectionProvider};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::sync::Arc;

    fn node(config: AedposConfig) -> (Vec<Pubkey>, SimNode) {
        let keys = miner_keys(3);
        let mut state = ConsensusState::new(config, Arc::new(StaticElectionProvider::empty())).unwrap();
        state.first_round(first_round(&keys, Timestamp::ZERO, 4000)).unwrap();
        (keys.clone(), SimNode::new(keys[0].clone(), state))
    }

    #[test]
    fn test_update_value_trigger_shares_in_value() {
        let (keys, node) = node(AedposConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let trigger = node.trigger(Behaviour::UpdateValue, &mut rng).unwrap();

        assert!(trigger.in_value.is_some());
        assert!(trigger.previous_in_value.is_none());
        assert_eq!(trigger.encrypted_pieces.len(), 2);
        assert!(trigger.encrypted_pieces.contains_key(&keys[1]));
        assert!(!trigger.encrypted_pieces.contains_key(&keys[0]));
        assert!(trigger.decrypted_pieces.is_empty());
    }

    #[test]
    fn test_trigger_without_secret_sharing() {
        let (_, mut node) = node(AedposConfig::default().with_secret_sharing(false));
        node.remember_in_value(0, Hash::from_bytes(b"earlier"));
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let trigger = node.trigger(Behaviour::UpdateValue, &mut rng).unwrap();

        assert_eq!(trigger.previous_in_value, Some(Hash::from_bytes(b"earlier")));
        assert!(trigger.encrypted_pieces.is_empty());
    }

    #[test]
    fn test_round_change_trigger_is_bare() {
        let (_, node) = node(AedposConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let trigger = node.trigger(Behaviour::NextRound, &mut rng).unwrap();
        assert_eq!(trigger.behaviour, Behaviour::NextRound);
        assert!(trigger.in_value.is_none());
    }

    #[test]
    fn test_offline_node_has_no_command() {
        let (_, mut node) = node(AedposConfig::default());
        assert!(node.command(Timestamp::ZERO).unwrap().is_some());
        node.set_online(false);
        assert!(node.command(Timestamp::ZERO).unwrap().is_none());
    }
}
