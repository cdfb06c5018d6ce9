//! Round mutations driven by block headers: applying a miner's published
//! values, simplifying a round for a header, recovering it back, and the
//! checkable hash compared after execution.

use crate::{
    CodecError, Hash, MinerInRound, Pubkey, Round, TinyBlockInput, UpdateValueInput,
};
use serde::Serialize;
use std::collections::BTreeMap;

impl Round {
    /// Record `pubkey`'s out value and signature and derive its next-round
    /// order.
    ///
    /// Any other miner whose final order collides with the new supposed
    /// order is shifted to the next free order, wrapping past `N`. Returns
    /// `false` (and changes nothing) if `pubkey` is not a miner.
    pub fn apply_normal_consensus_data(
        &mut self,
        pubkey: &Pubkey,
        previous_in_value: Option<Hash>,
        out_value: Hash,
        signature: Hash,
    ) -> bool {
        let miners_count = self.miners_count();
        let Some(miner) = self.miners.get_mut(pubkey) else {
            return false;
        };
        miner.out_value = Some(out_value);
        miner.signature = Some(signature);
        if miner.revealed_previous_in_value().is_none() {
            miner.previous_in_value = previous_in_value;
        }

        let supposed = Round::order_from_signature(&signature, miners_count);

        let conflicted: Vec<Pubkey> = self
            .miners
            .values()
            .filter(|m| m.final_order_of_next_round == supposed)
            .map(|m| m.pubkey.clone())
            .collect();
        for key in conflicted {
            for i in (supposed + 1)..miners_count.saturating_mul(2) {
                let candidate = if i > miners_count { i % miners_count } else { i };
                if self
                    .miners
                    .values()
                    .all(|m| m.final_order_of_next_round != candidate)
                {
                    if let Some(m) = self.miners.get_mut(&key) {
                        m.final_order_of_next_round = candidate;
                    }
                    break;
                }
            }
        }

        if let Some(miner) = self.miners.get_mut(pubkey) {
            miner.supposed_order_of_next_round = supposed;
            miner.final_order_of_next_round = supposed;
        }
        true
    }

    /// Lighter round carried in an UpdateValue header.
    ///
    /// The sender keeps everything it published; other miners keep only
    /// their ordering data, their previous in-value, and the piece the
    /// sender decrypted for them.
    pub fn update_value_round(&self, pubkey: &Pubkey) -> Round {
        let mut round = Round {
            round_number: self.round_number,
            term_number: self.term_number,
            round_id_for_validation: self.round_id().unwrap_or(self.round_id_for_validation),
            confirmed_irreversible_block_height: self.confirmed_irreversible_block_height,
            confirmed_irreversible_block_round_number: self
                .confirmed_irreversible_block_round_number,
            is_miner_list_just_changed: self.is_miner_list_just_changed,
            ..Default::default()
        };

        for (key, miner) in &self.miners {
            let simplified = if key == pubkey {
                MinerInRound {
                    in_value: None,
                    expected_mining_time: None,
                    ..miner.clone()
                }
            } else {
                MinerInRound {
                    pubkey: key.clone(),
                    order: miner.order,
                    is_extra_block_producer: miner.is_extra_block_producer,
                    supposed_order_of_next_round: miner.supposed_order_of_next_round,
                    final_order_of_next_round: miner.final_order_of_next_round,
                    previous_in_value: miner.previous_in_value,
                    decrypted_pieces: miner
                        .decrypted_pieces
                        .get(pubkey)
                        .map(|piece| BTreeMap::from([(pubkey.clone(), piece.clone())]))
                        .unwrap_or_default(),
                    ..Default::default()
                }
            };
            round.miners.insert(key.clone(), simplified);
        }
        round
    }

    /// Lighter round carried in a TinyBlock header.
    pub fn tiny_block_round(&self, pubkey: &Pubkey) -> Round {
        let mut round = Round {
            round_number: self.round_number,
            term_number: self.term_number,
            round_id_for_validation: self.round_id().unwrap_or(self.round_id_for_validation),
            ..Default::default()
        };
        for (key, miner) in &self.miners {
            let simplified = if key == pubkey {
                MinerInRound {
                    pubkey: key.clone(),
                    order: miner.order,
                    actual_mining_times: miner.actual_mining_times.clone(),
                    produced_blocks: miner.produced_blocks,
                    produced_tiny_blocks: miner.produced_tiny_blocks,
                    implied_irreversible_block_height: miner.implied_irreversible_block_height,
                    ..Default::default()
                }
            } else {
                MinerInRound::new(key.clone(), miner.order)
            };
            round.miners.insert(key.clone(), simplified);
        }
        round
    }

    /// UpdateValue transaction payload for `pubkey`, read from a header round.
    pub fn extract_update_value_input(&self, pubkey: &Pubkey) -> Option<UpdateValueInput> {
        let miner = self.miners.get(pubkey)?;

        let decrypted_pieces = self
            .miners
            .values()
            .filter(|m| &m.pubkey != pubkey)
            .filter_map(|m| {
                m.decrypted_pieces
                    .get(pubkey)
                    .map(|piece| (m.pubkey.clone(), piece.clone()))
            })
            .collect();

        let miners_previous_in_values = self
            .miners
            .values()
            .filter_map(|m| m.revealed_previous_in_value().map(|v| (m.pubkey.clone(), v)))
            .collect();

        // Every other assigned final order, not only the ones that differ
        // from the supposed order: a shift can move a miner back onto it.
        let tune_order_information = self
            .miners
            .values()
            .filter(|m| &m.pubkey != pubkey && m.final_order_of_next_round != 0)
            .map(|m| (m.pubkey.clone(), m.final_order_of_next_round))
            .collect();

        Some(UpdateValueInput {
            out_value: miner.out_value.unwrap_or_default(),
            signature: miner.signature.unwrap_or_default(),
            round_id: self.round_id().unwrap_or(self.round_id_for_validation),
            previous_in_value: miner.previous_in_value.unwrap_or(Hash::EMPTY),
            actual_mining_time: miner.latest_actual_mining_time().unwrap_or_default(),
            supposed_order_of_next_round: miner.supposed_order_of_next_round,
            tune_order_information,
            encrypted_pieces: miner.encrypted_pieces.clone(),
            decrypted_pieces,
            produced_blocks: miner.produced_blocks,
            miners_previous_in_values,
            implied_irreversible_block_height: miner.implied_irreversible_block_height,
        })
    }

    /// TinyBlock transaction payload for `pubkey`, read from a header round.
    pub fn extract_tiny_block_input(&self, pubkey: &Pubkey) -> Option<TinyBlockInput> {
        let miner = self.miners.get(pubkey)?;
        Some(TinyBlockInput {
            round_number: self.round_number,
            round_id: self.round_id().unwrap_or(self.round_id_for_validation),
            actual_mining_time: miner.latest_actual_mining_time()?,
            produced_blocks: miner.produced_blocks,
        })
    }

    /// New round: `self` with the sender's UpdateValue fields taken from
    /// `provided`.
    ///
    /// Provided miners unknown to `self` are skipped. If the sender is
    /// missing on either side the result is an unchanged copy.
    pub fn recover_from_update_value(&self, provided: &Round, pubkey: &Pubkey) -> Round {
        let mut recovered = self.clone();
        let Some(declared) = provided.miners.get(pubkey) else {
            return recovered;
        };
        let Some(own) = recovered.miners.get_mut(pubkey) else {
            return recovered;
        };

        own.out_value = declared.out_value;
        own.signature = declared.signature;
        own.produced_blocks = declared.produced_blocks;
        own.produced_tiny_blocks = declared.produced_tiny_blocks;
        own.previous_in_value = declared.previous_in_value;
        own.implied_irreversible_block_height = declared.implied_irreversible_block_height;
        if let Some(latest) = declared.latest_actual_mining_time() {
            if !own.actual_mining_times.contains(&latest) {
                own.actual_mining_times.push(latest);
            }
        }

        for (key, declared) in &provided.miners {
            let Some(miner) = recovered.miners.get_mut(key) else {
                continue;
            };
            miner.supposed_order_of_next_round = declared.supposed_order_of_next_round;
            miner.final_order_of_next_round = declared.final_order_of_next_round;
            if key != pubkey && declared.revealed_previous_in_value().is_some() {
                miner.previous_in_value = declared.previous_in_value;
            }
        }
        recovered
    }

    /// New round: `self` with the sender's TinyBlock fields taken from
    /// `provided`.
    pub fn recover_from_tiny_block(&self, provided: &Round, pubkey: &Pubkey) -> Round {
        let mut recovered = self.clone();
        let Some(declared) = provided.miners.get(pubkey) else {
            return recovered;
        };
        let Some(own) = recovered.miners.get_mut(pubkey) else {
            return recovered;
        };

        own.produced_blocks = declared.produced_blocks;
        own.produced_tiny_blocks = declared.produced_tiny_blocks;
        if let Some(latest) = declared.latest_actual_mining_time() {
            if !own.actual_mining_times.contains(&latest) {
                own.actual_mining_times.push(latest);
            }
        }
        recovered
    }

    /// Hash of the fields every node must agree on.
    ///
    /// Pieces and actual mining times are excluded, and an empty previous
    /// in-value is normalised to unset. With `include_previous_in_value`
    /// false, previous in-values are dropped entirely.
    pub fn checkable_hash(&self, include_previous_in_value: bool) -> Result<Hash, CodecError> {
        #[derive(Serialize)]
        struct CheckableRound<'a> {
            round_number: i64,
            term_number: i64,
            blockchain_age: i64,
            miners: &'a BTreeMap<Pubkey, MinerInRound>,
        }

        let miners: BTreeMap<Pubkey, MinerInRound> = self
            .miners
            .iter()
            .map(|(key, miner)| {
                let mut checkable = miner.clone();
                checkable.encrypted_pieces.clear();
                checkable.decrypted_pieces.clear();
                checkable.actual_mining_times.clear();
                checkable.in_value = None;
                checkable.previous_in_value = if include_previous_in_value {
                    miner.revealed_previous_in_value()
                } else {
                    None
                };
                (key.clone(), checkable)
            })
            .collect();

        let bytes = bincode::serialize(&CheckableRound {
            round_number: self.round_number,
            term_number: self.term_number,
            blockchain_age: self.blockchain_age,
            miners: &miners,
        })?;
        Ok(Hash::from_bytes(&bytes))
    }
}
