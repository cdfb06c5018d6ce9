//! Header generation (GetConsensusExtraData) and the consensus transaction
//! derived from a header.

use crate::reveal::reveal_shared_in_values;
use crate::transition::{generate_mirrored_round, generate_next_round, generate_next_term};
use crate::{ChainType, ConsensusError, ConsensusState};
use aedpos_types::{
    Behaviour, BlockContext, ConsensusTransaction, Hash, HeaderInformation, Pubkey, Round,
    TriggerInformation,
};
use tracing::{debug, info, warn};

impl ConsensusState {
    /// Header information for the block `trigger.pubkey` is producing.
    ///
    /// Works on a copy of the current round; the store is untouched.
    pub fn get_consensus_extra_data(
        &self,
        trigger: &TriggerInformation,
        block: &BlockContext,
    ) -> Result<HeaderInformation, ConsensusError> {
        let sender = &trigger.pubkey;
        let round = match trigger.behaviour {
            Behaviour::UpdateValue => self.update_value_header(trigger, block)?,
            Behaviour::TinyBlock => self.tiny_block_header(sender, block)?,
            Behaviour::NextRound => self.next_round_header(sender, block)?,
            Behaviour::NextTerm => self.next_term_header(sender, block)?,
            Behaviour::Nothing => {
                return Err(ConsensusError::Apply(
                    "no header for behaviour Nothing".to_string(),
                ))
            }
        };

        debug!(
            sender = %sender,
            behaviour = %trigger.behaviour,
            round_number = round.round_number,
            height = block.height,
            "Generated consensus header"
        );
        Ok(HeaderInformation {
            sender: sender.clone(),
            behaviour: trigger.behaviour,
            round,
        })
    }

    /// Transaction carried by a block with `header`.
    pub fn generate_consensus_transaction(
        &self,
        header: &HeaderInformation,
    ) -> Result<ConsensusTransaction, ConsensusError> {
        let missing = || {
            ConsensusError::Apply(format!(
                "header round {} has no entry for {}",
                header.round.round_number, header.sender
            ))
        };
        match header.behaviour {
            Behaviour::UpdateValue => header
                .round
                .extract_update_value_input(&header.sender)
                .map(ConsensusTransaction::UpdateValue)
                .ok_or_else(missing),
            Behaviour::TinyBlock => header
                .round
                .extract_tiny_block_input(&header.sender)
                .map(ConsensusTransaction::TinyBlock)
                .ok_or_else(missing),
            Behaviour::NextRound => Ok(ConsensusTransaction::NextRound(header.round.clone())),
            Behaviour::NextTerm => Ok(ConsensusTransaction::NextTerm(header.round.clone())),
            Behaviour::Nothing => Err(ConsensusError::Apply(
                "no transaction for behaviour Nothing".to_string(),
            )),
        }
    }

    fn current_round_of(&self, sender: &Pubkey) -> Result<Round, ConsensusError> {
        let current = self.store.current_round()?;
        if !current.is_in_miner_list(sender) {
            return Err(ConsensusError::Apply(format!(
                "{sender} is not a miner of round {}",
                current.round_number
            )));
        }
        Ok(current.clone())
    }

    fn update_value_header(
        &self,
        trigger: &TriggerInformation,
        block: &BlockContext,
    ) -> Result<Round, ConsensusError> {
        let sender = &trigger.pubkey;
        let in_value = trigger
            .in_value
            .filter(|v| !v.is_zero())
            .ok_or_else(|| ConsensusError::Apply("UpdateValue needs an in value".to_string()))?;
        let mut current = self.current_round_of(sender)?;
        let previous = self.store.previous_round();

        let out_value = Hash::of(&in_value);
        let mut signature = Hash::concat_and_compute(&out_value, &in_value);
        let mut previous_in_value = Hash::EMPTY;

        if let Some(previous) = previous.filter(|_| !self.store.is_first_round_of_current_term()) {
            match trigger.previous_in_value.filter(|v| !v.is_zero()) {
                Some(claimed) => {
                    let committed = previous.miner(sender).and_then(|m| m.out_value);
                    if previous.is_in_miner_list(sender) && committed != Some(Hash::of(&claimed)) {
                        warn!(
                            sender = %sender,
                            round_number = previous.round_number,
                            "Previous in value does not open previous out value, not revealing"
                        );
                    } else {
                        previous_in_value = claimed;
                    }
                    signature = previous.calculate_signature(&claimed);
                }
                None => {
                    // Nothing to reveal: sign a stand-in value.
                    let height = block.height.to_string();
                    let fake = Hash::from_parts(&[sender.as_bytes(), height.as_bytes()]);
                    signature = previous.calculate_signature(&fake);
                }
            }
        }

        if self.config.secret_sharing_enabled {
            if let Some(miner) = current.miner_mut(sender) {
                miner.encrypted_pieces = trigger.encrypted_pieces.clone();
            }
            for (owner, piece) in &trigger.decrypted_pieces {
                match current.miner_mut(owner) {
                    Some(miner) => {
                        miner.decrypted_pieces.insert(sender.clone(), piece.clone());
                    }
                    None => warn!(owner = %owner, "Decrypted piece for unknown miner skipped"),
                }
            }
            for (owner, revealed) in &trigger.revealed_in_values {
                if let Some(miner) = current.miner_mut(owner) {
                    if miner.revealed_previous_in_value().is_none() {
                        miner.previous_in_value = Some(*revealed);
                    }
                }
            }
            if let Some(previous) = previous {
                reveal_shared_in_values(&mut current, previous, sender);
            }
        }

        current.apply_normal_consensus_data(sender, Some(previous_in_value), out_value, signature);
        if let Some(miner) = current.miner_mut(sender) {
            miner.produced_blocks = miner.produced_blocks.saturating_add(1);
            miner.produced_tiny_blocks = miner.produced_tiny_blocks.saturating_add(1);
            miner.actual_mining_times.push(block.time);
            miner.implied_irreversible_block_height = block.height;
        }
        Ok(current.update_value_round(sender))
    }

    fn tiny_block_header(&self, sender: &Pubkey, block: &BlockContext) -> Result<Round, ConsensusError> {
        let mut current = self.current_round_of(sender)?;
        if let Some(miner) = current.miner_mut(sender) {
            miner.produced_blocks = miner.produced_blocks.saturating_add(1);
            miner.produced_tiny_blocks = miner.produced_tiny_blocks.saturating_add(1);
            miner.actual_mining_times.push(block.time);
        }
        Ok(current.tiny_block_round(sender))
    }

    fn next_round_header(&self, sender: &Pubkey, block: &BlockContext) -> Result<Round, ConsensusError> {
        let current = self.store.current_round()?;
        let params = self.transition_params(block.time);

        let mirror = match self.config.chain_type {
            ChainType::SideChain => self
                .store
                .main_chain_miner_list()
                .filter(|list| !list.is_empty() && !list.same_members(&current.miner_list())),
            ChainType::MainChain => None,
        };
        let mut next = match mirror {
            Some(list) => {
                info!(
                    round_number = current.round_number,
                    miners = list.len(),
                    "Switching to main chain miners"
                );
                generate_mirrored_round(current, list, &params)
            }
            None => generate_next_round(current, self.store.previous_round(), &params)?,
        };

        next.extra_block_producer_of_previous_round = Some(sender.clone());
        if let Some(miner) = next.miner_mut(sender) {
            miner.produced_blocks = miner.produced_blocks.saturating_add(1);
            miner.produced_tiny_blocks = 1;
            miner.actual_mining_times.push(block.time);
        }
        Ok(next)
    }

    fn next_term_header(&self, sender: &Pubkey, block: &BlockContext) -> Result<Round, ConsensusError> {
        let current = self.store.current_round()?;
        let victories = self.election.victories();
        let mut next = generate_next_term(current, &victories, &self.transition_params(block.time));

        next.extra_block_producer_of_previous_round = Some(sender.clone());
        if let Some(miner) = next.miner_mut(sender) {
            miner.produced_blocks = 1;
            miner.produced_tiny_blocks = 1;
            miner.actual_mining_times.push(block.time);
        }
        Ok(next)
    }
}
