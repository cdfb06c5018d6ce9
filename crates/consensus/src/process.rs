//! Block processing (ProcessConsensusInformation): the only writer of the
//! consensus store after genesis.
//!
//! Every transaction is checked against the stored state before anything
//! is written, so a rejected transaction leaves the store as it was.

use crate::irreversible::calculate_lib_height;
use crate::mining_status::MiningStatus;
use crate::transition::check_final_orders;
use crate::{ConsensusError, ConsensusState, ValidationError};
use aedpos_core::Action;
use aedpos_types::{
    BlockContext, ConsensusTransaction, Hash, MinerList, Pubkey, Round, TinyBlockInput, UpdateValueInput,
};
use tracing::{debug, info, warn};

impl ConsensusState {
    /// Apply the block's consensus transaction and return the effects the
    /// host should perform.
    pub fn process_consensus_transaction(
        &mut self,
        transaction: &ConsensusTransaction,
        block: &BlockContext,
    ) -> Result<Vec<Action>, ConsensusError> {
        self.check_applicable(transaction, &block.sender)?;

        let mut actions = Vec::new();
        let budget = self.update_mining_status(block, &mut actions)?;
        self.store.reset_latest_provider(&block.sender, budget);

        match transaction {
            ConsensusTransaction::UpdateValue(input) => self.process_update_value(input, block, &mut actions)?,
            ConsensusTransaction::TinyBlock(input) => self.process_tiny_block(input, &block.sender)?,
            ConsensusTransaction::NextRound(round) => self.process_next_round(round, block, &mut actions)?,
            ConsensusTransaction::NextTerm(round) => self.process_next_term(round, block, &mut actions)?,
        }

        debug!(
            sender = %block.sender,
            behaviour = %transaction.behaviour(),
            height = block.height,
            actions = actions.len(),
            "Processed consensus transaction"
        );
        Ok(actions)
    }

    /// Everything that could make the transaction fail half-way.
    fn check_applicable(&self, transaction: &ConsensusTransaction, sender: &Pubkey) -> Result<(), ConsensusError> {
        let current = self.store.current_round()?;
        let previous_has_sender = self
            .store
            .previous_round()
            .is_some_and(|r| r.is_in_miner_list(sender));
        if !current.is_in_miner_list(sender) && !previous_has_sender {
            return Err(ValidationError::PermissionDenied(format!(
                "{sender} is not a miner of round {} or the round before",
                current.round_number
            ))
            .into());
        }

        match transaction {
            ConsensusTransaction::UpdateValue(input) => {
                let round_id = current
                    .round_id()
                    .map_err(|e| ConsensusError::Apply(e.to_string()))?;
                if input.round_id != round_id {
                    return Err(ConsensusError::Apply(format!(
                        "UpdateValue for round id {}, current round id is {round_id}",
                        input.round_id
                    )));
                }
                self.require_in_current_round(current, sender)?;
                check_tuned_orders(current, sender, input)
            }
            ConsensusTransaction::TinyBlock(input) => {
                if input.round_number != current.round_number {
                    return Err(ConsensusError::Apply(format!(
                        "TinyBlock for round {}, current round is {}",
                        input.round_number, current.round_number
                    )));
                }
                self.require_in_current_round(current, sender)
            }
            ConsensusTransaction::NextRound(next) => {
                self.require_successor(current, next)?;
                if next.term_number != current.term_number {
                    return Err(ConsensusError::Apply(format!(
                        "NextRound may not change term {} to {}",
                        current.term_number, next.term_number
                    )));
                }
                Ok(())
            }
            ConsensusTransaction::NextTerm(next) => {
                self.require_successor(current, next)?;
                if current.term_number.checked_add(1) != Some(next.term_number) {
                    return Err(ConsensusError::Apply(format!(
                        "NextTerm must advance term {} by one, got {}",
                        current.term_number, next.term_number
                    )));
                }
                Ok(())
            }
        }
    }

    fn require_in_current_round(&self, current: &Round, sender: &Pubkey) -> Result<(), ConsensusError> {
        if current.is_in_miner_list(sender) {
            Ok(())
        } else {
            Err(ValidationError::PermissionDenied(format!(
                "{sender} is not a miner of round {}",
                current.round_number
            ))
            .into())
        }
    }

    fn require_successor(&self, current: &Round, next: &Round) -> Result<(), ConsensusError> {
        if current.round_number.checked_add(1) != Some(next.round_number) {
            return Err(ConsensusError::Apply(format!(
                "round {} does not follow round {}",
                next.round_number, current.round_number
            )));
        }
        if self.store.round(next.round_number).is_some() {
            return Err(ConsensusError::RoundAlreadyExists(next.round_number));
        }
        if next.miners.is_empty() {
            return Err(ConsensusError::Apply(format!("round {} has no miners", next.round_number)));
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Mining status
    // ═══════════════════════════════════════════════════════════════════════

    /// Evaluate the block budget for this block and report entering or
    /// leaving severe status.
    fn update_mining_status(&mut self, block: &BlockContext, actions: &mut Vec<Action>) -> Result<i32, ConsensusError> {
        let evaluated = self.evaluate_mining_status()?;
        let lib_height = self.store.current_round()?.confirmed_irreversible_block_height;

        match evaluated.status {
            MiningStatus::Severe => {
                let distance_to_lib = block.height.saturating_sub(lib_height);
                warn!(
                    height = block.height,
                    lib_height,
                    distance_to_lib,
                    "Mining status severe, one block per slot"
                );
                actions.push(Action::IrreversibleBlockHeightUnacceptable { distance_to_lib });
                self.store.set_previous_block_in_severe_status(true);
            }
            MiningStatus::Normal if self.store.is_previous_block_in_severe_status() => {
                info!(height = block.height, lib_height, "Mining status recovered from severe");
                actions.push(Action::IrreversibleBlockHeightUnacceptable { distance_to_lib: 0 });
                self.store.set_previous_block_in_severe_status(false);
            }
            MiningStatus::Normal | MiningStatus::Abnormal => {}
        }
        Ok(evaluated.count.max(1))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // In-round updates
    // ═══════════════════════════════════════════════════════════════════════

    fn process_update_value(
        &mut self,
        input: &UpdateValueInput,
        block: &BlockContext,
        actions: &mut Vec<Action>,
    ) -> Result<(), ConsensusError> {
        let sender = &block.sender;
        let mut current = self.store.current_round()?.clone();
        let previous = self.store.previous_round();

        let Some(miner) = current.miner_mut(sender) else {
            return Err(ConsensusError::Apply(format!("{sender} vanished from the current round")));
        };
        miner.actual_mining_times.push(input.actual_mining_time);
        miner.out_value = Some(input.out_value);
        miner.signature = Some(input.signature);
        miner.supposed_order_of_next_round = input.supposed_order_of_next_round;
        miner.final_order_of_next_round = input.supposed_order_of_next_round;
        miner.implied_irreversible_block_height = input.implied_irreversible_block_height;
        miner.produced_blocks = miner.produced_blocks.saturating_add(1);
        miner.produced_tiny_blocks = miner.produced_tiny_blocks.saturating_add(1);
        if !input.previous_in_value.is_zero() {
            miner.previous_in_value = Some(input.previous_in_value);
        }

        if self.config.secret_sharing_enabled {
            miner.encrypted_pieces.extend(
                input
                    .encrypted_pieces
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
            for (owner, piece) in &input.decrypted_pieces {
                match current.miner_mut(owner) {
                    Some(owner_slot) => {
                        owner_slot.decrypted_pieces.insert(sender.clone(), piece.clone());
                    }
                    None => warn!(owner = %owner, "Decrypted piece for unknown miner skipped"),
                }
            }
        }

        for (pubkey, in_value) in &input.miners_previous_in_values {
            let committed = previous.and_then(|p| p.miner(pubkey)).and_then(|m| m.out_value);
            if committed != Some(Hash::of(in_value)) {
                warn!(pubkey = %pubkey, "Previous in value does not match commitment, skipped");
                continue;
            }
            if let Some(slot) = current.miner_mut(pubkey) {
                slot.previous_in_value = Some(*in_value);
            }
        }

        for (pubkey, order) in &input.tune_order_information {
            match current.miner_mut(pubkey) {
                Some(slot) => slot.final_order_of_next_round = *order,
                None => warn!(pubkey = %pubkey, "Tuned order for unknown miner skipped"),
            }
        }

        if let Some(previous) = previous {
            if let Some(lib_height) = calculate_lib_height(&current, previous) {
                if lib_height > current.confirmed_irreversible_block_height {
                    let lib_round_number = current.round_number.saturating_sub(1);
                    current.confirmed_irreversible_block_height = lib_height;
                    current.confirmed_irreversible_block_round_number = lib_round_number;
                    info!(
                        lib_height,
                        round_number = current.round_number,
                        "Last irreversible block advanced"
                    );
                    actions.push(Action::IrreversibleBlockFound {
                        height: lib_height,
                        round_number: lib_round_number,
                    });
                }
            }
        }

        self.store.update_current_round(current)
    }

    fn process_tiny_block(&mut self, input: &TinyBlockInput, sender: &Pubkey) -> Result<(), ConsensusError> {
        let mut current = self.store.current_round()?.clone();
        let Some(miner) = current.miner_mut(sender) else {
            return Err(ConsensusError::Apply(format!("{sender} vanished from the current round")));
        };
        miner.actual_mining_times.push(input.actual_mining_time);
        miner.produced_blocks = input.produced_blocks;
        miner.produced_tiny_blocks = miner.produced_tiny_blocks.saturating_add(1);
        self.store.update_current_round(current)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Round changes
    // ═══════════════════════════════════════════════════════════════════════

    /// Bookkeeping on the round that is ending: who mined it and who
    /// missed their slot.
    fn close_current_round(&mut self) -> Result<Round, ConsensusError> {
        let mut current = self.store.current_round()?.clone();
        let mined = MinerList::new(current.mined_miners().into_iter().map(|m| m.pubkey.clone()));
        self.store.record_mined_miner_list(current.round_number, mined);

        for miner in current.miners.values_mut() {
            if !miner.has_mined() {
                miner.missed_time_slots = miner.missed_time_slots.saturating_add(1);
            }
        }
        self.store.update_current_round(current.clone())?;
        Ok(current)
    }

    fn process_next_round(
        &mut self,
        next: &Round,
        block: &BlockContext,
        actions: &mut Vec<Action>,
    ) -> Result<(), ConsensusError> {
        let reported_before = self
            .store
            .current_round()?
            .detect_evil_miners(self.config.tolerable_missed_time_slots);
        let ending = self.close_current_round()?;

        if ending.round_number == 1 {
            let start = ending
                .first_actual_miner()
                .and_then(|m| m.actual_mining_times.first().copied())
                .unwrap_or(block.time);
            self.store.set_blockchain_start_timestamp(start);
            info!(start = %start, "Blockchain start recorded");
        }

        self.store.add_round(next.clone())?;
        self.store.try_update_round_number(next.round_number)?;

        if next.is_miner_list_just_changed {
            let miners = next.miner_list();
            info!(
                round_number = next.round_number,
                miners = miners.len(),
                "Miner list replaced by main chain miners"
            );
            self.store.set_miner_list(next.term_number, miners);
        }

        // Reported once, at the round change that brings a miner to the
        // threshold.
        if self.config.is_main_chain() {
            let evil: Vec<Pubkey> = next
                .detect_evil_miners(self.config.tolerable_missed_time_slots)
                .difference(&reported_before)
                .cloned()
                .collect();
            if !evil.is_empty() {
                warn!(count = evil.len(), round_number = next.round_number, "Reporting evil miners");
                actions.push(Action::ReportEvilMiners { pubkeys: evil });
            }
        }

        info!(
            round_number = next.round_number,
            term_number = next.term_number,
            sender = %block.sender,
            "Entered next round"
        );
        Ok(())
    }

    fn process_next_term(
        &mut self,
        next: &Round,
        block: &BlockContext,
        actions: &mut Vec<Action>,
    ) -> Result<(), ConsensusError> {
        let ending = self.close_current_round()?;

        self.store.try_update_term_number(next.term_number)?;
        self.store.try_update_round_number(next.round_number)?;
        let miners = next.miner_list();
        self.store
            .set_term_start(next.term_number, next.round_number, miners.clone());
        self.store.add_round(next.clone())?;

        actions.push(Action::DistributeMiningReward {
            term_number: ending.term_number,
            mined_blocks: ending.get_mined_blocks(),
        });
        actions.push(Action::MinerListChanged {
            term_number: next.term_number,
            miners,
        });

        info!(
            term_number = next.term_number,
            round_number = next.round_number,
            miners = next.miners.len(),
            sender = %block.sender,
            "Entered next term"
        );
        Ok(())
    }
}

/// Next-round orders the round would hold after `input`: the sender's
/// supposed order and every tuned order must be distinct and in range.
fn check_tuned_orders(current: &Round, sender: &Pubkey, input: &UpdateValueInput) -> Result<(), ConsensusError> {
    let mut tuned = current.clone();
    if let Some(miner) = tuned.miner_mut(sender) {
        miner.final_order_of_next_round = input.supposed_order_of_next_round;
    }
    for (pubkey, order) in &input.tune_order_information {
        if let Some(miner) = tuned.miner_mut(pubkey) {
            miner.final_order_of_next_round = *order;
        }
    }
    check_final_orders(&tuned)?;
    Ok(())
}
