use super::{HeaderValidator, ValidationContext};
use crate::behaviour::may_terminate;
use crate::transition::{expected_next_round_orders, next_term_miners};
use crate::{ChainType, ValidationError};
use aedpos_types::{Behaviour, MinerList};
use std::collections::BTreeSet;

/// Shape of a NextRound or NextTerm header: numbering, fresh slots and a
/// complete order permutation.
pub struct RoundTerminationValidator;

impl HeaderValidator for RoundTerminationValidator {
    fn name(&self) -> &'static str {
        "RoundTermination"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Result<(), ValidationError> {
        let base = ctx.base;
        let provided = ctx.provided;

        if base.round_number.checked_add(1) != Some(provided.round_number) {
            return Err(ValidationError::TimingViolation(format!(
                "round number {} does not follow {}",
                provided.round_number, base.round_number
            )));
        }

        let expected_term = if ctx.behaviour == Behaviour::NextTerm {
            base.term_number.checked_add(1)
        } else {
            Some(base.term_number)
        };
        if expected_term != Some(provided.term_number) {
            return Err(ValidationError::TimingViolation(format!(
                "term number {} after term {} for {}",
                provided.term_number, base.term_number, ctx.behaviour
            )));
        }

        if provided
            .miners
            .values()
            .any(|m| m.in_value.is_some() || m.out_value.is_some())
        {
            return Err(ValidationError::MalformedCommitment(
                "new round must not carry in or out values".to_string(),
            ));
        }

        let orders: BTreeSet<i32> = provided.miners.values().map(|m| m.order).collect();
        let expected_orders: BTreeSet<i32> = (1..=provided.miners_count()).collect();
        if provided.miners.is_empty() || orders != expected_orders {
            return Err(ValidationError::OrderConflict(
                "orders are not a permutation of 1..=N".to_string(),
            ));
        }
        let extra_block_producers = provided
            .miners
            .values()
            .filter(|m| m.is_extra_block_producer)
            .count();
        if extra_block_producers != 1 {
            return Err(ValidationError::OrderConflict(format!(
                "expected one extra block producer, found {extra_block_producers}"
            )));
        }

        if !may_terminate(base, ctx.sender, ctx.block_time, ctx.termination) {
            return Err(ValidationError::PermissionDenied(format!(
                "{} may not terminate round {} yet",
                ctx.sender, base.round_number
            )));
        }
        Ok(())
    }
}

/// A NextRound header must lay out the miners exactly as the stored round
/// implies, unless a side chain is switching to a new mirrored list.
pub struct NextRoundLayoutValidator;

impl HeaderValidator for NextRoundLayoutValidator {
    fn name(&self) -> &'static str {
        "NextRoundLayout"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Result<(), ValidationError> {
        let provided = ctx.provided;

        if provided.is_miner_list_just_changed {
            let mirrored = match (ctx.chain_type, ctx.main_chain_miner_list) {
                (ChainType::SideChain, Some(mirror)) => provided.miner_list().same_members(mirror),
                _ => false,
            };
            return if mirrored {
                Ok(())
            } else {
                Err(ValidationError::StructuralMismatch(
                    "miner list changed outside a term change".to_string(),
                ))
            };
        }

        if !provided.miner_list().same_members(&ctx.base.miner_list()) {
            return Err(ValidationError::OrderConflict(
                "next round miners differ from current round".to_string(),
            ));
        }

        let layout = expected_next_round_orders(ctx.base)?;
        for (pubkey, miner) in &provided.miners {
            let expected = layout.orders.get(pubkey).copied();
            if expected != Some(miner.order) {
                return Err(ValidationError::OrderConflict(format!(
                    "{pubkey} placed at order {}, expected {:?}",
                    miner.order, expected
                )));
            }
        }
        let extra_block_producer = provided.extra_block_producer().map(|m| &m.pubkey);
        if extra_block_producer != layout.extra_block_producer.as_ref() {
            return Err(ValidationError::OrderConflict(format!(
                "extra block producer {:?}, expected {:?}",
                extra_block_producer, layout.extra_block_producer
            )));
        }
        Ok(())
    }
}

/// A NextTerm header must seat the elected miners (or the current ones,
/// without an election result) in election order, the first of them as
/// extra block producer.
pub struct NextTermLayoutValidator;

impl HeaderValidator for NextTermLayoutValidator {
    fn name(&self) -> &'static str {
        "NextTermLayout"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Result<(), ValidationError> {
        let provided = ctx.provided;
        let elected = next_term_miners(ctx.base, ctx.victories.unwrap_or(&MinerList::default()));

        if !provided.is_miner_list_just_changed {
            return Err(ValidationError::StructuralMismatch(
                "first round of a term must mark the miner list as changed".to_string(),
            ));
        }
        if !provided.miner_list().same_members(&elected) {
            return Err(ValidationError::OrderConflict(format!(
                "next term has {} miners that differ from the {} elected",
                provided.miners.len(),
                elected.len()
            )));
        }

        // Only the layout is compared; slot times belong to the producer.
        let expected = elected.generate_first_round_of_new_term(
            0,
            ctx.block_time,
            ctx.base.round_number,
            ctx.base.term_number,
        );
        for (pubkey, miner) in &provided.miners {
            let Some(seat) = expected.miner(pubkey) else {
                continue;
            };
            if seat.order != miner.order || seat.is_extra_block_producer != miner.is_extra_block_producer {
                return Err(ValidationError::OrderConflict(format!(
                    "{pubkey} placed at order {} in the next term, expected {}",
                    miner.order, seat.order
                )));
            }
        }
        Ok(())
    }
}
