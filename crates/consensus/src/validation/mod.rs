//! Header validation.
//!
//! Before execution a header is checked by a pipeline of validators chosen
//! by its behaviour. Each validator sees the same [`ValidationContext`] and
//! the first failure wins. After execution the header's round is compared
//! with the stored round by [`validate_after_execution`].

mod after_execution;
mod continuous_blocks;
mod irreversible;
mod permission;
mod round_termination;
mod time_slot;
mod update_value;

pub use after_execution::validate_after_execution;
pub use continuous_blocks::ContinuousBlocksValidator;
pub use irreversible::LibInformationValidator;
pub use permission::MiningPermissionValidator;
pub use round_termination::{NextRoundLayoutValidator, NextTermLayoutValidator, RoundTerminationValidator};
pub use time_slot::TimeSlotValidator;
pub use update_value::UpdateValueValidator;

use crate::store::LatestProviderToTinyBlocksCount;
use crate::{ChainType, RoundIdentityPolicy, TerminationPolicy, ValidationError};
use aedpos_types::{Behaviour, MinerList, Pubkey, Round, Timestamp};
use tracing::{debug, warn};

/// Everything a validator may look at.
#[derive(Debug, Clone)]
pub struct ValidationContext<'a> {
    pub sender: &'a Pubkey,
    pub behaviour: Behaviour,

    /// Round carried by the header.
    pub provided: &'a Round,

    /// Stored current round.
    pub base: &'a Round,

    /// `base` with the header's in-round update applied. Equal to
    /// `provided` for round changes.
    pub recovered: &'a Round,

    pub previous: Option<&'a Round>,
    pub is_first_round_of_current_term: bool,
    pub latest_provider: Option<&'a LatestProviderToTinyBlocksCount>,

    pub block_time: Timestamp,
    pub chain_type: ChainType,
    pub main_chain_miner_list: Option<&'a MinerList>,

    /// Election result, looked up for NextTerm headers only.
    pub victories: Option<&'a MinerList>,

    pub round_identity: RoundIdentityPolicy,
    pub termination: TerminationPolicy,
}

impl ValidationContext<'_> {
    /// Whether the header carries a different round than the stored one.
    pub fn is_new_round(&self) -> bool {
        match self.round_identity {
            RoundIdentityPolicy::RoundAndTermNumber => {
                self.provided.round_number != self.base.round_number
                    || self.provided.term_number != self.base.term_number
            }
            RoundIdentityPolicy::RoundId => match (self.provided.round_id(), self.base.round_id()) {
                (Ok(provided), Ok(base)) => provided != base,
                _ => true,
            },
        }
    }
}

/// One check over a header.
pub trait HeaderValidator: Send + Sync {
    /// Get the validator name for logging.
    fn name(&self) -> &'static str;

    fn validate(&self, ctx: &ValidationContext<'_>) -> Result<(), ValidationError>;
}

/// Ordered set of validators for one behaviour.
pub struct ValidationPipeline {
    validators: Vec<Box<dyn HeaderValidator>>,
}

impl ValidationPipeline {
    pub fn new(validators: Vec<Box<dyn HeaderValidator>>) -> Self {
        Self { validators }
    }

    /// Validators that apply to headers of `behaviour`.
    pub fn for_behaviour(behaviour: Behaviour) -> Self {
        let mut validators: Vec<Box<dyn HeaderValidator>> =
            vec![Box::new(MiningPermissionValidator), Box::new(TimeSlotValidator)];

        match behaviour {
            Behaviour::UpdateValue => {
                validators.push(Box::new(ContinuousBlocksValidator));
                validators.push(Box::new(UpdateValueValidator));
                validators.push(Box::new(LibInformationValidator));
            }
            Behaviour::TinyBlock => {
                validators.push(Box::new(ContinuousBlocksValidator));
            }
            Behaviour::NextRound => {
                validators.push(Box::new(RoundTerminationValidator));
                validators.push(Box::new(NextRoundLayoutValidator));
            }
            Behaviour::NextTerm => {
                validators.push(Box::new(RoundTerminationValidator));
                validators.push(Box::new(NextTermLayoutValidator));
            }
            Behaviour::Nothing => {}
        }
        Self { validators }
    }

    pub fn validator_names(&self) -> Vec<&'static str> {
        self.validators.iter().map(|v| v.name()).collect()
    }

    /// Run every validator in order, stopping at the first failure.
    pub fn run(&self, ctx: &ValidationContext<'_>) -> Result<(), ValidationError> {
        if ctx.behaviour == Behaviour::Nothing {
            return Err(ValidationError::PermissionDenied(
                "header carries no consensus behaviour".to_string(),
            ));
        }
        for validator in &self.validators {
            if let Err(e) = validator.validate(ctx) {
                warn!(
                    validator = validator.name(),
                    sender = %ctx.sender,
                    behaviour = %ctx.behaviour,
                    kind = e.kind(),
                    error = %e,
                    "Header rejected"
                );
                return Err(e);
            }
            debug!(validator = validator.name(), "Header check passed");
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use aedpos_test_helpers::{first_round, miner_keys};

    pub const INTERVAL: i64 = 4000;

    /// Round 2 of `n` miners, slots every 4s starting at 4s.
    pub fn base_round(n: usize) -> (Vec<Pubkey>, Round) {
        let keys = miner_keys(n);
        let mut round = first_round(&keys, Timestamp::ZERO, INTERVAL);
        round.round_number = 2;
        round.is_miner_list_just_changed = false;
        (keys, round)
    }

    pub fn context<'a>(
        sender: &'a Pubkey,
        behaviour: Behaviour,
        provided: &'a Round,
        base: &'a Round,
        recovered: &'a Round,
    ) -> ValidationContext<'a> {
        ValidationContext {
            sender,
            behaviour,
            provided,
            base,
            recovered,
            previous: None,
            is_first_round_of_current_term: false,
            latest_provider: None,
            block_time: Timestamp::ZERO,
            chain_type: ChainType::MainChain,
            main_chain_miner_list: None,
            victories: None,
            round_identity: RoundIdentityPolicy::RoundAndTermNumber,
            termination: TerminationPolicy::AnyMinerAfterSlot,
        }
    }
}
