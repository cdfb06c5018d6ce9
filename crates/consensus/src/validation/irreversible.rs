use super::{HeaderValidator, ValidationContext};
use crate::ValidationError;

/// Neither the confirmed LIB nor the sender's implied LIB may move
/// backward.
pub struct LibInformationValidator;

impl HeaderValidator for LibInformationValidator {
    fn name(&self) -> &'static str {
        "LibInformation"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Result<(), ValidationError> {
        let base = ctx.base;
        let provided = ctx.provided;

        if provided.confirmed_irreversible_block_height != 0
            && provided.confirmed_irreversible_block_round_number != 0
            && (base.confirmed_irreversible_block_height > provided.confirmed_irreversible_block_height
                || base.confirmed_irreversible_block_round_number
                    > provided.confirmed_irreversible_block_round_number)
        {
            return Err(ValidationError::LibRegression(format!(
                "confirmed LIB {} (round {}) is behind stored {} (round {})",
                provided.confirmed_irreversible_block_height,
                provided.confirmed_irreversible_block_round_number,
                base.confirmed_irreversible_block_height,
                base.confirmed_irreversible_block_round_number
            )));
        }

        let implied = provided
            .miner(ctx.sender)
            .map(|m| m.implied_irreversible_block_height)
            .unwrap_or(0);
        let stored = base
            .miner(ctx.sender)
            .map(|m| m.implied_irreversible_block_height)
            .unwrap_or(0);
        if implied != 0 && stored > implied {
            return Err(ValidationError::LibRegression(format!(
                "implied LIB {implied} of {} is behind stored {stored}",
                ctx.sender
            )));
        }
        Ok(())
    }
}
