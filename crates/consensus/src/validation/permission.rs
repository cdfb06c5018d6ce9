use super::{HeaderValidator, ValidationContext};
use crate::ValidationError;

/// Sender must be a miner of the stored current round.
pub struct MiningPermissionValidator;

impl HeaderValidator for MiningPermissionValidator {
    fn name(&self) -> &'static str {
        "MiningPermission"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Result<(), ValidationError> {
        if ctx.base.is_in_miner_list(ctx.sender) {
            Ok(())
        } else {
            Err(ValidationError::PermissionDenied(format!(
                "{} is not a miner of round {}",
                ctx.sender, ctx.base.round_number
            )))
        }
    }
}
