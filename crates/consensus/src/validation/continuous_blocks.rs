use super::{HeaderValidator, ValidationContext};
use crate::ValidationError;

/// A miner that used up its continuous-block budget may not extend the
/// chain again until someone else does.
pub struct ContinuousBlocksValidator;

impl HeaderValidator for ContinuousBlocksValidator {
    fn name(&self) -> &'static str {
        "ContinuousBlocks"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Result<(), ValidationError> {
        if ctx.provided.round_number <= 2 || ctx.base.miners.len() == 1 {
            return Ok(());
        }
        match ctx.latest_provider {
            Some(latest) if &latest.pubkey == ctx.sender && latest.blocks_count <= 0 => {
                Err(ValidationError::ResourceExhausted(format!(
                    "{} produced too many continuous blocks",
                    ctx.sender
                )))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::store::LatestProviderToTinyBlocksCount;
    use aedpos_types::Behaviour;

    #[test]
    fn test_budget_exhausted() {
        let (keys, mut base) = base_round(3);
        base.round_number = 5;
        let spent = LatestProviderToTinyBlocksCount {
            pubkey: keys[0].clone(),
            blocks_count: 0,
        };
        let mut ctx = context(&keys[0], Behaviour::TinyBlock, &base, &base, &base);
        ctx.latest_provider = Some(&spent);
        assert!(matches!(
            ContinuousBlocksValidator.validate(&ctx),
            Err(ValidationError::ResourceExhausted(_))
        ));

        // Another miner is unaffected.
        let mut ctx = context(&keys[1], Behaviour::TinyBlock, &base, &base, &base);
        ctx.latest_provider = Some(&spent);
        assert!(ContinuousBlocksValidator.validate(&ctx).is_ok());
    }

    #[test]
    fn test_budget_left_or_early_round() {
        let (keys, mut base) = base_round(3);
        let remaining = LatestProviderToTinyBlocksCount {
            pubkey: keys[0].clone(),
            blocks_count: 1,
        };
        base.round_number = 5;
        let mut ctx = context(&keys[0], Behaviour::TinyBlock, &base, &base, &base);
        ctx.latest_provider = Some(&remaining);
        assert!(ContinuousBlocksValidator.validate(&ctx).is_ok());

        let spent = LatestProviderToTinyBlocksCount {
            pubkey: keys[0].clone(),
            blocks_count: -3,
        };
        base.round_number = 2;
        let mut ctx = context(&keys[0], Behaviour::TinyBlock, &base, &base, &base);
        ctx.latest_provider = Some(&spent);
        assert!(ContinuousBlocksValidator.validate(&ctx).is_ok());
    }
}
