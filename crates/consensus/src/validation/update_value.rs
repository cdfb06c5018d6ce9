use super::{HeaderValidator, ValidationContext};
use crate::transition::check_final_orders;
use crate::ValidationError;
use aedpos_types::{Hash, Round};

/// UpdateValue headers must carry a complete commitment, next-round orders
/// that follow from it, and previous in-values that open earlier
/// commitments.
pub struct UpdateValueValidator;

impl HeaderValidator for UpdateValueValidator {
    fn name(&self) -> &'static str {
        "UpdateValue"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Result<(), ValidationError> {
        let Some(miner) = ctx.provided.miner(ctx.sender) else {
            return Err(ValidationError::MalformedCommitment(format!(
                "header round has no entry for {}",
                ctx.sender
            )));
        };

        let (Some(out_value), Some(signature)) = (miner.out_value, miner.signature) else {
            return Err(ValidationError::MalformedCommitment(
                "out value and signature must both be set".to_string(),
            ));
        };
        if out_value.is_zero() || signature.is_zero() {
            return Err(ValidationError::MalformedCommitment(
                "out value and signature must not be empty".to_string(),
            ));
        }

        let expected_order = Round::order_from_signature(&signature, ctx.base.miners_count());
        if miner.supposed_order_of_next_round != expected_order {
            return Err(ValidationError::OrderConflict(format!(
                "supposed order {} does not follow from signature, expected {}",
                miner.supposed_order_of_next_round, expected_order
            )));
        }

        check_next_round_orders(ctx, signature)?;
        check_previous_in_value(ctx)?;
        check_revealed_in_values(ctx)
    }
}

/// Every miner's supposed and final next-round order must be what the
/// sender's signature does to the stored round, and nothing else.
fn check_next_round_orders(ctx: &ValidationContext<'_>, signature: Hash) -> Result<(), ValidationError> {
    let mut expected = ctx.base.clone();
    expected.apply_normal_consensus_data(ctx.sender, None, Hash::ZERO, signature);
    check_final_orders(&expected)?;

    for (pubkey, miner) in &expected.miners {
        let Some(declared) = ctx.provided.miner(pubkey) else {
            return Err(ValidationError::StructuralMismatch(format!(
                "header round has no entry for {pubkey}"
            )));
        };
        if declared.final_order_of_next_round != miner.final_order_of_next_round
            || declared.supposed_order_of_next_round != miner.supposed_order_of_next_round
        {
            return Err(ValidationError::OrderConflict(format!(
                "{pubkey} tuned to order {} (supposed {}), expected {} (supposed {})",
                declared.final_order_of_next_round,
                declared.supposed_order_of_next_round,
                miner.final_order_of_next_round,
                miner.supposed_order_of_next_round
            )));
        }
    }
    Ok(())
}

/// The sender's previous in-value must open its previous out value.
fn check_previous_in_value(ctx: &ValidationContext<'_>) -> Result<(), ValidationError> {
    let Some(previous) = ctx.previous.and_then(|p| p.miner(ctx.sender)) else {
        return Ok(());
    };
    let Some(in_value) = ctx
        .provided
        .miner(ctx.sender)
        .and_then(|m| m.revealed_previous_in_value())
    else {
        return Ok(());
    };
    if Some(Hash::of(&in_value)) == previous.out_value {
        Ok(())
    } else {
        Err(ValidationError::MalformedCommitment(format!(
            "previous in value of {} does not match its out value",
            ctx.sender
        )))
    }
}

/// In-values the sender revealed for other miners must open their
/// commitments as well.
fn check_revealed_in_values(ctx: &ValidationContext<'_>) -> Result<(), ValidationError> {
    for (pubkey, miner) in &ctx.provided.miners {
        if pubkey == ctx.sender {
            continue;
        }
        let Some(in_value) = miner.revealed_previous_in_value() else {
            continue;
        };
        let already_known = ctx
            .base
            .miner(pubkey)
            .and_then(|m| m.revealed_previous_in_value())
            == Some(in_value);
        if already_known {
            continue;
        }
        let committed = ctx
            .previous
            .and_then(|p| p.miner(pubkey))
            .and_then(|m| m.out_value);
        if committed != Some(Hash::of(&in_value)) {
            return Err(ValidationError::MalformedCommitment(format!(
                "revealed in value of {pubkey} does not match its out value"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use aedpos_test_helpers::{in_value, mark_mined, signature_for_order};
    use aedpos_types::{Behaviour, Timestamp};

    /// Previous round where everybody mined, and a base round after it.
    fn rounds() -> (Vec<aedpos_types::Pubkey>, Round, Round) {
        let (keys, mut previous) = base_round(3);
        for (i, key) in keys.iter().enumerate() {
            mark_mined(&mut previous, key, signature_for_order(i as i32 + 1, 3), Timestamp(4_000));
        }
        let (_, mut base) = base_round(3);
        base.round_number = 3;
        (keys, previous, base)
    }

    fn header(base: &Round, sender: &aedpos_types::Pubkey, order: i32) -> Round {
        let mut provided = base.clone();
        let out = Hash::of(&in_value(sender, base.round_number));
        provided.apply_normal_consensus_data(sender, None, out, signature_for_order(order, 3));
        provided
    }

    #[test]
    fn test_complete_commitment_passes() {
        let (keys, previous, base) = rounds();
        let mut provided = header(&base, &keys[0], 2);
        provided.miner_mut(&keys[0]).unwrap().previous_in_value = Some(in_value(&keys[0], previous.round_number));

        let mut ctx = context(&keys[0], Behaviour::UpdateValue, &provided, &base, &provided);
        ctx.previous = Some(&previous);
        assert!(UpdateValueValidator.validate(&ctx).is_ok());
    }

    #[test]
    fn test_missing_or_empty_commitment() {
        let (keys, _, base) = rounds();
        let ctx = context(&keys[0], Behaviour::UpdateValue, &base, &base, &base);
        assert!(matches!(
            UpdateValueValidator.validate(&ctx),
            Err(ValidationError::MalformedCommitment(_))
        ));

        let mut provided = header(&base, &keys[0], 1);
        provided.miner_mut(&keys[0]).unwrap().out_value = Some(Hash::ZERO);
        let ctx = context(&keys[0], Behaviour::UpdateValue, &provided, &base, &provided);
        assert!(matches!(
            UpdateValueValidator.validate(&ctx),
            Err(ValidationError::MalformedCommitment(_))
        ));
    }

    #[test]
    fn test_supposed_order_must_follow_signature() {
        let (keys, _, base) = rounds();
        let mut provided = header(&base, &keys[0], 2);
        provided.miner_mut(&keys[0]).unwrap().supposed_order_of_next_round = 3;
        let ctx = context(&keys[0], Behaviour::UpdateValue, &provided, &base, &provided);
        assert!(matches!(
            UpdateValueValidator.validate(&ctx),
            Err(ValidationError::OrderConflict(_))
        ));
    }

    #[test]
    fn test_tuned_orders_must_follow_signature() {
        let (keys, _, mut base) = rounds();
        mark_mined(&mut base, &keys[0], signature_for_order(1, 3), Timestamp(4_000));
        mark_mined(&mut base, &keys[1], signature_for_order(2, 3), Timestamp(8_000));

        // keys[2] drawing order 2 pushes keys[1] on to order 3.
        let honest = header(&base, &keys[2], 2);
        assert_eq!(honest.miner(&keys[1]).unwrap().final_order_of_next_round, 3);
        let ctx = context(&keys[2], Behaviour::UpdateValue, &honest, &base, &honest);
        assert!(UpdateValueValidator.validate(&ctx).is_ok());

        let mut doubled = honest.clone();
        doubled.miner_mut(&keys[0]).unwrap().final_order_of_next_round = 3;
        let ctx = context(&keys[2], Behaviour::UpdateValue, &doubled, &base, &doubled);
        assert!(matches!(
            UpdateValueValidator.validate(&ctx),
            Err(ValidationError::OrderConflict(_))
        ));

        let mut claimed = honest.clone();
        claimed.miner_mut(&keys[1]).unwrap().supposed_order_of_next_round = 3;
        let ctx = context(&keys[2], Behaviour::UpdateValue, &claimed, &base, &claimed);
        assert!(matches!(
            UpdateValueValidator.validate(&ctx),
            Err(ValidationError::OrderConflict(_))
        ));

        let mut missing = honest;
        missing.miners.remove(&keys[0]);
        let ctx = context(&keys[2], Behaviour::UpdateValue, &missing, &base, &missing);
        assert!(matches!(
            UpdateValueValidator.validate(&ctx),
            Err(ValidationError::StructuralMismatch(_))
        ));
    }

    #[test]
    fn test_wrong_previous_in_value() {
        let (keys, previous, base) = rounds();
        let mut provided = header(&base, &keys[1], 1);
        provided.miner_mut(&keys[1]).unwrap().previous_in_value = Some(Hash::from_bytes(b"forged"));
        let mut ctx = context(&keys[1], Behaviour::UpdateValue, &provided, &base, &provided);
        ctx.previous = Some(&previous);
        assert!(matches!(
            UpdateValueValidator.validate(&ctx),
            Err(ValidationError::MalformedCommitment(_))
        ));

        // Not revealing is allowed.
        provided.miner_mut(&keys[1]).unwrap().previous_in_value = Some(Hash::EMPTY);
        let mut ctx = context(&keys[1], Behaviour::UpdateValue, &provided, &base, &provided);
        ctx.previous = Some(&previous);
        assert!(UpdateValueValidator.validate(&ctx).is_ok());
    }

    #[test]
    fn test_revealed_values_of_others() {
        let (keys, previous, base) = rounds();
        let mut provided = header(&base, &keys[0], 1);
        provided.miner_mut(&keys[2]).unwrap().previous_in_value = Some(in_value(&keys[2], previous.round_number));
        let mut ctx = context(&keys[0], Behaviour::UpdateValue, &provided, &base, &provided);
        ctx.previous = Some(&previous);
        assert!(UpdateValueValidator.validate(&ctx).is_ok());

        provided.miner_mut(&keys[2]).unwrap().previous_in_value = Some(Hash::from_bytes(b"guess"));
        let mut ctx = context(&keys[0], Behaviour::UpdateValue, &provided, &base, &provided);
        ctx.previous = Some(&previous);
        assert!(matches!(
            UpdateValueValidator.validate(&ctx),
            Err(ValidationError::MalformedCommitment(_))
        ));
    }
}
