use super::{HeaderValidator, ValidationContext};
use crate::ValidationError;
use tracing::trace;

/// New rounds must be evenly spaced; in-round blocks must fall inside the
/// sender's slot.
pub struct TimeSlotValidator;

impl HeaderValidator for TimeSlotValidator {
    fn name(&self) -> &'static str {
        "TimeSlot"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Result<(), ValidationError> {
        if ctx.is_new_round() {
            return ctx
                .provided
                .check_time_slots()
                .map_err(|e| ValidationError::TimingViolation(e.to_string()));
        }

        // The first round of a term has no slot history to compare against.
        if ctx.is_first_round_of_current_term {
            return Ok(());
        }

        let Some(miner) = ctx.recovered.miner(ctx.sender) else {
            return Err(ValidationError::PermissionDenied(format!(
                "{} has no slot in round {}",
                ctx.sender, ctx.recovered.round_number
            )));
        };
        let Some(latest) = miner.actual_mining_times.iter().max().copied() else {
            return Ok(());
        };
        let Some(expected) = miner.expected_mining_time else {
            return Err(ValidationError::TimingViolation(format!(
                "{} has no expected mining time",
                ctx.sender
            )));
        };

        trace!(
            sender = %ctx.sender,
            latest = latest.as_millis(),
            expected = expected.as_millis(),
            "Checking miner time slot"
        );

        let inside = if latest < expected {
            // Tiny blocks for the previous round's extra block slot.
            latest < ctx.recovered.round_start_time()
        } else {
            latest < expected.add_millis(ctx.recovered.mining_interval())
        };
        if inside {
            Ok(())
        } else {
            Err(ValidationError::TimingViolation(format!(
                "block at {}ms outside slot of {} expected at {}ms",
                latest.as_millis(),
                ctx.sender,
                expected.as_millis()
            )))
        }
    }
}
