use crate::ValidationError;
use aedpos_types::{Behaviour, HeaderInformation, Round};
use tracing::warn;

/// Compare the header's round with the stored round after the block's
/// consensus transaction ran.
///
/// In-round headers only carry the sender's part, so they are first laid
/// over the stored round. Previous in-values are ignored right after a
/// miner list change, when nobody had anything to reveal.
pub fn validate_after_execution(stored: &Round, header: &HeaderInformation) -> Result<(), ValidationError> {
    let declared = match header.behaviour {
        Behaviour::UpdateValue => stored.recover_from_update_value(&header.round, &header.sender),
        Behaviour::TinyBlock => stored.recover_from_tiny_block(&header.round, &header.sender),
        Behaviour::NextRound | Behaviour::NextTerm => header.round.clone(),
        Behaviour::Nothing => {
            return Err(ValidationError::StructuralMismatch(
                "header carries no consensus behaviour".to_string(),
            ))
        }
    };

    let include_previous_in_value = !stored.is_miner_list_just_changed;
    let hash = |round: &Round| {
        round
            .checkable_hash(include_previous_in_value)
            .map_err(|e| ValidationError::StructuralMismatch(e.to_string()))
    };

    if hash(&declared)? != hash(stored)? {
        warn!(
            sender = %header.sender,
            behaviour = %header.behaviour,
            round_number = stored.round_number,
            "Header round differs from stored round after execution"
        );
        return Err(ValidationError::StructuralMismatch(format!(
            "round {} after {} differs from header",
            stored.round_number, header.behaviour
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use aedpos_types::Timestamp;

    #[test]
    fn test_matching_round_change() {
        let (keys, stored) = base_round(3);
        let header = HeaderInformation {
            sender: keys[0].clone(),
            behaviour: Behaviour::NextRound,
            round: stored.clone(),
        };
        assert!(validate_after_execution(&stored, &header).is_ok());

        let mut tampered = header.clone();
        tampered.round.miner_mut(&keys[1]).unwrap().missed_time_slots = 7;
        assert!(matches!(
            validate_after_execution(&stored, &tampered),
            Err(ValidationError::StructuralMismatch(_))
        ));
    }

    #[test]
    fn test_tiny_block_header_overlaid_on_stored_round() {
        let (keys, mut stored) = base_round(3);
        {
            let miner = stored.miner_mut(&keys[1]).unwrap();
            miner.actual_mining_times.push(Timestamp(8_100));
            miner.produced_blocks = 2;
            miner.produced_tiny_blocks = 2;
        }
        let header = HeaderInformation {
            sender: keys[1].clone(),
            behaviour: Behaviour::TinyBlock,
            round: stored.tiny_block_round(&keys[1]),
        };
        assert!(validate_after_execution(&stored, &header).is_ok());

        let mut inflated = header.clone();
        inflated.round.miner_mut(&keys[1]).unwrap().produced_blocks = 5;
        assert!(validate_after_execution(&stored, &inflated).is_err());
    }
}
