//! Revealing previous in-values of miners that went silent, from the
//! pieces their peers decrypted.

use aedpos_secret_sharing::{minimum_count, reconstruct_in_value};
use aedpos_types::{Pubkey, Round};
use tracing::{debug, warn};

/// Fill `current`'s unrevealed previous in-values that enough peers hold
/// pieces for in `previous`.
///
/// The producing miner (`sender`) is skipped: it reveals its own value.
/// Returns the miners whose values were revealed.
pub fn reveal_shared_in_values(current: &mut Round, previous: &Round, sender: &Pubkey) -> Vec<Pubkey> {
    let threshold = minimum_count(current.miners.len());
    let mut revealed = Vec::new();

    for (pubkey, earlier) in &previous.miners {
        if pubkey == sender {
            continue;
        }
        let Some(miner) = current.miner(pubkey) else {
            continue;
        };
        if miner.revealed_previous_in_value().is_some() {
            continue;
        }
        let Some(out_value) = earlier.out_value else {
            continue;
        };
        if earlier.encrypted_pieces.len() < threshold || earlier.decrypted_pieces.len() < threshold {
            continue;
        }

        match reconstruct_in_value(pubkey, &earlier.decrypted_pieces, previous, threshold, &out_value) {
            Ok(in_value) => {
                if let Some(miner) = current.miner_mut(pubkey) {
                    miner.previous_in_value = Some(in_value);
                }
                debug!(pubkey = %pubkey, round_number = previous.round_number, "Revealed in value");
                revealed.push(pubkey.clone());
            }
            Err(e) => {
                warn!(pubkey = %pubkey, error = %e, "Failed to reveal in value");
            }
        }
    }
    revealed
}

#[cfg(test)]
mod tests {
    use super::*;
    use aedpos_secret_sharing::split_in_value;
    use aedpos_test_helpers::{first_round, in_value, miner_keys};
    use aedpos_types::{Hash, Timestamp};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use tracing_test::traced_test;

    /// Previous round where `owner` committed and shared its in-value, and
    /// `holders` decrypted their pieces.
    fn shared_round(keys: &[Pubkey], owner: &Pubkey, holders: &[Pubkey]) -> Round {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut round = first_round(keys, Timestamp::ZERO, 4000);
        let value = in_value(owner, round.round_number);
        let pieces = split_in_value(&value, owner, &round, &mut rng).unwrap();

        let miner = round.miner_mut(owner).unwrap();
        miner.out_value = Some(Hash::of(&value));
        miner.decrypted_pieces = holders
            .iter()
            .map(|h| (h.clone(), pieces[h].clone()))
            .collect();
        miner.encrypted_pieces = pieces;
        round
    }

    fn next_of(previous: &Round) -> Round {
        let mut current = previous.clone();
        current.round_number += 1;
        for miner in current.miners.values_mut() {
            miner.previous_in_value = None;
            miner.out_value = None;
        }
        current
    }

    #[traced_test]
    #[test]
    fn test_reveals_with_enough_pieces() {
        let keys = miner_keys(4);
        let owner = keys[3].clone();
        let previous = shared_round(&keys, &owner, &keys[..2]);
        let mut current = next_of(&previous);

        let revealed = reveal_shared_in_values(&mut current, &previous, &keys[0]);
        assert_eq!(revealed, vec![owner.clone()]);
        assert_eq!(
            current.miner(&owner).unwrap().previous_in_value,
            Some(in_value(&owner, previous.round_number))
        );
    }

    #[traced_test]
    #[test]
    fn test_skips_below_threshold_and_sender() {
        let keys = miner_keys(4);
        let owner = keys[3].clone();

        // Threshold among four miners is two.
        let previous = shared_round(&keys, &owner, &keys[..1]);
        let mut current = next_of(&previous);
        assert!(reveal_shared_in_values(&mut current, &previous, &keys[0]).is_empty());

        let previous = shared_round(&keys, &owner, &keys[..2]);
        let mut current = next_of(&previous);
        assert!(reveal_shared_in_values(&mut current, &previous, &owner).is_empty());
        assert!(current.miner(&owner).unwrap().previous_in_value.is_none());
    }

    #[traced_test]
    #[test]
    fn test_keeps_already_revealed_value() {
        let keys = miner_keys(4);
        let owner = keys[3].clone();
        let previous = shared_round(&keys, &owner, &keys[..3]);
        let mut current = next_of(&previous);
        let own_reveal = Hash::from_bytes(b"published by owner");
        current.miner_mut(&owner).unwrap().previous_in_value = Some(own_reveal);

        assert!(reveal_shared_in_values(&mut current, &previous, &keys[0]).is_empty());
        assert_eq!(current.miner(&owner).unwrap().previous_in_value, Some(own_reveal));
    }

    #[traced_test]
    #[test]
    fn test_corrupt_pieces_leave_value_unrevealed() {
        let keys = miner_keys(4);
        let owner = keys[3].clone();
        let mut previous = shared_round(&keys, &owner, &keys[..2]);
        previous
            .miner_mut(&owner)
            .unwrap()
            .decrypted_pieces
            .insert(keys[0].clone(), vec![1, 2, 3]);
        let mut current = next_of(&previous);

        assert!(reveal_shared_in_values(&mut current, &previous, &keys[1]).is_empty());
        assert!(logs_contain("Failed to reveal in value"));
    }
}
