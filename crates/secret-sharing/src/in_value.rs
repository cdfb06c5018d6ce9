//! In-value splitting and reconstruction on top of the raw sharing scheme.

use crate::{decode_secret, encode_secret, SecretSharingError};
use aedpos_types::{Hash, Pubkey, Round};
use rand::Rng;
use std::collections::BTreeMap;
use tracing::debug;

/// Shares needed to reconstruct an in-value among `miners_count` miners.
///
/// Two thirds of the miners, never less than one.
pub fn minimum_count(miners_count: usize) -> usize {
    (miners_count * 2 / 3).max(1)
}

/// Split `owner`'s in-value into one piece per other miner of `round`.
///
/// A miner at order `k` receives the share evaluated at `x = k`.
pub fn split_in_value<R: Rng + ?Sized>(
    in_value: &Hash,
    owner: &Pubkey,
    round: &Round,
    rng: &mut R,
) -> Result<BTreeMap<Pubkey, Vec<u8>>, SecretSharingError> {
    let total = round.miners.len();
    let shares = encode_secret(in_value.as_bytes(), minimum_count(total), total, rng)?;

    let mut pieces = BTreeMap::new();
    for miner in round.miners.values() {
        if &miner.pubkey == owner {
            continue;
        }
        let index = usize::try_from(miner.order - 1)
            .map_err(|_| SecretSharingError::InvalidOrder { order: miner.order })?;
        let share = shares
            .get(index)
            .ok_or(SecretSharingError::InvalidOrder { order: miner.order })?;
        pieces.insert(miner.pubkey.clone(), share.clone());
    }
    Ok(pieces)
}

/// Subsets of pieces tried before a reveal is given up.
const MAX_RECONSTRUCTION_ATTEMPTS: usize = 256;

/// Rebuild `owner`'s in-value from the pieces peers decrypted for it.
///
/// `pieces` is keyed by the decrypting peer; each peer's order in `round`
/// is its evaluation point. Subsets of `threshold` pieces are tried in key
/// order until one interpolates to a value that hashes to `out_value`, so
/// a few corrupt pieces do not block the reveal while enough good ones
/// remain.
pub fn reconstruct_in_value(
    owner: &Pubkey,
    pieces: &BTreeMap<Pubkey, Vec<u8>>,
    round: &Round,
    threshold: usize,
    out_value: &Hash,
) -> Result<Hash, SecretSharingError> {
    let mut shares = Vec::with_capacity(pieces.len());
    let mut orders = Vec::with_capacity(pieces.len());
    for (holder, piece) in pieces {
        let order = round
            .miner(holder)
            .map(|m| m.order)
            .ok_or_else(|| SecretSharingError::UnknownPieceHolder {
                pubkey: holder.clone(),
            })?;
        shares.push(piece.clone());
        orders.push(order);
    }

    let mut subset: Vec<usize> = (0..threshold.min(shares.len())).collect();
    let mut attempts = 0;
    loop {
        let subset_shares: Vec<Vec<u8>> = subset.iter().map(|&i| shares[i].clone()).collect();
        let subset_orders: Vec<i32> = subset.iter().map(|&i| orders[i]).collect();
        let secret = decode_secret(&subset_shares, &subset_orders, threshold)?;
        if let Some(in_value) = to_hash(&secret).filter(|v| Hash::of(v) == *out_value) {
            if attempts > 0 {
                debug!(owner = %owner, attempts, "Reconstructed in value around corrupt pieces");
            }
            return Ok(in_value);
        }

        attempts += 1;
        if attempts >= MAX_RECONSTRUCTION_ATTEMPTS || !next_subset(&mut subset, shares.len()) {
            break;
        }
    }

    debug!(owner = %owner, attempts, "Reconstructed in value rejected by commitment check");
    Err(SecretSharingError::CommitmentMismatch {
        pubkey: owner.clone(),
    })
}

/// Advance `indices` to the next combination of `0..n` of the same size, in
/// lexicographic order. Returns `false` after the last one.
fn next_subset(indices: &mut [usize], n: usize) -> bool {
    let k = indices.len();
    for i in (0..k).rev() {
        if indices[i] < n - k + i {
            indices[i] += 1;
            for j in i + 1..k {
                indices[j] = indices[j - 1] + 1;
            }
            return true;
        }
    }
    false
}

/// Left-pad a big-endian integer back to 32 bytes.
fn to_hash(secret: &[u8]) -> Option<Hash> {
    let significant: &[u8] = match secret.iter().position(|&b| b != 0) {
        Some(start) => &secret[start..],
        None => &[],
    };
    if significant.len() > Hash::BYTES {
        return None;
    }
    let mut raw = [0u8; 32];
    raw[Hash::BYTES - significant.len()..].copy_from_slice(significant);
    Some(Hash::from_raw(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aedpos_types::MinerInRound;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use tracing_test::traced_test;

    fn round_of(n: u8) -> Round {
        let mut round = Round::default();
        for i in 1..=n {
            let key = Pubkey::from_bytes(&[i]);
            round.miners.insert(key.clone(), MinerInRound::new(key, i32::from(i)));
        }
        round
    }

    #[test]
    fn test_minimum_count_never_zero() {
        assert_eq!(minimum_count(1), 1);
        assert_eq!(minimum_count(2), 1);
        assert_eq!(minimum_count(3), 2);
        assert_eq!(minimum_count(17), 11);
        for n in 1..100 {
            assert!(minimum_count(n) >= 1);
        }
    }

    #[traced_test]
    #[test]
    fn test_split_and_reconstruct() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let round = round_of(5);
        let owner = Pubkey::from_bytes(&[1]);
        let in_value = Hash::from_bytes(b"secret in value");
        let out_value = Hash::of(&in_value);

        let pieces = split_in_value(&in_value, &owner, &round, &mut rng).unwrap();
        assert_eq!(pieces.len(), 4);
        assert!(!pieces.contains_key(&owner));

        let threshold = minimum_count(5);
        let revealed = reconstruct_in_value(&owner, &pieces, &round, threshold, &out_value).unwrap();
        assert_eq!(revealed, in_value);
    }

    #[traced_test]
    #[test]
    fn test_corrupted_piece_fails_commitment_check() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let round = round_of(3);
        let owner = Pubkey::from_bytes(&[3]);
        let in_value = Hash::from_bytes(b"v");

        let mut pieces = split_in_value(&in_value, &owner, &round, &mut rng).unwrap();
        pieces.insert(Pubkey::from_bytes(&[2]), vec![0xde, 0xad]);

        let result = reconstruct_in_value(&owner, &pieces, &round, 2, &Hash::of(&in_value));
        assert!(matches!(result, Err(SecretSharingError::CommitmentMismatch { .. })));
    }

    #[traced_test]
    #[test]
    fn test_corrupt_piece_skipped_while_enough_remain() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let round = round_of(5);
        let owner = Pubkey::from_bytes(&[5]);
        let in_value = Hash::from_bytes(b"one bad piece");

        let mut pieces = split_in_value(&in_value, &owner, &round, &mut rng).unwrap();
        // First in key order, so the first subset tried holds it.
        pieces.insert(Pubkey::from_bytes(&[1]), vec![0xde, 0xad]);

        let revealed =
            reconstruct_in_value(&owner, &pieces, &round, minimum_count(5), &Hash::of(&in_value)).unwrap();
        assert_eq!(revealed, in_value);
        assert!(logs_contain("Reconstructed in value around corrupt pieces"));

        // Two bad pieces out of four leave no clean subset of three.
        pieces.insert(Pubkey::from_bytes(&[2]), vec![0xbe, 0xef]);
        assert!(matches!(
            reconstruct_in_value(&owner, &pieces, &round, minimum_count(5), &Hash::of(&in_value)),
            Err(SecretSharingError::CommitmentMismatch { .. })
        ));
    }

    #[test]
    fn test_next_subset_walks_all_combinations() {
        let mut indices = vec![0, 1];
        let mut seen = vec![indices.clone()];
        while next_subset(&mut indices, 4) {
            seen.push(indices.clone());
        }
        assert_eq!(seen, vec![vec![0, 1], vec![0, 2], vec![0, 3], vec![1, 2], vec![1, 3], vec![2, 3]]);
        assert!(!next_subset(&mut [], 3));
    }

    #[test]
    fn test_unknown_piece_holder() {
        let round = round_of(2);
        let owner = Pubkey::from_bytes(&[1]);
        let pieces = BTreeMap::from([(Pubkey::from_bytes(&[9]), vec![1])]);
        assert!(matches!(
            reconstruct_in_value(&owner, &pieces, &round, 1, &Hash::ZERO),
            Err(SecretSharingError::UnknownPieceHolder { .. })
        ));
    }

    #[test]
    fn test_to_hash_pads_leading_zeros() {
        let mut raw = [0u8; 32];
        raw[31] = 7;
        let hash = Hash::from_raw(raw);
        assert_eq!(to_hash(&[7]), Some(hash));
        assert_eq!(to_hash(&[0, 0, 7]), Some(hash));
        assert_eq!(to_hash(&[1u8; 33]), None);
    }
}
