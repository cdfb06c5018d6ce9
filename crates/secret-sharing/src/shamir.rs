//! Shamir (t, n) secret sharing over the Mersenne prime 2^1279 - 1.

use crate::SecretSharingError;
use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand::Rng;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Exponent of the field prime, 2^1279 - 1.
const PRIME_EXPONENT: u32 = 1279;

/// Largest secret accepted, in bytes. Anything shorter is below the prime.
pub const MAX_SECRET_BYTES: usize = (PRIME_EXPONENT as usize - 1) / 8;

/// The field prime.
pub fn prime() -> &'static BigUint {
    static PRIME: OnceLock<BigUint> = OnceLock::new();
    PRIME.get_or_init(|| (BigUint::one() << PRIME_EXPONENT) - BigUint::one())
}

/// Split `secret` into `total` shares, any `threshold` of which recover it.
///
/// Share `i` (0-based) is the polynomial evaluated at `x = i + 1`, so the
/// share for the miner at order `k` is `shares[k - 1]`.
pub fn encode_secret<R: Rng + ?Sized>(
    secret: &[u8],
    threshold: usize,
    total: usize,
    rng: &mut R,
) -> Result<Vec<Vec<u8>>, SecretSharingError> {
    check_threshold(threshold, total)?;
    if secret.len() > MAX_SECRET_BYTES {
        return Err(SecretSharingError::SecretTooLarge {
            len: secret.len(),
            max: MAX_SECRET_BYTES,
        });
    }

    let prime = prime();
    let mut coefficients = Vec::with_capacity(threshold);
    coefficients.push(BigUint::from_bytes_be(secret));
    for _ in 1..threshold {
        coefficients.push(rng.gen_biguint_below(prime));
    }

    let shares = (1..=total)
        .map(|x| evaluate(&coefficients, &BigUint::from(x), prime).to_bytes_be())
        .collect();
    Ok(shares)
}

/// Recover a secret from `threshold` shares taken at the given orders.
///
/// Only the first `threshold` pairs are used. The result is whatever the
/// interpolation yields: corrupted shares give a wrong value, not an error,
/// so callers must check it against an independent commitment.
pub fn decode_secret(
    shares: &[Vec<u8>],
    orders: &[i32],
    threshold: usize,
) -> Result<Vec<u8>, SecretSharingError> {
    if threshold == 0 {
        return Err(SecretSharingError::InvalidThreshold {
            threshold,
            total: shares.len(),
        });
    }
    if shares.len() < threshold || orders.len() < threshold {
        return Err(SecretSharingError::NotEnoughShares {
            provided: shares.len().min(orders.len()),
            required: threshold,
        });
    }

    let mut seen = BTreeSet::new();
    let mut xs = Vec::with_capacity(threshold);
    for &order in &orders[..threshold] {
        if order <= 0 {
            return Err(SecretSharingError::InvalidOrder { order });
        }
        if !seen.insert(order) {
            return Err(SecretSharingError::DuplicateOrder { order });
        }
        xs.push(BigUint::from(order.unsigned_abs()));
    }

    let prime = prime();
    let mut secret = BigUint::zero();
    for (i, share) in shares[..threshold].iter().enumerate() {
        let y = BigUint::from_bytes_be(share) % prime;
        let mut numerator = BigUint::one();
        let mut denominator = BigUint::one();
        for (j, xj) in xs.iter().enumerate() {
            if i == j {
                continue;
            }
            // l_i(0) = prod x_j / (x_j - x_i)
            numerator = numerator * xj % prime;
            denominator = denominator * ((xj + prime - &xs[i]) % prime) % prime;
        }
        let term = y * numerator % prime * inverse(&denominator, prime) % prime;
        secret = (secret + term) % prime;
    }
    Ok(secret.to_bytes_be())
}

/// Horner evaluation of the polynomial at `x`.
fn evaluate(coefficients: &[BigUint], x: &BigUint, prime: &BigUint) -> BigUint {
    coefficients
        .iter()
        .rev()
        .fold(BigUint::zero(), |acc, c| (acc * x + c) % prime)
}

/// Modular inverse by Fermat's little theorem.
fn inverse(value: &BigUint, prime: &BigUint) -> BigUint {
    value.modpow(&(prime - BigUint::from(2u8)), prime)
}

fn check_threshold(threshold: usize, total: usize) -> Result<(), SecretSharingError> {
    if threshold == 0 || threshold > total {
        return Err(SecretSharingError::InvalidThreshold { threshold, total });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn trim(bytes: &[u8]) -> Vec<u8> {
        BigUint::from_bytes_be(bytes).to_bytes_be()
    }

    #[test]
    fn test_two_of_three_reconstructs_secret() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let secret = b"commitment in value".to_vec();
        let shares = encode_secret(&secret, 2, 3, &mut rng).unwrap();
        assert_eq!(shares.len(), 3);

        for (a, b) in [(0usize, 1usize), (0, 2), (1, 2)] {
            let picked = vec![shares[a].clone(), shares[b].clone()];
            let orders = [a as i32 + 1, b as i32 + 1];
            assert_eq!(decode_secret(&picked, &orders, 2).unwrap(), trim(&secret));
        }
    }

    #[test]
    fn test_corrupted_share_yields_different_value() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let secret = vec![0x5a; 32];
        let mut shares = encode_secret(&secret, 2, 3, &mut rng).unwrap();
        shares[1] = vec![0x01, 0x02, 0x03];

        let decoded = decode_secret(&shares[..2], &[1, 2], 2).unwrap();
        assert_ne!(decoded, secret);
    }

    #[test]
    fn test_threshold_one_is_the_secret_itself() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let shares = encode_secret(&[9, 9], 1, 4, &mut rng).unwrap();
        for share in &shares {
            assert_eq!(share, &vec![9, 9]);
        }
        assert_eq!(decode_secret(&shares[2..3], &[3], 1).unwrap(), vec![9, 9]);
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(matches!(
            encode_secret(b"x", 0, 3, &mut rng),
            Err(SecretSharingError::InvalidThreshold { .. })
        ));
        assert!(matches!(
            encode_secret(b"x", 4, 3, &mut rng),
            Err(SecretSharingError::InvalidThreshold { .. })
        ));
        assert!(matches!(
            encode_secret(&vec![1u8; MAX_SECRET_BYTES + 1], 2, 3, &mut rng),
            Err(SecretSharingError::SecretTooLarge { .. })
        ));

        let shares = encode_secret(b"x", 2, 3, &mut rng).unwrap();
        assert!(matches!(
            decode_secret(&shares[..1], &[1], 2),
            Err(SecretSharingError::NotEnoughShares { provided: 1, required: 2 })
        ));
        assert!(matches!(
            decode_secret(&shares[..2], &[2, 2], 2),
            Err(SecretSharingError::DuplicateOrder { order: 2 })
        ));
        assert!(matches!(
            decode_secret(&shares[..2], &[0, 2], 2),
            Err(SecretSharingError::InvalidOrder { order: 0 })
        ));
    }
}
