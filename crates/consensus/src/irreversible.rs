//! Last irreversible block height from implied heights.

use aedpos_types::Round;

/// LIB height implied by the miners that mined `current`, using the heights
/// they implied while mining `previous`.
///
/// Returns `None` without a consent majority. Otherwise the height at
/// index `(len - 1) / 3` of the ascending list, so at least two thirds of
/// the counted miners implied a height at or above it.
pub fn calculate_lib_height(current: &Round, previous: &Round) -> Option<i64> {
    let mined: Vec<_> = current.mined_miners().into_iter().map(|m| &m.pubkey).collect();
    let heights = previous.sorted_implied_irreversible_block_heights(mined);
    let consent = usize::try_from(current.miners_count_of_consent()).unwrap_or(usize::MAX);
    if heights.is_empty() || heights.len() < consent {
        return None;
    }
    heights.get((heights.len() - 1) / 3).copied()
}
