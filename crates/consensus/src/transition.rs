//! Round transitions: building the next round or the first round of the
//! next term from the current one.
//!
//! Slot orders of the next round come from the signatures miners published
//! in the current round. The layout half of that computation is exposed on
//! its own ([`expected_next_round_orders`]) so validators can recompute it
//! without caring about the producer's clock.

use crate::ValidationError;
use aedpos_types::{abs_modulus, MinerInRound, MinerList, Pubkey, Round, Timestamp};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

/// Inputs shared by every transition that are not part of the round itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionParams {
    pub mining_interval_ms: i64,
    pub now: Timestamp,
    pub blockchain_start: Timestamp,
    /// Count an unrevealed previous in-value as one more missed slot.
    pub missed_reveal_penalty: bool,
}

/// Order assignment and extra-block producer of a next round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextRoundLayout {
    pub orders: BTreeMap<Pubkey, i32>,
    pub extra_block_producer: Option<Pubkey>,
}

impl NextRoundLayout {
    fn miner_at(&self, order: i32) -> Option<Pubkey> {
        self.orders
            .iter()
            .find(|(_, o)| **o == order)
            .map(|(k, _)| k.clone())
    }

    fn swap(&mut self, a: &Pubkey, b: &Pubkey) {
        let (Some(order_a), Some(order_b)) = (self.orders.get(a).copied(), self.orders.get(b).copied()) else {
            return;
        };
        self.orders.insert(a.clone(), order_b);
        self.orders.insert(b.clone(), order_a);
    }
}

/// Next-round orders implied by `current`.
///
/// Miners that mined keep their final order; the others take the remaining
/// orders in key order. The extra-block producer is then picked from the
/// first signature by slot order, and the layout is adjusted so no miner
/// holds two consecutive slots across the round boundary.
///
/// Fails if two miners were given the same final order, or one outside
/// `1..=N`.
pub fn expected_next_round_orders(current: &Round) -> Result<NextRoundLayout, ValidationError> {
    check_final_orders(current)?;

    let mut mined: Vec<&MinerInRound> = current.mined_miners();
    mined.sort_by_key(|m| m.final_order_of_next_round);

    let mut orders = BTreeMap::new();
    for miner in &mined {
        orders.insert(miner.pubkey.clone(), miner.final_order_of_next_round);
    }

    let occupied: BTreeSet<i32> = orders.values().copied().collect();
    let free = (1..=current.miners_count()).filter(|o| !occupied.contains(o));
    for (miner, order) in current.not_mined_miners().into_iter().zip(free) {
        orders.insert(miner.pubkey.clone(), order);
    }

    let mut layout = NextRoundLayout {
        orders,
        extra_block_producer: None,
    };

    let extra_order = calculate_next_extra_block_producer_order(current);
    layout.extra_block_producer = layout.miner_at(extra_order).or_else(|| layout.miner_at(1));

    break_continuous_mining(current, &mut layout);
    Ok(layout)
}

/// Assigned final next-round orders must be distinct and within `1..=N`.
/// Miners without one (order 0) are skipped.
pub fn check_final_orders(round: &Round) -> Result<(), ValidationError> {
    let miners_count = round.miners_count();
    let mut seen = BTreeSet::new();
    for miner in round.miners.values() {
        let order = miner.final_order_of_next_round;
        if order == 0 {
            continue;
        }
        if !(1..=miners_count).contains(&order) {
            return Err(ValidationError::OrderConflict(format!(
                "{} has next round order {order} outside 1..={miners_count}",
                miner.pubkey
            )));
        }
        if !seen.insert(order) {
            return Err(ValidationError::OrderConflict(format!(
                "next round order {order} assigned twice in round {}",
                round.round_number
            )));
        }
    }
    Ok(())
}

/// Order of the next round's extra-block producer.
///
/// Derived from the signature of the first miner, by slot order, that has
/// one; defaults to 1.
pub fn calculate_next_extra_block_producer_order(current: &Round) -> i32 {
    current
        .miners_by_order()
        .into_iter()
        .find_map(|m| m.signature)
        .map(|signature| abs_modulus(signature.to_i64(), current.miners_count()) + 1)
        .unwrap_or(1)
}

/// Keep one miner from producing the last block of a round and the first
/// block of the next.
fn break_continuous_mining(current: &Round, layout: &mut NextRoundLayout) {
    let miners_count = current.miners_count();
    if miners_count <= 1 {
        return;
    }

    let current_extra = current.extra_block_producer().map(|m| m.pubkey.clone());
    if let (Some(first), Some(second)) = (layout.miner_at(1), layout.miner_at(2)) {
        if current_extra.as_ref() == Some(&first) {
            trace!(pubkey = %first, "Moving current extra block producer off first slot");
            layout.swap(&first, &second);
        }
    }

    if let (Some(last), Some(before_last)) = (layout.miner_at(miners_count), layout.miner_at(miners_count - 1)) {
        if layout.extra_block_producer.as_ref() == Some(&last) {
            trace!(pubkey = %last, "Moving next extra block producer off last slot");
            layout.swap(&last, &before_last);
        }
    }
}

/// Next round of the same term.
pub fn generate_next_round(
    current: &Round,
    previous: Option<&Round>,
    params: &TransitionParams,
) -> Result<Round, ValidationError> {
    let layout = expected_next_round_orders(current)?;

    let mut next = Round {
        round_number: current.round_number.saturating_add(1),
        term_number: current.term_number,
        confirmed_irreversible_block_height: current.confirmed_irreversible_block_height,
        confirmed_irreversible_block_round_number: current.confirmed_irreversible_block_round_number,
        blockchain_age: blockchain_age(current, params),
        ..Default::default()
    };

    for (pubkey, order) in &layout.orders {
        let Some(miner) = current.miner(pubkey) else {
            continue;
        };
        let mined = miner.supposed_order_of_next_round != 0;

        let mut missed = miner.missed_time_slots;
        if !mined {
            missed = missed.saturating_add(1);
        } else if params.missed_reveal_penalty && missed_reveal(miner, previous) {
            debug!(pubkey = %pubkey, round_number = current.round_number, "Previous in value never revealed");
            missed = missed.saturating_add(1);
        }

        let mut next_miner = MinerInRound::new(pubkey.clone(), *order);
        next_miner.expected_mining_time = Some(
            params
                .now
                .add_millis(params.mining_interval_ms.saturating_mul(i64::from(*order))),
        );
        next_miner.produced_blocks = miner.produced_blocks;
        next_miner.missed_time_slots = missed;
        next_miner.is_extra_block_producer = layout.extra_block_producer.as_ref() == Some(pubkey);
        next.miners.insert(pubkey.clone(), next_miner);
    }

    debug!(
        round_number = next.round_number,
        term_number = next.term_number,
        extra_block_producer = ?layout.extra_block_producer,
        "Generated next round"
    );
    Ok(next)
}

/// Mined in the current round, committed in the previous one, but never
/// revealed what it committed to.
fn missed_reveal(miner: &MinerInRound, previous: Option<&Round>) -> bool {
    let committed = previous
        .and_then(|p| p.miner(&miner.pubkey))
        .is_some_and(|m| m.out_value.is_some());
    committed && miner.revealed_previous_in_value().is_none()
}

/// Next round on a side chain whose main-chain miners changed: the first
/// round of the mirrored list, keeping the term.
pub fn generate_mirrored_round(current: &Round, mirror: &MinerList, params: &TransitionParams) -> Round {
    let mut next = mirror.generate_first_round_of_new_term(
        params.mining_interval_ms,
        params.now,
        current.round_number,
        current.term_number,
    );
    next.term_number = current.term_number;
    next.confirmed_irreversible_block_height = current.confirmed_irreversible_block_height;
    next.confirmed_irreversible_block_round_number = current.confirmed_irreversible_block_round_number;
    next.blockchain_age = blockchain_age(current, params);
    debug!(round_number = next.round_number, miners = mirror.len(), "Mirrored main chain miners");
    next
}

/// Miners of the next term: `victories`, or the current miners if the
/// election has no result.
pub fn next_term_miners(current: &Round, victories: &MinerList) -> MinerList {
    if victories.is_empty() {
        current.miner_list()
    } else {
        victories.clone()
    }
}

/// First round of the next term.
pub fn generate_next_term(current: &Round, victories: &MinerList, params: &TransitionParams) -> Round {
    let miners = next_term_miners(current, victories);

    let mut next = miners.generate_first_round_of_new_term(
        params.mining_interval_ms,
        params.now,
        current.round_number,
        current.term_number,
    );
    next.confirmed_irreversible_block_height = current.confirmed_irreversible_block_height;
    next.confirmed_irreversible_block_round_number = current.confirmed_irreversible_block_round_number;
    next.blockchain_age = blockchain_age(current, params);

    debug!(
        round_number = next.round_number,
        term_number = next.term_number,
        miners = miners.len(),
        elected = !victories.is_empty(),
        "Generated first round of next term"
    );
    next
}

fn blockchain_age(current: &Round, params: &TransitionParams) -> i64 {
    if current.round_number == 1 {
        1
    } else {
        params.now.seconds_since(params.blockchain_start)
    }
}
