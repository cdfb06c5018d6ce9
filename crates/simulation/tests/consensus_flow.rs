//! End-to-end runs of miners driving the consensus state machine.

use aedpos_consensus::AedposConfig;
use aedpos_core::Action;
use aedpos_simulation::{SimulationConfig, SimulationRunner};
use aedpos_types::{Behaviour, MinerList};
use tracing_test::traced_test;

const MAX_STEPS: usize = 5_000;

fn runner(miners: usize) -> SimulationRunner {
    SimulationRunner::new(SimulationConfig::new(miners)).unwrap()
}

#[traced_test]
#[test]
fn test_every_miner_mines_every_round() {
    let mut sim = runner(3);
    sim.run_until_round(6, MAX_STEPS).unwrap();

    assert_eq!(sim.stats().rejected_blocks, 0);
    assert_eq!(sim.stats().rounds_entered, 5);
    assert!(sim.stats().blocks_by_behaviour["TinyBlock"] > 0);

    let state = sim.state();
    for round_number in 2..=5 {
        let round = state.round(round_number).unwrap();
        assert!(
            round.miners.values().all(|m| m.has_mined()),
            "round {round_number} has a miner that did not mine"
        );
        assert_eq!(state.mined_miner_list(round_number).unwrap().len(), 3);
    }

    let heights: Vec<i64> = sim.blocks().iter().map(|b| b.height).collect();
    assert!(heights.windows(2).all(|w| w[1] == w[0] + 1));
    let times: Vec<_> = sim.blocks().iter().map(|b| b.time).collect();
    assert!(times.windows(2).all(|w| w[1] > w[0]));
}

#[test]
fn test_irreversible_block_only_moves_forward() {
    let mut sim = runner(3);
    sim.run_until_round(7, MAX_STEPS).unwrap();

    let lib_heights: Vec<i64> = sim
        .actions()
        .filter_map(|a| match a {
            Action::IrreversibleBlockFound { height, .. } => Some(*height),
            _ => None,
        })
        .collect();
    assert!(!lib_heights.is_empty());
    assert!(lib_heights.windows(2).all(|w| w[1] > w[0]));

    let (height, round_number) = sim.state().irreversible_block().unwrap();
    assert_eq!(Some(&height), lib_heights.last());
    assert!(height < sim.height());
    assert!(round_number < sim.current_round_number());
}

#[test]
fn test_same_seed_same_chain() {
    let run = |seed| {
        let mut sim = SimulationRunner::new(SimulationConfig::new(4).with_seed(seed)).unwrap();
        sim.run_until_round(5, MAX_STEPS).unwrap();
        (sim.blocks().to_vec(), sim.current_round().unwrap().clone())
    };
    assert_eq!(run(42), run(42));
}

#[test]
fn test_bootstrap_waits_for_first_miner() {
    let mut sim = runner(5);
    let round = sim.current_round().unwrap().clone();
    let first = round.first_miner().unwrap().pubkey.clone();
    let second = round.miner_at_order(2).unwrap().pubkey.clone();
    sim.set_online(&first, false);

    let block = sim.step().unwrap().unwrap();
    assert_eq!(block.behaviour, Behaviour::NextRound);
    assert_eq!(block.producer, second);
    assert_eq!(block.round_number, 2);
}

#[traced_test]
#[test]
fn test_silent_miner_in_value_is_revealed_by_peers() {
    let mut sim = runner(5);
    sim.run_until_round(4, MAX_STEPS).unwrap();
    let owner = sim.current_round().unwrap().first_miner().unwrap().pubkey.clone();

    sim.run_until_round(5, MAX_STEPS).unwrap();
    let committed = sim.node_of(&owner).unwrap().in_value(4).unwrap();
    sim.set_online(&owner, false);
    sim.run_until_round(6, MAX_STEPS).unwrap();

    let round_four = sim.state().round(4).unwrap();
    assert_eq!(round_four.miner(&owner).unwrap().decrypted_pieces.len(), 4);

    let round_five = sim.state().round(5).unwrap();
    let slot = round_five.miner(&owner).unwrap();
    assert!(!slot.has_mined());
    assert_eq!(slot.previous_in_value, Some(committed));
}

#[test]
fn test_offline_miner_reported_as_evil() {
    let config = SimulationConfig::new(4)
        .with_consensus(AedposConfig::default().with_tolerable_missed_time_slots(3));
    let mut sim = SimulationRunner::new(config).unwrap();
    let offline = sim.current_round().unwrap().miner_at_order(3).unwrap().pubkey.clone();
    sim.set_online(&offline, false);

    let report = |sim: &SimulationRunner| {
        sim.actions().find_map(|a| match a {
            Action::ReportEvilMiners { pubkeys } => Some(pubkeys.clone()),
            _ => None,
        })
    };
    sim.run_until(MAX_STEPS, |sim| report(sim).is_some()).unwrap();

    let pubkeys = report(&sim).unwrap();
    assert!(pubkeys.contains(&offline));
    let current = sim.current_round().unwrap();
    for pubkey in &pubkeys {
        assert!(current.miner(pubkey).unwrap().missed_time_slots >= 3);
    }
    // The chain keeps going without the reported miner.
    let round_number = sim.current_round_number();
    sim.run_until_round(round_number + 2, MAX_STEPS).unwrap();
}

#[traced_test]
#[test]
fn test_term_changes_to_elected_miners() {
    let config = SimulationConfig::new(4)
        .with_consensus(AedposConfig::default().with_period_seconds(60));
    let mut sim = SimulationRunner::new(config).unwrap();
    let elected = MinerList::new(sim.pubkeys()[..3].to_vec());
    sim.election().set_victories(elected.clone());

    sim.run_until_term(2, MAX_STEPS).unwrap();

    let block = sim.blocks().last().unwrap().clone();
    assert_eq!(block.behaviour, Behaviour::NextTerm);
    assert_eq!(block.term_number, 2);
    assert!(block
        .actions
        .iter()
        .any(|a| matches!(a, Action::DistributeMiningReward { term_number: 1, .. })));
    assert!(block.actions.iter().any(|a| matches!(
        a,
        Action::MinerListChanged { term_number: 2, miners } if miners.same_members(&elected)
    )));

    let state = sim.state();
    assert_eq!(state.first_round_number_of_term(2), Some(block.round_number));
    assert!(state.current_miner_list().unwrap().same_members(&elected));

    // The new miners keep the chain going; the dropped one has nothing to do.
    let dropped = sim.pubkeys()[3].clone();
    sim.run_until_round(block.round_number + 2, MAX_STEPS).unwrap();
    assert!(sim
        .blocks()
        .iter()
        .filter(|b| b.height > block.height)
        .all(|b| b.producer != dropped));
}

#[test]
fn test_side_chain_mirrors_main_chain_miners() {
    let config = SimulationConfig::new(4).with_consensus(AedposConfig::side_chain());
    let mut sim = SimulationRunner::new(config).unwrap();
    sim.run_until_round(3, MAX_STEPS).unwrap();

    let main_chain = MinerList::new(sim.pubkeys()[..3].to_vec());
    assert!(sim.update_main_chain_information(10, main_chain.clone()).unwrap());
    assert!(!sim.update_main_chain_information(9, main_chain.clone()).unwrap());

    sim.run_until_round(5, MAX_STEPS).unwrap();

    let state = sim.state();
    let mirrored = state.round(4).unwrap();
    assert!(mirrored.is_miner_list_just_changed);
    assert_eq!(mirrored.term_number, 1);
    assert!(mirrored.miner_list().same_members(&main_chain));
    assert!(state.current_miner_list().unwrap().same_members(&main_chain));
    assert_eq!(sim.current_term_number(), 1);
    assert_eq!(sim.stats().terms_entered, 0);
}
