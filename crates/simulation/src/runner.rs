//! Simulation runner.

use crate::{NodeIndex, SimNode, SimulationConfig};
use aedpos_consensus::{ConsensusError, ConsensusState, ValidationError};
use aedpos_core::{Action, ElectionProvider};
use aedpos_secret_sharing::SecretSharingError;
use aedpos_test_helpers::{first_round, miner_keys, StaticElectionProvider};
use aedpos_types::{Behaviour, BlockContext, ConsensusCommand, HeaderInformation, MinerList, Pubkey, Round, Timestamp};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Errors that stop a simulation.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Simulation needs at least one miner")]
    NoMiners,

    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error(transparent)]
    SecretSharing(#[from] SecretSharingError),

    #[error("Nodes disagree on block {height}: {detail}")]
    Diverged { height: i64, detail: String },

    #[error("No online miner has anything to mine at {now}")]
    Stalled { now: Timestamp },

    #[error("Target not reached within {steps} steps")]
    TargetNotReached { steps: usize },
}

/// A block every node accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducedBlock {
    pub height: i64,
    pub time: Timestamp,
    pub producer: Pubkey,
    pub behaviour: Behaviour,
    /// Round and term after the block was applied.
    pub round_number: i64,
    pub term_number: i64,
    pub actions: Vec<Action>,
}

/// Counters over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationStats {
    pub blocks_produced: u64,
    pub rejected_blocks: u64,
    pub blocks_by_behaviour: BTreeMap<&'static str, u64>,
    pub rounds_entered: u64,
    pub terms_entered: u64,
}

/// Drives every miner's consensus state block by block.
///
/// At each step every online miner is asked for its command at the current
/// time; the earliest one is produced, validated and applied on every node.
pub struct SimulationRunner {
    config: SimulationConfig,
    nodes: Vec<SimNode>,
    election: Arc<StaticElectionProvider>,
    rng: ChaCha8Rng,
    now: Timestamp,
    /// Height of the last block; the genesis block is 1.
    height: i64,
    blocks: Vec<ProducedBlock>,
    stats: SimulationStats,
}

impl SimulationRunner {
    /// Create `config.miners` nodes sharing one genesis round.
    pub fn new(config: SimulationConfig) -> Result<Self, SimulationError> {
        if config.miners == 0 {
            return Err(SimulationError::NoMiners);
        }
        let keys = miner_keys(config.miners);
        let genesis = first_round(&keys, config.start, config.consensus.mining_interval_ms);
        let election = Arc::new(StaticElectionProvider::empty());

        let mut nodes = Vec::with_capacity(keys.len());
        for pubkey in keys {
            let provider: Arc<dyn ElectionProvider> = election.clone();
            let mut state = ConsensusState::new(config.consensus.clone(), provider)?;
            state.first_round(genesis.clone())?;
            nodes.push(SimNode::new(pubkey, state));
        }

        info!(
            miners = nodes.len(),
            seed = config.seed,
            chain_type = ?config.consensus.chain_type,
            "Simulation initialized"
        );
        Ok(Self {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            now: config.start,
            height: 1,
            config,
            nodes,
            election,
            blocks: Vec::new(),
            stats: SimulationStats::default(),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn nodes(&self) -> &[SimNode] {
        &self.nodes
    }

    pub fn node(&self, index: NodeIndex) -> Option<&SimNode> {
        self.nodes.get(index as usize)
    }

    pub fn node_of(&self, pubkey: &Pubkey) -> Option<&SimNode> {
        self.nodes.iter().find(|n| n.pubkey() == pubkey)
    }

    pub fn pubkeys(&self) -> Vec<Pubkey> {
        self.nodes.iter().map(|n| n.pubkey().clone()).collect()
    }

    /// Election service consulted by every node at term changes.
    pub fn election(&self) -> &StaticElectionProvider {
        &self.election
    }

    pub fn now(&self) -> Timestamp {
        self.now
    }

    pub fn height(&self) -> i64 {
        self.height
    }

    pub fn blocks(&self) -> &[ProducedBlock] {
        &self.blocks
    }

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    /// Actions of every accepted block, in block order.
    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.blocks.iter().flat_map(|b| b.actions.iter())
    }

    /// Every node holds the same chain; the first one answers.
    pub fn state(&self) -> &ConsensusState {
        self.nodes[0].state()
    }

    pub fn current_round(&self) -> Result<&Round, SimulationError> {
        Ok(self.state().current_round()?)
    }

    pub fn current_round_number(&self) -> i64 {
        self.state().current_round_number()
    }

    pub fn current_term_number(&self) -> i64 {
        self.state().current_term_number()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Control
    // ═══════════════════════════════════════════════════════════════════════

    /// Take a miner offline or back online. Returns false for unknown keys.
    pub fn set_online(&mut self, pubkey: &Pubkey, online: bool) -> bool {
        match self.nodes.iter_mut().find(|n| n.pubkey() == pubkey) {
            Some(node) => {
                info!(pubkey = %pubkey, online, "Miner availability changed");
                node.set_online(online);
                true
            }
            None => false,
        }
    }

    /// Deliver the main chain's miners to every node of a side chain.
    pub fn update_main_chain_information(
        &mut self,
        round_number: i64,
        miners: MinerList,
    ) -> Result<bool, SimulationError> {
        let mut updated = false;
        for node in &mut self.nodes {
            updated = node
                .state_mut()
                .update_main_chain_information(round_number, miners.clone())?;
        }
        Ok(updated)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Stepping
    // ═══════════════════════════════════════════════════════════════════════

    /// Produce one block. Returns `None` when the block was rejected; the
    /// producer then loses a mining interval.
    pub fn step(&mut self) -> Result<Option<ProducedBlock>, SimulationError> {
        let Some((index, command)) = self.next_command()? else {
            return Err(SimulationError::Stalled { now: self.now });
        };
        let time = command.arranged_mining_time.max(self.now);
        let height = self.height + 1;
        let producer = self.nodes[index].pubkey().clone();

        let trigger = self.nodes[index].trigger(command.behaviour, &mut self.rng)?;
        let block = BlockContext::new(producer.clone(), height, time);
        let header = self.nodes[index]
            .state()
            .get_consensus_extra_data(&trigger, &block)?;

        if let Err(e) = self.validate_everywhere(&header, &block)? {
            warn!(
                producer = %producer,
                behaviour = %command.behaviour,
                height,
                kind = e.kind(),
                error = %e,
                "Block rejected"
            );
            self.stats.rejected_blocks += 1;
            self.now = time.add_millis(self.config.consensus.mining_interval_ms);
            return Ok(None);
        }

        let actions = self.apply_everywhere(&header, &block)?;
        if let Some(in_value) = trigger.in_value {
            self.nodes[index].remember_in_value(header.round.round_number, in_value);
        }
        self.height = height;
        self.now = time.add_millis(self.config.block_delay_ms);

        self.stats.blocks_produced += 1;
        *self
            .stats
            .blocks_by_behaviour
            .entry(command.behaviour.type_name())
            .or_default() += 1;
        match command.behaviour {
            Behaviour::NextRound => self.stats.rounds_entered += 1,
            Behaviour::NextTerm => {
                self.stats.rounds_entered += 1;
                self.stats.terms_entered += 1;
            }
            _ => {}
        }

        let produced = ProducedBlock {
            height,
            time,
            producer,
            behaviour: command.behaviour,
            round_number: self.current_round_number(),
            term_number: self.current_term_number(),
            actions,
        };
        debug!(
            height,
            time = time.as_millis(),
            producer = %produced.producer,
            behaviour = %produced.behaviour,
            round_number = produced.round_number,
            "Block produced"
        );
        self.blocks.push(produced.clone());
        Ok(Some(produced))
    }

    /// Run `count` steps.
    pub fn run_steps(&mut self, count: usize) -> Result<(), SimulationError> {
        for _ in 0..count {
            self.step()?;
        }
        Ok(())
    }

    /// Step until `done` holds. Returns the steps taken.
    pub fn run_until<F>(&mut self, max_steps: usize, mut done: F) -> Result<usize, SimulationError>
    where
        F: FnMut(&SimulationRunner) -> bool,
    {
        for steps in 0..max_steps {
            if done(self) {
                return Ok(steps);
            }
            self.step()?;
        }
        if done(self) {
            Ok(max_steps)
        } else {
            Err(SimulationError::TargetNotReached { steps: max_steps })
        }
    }

    /// Step until the chain enters `round_number`.
    pub fn run_until_round(&mut self, round_number: i64, max_steps: usize) -> Result<usize, SimulationError> {
        self.run_until(max_steps, |sim| sim.current_round_number() >= round_number)
    }

    /// Step until the chain enters `term_number`.
    pub fn run_until_term(&mut self, term_number: i64, max_steps: usize) -> Result<usize, SimulationError> {
        self.run_until(max_steps, |sim| sim.current_term_number() >= term_number)
    }

    /// Earliest command of any online miner; ties go to the lower index.
    fn next_command(&self) -> Result<Option<(usize, ConsensusCommand)>, SimulationError> {
        let mut best: Option<(usize, ConsensusCommand)> = None;
        for (index, node) in self.nodes.iter().enumerate() {
            let Some(command) = node.command(self.now)? else {
                continue;
            };
            let earlier = best
                .as_ref()
                .map_or(true, |(_, b)| command.arranged_mining_time < b.arranged_mining_time);
            if earlier {
                best = Some((index, command));
            }
        }
        Ok(best)
    }

    /// Pre-execution verdict, which must be the same on every node.
    fn validate_everywhere(
        &self,
        header: &HeaderInformation,
        block: &BlockContext,
    ) -> Result<Result<(), ValidationError>, SimulationError> {
        let mut verdict: Option<Result<(), ValidationError>> = None;
        for node in &self.nodes {
            let result = node.state().validate_consensus_before_execution(header, block);
            match &verdict {
                None => verdict = Some(result),
                Some(first) if first.is_ok() != result.is_ok() => {
                    return Err(SimulationError::Diverged {
                        height: block.height,
                        detail: format!("{} disagrees on validity", node.pubkey()),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(verdict.unwrap_or(Ok(())))
    }

    /// Process the block on every node and check the result after
    /// execution.
    fn apply_everywhere(
        &mut self,
        header: &HeaderInformation,
        block: &BlockContext,
    ) -> Result<Vec<Action>, SimulationError> {
        let mut produced: Option<Vec<Action>> = None;
        for node in &mut self.nodes {
            let state = node.state_mut();
            let transaction = state.generate_consensus_transaction(header)?;
            let actions = state.process_consensus_transaction(&transaction, block)?;
            state
                .validate_consensus_after_execution(header)
                .map_err(ConsensusError::from)?;

            match &produced {
                None => produced = Some(actions),
                Some(first) if *first != actions => {
                    return Err(SimulationError::Diverged {
                        height: block.height,
                        detail: format!("{} returned different actions", node.pubkey()),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(produced.unwrap_or_default())
    }
}

impl std::fmt::Debug for SimulationRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationRunner")
            .field("miners", &self.nodes.len())
            .field("now", &self.now)
            .field("height", &self.height)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
