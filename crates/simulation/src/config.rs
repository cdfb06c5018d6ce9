//! Configuration types for the simulation.

use aedpos_consensus::AedposConfig;
use aedpos_types::Timestamp;

/// Configuration for a simulation run.
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    /// Number of miners in the genesis round.
    pub miners: usize,

    /// Consensus configuration shared by every node.
    pub consensus: AedposConfig,

    /// Start of the genesis round.
    pub start: Timestamp,

    /// Time between a block being produced and the next command being
    /// requested.
    pub block_delay_ms: i64,

    /// Random seed for in-values and secret shares.
    pub seed: u64,
}

impl SimulationConfig {
    /// Main chain with `miners` miners and default consensus settings.
    pub fn new(miners: usize) -> Self {
        Self {
            miners,
            consensus: AedposConfig::default(),
            start: Timestamp::ZERO,
            block_delay_ms: 1,
            seed: 12345,
        }
    }

    /// Set the consensus configuration.
    pub fn with_consensus(mut self, consensus: AedposConfig) -> Self {
        self.consensus = consensus;
        self
    }

    /// Set the genesis round start.
    pub fn with_start(mut self, start: Timestamp) -> Self {
        self.start = start;
        self
    }

    /// Set the delay between blocks. Floored at 1ms.
    pub fn with_block_delay_ms(mut self, delay_ms: i64) -> Self {
        self.block_delay_ms = delay_ms.max(1);
        self
    }

    /// Set the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}
