//! Deterministic AEDPoS simulation.
//!
//! Runs a set of miners, each with its own [`ConsensusState`], against a
//! shared simulated clock. Given the same seed, it produces identical blocks
//! every run.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  SimulationRunner                       │
//! │                                                         │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │  GetConsensusCommand on every online miner         │ │
//! │  │  earliest arranged time wins (ties: node index)    │ │
//! │  └────────────────────────┬───────────────────────────┘ │
//! │                           │                             │
//! │                           ▼                             │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │  producer: trigger → header                        │ │
//! │  │  every node: validate → process → validate after   │ │
//! │  └────────────────────────┬───────────────────────────┘ │
//! │                           │                             │
//! │                           ▼                             │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │  clock = block time + block delay, actions logged  │ │
//! │  └────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Offline miners keep following the chain but never produce.
//!
//! [`ConsensusState`]: aedpos_consensus::ConsensusState

mod config;
mod node;
mod runner;

pub use config::SimulationConfig;
pub use node::SimNode;
pub use runner::{ProducedBlock, SimulationError, SimulationRunner, SimulationStats};

use tracing_subscriber::EnvFilter;

/// Type alias for deterministic node indexing in simulation.
pub type NodeIndex = u32;

/// Install a formatting subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
