//! Core seams for AEDPoS consensus.
//!
//! - [`Action`]: effects returned by block processing for the runner to
//!   perform (reward distribution, evil-miner reports, LIB events)
//! - [`ElectionProvider`]: the external election service that supplies
//!   miner lists at term boundaries

mod action;
mod traits;

pub use action::Action;
pub use traits::ElectionProvider;
