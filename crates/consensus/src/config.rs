//! Configuration for the AEDPoS consensus core.

use crate::ConsensusError;
use serde::{Deserialize, Serialize};

/// Whether the chain runs terms (main chain) or mirrors the main chain's
/// miners (side chain).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainType {
    MainChain,
    SideChain,
}

/// Who may terminate a round once their own slot has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationPolicy {
    /// Any miner whose slot passed may produce NextRound/NextTerm. The
    /// command arrangement still gives the extra-block producer the first
    /// opportunity.
    AnyMinerAfterSlot,

    /// Only the extra-block producer may terminate, unless it let a whole
    /// round length pass after its extra block slot.
    ExtraBlockProducerOnly,
}

/// How the time-slot validator decides that a header carries a new round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundIdentityPolicy {
    /// Compare the summed expected-mining-time fingerprint.
    RoundId,

    /// Compare round and term numbers.
    RoundAndTermNumber,
}

/// Configuration for the consensus core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AedposConfig {
    pub chain_type: ChainType,

    /// Length of one miner's time slot.
    pub mining_interval_ms: i64,

    /// Wall-clock length of a term.
    pub period_seconds: i64,

    /// Blocks a miner may produce in its slot when the chain is healthy.
    pub maximum_tiny_blocks_count: i32,

    /// Missed slots after which a miner is reported as evil.
    pub tolerable_missed_time_slots: i64,

    /// Whether in-values are secret-shared among miners.
    pub secret_sharing_enabled: bool,

    pub termination_policy: TerminationPolicy,

    pub time_slot_check: RoundIdentityPolicy,

    /// Count a missed reveal of the previous in-value as a missed slot.
    pub missed_reveal_penalty: bool,

    /// Gap between consecutive tiny blocks.
    pub tiny_block_minimum_interval_ms: i64,
}

impl Default for AedposConfig {
    fn default() -> Self {
        Self {
            chain_type: ChainType::MainChain,
            mining_interval_ms: 4000,
            period_seconds: 604_800,
            maximum_tiny_blocks_count: 8,
            tolerable_missed_time_slots: 4320,
            secret_sharing_enabled: true,
            termination_policy: TerminationPolicy::AnyMinerAfterSlot,
            time_slot_check: RoundIdentityPolicy::RoundAndTermNumber,
            missed_reveal_penalty: false,
            tiny_block_minimum_interval_ms: 50,
        }
    }
}

impl AedposConfig {
    /// Default side-chain configuration.
    pub fn side_chain() -> Self {
        Self {
            chain_type: ChainType::SideChain,
            ..Default::default()
        }
    }

    /// Parse from TOML. Missing keys take their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConsensusError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_mining_interval_ms(mut self, mining_interval_ms: i64) -> Self {
        self.mining_interval_ms = mining_interval_ms;
        self
    }

    pub fn with_period_seconds(mut self, period_seconds: i64) -> Self {
        self.period_seconds = period_seconds;
        self
    }

    pub fn with_maximum_tiny_blocks_count(mut self, count: i32) -> Self {
        self.maximum_tiny_blocks_count = count;
        self
    }

    pub fn with_tolerable_missed_time_slots(mut self, threshold: i64) -> Self {
        self.tolerable_missed_time_slots = threshold;
        self
    }

    pub fn with_secret_sharing(mut self, enabled: bool) -> Self {
        self.secret_sharing_enabled = enabled;
        self
    }

    pub fn with_termination_policy(mut self, policy: TerminationPolicy) -> Self {
        self.termination_policy = policy;
        self
    }

    pub fn with_time_slot_check(mut self, policy: RoundIdentityPolicy) -> Self {
        self.time_slot_check = policy;
        self
    }

    pub fn with_missed_reveal_penalty(mut self, enabled: bool) -> Self {
        self.missed_reveal_penalty = enabled;
        self
    }

    pub fn is_main_chain(&self) -> bool {
        self.chain_type == ChainType::MainChain
    }

    /// Reject values the scheduler cannot work with.
    pub fn validate(&self) -> Result<(), ConsensusError> {
        if self.mining_interval_ms <= 0 {
            return Err(ConsensusError::InvalidConfig(format!(
                "mining_interval_ms must be positive, got {}",
                self.mining_interval_ms
            )));
        }
        if self.period_seconds <= 0 {
            return Err(ConsensusError::InvalidConfig(format!(
                "period_seconds must be positive, got {}",
                self.period_seconds
            )));
        }
        if self.maximum_tiny_blocks_count <= 0 {
            return Err(ConsensusError::InvalidConfig(format!(
                "maximum_tiny_blocks_count must be positive, got {}",
                self.maximum_tiny_blocks_count
            )));
        }
        if self.tolerable_missed_time_slots <= 0 {
            return Err(ConsensusError::InvalidConfig(format!(
                "tolerable_missed_time_slots must be positive, got {}",
                self.tolerable_missed_time_slots
            )));
        }
        if self.tiny_block_minimum_interval_ms < 0 {
            return Err(ConsensusError::InvalidConfig(format!(
                "tiny_block_minimum_interval_ms must not be negative, got {}",
                self.tiny_block_minimum_interval_ms
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AedposConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.is_main_chain());
        assert_eq!(config.time_slot_check, RoundIdentityPolicy::RoundAndTermNumber);
        assert!(!AedposConfig::side_chain().is_main_chain());
    }

    #[test]
    fn test_from_toml_fills_defaults() {
        let config = AedposConfig::from_toml_str(
            r#"
            chain_type = "SideChain"
            mining_interval_ms = 2000
            termination_policy = "ExtraBlockProducerOnly"
            "#,
        )
        .unwrap();
        assert_eq!(config.chain_type, ChainType::SideChain);
        assert_eq!(config.mining_interval_ms, 2000);
        assert_eq!(config.termination_policy, TerminationPolicy::ExtraBlockProducerOnly);
        assert_eq!(config.maximum_tiny_blocks_count, 8);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(AedposConfig::default().with_mining_interval_ms(0).validate().is_err());
        assert!(AedposConfig::default().with_period_seconds(-1).validate().is_err());
        assert!(AedposConfig::default().with_maximum_tiny_blocks_count(0).validate().is_err());
        assert!(matches!(
            AedposConfig::from_toml_str("mining_interval_ms = \"fast\""),
            Err(ConsensusError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_json_roundtrip() {
        let config = AedposConfig::default().with_missed_reveal_penalty(true);
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(serde_json::from_str::<AedposConfig>(&json).unwrap(), config);
    }
}
