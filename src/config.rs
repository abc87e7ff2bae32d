use crate::chain_pollers::solana::SolanaChainPollerConfig;
use crate::clients::solana::{BlockCommitment, FetchConfig, RetryConfig, SolanaClientConfig};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub type ChainId = u64;

pub const SOLANA_MAINNET: ChainId = 101;
pub const SOLANA_TESTNET: ChainId = 102;
pub const SOLANA_DEVNET: ChainId = 103;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Polling interval must be greater than zero")]
    ZeroPollingInterval,
    #[error("Slot history size must be greater than zero")]
    ZeroHistorySize,
    #[error("Max reorg depth must be greater than zero when reorg checking is enabled")]
    ZeroReorgDepth,
    #[error("Max reorg depth {max_reorg_depth} exceeds slot history size {slot_history_size}")]
    ReorgDepthExceedsHistory {
        max_reorg_depth: usize,
        slot_history_size: usize,
    },
    #[error("Max slots per cycle must be greater than zero")]
    ZeroSlotsPerCycle,
    #[error("Max batch size must be greater than zero")]
    ZeroBatchSize,
    #[error("Retry attempts must be greater than zero")]
    ZeroRetryAttempts,
    #[error("Invalid program ID '{program_id}': {reason}")]
    InvalidProgramId { program_id: String, reason: String },
    #[error("Failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Deployment settings document.
///
/// Durations are expressed in milliseconds; omitted keys fall back to the
/// defaults of [`SolanaChainPollerConfig`] and [`SolanaClientConfig`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PollerSettings {
    pub rpc_url: String,
    pub chain_id: Option<ChainId>,
    pub request_timeout_ms: Option<u64>,
    pub polling_interval_ms: Option<u64>,
    #[serde(default)]
    pub interesting_programs: Vec<String>,
    pub max_reorg_depth: Option<usize>,
    pub slot_history_size: Option<usize>,
    pub reorg_check_enabled: Option<bool>,
    pub commitment: Option<BlockCommitment>,
    pub start_slot: Option<u64>,
    pub max_slots_per_cycle: Option<usize>,
    pub max_batch_size: Option<usize>,
    pub max_fetch_attempts: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
}

impl PollerSettings {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn client_config(&self) -> SolanaClientConfig {
        let defaults = SolanaClientConfig::default();
        SolanaClientConfig {
            base_url: self.rpc_url.clone(),
            request_timeout: self
                .request_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
        }
    }

    /// Builds and validates the poller configuration.
    pub fn poller_config(&self) -> Result<SolanaChainPollerConfig, ConfigError> {
        let defaults = SolanaChainPollerConfig::default();
        let retry_defaults = RetryConfig::default();

        let config = SolanaChainPollerConfig {
            chain_id: self.chain_id.unwrap_or(defaults.chain_id),
            polling_interval: self
                .polling_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.polling_interval),
            interesting_programs: self.interesting_programs.clone(),
            max_reorg_depth: self.max_reorg_depth.unwrap_or(defaults.max_reorg_depth),
            slot_history_size: self.slot_history_size.unwrap_or(defaults.slot_history_size),
            reorg_check_enabled: self
                .reorg_check_enabled
                .unwrap_or(defaults.reorg_check_enabled),
            commitment: self.commitment.unwrap_or(defaults.commitment),
            start_slot: self.start_slot,
            max_slots_per_cycle: self
                .max_slots_per_cycle
                .unwrap_or(defaults.max_slots_per_cycle),
            fetch: FetchConfig {
                max_batch_size: self.max_batch_size.unwrap_or(defaults.fetch.max_batch_size),
                retry: RetryConfig {
                    max_attempts: self.max_fetch_attempts.unwrap_or(retry_defaults.max_attempts),
                    initial_backoff: self
                        .initial_backoff_ms
                        .map(Duration::from_millis)
                        .unwrap_or(retry_defaults.initial_backoff),
                    max_backoff: self
                        .max_backoff_ms
                        .map(Duration::from_millis)
                        .unwrap_or(retry_defaults.max_backoff),
                    multiplier: retry_defaults.multiplier,
                },
            },
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROGRAM: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

    #[test]
    fn minimal_settings_use_defaults() {
        let settings =
            PollerSettings::from_json_str(r#"{ "rpcUrl": "http://localhost:8899" }"#).unwrap();
        let config = settings.poller_config().unwrap();

        assert_eq!(config.chain_id, SOLANA_MAINNET);
        assert_eq!(config.polling_interval, Duration::from_secs(12));
        assert_eq!(config.max_reorg_depth, 10);
        assert_eq!(config.slot_history_size, 100);
        assert!(config.reorg_check_enabled);
        assert_eq!(config.commitment, BlockCommitment::Finalized);
        assert_eq!(settings.client_config().base_url, "http://localhost:8899");
    }

    #[test]
    fn full_settings_are_applied() {
        let raw = format!(
            r#"{{
                "rpcUrl": "http://localhost:8899",
                "chainId": 103,
                "requestTimeoutMs": 2000,
                "pollingIntervalMs": 400,
                "interestingPrograms": ["{PROGRAM}"],
                "maxReorgDepth": 20,
                "slotHistorySize": 64,
                "reorgCheckEnabled": false,
                "commitment": "confirmed",
                "startSlot": 1000,
                "maxSlotsPerCycle": 50,
                "maxBatchSize": 10,
                "maxFetchAttempts": 5,
                "initialBackoffMs": 10,
                "maxBackoffMs": 100
            }}"#
        );
        let settings = PollerSettings::from_json_str(&raw).unwrap();
        let config = settings.poller_config().unwrap();

        assert_eq!(config.chain_id, SOLANA_DEVNET);
        assert_eq!(config.polling_interval, Duration::from_millis(400));
        assert_eq!(config.interesting_programs, vec![PROGRAM.to_string()]);
        assert_eq!(config.max_reorg_depth, 20);
        assert_eq!(config.slot_history_size, 64);
        assert!(!config.reorg_check_enabled);
        assert_eq!(config.commitment, BlockCommitment::Confirmed);
        assert_eq!(config.start_slot, Some(1000));
        assert_eq!(config.max_slots_per_cycle, 50);
        assert_eq!(config.fetch.max_batch_size, 10);
        assert_eq!(config.fetch.retry.max_attempts, 5);
        assert_eq!(config.fetch.retry.max_backoff, Duration::from_millis(100));
        assert_eq!(
            settings.client_config().request_timeout,
            Duration::from_secs(2)
        );
    }

    #[test]
    fn settings_reject_depth_beyond_history() {
        let settings = PollerSettings::from_json_str(
            r#"{ "rpcUrl": "http://x", "maxReorgDepth": 11, "slotHistorySize": 10 }"#,
        )
        .unwrap();

        assert!(matches!(
            settings.poller_config(),
            Err(ConfigError::ReorgDepthExceedsHistory { .. })
        ));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result = PollerSettings::from_json_str(r#"{ "rpcUrl": "http://x", "pollMs": 1 }"#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
