use crate::chain_pollers::persistence::PersistenceError;
use crate::clients::solana::FetchError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReorgError {
    #[error(
        "No common ancestor for slot {slot} within {max_depth} slots, manual intervention required"
    )]
    UnrecoverableDivergence { slot: u64, max_depth: usize },
    #[error("Slot {slot} conflicts with recorded slot {predecessor}, which is still canonical")]
    InconsistentAncestry { slot: u64, predecessor: u64 },
    #[error("Gave up at slot {slot} after {reconciliations} reorgs in one cycle")]
    ReconciliationLimit { slot: u64, reconciliations: usize },
    #[error("Failed to re-fetch slot {slot} during ancestry search: {source}")]
    Fetch {
        slot: u64,
        #[source]
        source: FetchError,
    },
}

#[derive(Error, Debug)]
pub enum PollerError {
    #[error("Failed to get latest slot: {0}")]
    LatestSlot(#[source] FetchError),
    #[error("Failed to fetch slot {slot}: {source}")]
    Fetch {
        slot: u64,
        #[source]
        source: FetchError,
    },
    #[error(transparent)]
    Reorg(#[from] ReorgError),
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("Slot handler failed at slot {slot}: {source}")]
    Handler {
        slot: u64,
        #[source]
        source: anyhow::Error,
    },
    #[error("Failed to decode log {log_index} at slot {slot}: {source}")]
    Decode {
        slot: u64,
        log_index: u64,
        #[source]
        source: anyhow::Error,
    },
}

impl PollerError {
    /// Divergence deeper than the configured search depth; retrying will not help.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(
            self,
            PollerError::Reorg(ReorgError::UnrecoverableDivergence { .. })
        )
    }
}
