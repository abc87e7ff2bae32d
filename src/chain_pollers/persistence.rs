use crate::clients::solana::{SolanaProgramLog, SolanaSlot};
use crate::config::ChainId;
use crate::transaction_log_parser::DecodedLog;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod memory;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRecord {
    pub slot: u64,
    pub blockhash: String,
    pub parent_slot: u64,
    pub parent_blockhash: String,
    pub block_time: Option<i64>,
    pub chain_id: ChainId,
}

impl SlotRecord {
    pub fn from_slot(chain_id: ChainId, slot: &SolanaSlot) -> Self {
        Self {
            slot: slot.slot,
            blockhash: slot.blockhash.clone(),
            parent_slot: slot.parent_slot,
            parent_blockhash: slot.parent_blockhash.clone(),
            block_time: slot.block_time,
            chain_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogWithSlot {
    pub log: DecodedLog,
    pub raw_log: SolanaProgramLog,
    pub slot: SolanaSlot,
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Item not found")]
    NotFound,
    #[error("Storage is closed")]
    StoreClosed,
    #[error("Other error: {0}")]
    Other(String),
}

/// Durable state of a chain poller.
///
/// `set_cursor` is the at-least-once delivery boundary: it must be durable
/// before it returns.
#[async_trait]
pub trait ChainPollerPersistence: Send + Sync {
    async fn get_cursor(&self, chain_id: ChainId) -> Result<Option<u64>, PersistenceError>;

    async fn set_cursor(&self, chain_id: ChainId, slot_number: u64)
        -> Result<(), PersistenceError>;

    async fn save_slot(&self, slot: &SlotRecord) -> Result<(), PersistenceError>;

    /// Up to `limit` most recent slot records, oldest first.
    async fn recent_slots(
        &self,
        chain_id: ChainId,
        limit: usize,
    ) -> Result<Vec<SlotRecord>, PersistenceError>;

    async fn delete_slot(
        &self,
        chain_id: ChainId,
        slot_number: u64,
    ) -> Result<(), PersistenceError>;

    /// Removes every slot record below `slot_number`, returning how many were removed.
    async fn prune_slots_before(
        &self,
        chain_id: ChainId,
        slot_number: u64,
    ) -> Result<usize, PersistenceError>;

    async fn close(&self) -> Result<(), PersistenceError>;
}

#[async_trait]
pub trait SlotHandler: Send + Sync {
    async fn handle_slot(&self, slot: &SolanaSlot) -> anyhow::Result<()>;

    async fn handle_log(&self, log_with_slot: &LogWithSlot) -> anyhow::Result<()>;

    /// Called once per invalidated slot, most recent first. May be called
    /// again for a slot that was already invalidated.
    async fn handle_reorg_slot(&self, slot_number: u64) -> anyhow::Result<()>;
}
