use crate::chain_pollers::persistence::*;
use crate::config::ChainId;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct InMemoryChainPollerPersistence {
    cursors: Arc<DashMap<ChainId, u64>>,
    slots: Arc<DashMap<ChainId, BTreeMap<u64, SlotRecord>>>,
    closed: Arc<RwLock<bool>>,
}

impl InMemoryChainPollerPersistence {
    pub fn new() -> Self {
        Self {
            cursors: Arc::new(DashMap::new()),
            slots: Arc::new(DashMap::new()),
            closed: Arc::new(RwLock::new(false)),
        }
    }

    async fn ensure_open(&self) -> Result<(), PersistenceError> {
        if *self.closed.read().await {
            return Err(PersistenceError::StoreClosed);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ChainPollerPersistence for InMemoryChainPollerPersistence {
    async fn get_cursor(&self, chain_id: ChainId) -> Result<Option<u64>, PersistenceError> {
        self.ensure_open().await?;
        Ok(self.cursors.get(&chain_id).map(|v| *v.value()))
    }

    async fn set_cursor(
        &self,
        chain_id: ChainId,
        slot_number: u64,
    ) -> Result<(), PersistenceError> {
        self.ensure_open().await?;
        self.cursors.insert(chain_id, slot_number);
        Ok(())
    }

    async fn save_slot(&self, slot: &SlotRecord) -> Result<(), PersistenceError> {
        self.ensure_open().await?;
        self.slots
            .entry(slot.chain_id)
            .or_default()
            .insert(slot.slot, slot.clone());
        Ok(())
    }

    async fn recent_slots(
        &self,
        chain_id: ChainId,
        limit: usize,
    ) -> Result<Vec<SlotRecord>, PersistenceError> {
        self.ensure_open().await?;
        let Some(records) = self.slots.get(&chain_id) else {
            return Ok(Vec::new());
        };
        let mut recent: Vec<SlotRecord> = records.values().rev().take(limit).cloned().collect();
        recent.reverse();
        Ok(recent)
    }

    async fn delete_slot(
        &self,
        chain_id: ChainId,
        slot_number: u64,
    ) -> Result<(), PersistenceError> {
        self.ensure_open().await?;
        let removed = self
            .slots
            .get_mut(&chain_id)
            .and_then(|mut records| records.remove(&slot_number));
        if removed.is_none() {
            return Err(PersistenceError::NotFound);
        }
        Ok(())
    }

    async fn prune_slots_before(
        &self,
        chain_id: ChainId,
        slot_number: u64,
    ) -> Result<usize, PersistenceError> {
        self.ensure_open().await?;
        let Some(mut records) = self.slots.get_mut(&chain_id) else {
            return Ok(0);
        };
        let kept = records.split_off(&slot_number);
        let pruned = records.len();
        *records = kept;
        Ok(pruned)
    }

    async fn close(&self) -> Result<(), PersistenceError> {
        let mut closed = self.closed.write().await;
        if *closed {
            return Err(PersistenceError::StoreClosed);
        }

        *closed = true;
        self.cursors.clear();
        self.slots.clear();

        Ok(())
    }
}

impl Default for InMemoryChainPollerPersistence {
    fn default() -> Self {
        Self::new()
    }
}
