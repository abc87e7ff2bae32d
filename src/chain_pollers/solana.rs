use crate::chain_pollers::error::{PollerError, ReorgError};
use crate::chain_pollers::persistence::*;
use crate::chain_pollers::reorg::{Reconciliation, ReorgCheck, ReorgDetector};
use crate::chain_pollers::slot_history::{SlotHistory, SlotHistoryEntry};
use crate::clients::solana::{
    BlockCommitment, Client, FetchConfig, FetchError, SlotFetch, SlotFetcher, SolanaBlock,
};
use crate::config::{ChainId, ConfigError, SOLANA_MAINNET};
use crate::transaction_log_parser::LogParser;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Reorgs reconciled in one cycle before the rest is left to the next tick.
const MAX_RECONCILIATIONS_PER_CYCLE: usize = 4;

#[derive(Debug, Clone)]
pub struct SolanaChainPollerConfig {
    pub chain_id: ChainId,
    pub polling_interval: Duration,
    /// Programs whose logs are decoded and dispatched; empty means all.
    pub interesting_programs: Vec<String>,
    pub max_reorg_depth: usize,
    pub slot_history_size: usize,
    pub reorg_check_enabled: bool,
    pub commitment: BlockCommitment,
    /// First slot to process when no cursor has been persisted yet. Without
    /// it the poller starts at the chain tip.
    pub start_slot: Option<u64>,
    pub max_slots_per_cycle: usize,
    pub fetch: FetchConfig,
}

impl Default for SolanaChainPollerConfig {
    fn default() -> Self {
        Self {
            chain_id: SOLANA_MAINNET,
            polling_interval: Duration::from_secs(12),
            interesting_programs: Vec::new(),
            max_reorg_depth: 10,
            slot_history_size: 100,
            reorg_check_enabled: true,
            commitment: BlockCommitment::default(),
            start_slot: None,
            max_slots_per_cycle: 500,
            fetch: FetchConfig::default(),
        }
    }
}

impl SolanaChainPollerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.polling_interval.is_zero() {
            return Err(ConfigError::ZeroPollingInterval);
        }
        if self.slot_history_size == 0 {
            return Err(ConfigError::ZeroHistorySize);
        }
        if self.reorg_check_enabled && self.max_reorg_depth == 0 {
            return Err(ConfigError::ZeroReorgDepth);
        }
        if self.max_reorg_depth > self.slot_history_size {
            return Err(ConfigError::ReorgDepthExceedsHistory {
                max_reorg_depth: self.max_reorg_depth,
                slot_history_size: self.slot_history_size,
            });
        }
        if self.max_slots_per_cycle == 0 {
            return Err(ConfigError::ZeroSlotsPerCycle);
        }
        if self.fetch.max_batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.fetch.retry.max_attempts == 0 {
            return Err(ConfigError::ZeroRetryAttempts);
        }
        for program_id in &self.interesting_programs {
            Pubkey::from_str(program_id).map_err(|e| ConfigError::InvalidProgramId {
                program_id: program_id.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling,
    Reconciling,
    Stopped,
}

/// Summary of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub latest_slot: Option<u64>,
    /// Persisted cursor once the cycle ended.
    pub cursor: Option<u64>,
    pub processed_slots: usize,
    pub skipped_slots: usize,
    /// Invalidated slots in the order handlers were notified.
    pub invalidated_slots: Vec<u64>,
    /// Another cycle was still in flight, so this one did nothing.
    pub overlapped: bool,
}

struct PollerInner {
    history: SlotHistory,
    initialized: bool,
}

pub struct SolanaChainPoller {
    fetcher: SlotFetcher,
    reorg_detector: ReorgDetector,
    log_parser: Arc<dyn LogParser>,
    config: SolanaChainPollerConfig,
    interesting_programs: HashSet<String>,
    store: Arc<dyn ChainPollerPersistence>,
    slot_handler: Arc<dyn SlotHandler>,
    inner: Mutex<PollerInner>,
    state: RwLock<PollerState>,
    shutdown: CancellationToken,
}

impl SolanaChainPoller {
    pub fn new(
        client: Arc<dyn Client>,
        log_parser: Arc<dyn LogParser>,
        config: SolanaChainPollerConfig,
        store: Arc<dyn ChainPollerPersistence>,
        slot_handler: Arc<dyn SlotHandler>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        info!(
            chain_id = config.chain_id,
            polling_interval = ?config.polling_interval,
            max_reorg_depth = config.max_reorg_depth,
            slot_history_size = config.slot_history_size,
            reorg_check_enabled = config.reorg_check_enabled,
            "Creating Solana chain poller"
        );

        for (i, program) in config.interesting_programs.iter().enumerate() {
            info!("InterestingProgram {}: {}", i, program);
        }

        Ok(Self {
            fetcher: SlotFetcher::new(client, config.fetch.clone()),
            reorg_detector: ReorgDetector::new(config.max_reorg_depth, config.commitment),
            log_parser,
            interesting_programs: config.interesting_programs.iter().cloned().collect(),
            inner: Mutex::new(PollerInner {
                history: SlotHistory::new(config.slot_history_size),
                initialized: false,
            }),
            state: RwLock::new(PollerState::Idle),
            shutdown: CancellationToken::new(),
            config,
            store,
            slot_handler,
        })
    }

    pub async fn state(&self) -> PollerState {
        *self.state.read().await
    }

    async fn set_state(&self, state: PollerState) {
        *self.state.write().await = state;
    }

    /// Runs the polling loop until [`stop`](Self::stop) is called.
    pub async fn start(&self) -> Result<(), PollerError> {
        info!(
            chain_id = self.config.chain_id,
            polling_interval = ?self.config.polling_interval,
            "Starting Solana Listener"
        );

        {
            let mut inner = self.inner.lock().await;
            self.initialize(&mut inner).await?;
        }

        self.poll_for_slots().await;

        Ok(())
    }

    /// Prevents new cycles and waits for the in-flight one to finish.
    pub async fn stop(&self) {
        info!(chain_id = self.config.chain_id, "Stopping Solana chain poller");
        self.shutdown.cancel();
        let _inner = self.inner.lock().await;
        self.set_state(PollerState::Stopped).await;
    }

    async fn poll_for_slots(&self) {
        info!("Starting Solana Chain Listener poll loop");
        let mut interval = interval(self.config.polling_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            match self.poll_once().await {
                Ok(report) => debug!(
                    cursor = ?report.cursor,
                    latest_slot = ?report.latest_slot,
                    processed = report.processed_slots,
                    invalidated = report.invalidated_slots.len(),
                    "Poll cycle finished"
                ),
                Err(e) if e.is_unrecoverable() => error!(
                    alert = true,
                    chain_id = self.config.chain_id,
                    error = %e,
                    "Unrecoverable chain divergence, operator intervention required"
                ),
                Err(e) => error!("Error processing next slot: {}", e),
            }
        }

        self.set_state(PollerState::Stopped).await;
        info!(chain_id = self.config.chain_id, "Solana chain poller stopped");
    }

    /// Runs a single poll cycle. Returns an overlapped report without doing
    /// any work when another cycle is in flight.
    pub async fn poll_once(&self) -> Result<PollReport, PollerError> {
        if self.shutdown.is_cancelled() {
            debug!("Poller stopped, not starting a new cycle");
            return Ok(PollReport::default());
        }

        let Ok(mut inner) = self.inner.try_lock() else {
            debug!("Previous poll cycle still in flight, skipping tick");
            return Ok(PollReport {
                overlapped: true,
                ..PollReport::default()
            });
        };

        self.set_state(PollerState::Polling).await;
        let mut report = PollReport::default();
        let result = self.process_new_slots(&mut inner, &mut report).await;

        if result.is_err() {
            if let Some(cursor) = report.cursor {
                inner.history.rewind_to(cursor);
            }
        }

        self.set_state(PollerState::Idle).await;
        result.map(|()| report)
    }

    async fn initialize(&self, inner: &mut PollerInner) -> Result<(), PollerError> {
        if inner.initialized {
            return Ok(());
        }

        let cursor = match self.store.get_cursor(self.config.chain_id).await? {
            Some(cursor) => Some(cursor),
            None => match self.config.start_slot {
                Some(start_slot) => {
                    info!(start_slot, "No last processed slot, using configured start slot");
                    None
                }
                None => {
                    info!("Poller could not get last processed slot, using latest slot");
                    Some(self.adopt_latest_slot().await?)
                }
            },
        };

        if let Some(cursor) = cursor {
            let records = self
                .store
                .recent_slots(self.config.chain_id, inner.history.capacity())
                .await?;
            for record in records.iter().filter(|r| r.slot <= cursor) {
                inner.history.record(SlotHistoryEntry::from(record));
            }
        }

        info!(
            slot = ?cursor,
            seeded_history = inner.history.len(),
            "Starting from slot"
        );

        inner.initialized = true;
        Ok(())
    }

    async fn adopt_latest_slot(&self) -> Result<u64, PollerError> {
        let latest_slot = self
            .fetcher
            .latest_slot(self.config.commitment)
            .await
            .map_err(PollerError::LatestSlot)?;
        self.store
            .set_cursor(self.config.chain_id, latest_slot)
            .await?;
        Ok(latest_slot)
    }

    async fn process_new_slots(
        &self,
        inner: &mut PollerInner,
        report: &mut PollReport,
    ) -> Result<(), PollerError> {
        self.initialize(inner).await?;

        let mut cursor = self.store.get_cursor(self.config.chain_id).await?;
        report.cursor = cursor;

        let latest_slot = self
            .fetcher
            .latest_slot(self.config.commitment)
            .await
            .map_err(PollerError::LatestSlot)?;
        report.latest_slot = Some(latest_slot);

        if cursor.is_none() && self.config.start_slot.is_none() {
            warn!("Last processed slot disappeared from storage, using latest slot");
            report.cursor = Some(self.adopt_latest_slot().await?);
            return Ok(());
        }

        let mut reconciliations = 0;

        'cycle: loop {
            let next_slot = match cursor {
                Some(cursor) => cursor + 1,
                None => self.config.start_slot.unwrap_or_default(),
            };

            if next_slot > latest_slot {
                debug!(
                    last_observed_slot = ?cursor,
                    latest_slot,
                    "Skipping slot processing, last observed slot is the latest slot"
                );
                return Ok(());
            }

            let last_slot = latest_slot
                .min(next_slot.saturating_add(self.config.max_slots_per_cycle as u64 - 1));
            let slots_to_fetch: Vec<u64> = (next_slot..=last_slot).collect();
            debug!(
                from = next_slot,
                to = last_slot,
                "Fetching slots: {} slots",
                slots_to_fetch.len()
            );

            let mut fetched = self
                .fetcher
                .fetch_slots(&slots_to_fetch, self.config.commitment)
                .await;

            for slot_number in slots_to_fetch {
                let block = match fetched
                    .remove(&slot_number)
                    .unwrap_or(Err(FetchError::NotAttempted))
                {
                    Ok(SlotFetch::Block(block)) => block,
                    Ok(SlotFetch::Skipped) => {
                        debug!(slot = slot_number, "Slot was skipped by its leader");
                        self.store
                            .set_cursor(self.config.chain_id, slot_number)
                            .await?;
                        cursor = Some(slot_number);
                        report.cursor = cursor;
                        report.skipped_slots += 1;
                        continue;
                    }
                    Err(FetchError::Unavailable) => {
                        debug!(
                            slot = slot_number,
                            "Slot not available yet, resuming next cycle"
                        );
                        return Ok(());
                    }
                    Err(source) => {
                        return Err(PollerError::Fetch {
                            slot: slot_number,
                            source,
                        })
                    }
                };

                if cursor.is_some_and(|cursor| block.slot.slot <= cursor) {
                    debug!(slot = block.slot.slot, "Slot already processed");
                    continue;
                }

                if self.config.reorg_check_enabled {
                    if let ReorgCheck::Diverges { .. } =
                        self.reorg_detector.check(&inner.history, &block.slot)
                    {
                        if reconciliations == MAX_RECONCILIATIONS_PER_CYCLE {
                            return Err(ReorgError::ReconciliationLimit {
                                slot: slot_number,
                                reconciliations,
                            }
                            .into());
                        }
                        reconciliations += 1;

                        let ancestor = self.reconcile_reorg(inner, slot_number, report).await?;
                        cursor = Some(ancestor);
                        report.cursor = cursor;
                        continue 'cycle;
                    }
                }

                self.process_slot(inner, &block).await?;
                cursor = Some(slot_number);
                report.cursor = cursor;
                report.processed_slots += 1;
            }

            debug!("All slots processed: {} slots", report.processed_slots);
            return Ok(());
        }
    }

    fn is_interesting(&self, program_id: &str) -> bool {
        self.interesting_programs.is_empty() || self.interesting_programs.contains(program_id)
    }

    async fn process_slot(
        &self,
        inner: &mut PollerInner,
        block: &SolanaBlock,
    ) -> Result<(), PollerError> {
        let slot = &block.slot;
        inner.history.record(SlotHistoryEntry::from(slot));

        self.slot_handler
            .handle_slot(slot)
            .await
            .map_err(|source| PollerError::Handler {
                slot: slot.slot,
                source,
            })?;

        let logs: Vec<_> = block
            .logs
            .iter()
            .filter(|log| self.is_interesting(&log.program_id))
            .collect();

        info!(
            latest_slot_num = slot.slot,
            blockhash = slot.blockhash,
            log_count = logs.len(),
            "Slot fetched with logs"
        );

        for log in logs {
            let decoded_log = self
                .log_parser
                .decode_log(&log.program_id, log)
                .await
                .map_err(|source| PollerError::Decode {
                    slot: slot.slot,
                    log_index: log.log_index,
                    source,
                })?;

            let log_with_slot = LogWithSlot {
                log: decoded_log,
                raw_log: log.clone(),
                slot: slot.clone(),
            };

            self.slot_handler
                .handle_log(&log_with_slot)
                .await
                .map_err(|source| PollerError::Handler {
                    slot: slot.slot,
                    source,
                })?;
        }

        self.store
            .save_slot(&SlotRecord::from_slot(self.config.chain_id, slot))
            .await?;
        self.prune_old_slots(slot.slot).await;
        self.store
            .set_cursor(self.config.chain_id, slot.slot)
            .await?;

        debug!("Processed logs for slot: {}", slot.slot);
        Ok(())
    }

    async fn prune_old_slots(&self, newest_slot: u64) {
        let window = self.config.slot_history_size as u64;
        if newest_slot < window {
            return;
        }
        let oldest_kept = newest_slot - window + 1;
        if let Err(e) = self
            .store
            .prune_slots_before(self.config.chain_id, oldest_kept)
            .await
        {
            warn!(oldest_kept, error = %e, "Failed to prune old slots");
        }
    }

    async fn reconcile_reorg(
        &self,
        inner: &mut PollerInner,
        diverging_slot: u64,
        report: &mut PollReport,
    ) -> Result<u64, PollerError> {
        self.set_state(PollerState::Reconciling).await;

        let Reconciliation {
            ancestor,
            invalidated,
        } = self
            .reorg_detector
            .find_common_ancestor(&self.fetcher, &inner.history, diverging_slot)
            .await?;

        for slot_number in invalidated {
            self.slot_handler
                .handle_reorg_slot(slot_number)
                .await
                .map_err(|source| PollerError::Handler {
                    slot: slot_number,
                    source,
                })?;

            match self
                .store
                .delete_slot(self.config.chain_id, slot_number)
                .await
            {
                Ok(()) | Err(PersistenceError::NotFound) => {}
                Err(e) => return Err(e.into()),
            }
            report.invalidated_slots.push(slot_number);
        }

        inner.history.rewind_to(ancestor);
        self.store
            .set_cursor(self.config.chain_id, ancestor)
            .await?;

        warn!(
            chain_id = self.config.chain_id,
            diverging_slot,
            ancestor,
            invalidated = report.invalidated_slots.len(),
            "Reorg reconciled, resuming from common ancestor"
        );

        self.set_state(PollerState::Polling).await;
        Ok(ancestor)
    }
}
