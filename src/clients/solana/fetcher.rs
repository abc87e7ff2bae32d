use crate::clients::solana::client::{Client, ClientError};
use crate::clients::solana::retry::{RetryConfig, RetryPolicy};
use crate::clients::solana::types::{BlockCommitment, SolanaBlock};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct FetchConfig {
    pub max_batch_size: usize,
    pub retry: RetryConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SlotFetch {
    Block(SolanaBlock),
    /// The leader produced no block for this slot.
    Skipped,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Slot is not available yet")]
    Unavailable,
    #[error("Gave up after {attempts} attempts: {source}")]
    RetriesExhausted { attempts: u32, source: ClientError },
    #[error("Request rejected: {0}")]
    Rejected(ClientError),
    #[error("Not attempted because an earlier batch failed")]
    NotAttempted,
}

pub type SlotFetchResults = BTreeMap<u64, Result<SlotFetch, FetchError>>;

/// Batched, retrying access to chain data.
///
/// Slots of one batch are requested concurrently; batches run in order and
/// the first batch that ends with an error stops the request. Slots that
/// succeeded inside the failed batch keep their blocks. Every requested slot
/// gets an entry in the returned map.
pub struct SlotFetcher {
    client: Arc<dyn Client>,
    max_batch_size: usize,
    retry: RetryPolicy,
}

impl SlotFetcher {
    pub fn new(client: Arc<dyn Client>, config: FetchConfig) -> Self {
        Self {
            client,
            max_batch_size: config.max_batch_size.max(1),
            retry: RetryPolicy::new(config.retry),
        }
    }

    pub fn batches<'a>(&self, slots: &'a [u64]) -> std::slice::Chunks<'a, u64> {
        slots.chunks(self.max_batch_size)
    }

    pub async fn latest_slot(&self, commitment: BlockCommitment) -> Result<u64, FetchError> {
        let mut attempt = 1;
        loop {
            match self.client.get_latest_slot(commitment).await {
                Ok(slot) => return Ok(slot),
                Err(e) if e.is_transient() => match self.retry.backoff_after(attempt) {
                    Some(delay) => {
                        warn!(
                            attempt,
                            backoff = ?delay,
                            error = %e,
                            "Failed to get latest slot, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => {
                        return Err(FetchError::RetriesExhausted {
                            attempts: attempt,
                            source: e,
                        })
                    }
                },
                Err(e) => return Err(FetchError::Rejected(e)),
            }
        }
    }

    pub async fn fetch_slot(
        &self,
        slot_number: u64,
        commitment: BlockCommitment,
    ) -> Result<SlotFetch, FetchError> {
        self.fetch_slots(&[slot_number], commitment)
            .await
            .remove(&slot_number)
            .unwrap_or(Err(FetchError::NotAttempted))
    }

    pub async fn fetch_slots(
        &self,
        slots: &[u64],
        commitment: BlockCommitment,
    ) -> SlotFetchResults {
        let mut results = SlotFetchResults::new();
        let mut batches = self.batches(slots);

        for (batch_index, batch) in batches.by_ref().enumerate() {
            debug!(
                batch_index,
                first_slot = batch.first().copied(),
                batch_size = batch.len(),
                "Fetching slot batch"
            );

            if self.fetch_batch(batch, commitment, &mut results).await {
                warn!(batch_index, "Slot batch failed, not fetching later batches");
                break;
            }
        }

        for batch in batches {
            for &slot_number in batch {
                results.insert(slot_number, Err(FetchError::NotAttempted));
            }
        }

        results
    }

    /// Returns `true` when any slot of the batch ended with an error.
    async fn fetch_batch(
        &self,
        batch: &[u64],
        commitment: BlockCommitment,
        results: &mut SlotFetchResults,
    ) -> bool {
        let mut pending = batch.to_vec();
        let mut attempt = 1;
        let mut failed = false;

        loop {
            let responses = join_all(pending.iter().map(|&slot_number| async move {
                (
                    slot_number,
                    self.client.get_block(slot_number, commitment).await,
                )
            }))
            .await;

            let mut retryable = Vec::new();
            for (slot_number, response) in responses {
                match response {
                    Ok(block) => {
                        results.insert(slot_number, Ok(SlotFetch::Block(block)));
                    }
                    Err(ClientError::SlotSkipped(_)) => {
                        results.insert(slot_number, Ok(SlotFetch::Skipped));
                    }
                    Err(ClientError::SlotUnavailable(_)) => {
                        failed = true;
                        results.insert(slot_number, Err(FetchError::Unavailable));
                    }
                    Err(e) if e.is_transient() => retryable.push((slot_number, e)),
                    Err(e) => {
                        failed = true;
                        results.insert(slot_number, Err(FetchError::Rejected(e)));
                    }
                }
            }

            if retryable.is_empty() {
                return failed;
            }

            match self.retry.backoff_after(attempt) {
                Some(delay) => {
                    warn!(
                        attempt,
                        backoff = ?delay,
                        failed_slots = retryable.len(),
                        error = %retryable[0].1,
                        "Slot fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    pending = retryable.into_iter().map(|(slot_number, _)| slot_number).collect();
                }
                None => {
                    for (slot_number, e) in retryable {
                        results.insert(
                            slot_number,
                            Err(FetchError::RetriesExhausted {
                                attempts: attempt,
                                source: e,
                            }),
                        );
                    }
                    return true;
                }
            }
        }
    }
}
