//! Fork detection and common-ancestor search.
//!
//! A slot extends the known chain when its parent matches the newest
//! recorded slot below it. Otherwise the detector walks back through the
//! recorded slots, re-fetching each one, until the chain and the history agree
//! again. The walk is bounded by `max_reorg_depth`; a fork deeper than that is
//! reported instead of guessed at.

use crate::chain_pollers::error::ReorgError;
use crate::chain_pollers::slot_history::SlotHistory;
use crate::clients::solana::{BlockCommitment, SlotFetch, SlotFetcher, SolanaSlot};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorgCheck {
    Extends,
    Diverges { predecessor: u64 },
}

/// Outcome of a successful ancestry search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub ancestor: u64,
    /// Recorded slots above the ancestor, most recent first.
    pub invalidated: Vec<u64>,
}

pub struct ReorgDetector {
    max_reorg_depth: usize,
    commitment: BlockCommitment,
}

impl ReorgDetector {
    pub fn new(max_reorg_depth: usize, commitment: BlockCommitment) -> Self {
        Self {
            max_reorg_depth,
            commitment,
        }
    }

    pub fn check(&self, history: &SlotHistory, slot: &SolanaSlot) -> ReorgCheck {
        let Some(predecessor) = history.latest_before(slot.slot) else {
            debug!(slot = slot.slot, "No recorded predecessor, trusting slot");
            return ReorgCheck::Extends;
        };

        if predecessor.slot == slot.parent_slot && predecessor.blockhash == slot.parent_blockhash
        {
            return ReorgCheck::Extends;
        }

        warn!(
            slot = slot.slot,
            parent_slot = slot.parent_slot,
            parent_blockhash = slot.parent_blockhash,
            recorded_slot = predecessor.slot,
            recorded_blockhash = predecessor.blockhash,
            "Blockchain reorganization detected"
        );
        ReorgCheck::Diverges {
            predecessor: predecessor.slot,
        }
    }

    pub async fn find_common_ancestor(
        &self,
        fetcher: &SlotFetcher,
        history: &SlotHistory,
        diverging_slot: u64,
    ) -> Result<Reconciliation, ReorgError> {
        let lowest = diverging_slot.saturating_sub(self.max_reorg_depth as u64);

        for candidate in (lowest..diverging_slot).rev() {
            let Some(recorded) = history.lookup(candidate) else {
                continue;
            };

            let fetched = fetcher
                .fetch_slot(candidate, self.commitment)
                .await
                .map_err(|source| ReorgError::Fetch {
                    slot: candidate,
                    source,
                })?;

            let canon_blockhash = match &fetched {
                SlotFetch::Block(block) => Some(block.slot.blockhash.as_str()),
                SlotFetch::Skipped => None,
            };

            if canon_blockhash == Some(recorded.blockhash.as_str()) {
                let invalidated = history.slots_after(candidate);
                if invalidated.is_empty() {
                    warn!(
                        slot = diverging_slot,
                        predecessor = candidate,
                        "Predecessor is still canonical but the new slot does not extend it"
                    );
                    return Err(ReorgError::InconsistentAncestry {
                        slot: diverging_slot,
                        predecessor: candidate,
                    });
                }
                info!(
                    ancestor = candidate,
                    search_depth = diverging_slot - candidate,
                    invalidated = invalidated.len(),
                    "Slot hash match, stopping reorg ancestry search"
                );
                return Ok(Reconciliation {
                    ancestor: candidate,
                    invalidated,
                });
            }

            info!(
                slot_number = candidate,
                stored_blockhash = recorded.blockhash,
                canon_blockhash = ?canon_blockhash,
                search_depth = diverging_slot - candidate,
                "Found orphaned slot"
            );
        }

        warn!(
            slot = diverging_slot,
            max_depth = self.max_reorg_depth,
            "Reached max reorg search depth"
        );
        Err(ReorgError::UnrecoverableDivergence {
            slot: diverging_slot,
            max_depth: self.max_reorg_depth,
        })
    }
}
