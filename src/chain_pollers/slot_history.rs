//! Bounded record of recently accepted slots, used to check that new slots
//! descend from the chain the poller has already delivered.

use crate::chain_pollers::persistence::SlotRecord;
use crate::clients::solana::SolanaSlot;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotHistoryEntry {
    pub slot: u64,
    pub blockhash: String,
    pub parent_blockhash: String,
}

impl From<&SolanaSlot> for SlotHistoryEntry {
    fn from(slot: &SolanaSlot) -> Self {
        Self {
            slot: slot.slot,
            blockhash: slot.blockhash.clone(),
            parent_blockhash: slot.parent_blockhash.clone(),
        }
    }
}

impl From<&SlotRecord> for SlotHistoryEntry {
    fn from(record: &SlotRecord) -> Self {
        Self {
            slot: record.slot,
            blockhash: record.blockhash.clone(),
            parent_blockhash: record.parent_blockhash.clone(),
        }
    }
}

/// Slot-number keyed history with insertion order kept ascending.
///
/// Skipped slots leave gaps; the entries themselves are always strictly
/// increasing by slot number.
#[derive(Debug)]
pub struct SlotHistory {
    entries: HashMap<u64, SlotHistoryEntry>,
    order: VecDeque<u64>,
    capacity: usize,
}

impl SlotHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Inserts or overwrites the entry for `entry.slot`.
    ///
    /// Entries at or above `entry.slot` are discarded first, so recording a
    /// slot again after a fork replaces everything built on the old version.
    pub fn record(&mut self, entry: SlotHistoryEntry) {
        if self.order.back().is_some_and(|&newest| newest >= entry.slot) {
            match entry.slot.checked_sub(1) {
                Some(below) => self.rewind_to(below),
                None => self.clear(),
            }
        }

        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }

        self.order.push_back(entry.slot);
        self.entries.insert(entry.slot, entry);
    }

    pub fn lookup(&self, slot_number: u64) -> Option<&SlotHistoryEntry> {
        self.entries.get(&slot_number)
    }

    pub fn newest(&self) -> Option<&SlotHistoryEntry> {
        self.order.back().and_then(|slot| self.entries.get(slot))
    }

    /// The newest entry strictly below `slot_number`.
    pub fn latest_before(&self, slot_number: u64) -> Option<&SlotHistoryEntry> {
        self.order
            .iter()
            .rev()
            .find(|&&slot| slot < slot_number)
            .and_then(|slot| self.entries.get(slot))
    }

    /// Recorded slot numbers above `slot_number`, most recent first.
    pub fn slots_after(&self, slot_number: u64) -> Vec<u64> {
        self.order
            .iter()
            .rev()
            .take_while(|&&slot| slot > slot_number)
            .copied()
            .collect()
    }

    /// Discards every entry above `slot_number`.
    pub fn rewind_to(&mut self, slot_number: u64) {
        while let Some(&newest) = self.order.back() {
            if newest <= slot_number {
                break;
            }
            self.order.pop_back();
            self.entries.remove(&newest);
        }
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(slot: u64) -> SlotHistoryEntry {
        SlotHistoryEntry {
            slot,
            blockhash: format!("H{slot}"),
            parent_blockhash: format!("H{}", slot.saturating_sub(1)),
        }
    }

    #[test]
    fn record_and_lookup() {
        let mut history = SlotHistory::new(10);
        history.record(entry(10));
        history.record(entry(11));

        assert_eq!(history.lookup(10).unwrap().blockhash, "H10");
        assert_eq!(history.newest().unwrap().slot, 11);
        assert!(history.lookup(12).is_none());
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn oldest_entry_is_evicted_beyond_capacity() {
        let mut history = SlotHistory::new(5);
        for slot in 10..=16 {
            history.record(entry(slot));
        }

        assert_eq!(history.len(), 5);
        assert!(history.lookup(10).is_none());
        assert!(history.lookup(11).is_none());
        assert!(history.lookup(12).is_some());
        assert_eq!(history.newest().unwrap().slot, 16);
    }

    #[test]
    fn rewind_discards_newer_entries() {
        let mut history = SlotHistory::new(10);
        for slot in 10..=14 {
            history.record(entry(slot));
        }

        history.rewind_to(12);

        assert_eq!(history.newest().unwrap().slot, 12);
        assert!(history.lookup(13).is_none());
        assert!(history.lookup(14).is_none());
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn recording_an_older_slot_overwrites_the_fork() {
        let mut history = SlotHistory::new(10);
        for slot in 10..=14 {
            history.record(entry(slot));
        }

        let replacement = SlotHistoryEntry {
            slot: 13,
            blockhash: "H13'".to_string(),
            parent_blockhash: "H12".to_string(),
        };
        history.record(replacement.clone());

        assert_eq!(history.lookup(13), Some(&replacement));
        assert!(history.lookup(14).is_none());
        assert_eq!(history.len(), 4);

        history.record(entry(0));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn latest_before_skips_gaps() {
        let mut history = SlotHistory::new(10);
        history.record(entry(10));
        history.record(entry(12));
        history.record(entry(15));

        assert_eq!(history.latest_before(16).unwrap().slot, 15);
        assert_eq!(history.latest_before(15).unwrap().slot, 12);
        assert_eq!(history.latest_before(11).unwrap().slot, 10);
        assert!(history.latest_before(10).is_none());
    }

    #[test]
    fn slots_after_is_descending() {
        let mut history = SlotHistory::new(10);
        for slot in 10..=14 {
            history.record(entry(slot));
        }

        assert_eq!(history.slots_after(12), vec![14, 13]);
        assert!(history.slots_after(14).is_empty());
    }
}
