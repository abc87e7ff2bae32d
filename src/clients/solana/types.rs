use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolanaSlot {
    pub slot: u64,
    pub parent_slot: u64,
    pub blockhash: String,
    pub parent_blockhash: String,
    pub block_time: Option<i64>,
    pub commitment: BlockCommitment,
}

/// A slot together with the program logs emitted by its successful transactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolanaBlock {
    pub slot: SolanaSlot,
    pub logs: Vec<SolanaProgramLog>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolanaProgramLog {
    pub program_id: String,
    pub log_index: u64,
    pub signature: String,
    pub slot: u64,
    pub block_time: Option<i64>,
    pub log_message: String,
    pub instruction_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockCommitment {
    #[default]
    Finalized,
    Confirmed,
    Processed,
}

impl BlockCommitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockCommitment::Finalized => "finalized",
            BlockCommitment::Confirmed => "confirmed",
            BlockCommitment::Processed => "processed",
        }
    }

    /// `getBlock` does not accept `processed`; blocks are read at `confirmed` instead.
    pub fn for_block_query(&self) -> BlockCommitment {
        match self {
            BlockCommitment::Processed => BlockCommitment::Confirmed,
            other => *other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processed_blocks_are_queried_as_confirmed() {
        assert_eq!(
            BlockCommitment::Processed.for_block_query(),
            BlockCommitment::Confirmed
        );
        assert_eq!(
            BlockCommitment::Finalized.for_block_query(),
            BlockCommitment::Finalized
        );
    }
}
