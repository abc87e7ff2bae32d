pub mod error;
pub mod persistence;
pub mod reorg;
pub mod slot_history;
pub mod solana;

pub use error::*;
pub use persistence::memory::InMemoryChainPollerPersistence;
pub use persistence::*;
pub use reorg::*;
pub use slot_history::*;
pub use solana::*;
