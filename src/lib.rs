pub mod chain_pollers;
pub mod clients;
pub mod config;
pub mod contract_store;
pub mod logger;
pub mod transaction_log_parser;

pub use chain_pollers::*;
pub use clients::solana::*;
pub use config::*;
pub use contract_store::*;
pub use logger::*;
pub use transaction_log_parser::*;
