pub mod client;
pub mod fetcher;
pub mod retry;
pub mod types;

pub use client::*;
pub use fetcher::*;
pub use retry::*;
pub use types::*;
