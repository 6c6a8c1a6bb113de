//! PaperTrail Library
//!
//! Paper-position tracking for BTC/ETH price streams, persisted to a
//! shared snapshot store.

pub mod config;
pub mod oracle;
pub mod paper_trading;
pub mod persistence;
pub mod position;
pub mod recorder;
pub mod store;
pub mod strategy;
pub mod types;

#[cfg(feature = "server")]
pub mod server;
