//! Oracle module - price ingestion
//!
//! The feed transport produces [`PriceTick`](crate::types::PriceTick)s and the
//! aggregator keeps a bounded rolling window per asset.

mod aggregator;
pub mod feed;

pub use aggregator::{PriceAggregator, WINDOW_CAPACITY};
pub use feed::{FeedClient, FeedEvent, PriceFeed, ReconnectPolicy};
