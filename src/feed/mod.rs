//! Upstream market data capability
//!
//! The pipeline only sees the [`DataFeed`] trait; [`jupiter::JupiterFeed`]
//! is the production adapter.

pub mod jupiter;

use crate::types::{TimeResolution, TokenRef, TokenSeries};
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Upstream API error: {0}")]
    Api(String),
    #[error("Unknown token: {0}")]
    UnknownToken(String),
    #[error("Malformed upstream data: {0}")]
    Malformed(String),
}

/// Source of ranked candidates and per-token price series.
///
/// Both calls may fail transiently; callers own the retry policy.
#[async_trait]
pub trait DataFeed: Send + Sync {
    /// Best-ranked candidates first, at most `limit` entries
    async fn list_ranked_candidates(&self, limit: usize) -> Result<Vec<TokenRef>, FeedError>;

    /// Price history for `identifier` at `resolution`
    async fn fetch_series(&self, resolution: TimeResolution, identifier: &str) -> Result<TokenSeries, FeedError>;
}
