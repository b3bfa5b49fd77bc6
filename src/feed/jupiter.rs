//! Jupiter Price API integration
//!
//! Ranks a curated list of Solana meme tokens by the price API's confidence
//! level and builds per-resolution series from the current quote.
//!
//! ## API Reference
//!
//! Endpoint: {base}/price/v2?ids={mint}&vsToken={USDC}&showExtraInfo=true
//! Returns: map of mint -> price entry with optional extra info
//!
//! The endpoint exposes no history, so a series is the configured number of
//! evenly spaced points ending now, all at the current price.

use super::{DataFeed, FeedError};
use crate::config::ResolutionWindows;
use crate::types::{now_millis, PricePoint, TimeResolution, TokenRef, TokenSeries};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

/// Tokens considered by the scan stage
pub fn known_meme_tokens() -> Vec<TokenRef> {
    vec![
        TokenRef::new("DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263", "BONK"),
        TokenRef::new("WENWENvqqNya429ubCdR81ZmD69brwQaaBYY6p3LCpk", "WEN"),
        TokenRef::new("MNDEFzGvMt87ueuHvVU9VcTqsAP5b3fTGPsHuuPA5ey", "MNDE"),
        TokenRef::new("7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU", "SAMO"),
    ]
}

/// Price response structure
#[derive(Debug, Clone, Deserialize)]
pub struct JupiterPriceResponse {
    pub data: HashMap<String, Option<JupiterPrice>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JupiterPrice {
    pub id: String,
    pub price: String,
    #[serde(rename = "extraInfo")]
    pub extra_info: Option<ExtraInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtraInfo {
    #[serde(rename = "lastSwappedPrice")]
    pub last_swapped_price: Option<LastSwappedPrice>,
    #[serde(rename = "confidenceLevel")]
    pub confidence_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LastSwappedPrice {
    #[serde(rename = "lastJupiterBuyPrice")]
    pub last_jupiter_buy_price: Option<String>,
}

/// Quote extracted from a price entry
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub price: f64,
    pub confidence: f64,
    pub last_buy_price: Option<f64>,
}

impl JupiterPrice {
    pub fn quote(&self) -> Result<Quote, FeedError> {
        let price: f64 = self
            .price
            .parse()
            .map_err(|_| FeedError::Malformed(format!("price '{}' for {}", self.price, self.id)))?;
        if !price.is_finite() || price < 0.0 {
            return Err(FeedError::Malformed(format!("price {} for {}", price, self.id)));
        }

        let extra = self.extra_info.as_ref();
        let confidence = match extra.and_then(|e| e.confidence_level.as_deref()) {
            Some("high") => 1.0,
            Some("medium") => 0.5,
            _ => 0.1,
        };
        let last_buy_price = extra
            .and_then(|e| e.last_swapped_price.as_ref())
            .and_then(|l| l.last_jupiter_buy_price.as_deref())
            .and_then(|p| p.parse::<f64>().ok())
            .filter(|p| p.is_finite() && *p >= 0.0);

        Ok(Quote {
            price,
            confidence,
            last_buy_price,
        })
    }
}

/// Evenly spaced points ending at `end_time`, all at the quoted price
pub fn generate_points(count: usize, step_millis: i64, end_time: i64, quote: &Quote) -> Vec<PricePoint> {
    let volume = quote.last_buy_price.unwrap_or(0.0);
    (0..count)
        .map(|i| PricePoint {
            timestamp: end_time - (count - i - 1) as i64 * step_millis,
            price: quote.price,
            volume,
        })
        .collect()
}

pub struct JupiterFeed {
    client: reqwest::Client,
    base_url: String,
    tokens: Vec<TokenRef>,
    windows: ResolutionWindows,
}

impl JupiterFeed {
    pub fn new(base_url: impl Into<String>, windows: ResolutionWindows) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens: known_meme_tokens(),
            windows,
        })
    }

    fn symbol_for(&self, mint: &str) -> String {
        self.tokens
            .iter()
            .find(|t| t.identifier == mint)
            .map(|t| t.symbol.clone())
            .unwrap_or_else(|| mint.chars().take(6).collect())
    }

    async fn fetch_quote(&self, mint: &str) -> Result<Quote, FeedError> {
        let url = format!("{}/price/v2", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("ids", mint), ("vsToken", USDC_MINT), ("showExtraInfo", "true")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FeedError::Api(format!("Jupiter API error: {}", response.status())));
        }

        let body: JupiterPriceResponse = response.json().await?;
        body.data
            .get(mint)
            .and_then(|entry| entry.as_ref())
            .ok_or_else(|| FeedError::UnknownToken(mint.to_string()))?
            .quote()
    }
}

#[async_trait]
impl DataFeed for JupiterFeed {
    async fn list_ranked_candidates(&self, limit: usize) -> Result<Vec<TokenRef>, FeedError> {
        log::info!("🔎 Ranking {} known tokens (limit {})", self.tokens.len(), limit);

        let mut ranked = Vec::with_capacity(self.tokens.len());
        for token in &self.tokens {
            let quote = self.fetch_quote(&token.identifier).await?;
            ranked.push((token.clone(), quote.confidence));
        }

        // Stable sort keeps list order among equal confidence levels
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        Ok(ranked.into_iter().take(limit).map(|(t, _)| t).collect())
    }

    async fn fetch_series(&self, resolution: TimeResolution, identifier: &str) -> Result<TokenSeries, FeedError> {
        let quote = self.fetch_quote(identifier).await?;
        let window = self.windows.get(resolution);
        let points = generate_points(window.points, resolution.step_millis(), now_millis(), &quote);

        log::debug!(
            "Built {} {} points for {} at {}",
            points.len(),
            resolution,
            identifier,
            quote.price
        );

        Ok(TokenSeries::new(identifier, self.symbol_for(identifier), points))
    }
}
