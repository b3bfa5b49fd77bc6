//! Core data model shared by the feed, gateway, pipeline, store and hub.
//!
//! Timestamps are Unix milliseconds throughout.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Current wall-clock time in Unix milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Single price observation. Never mutated once produced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: i64,
    pub price: f64,
    pub volume: f64,
}

/// Candidate token as ranked by the data feed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenRef {
    #[serde(rename = "mint")]
    pub identifier: String,
    pub symbol: String,
}

impl TokenRef {
    pub fn new(identifier: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            symbol: symbol.into(),
        }
    }
}

/// Price history for one token at one resolution.
///
/// Points are kept in non-decreasing timestamp order. A refresh produces a
/// new series rather than mutating the old one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSeries {
    #[serde(rename = "mint")]
    pub identifier: String,
    pub symbol: String,
    #[serde(rename = "prices")]
    pub points: Vec<PricePoint>,
}

impl TokenSeries {
    /// Build a series, sorting points by timestamp (stable for equal stamps)
    pub fn new(identifier: impl Into<String>, symbol: impl Into<String>, mut points: Vec<PricePoint>) -> Self {
        points.sort_by_key(|p| p.timestamp);
        Self {
            identifier: identifier.into(),
            symbol: symbol.into(),
            points,
        }
    }

    pub fn token(&self) -> TokenRef {
        TokenRef::new(self.identifier.clone(), self.symbol.clone())
    }

    pub fn latest(&self) -> Option<&PricePoint> {
        self.points.last()
    }

    pub fn is_ordered(&self) -> bool {
        self.points.windows(2).all(|w| w[0].timestamp <= w[1].timestamp)
    }
}

/// Observation granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeResolution {
    Daily,
    Hourly,
    Minutely,
}

impl TimeResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeResolution::Daily => "daily",
            TimeResolution::Hourly => "hourly",
            TimeResolution::Minutely => "minutely",
        }
    }

    /// Spacing between consecutive points in milliseconds
    pub fn step_millis(&self) -> i64 {
        match self {
            TimeResolution::Daily => 86_400_000,
            TimeResolution::Hourly => 3_600_000,
            TimeResolution::Minutely => 60_000,
        }
    }

    /// Unit suffix used in prompts ("30-day", "24-hour", "60-minute")
    pub fn unit(&self) -> &'static str {
        match self {
            TimeResolution::Daily => "day",
            TimeResolution::Hourly => "hour",
            TimeResolution::Minutely => "minute",
        }
    }

    pub fn all() -> [TimeResolution; 3] {
        [
            TimeResolution::Daily,
            TimeResolution::Hourly,
            TimeResolution::Minutely,
        ]
    }
}

impl std::str::FromStr for TimeResolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(TimeResolution::Daily),
            "hourly" => Ok(TimeResolution::Hourly),
            "minutely" => Ok(TimeResolution::Minutely),
            other => Err(format!("unknown resolution: {}", other)),
        }
    }
}

impl std::fmt::Display for TimeResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Bullish,
    Bearish,
    Neutral,
}

/// One predicted price at a future instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionPoint {
    pub timestamp: i64,
    pub price: f64,
    pub confidence: f64,
}

/// Projected price path with support/resistance levels.
///
/// Timepoints are time-ordered; confidence is not required to be monotone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricePrediction {
    pub timepoints: Vec<PredictionPoint>,
    pub support_levels: Vec<f64>,
    pub resistance_levels: Vec<f64>,
}

impl PricePrediction {
    pub fn latest(&self) -> Option<&PredictionPoint> {
        self.timepoints.last()
    }
}

/// Per-token judgment inside a verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenAnalysis {
    pub direction: TrendDirection,
    pub strength: f64,
    pub confidence: f64,
    pub key_factors: Vec<String>,
    pub prediction: Option<PricePrediction>,
}

/// Backend judgment narrowing a batch of tokens
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisVerdict {
    /// Selected identifiers, in the order the backend ranked them, no duplicates
    pub selected: Vec<String>,
    pub per_token: HashMap<String, TokenAnalysis>,
    pub notes: Vec<String>,
}
