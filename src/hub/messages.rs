//! Outbound subscriber messages and the OHLC-style view derivation

use crate::store::StoredPrediction;
use crate::types::TokenSeries;
use serde::{Deserialize, Serialize};

/// One bar of the derived view. Inputs are single ticks, so each bar spans
/// the previous price to the current one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OhlcPoint {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Derive bars from `(timestamp, price)` pairs: open is the previous price
/// (the first bar opens at its own price), close is the current one.
pub fn derive_ohlc<I>(ticks: I) -> Vec<OhlcPoint>
where
    I: IntoIterator<Item = (i64, f64)>,
{
    let mut previous: Option<f64> = None;
    ticks
        .into_iter()
        .map(|(timestamp, close)| {
            let open = previous.unwrap_or(close);
            previous = Some(close);
            OhlcPoint {
                timestamp,
                open,
                high: open.max(close),
                low: open.min(close),
                close,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HubMessage {
    #[serde(rename = "price", rename_all = "camelCase")]
    Market {
        token_name: String,
        current_price: f64,
        volume: f64,
        price_data: Vec<OhlcPoint>,
    },
    #[serde(rename_all = "camelCase")]
    Prediction {
        #[serde(skip_serializing_if = "Option::is_none")]
        token_name: Option<String>,
        predicted_price: f64,
        confidence: f64,
        degraded: bool,
        support_levels: Vec<f64>,
        resistance_levels: Vec<f64>,
        predictions: Vec<OhlcPoint>,
    },
    Heartbeat,
    Error {
        message: String,
    },
    Pong,
}

impl HubMessage {
    /// Market view of a series; `None` for a series with no points
    pub fn market(series: &TokenSeries) -> Option<Self> {
        let latest = series.latest()?;
        Some(HubMessage::Market {
            token_name: series.symbol.clone(),
            current_price: latest.price,
            volume: latest.volume,
            price_data: derive_ohlc(series.points.iter().map(|p| (p.timestamp, p.price))),
        })
    }

    /// Prediction view labelled with the record's own token; `None` when the
    /// prediction has no timepoints
    pub fn prediction(stored: &StoredPrediction) -> Option<Self> {
        let prediction = &stored.prediction;
        let latest = prediction.latest()?;
        Some(HubMessage::Prediction {
            token_name: stored.token_name().map(str::to_string),
            predicted_price: latest.price,
            confidence: latest.confidence,
            degraded: stored.degraded,
            support_levels: prediction.support_levels.clone(),
            resistance_levels: prediction.resistance_levels.clone(),
            predictions: derive_ohlc(prediction.timepoints.iter().map(|p| (p.timestamp, p.price))),
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        HubMessage::Error { message: message.into() }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Inbound subscriber message
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
}
