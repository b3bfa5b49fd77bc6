//! Structural decoding of backend responses
//!
//! Text around the outermost JSON object is dropped before decoding. Missing
//! required fields are errors so the retry loop sees them.

use super::GatewayError;
use crate::types::{AnalysisVerdict, PredictionPoint, PricePrediction, TokenAnalysis, TrendDirection};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

/// Slice from the first `{` to the last `}`
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end >= start).then(|| &raw[start..=end])
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVerdict {
    selected_tokens: Option<Vec<String>>,
    analysis: Option<Vec<serde_json::Value>>,
    recommendations: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTokenAnalysis {
    token_mint: String,
    trend: RawTrend,
    prediction: Option<RawPrediction>,
    #[serde(default)]
    confidence: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTrend {
    direction: String,
    #[serde(default)]
    strength: f64,
    #[serde(default)]
    key_factors: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPrediction {
    timepoints: Option<Vec<RawPoint>>,
    support_levels: Option<Vec<f64>>,
    resistance_levels: Option<Vec<f64>>,
}

#[derive(Debug, Deserialize)]
struct RawPoint {
    timestamp: f64,
    price: f64,
    #[serde(default)]
    confidence: f64,
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn parse_direction(raw: &str) -> TrendDirection {
    match raw.trim().to_lowercase().as_str() {
        "bullish" => TrendDirection::Bullish,
        "bearish" => TrendDirection::Bearish,
        _ => TrendDirection::Neutral,
    }
}

fn decode<'a, T: Deserialize<'a>>(raw: &'a str) -> Result<T, GatewayError> {
    let body = extract_json_object(raw).ok_or_else(|| GatewayError::Malformed("no JSON object in response".to_string()))?;
    Ok(serde_json::from_str(body)?)
}

impl RawPrediction {
    fn validate(self) -> Result<PricePrediction, GatewayError> {
        let (timepoints, support_levels, resistance_levels) =
            match (self.timepoints, self.support_levels, self.resistance_levels) {
                (Some(t), Some(s), Some(r)) => (t, s, r),
                _ => {
                    return Err(GatewayError::Malformed(
                        "prediction requires timepoints, supportLevels and resistanceLevels".to_string(),
                    ))
                }
            };

        let mut timepoints: Vec<PredictionPoint> = timepoints
            .into_iter()
            .filter(|p| p.timestamp.is_finite() && p.price.is_finite() && p.price >= 0.0)
            .map(|p| PredictionPoint {
                timestamp: p.timestamp as i64,
                price: p.price,
                confidence: clamp_unit(p.confidence),
            })
            .collect();
        if timepoints.is_empty() {
            return Err(GatewayError::Malformed("prediction has no usable timepoints".to_string()));
        }
        timepoints.sort_by_key(|p| p.timestamp);

        Ok(PricePrediction {
            timepoints,
            support_levels: support_levels.into_iter().filter(|l| l.is_finite()).collect(),
            resistance_levels: resistance_levels.into_iter().filter(|l| l.is_finite()).collect(),
        })
    }
}

/// Decode a prediction response
pub fn parse_prediction(raw: &str) -> Result<PricePrediction, GatewayError> {
    let prediction: RawPrediction = decode(raw)?;
    let prediction = prediction.validate()?;
    log::debug!(
        "Prediction parsed: {} timepoints, {} supports, {} resistances",
        prediction.timepoints.len(),
        prediction.support_levels.len(),
        prediction.resistance_levels.len()
    );
    Ok(prediction)
}

/// Decode a verdict response.
///
/// Selections outside `batch` are dropped and the rest capped at `max_selected`.
pub fn parse_verdict(raw: &str, batch: &HashSet<String>, max_selected: usize) -> Result<AnalysisVerdict, GatewayError> {
    let verdict: RawVerdict = decode(raw)?;

    let (selected_tokens, analysis, recommendations) =
        match (verdict.selected_tokens, verdict.analysis, verdict.recommendations) {
            (Some(s), Some(a), Some(r)) => (s, a, r),
            _ => {
                return Err(GatewayError::Malformed(
                    "verdict requires selectedTokens, analysis and recommendations".to_string(),
                ))
            }
        };

    let mut seen = HashSet::new();
    let mut selected = Vec::new();
    for identifier in selected_tokens {
        if !batch.contains(&identifier) {
            log::warn!("Ignoring selected token outside the batch: {}", identifier);
            continue;
        }
        if seen.insert(identifier.clone()) {
            selected.push(identifier);
        }
    }
    if selected.len() > max_selected {
        log::debug!("Capping selection from {} to {}", selected.len(), max_selected);
        selected.truncate(max_selected);
    }

    let mut per_token = HashMap::new();
    for entry in analysis {
        let entry: RawTokenAnalysis = match serde_json::from_value(entry) {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Skipping malformed token analysis: {}", e);
                continue;
            }
        };
        let prediction = match entry.prediction.map(RawPrediction::validate).transpose() {
            Ok(prediction) => prediction,
            Err(e) => {
                log::debug!("Dropping embedded prediction for {}: {}", entry.token_mint, e);
                None
            }
        };
        per_token.insert(
            entry.token_mint,
            TokenAnalysis {
                direction: parse_direction(&entry.trend.direction),
                strength: clamp_unit(entry.trend.strength),
                confidence: clamp_unit(entry.confidence),
                key_factors: entry.trend.key_factors,
                prediction,
            },
        );
    }

    Ok(AnalysisVerdict {
        selected,
        per_token,
        notes: recommendations,
    })
}
