//! Prompt construction for verdict and prediction requests

use crate::types::{TimeResolution, TokenSeries};

pub const SYSTEM_PROMPT: &str = "You are a cryptocurrency trading expert specializing in technical analysis \
and price prediction. Respond only with valid JSON without any markdown formatting or special characters. \
Ensure all JSON properties are properly comma-separated.";

/// Parameters forwarded to the backend with a verdict request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionParameters {
    pub min_confidence: f64,
    pub max_tokens: usize,
}

/// "30-day", "24-hour", "60-minute"
pub fn describe(resolution: TimeResolution, lookback_points: usize) -> String {
    format!("{}-{}", lookback_points, resolution.unit())
}

fn to_json(value: &impl serde::Serialize) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| {
        log::warn!("Failed to serialize prompt data: {}", e);
        "[]".to_string()
    })
}

pub fn verdict_prompt(
    resolution: TimeResolution,
    lookback_points: usize,
    batch: &[TokenSeries],
    params: SelectionParameters,
) -> String {
    format!(
        r#"Analyze the following {timeframe} price data for {count} tokens and identify the most promising ones based on technical analysis patterns, volume trends, and price action.

Data:
{data}

Parameters:
- Only select tokens whose analysis confidence is at least {min_confidence}
- Select at most {max_tokens} tokens

Instructions:
1. Analyze each token's price movement patterns
2. Consider volume trends and their correlation with price
3. Identify technical patterns and potential breakout/breakdown points
4. Evaluate market sentiment based on price action
5. Calculate momentum indicators and trend strength
6. Assess volatility patterns and trading ranges

Provide analysis in the following JSON format without any markdown formatting or special characters:
{{
  "selectedTokens": ["token_mints"],
  "analysis": [{{
    "tokenMint": "mint_address",
    "trend": {{
      "direction": "bullish/bearish/neutral",
      "strength": 0.1-1.0,
      "keyFactors": ["factor1", "factor2"]
    }},
    "prediction": {{
      "timepoints": [
        {{"timestamp": number, "price": number, "confidence": 0.1-1.0}}
      ],
      "supportLevels": [number],
      "resistanceLevels": [number]
    }},
    "confidence": 0.1-1.0
  }}],
  "recommendations": ["detailed_insights"]
}}"#,
        timeframe = describe(resolution, lookback_points),
        count = batch.len(),
        data = to_json(&batch),
        min_confidence = params.min_confidence,
        max_tokens = params.max_tokens,
    )
}

pub fn prediction_prompt(resolution: TimeResolution, lookback_points: usize, series: &TokenSeries) -> String {
    format!(
        r#"Analyze the following {timeframe} price data for {symbol} and predict future price movements. Create a prediction that follows the same data structure pattern.

Historical Data:
{data}

Instructions:
1. Analyze price patterns and trends
2. Consider volume profile and price correlations
3. Identify key support and resistance levels
4. Project future price movements
5. Include confidence levels for predictions
6. Mark potential reversal points

Provide prediction in the following JSON format without any markdown formatting or special characters:
{{
  "timepoints": [
    {{"timestamp": number, "price": number, "confidence": 0.1-1.0}}
  ],
  "supportLevels": [number],
  "resistanceLevels": [number]
}}"#,
        timeframe = describe(resolution, lookback_points),
        symbol = series.symbol,
        data = to_json(series),
    )
}
