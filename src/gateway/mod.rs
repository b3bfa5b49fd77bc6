//! Inference gateway
//!
//! Wraps the external inference backend with:
//! - content-addressed response caching (per-resolution TTL, bounded LRU)
//! - bounded fixed-delay retry
//! - structural validation of responses
//! - deterministic degraded results once retries are exhausted
//!
//! Callers always get a value back. [`Analysis::Degraded`] marks the
//! safety-net results so they can be told apart from genuine analysis.

pub mod backend;
pub mod cache;
pub mod parse;
pub mod prompt;

use crate::config::GatewayConfig;
use crate::retry::RetryPolicy;
use crate::types::{now_millis, AnalysisVerdict, PredictionPoint, PricePrediction, TimeResolution, TokenRef, TokenSeries};
use backend::{InferenceBackend, InferenceError};
use cache::ResponseCache;
use prompt::SelectionParameters;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub use cache::{CacheEntry, CacheMetricsSnapshot};

/// Confidence carried by every degraded prediction
pub const DEGRADED_CONFIDENCE: f64 = 0.1;

/// Support/resistance offset around the anchor price of a degraded prediction
pub const DEGRADED_BAND: f64 = 0.01;

pub const DEGRADED_VERDICT_NOTE: &str = "Analysis failed due to technical issues. Please try again later.";

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),
    #[error("Empty response from inference backend")]
    EmptyResponse,
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Malformed response: {0}")]
    Malformed(String),
}

/// Gateway result: a genuine backend answer or the degraded fallback
#[derive(Debug, Clone, PartialEq)]
pub enum Analysis<T> {
    Genuine(T),
    Degraded(T),
}

impl<T> Analysis<T> {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Analysis::Degraded(_))
    }

    pub fn value(&self) -> &T {
        match self {
            Analysis::Genuine(v) | Analysis::Degraded(v) => v,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Analysis::Genuine(v) | Analysis::Degraded(v) => v,
        }
    }
}

/// Verdict used when the backend cannot produce one
pub fn degraded_verdict() -> AnalysisVerdict {
    AnalysisVerdict {
        selected: Vec::new(),
        per_token: HashMap::new(),
        notes: vec![DEGRADED_VERDICT_NOTE.to_string()],
    }
}

/// Single-point prediction anchored at the latest known price
pub fn degraded_prediction(series: &TokenSeries, now: i64) -> PricePrediction {
    let price = series.latest().map(|p| p.price).unwrap_or(0.0);
    PricePrediction {
        timepoints: vec![PredictionPoint {
            timestamp: now,
            price,
            confidence: DEGRADED_CONFIDENCE,
        }],
        support_levels: vec![price * (1.0 - DEGRADED_BAND)],
        resistance_levels: vec![price * (1.0 + DEGRADED_BAND)],
    }
}

pub struct InferenceGateway {
    backend: Arc<dyn InferenceBackend>,
    config: GatewayConfig,
    verdicts: ResponseCache<AnalysisVerdict>,
    predictions: ResponseCache<PricePrediction>,
    /// Clock in Unix milliseconds (injectable for tests)
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl InferenceGateway {
    pub fn new(backend: Arc<dyn InferenceBackend>, config: GatewayConfig) -> Self {
        Self::new_with_timestamp_fn(backend, config, Box::new(now_millis))
    }

    /// Create a gateway with a custom clock
    ///
    /// Used for testing cache expiry with deterministic time.
    pub fn new_with_timestamp_fn(
        backend: Arc<dyn InferenceBackend>,
        config: GatewayConfig,
        now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
    ) -> Self {
        Self {
            verdicts: ResponseCache::new("verdict", config.cache_capacity),
            predictions: ResponseCache::new("prediction", config.cache_capacity),
            backend,
            config,
            now_fn,
        }
    }

    fn now(&self) -> i64 {
        (self.now_fn)()
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.config.retry_attempts, self.config.retry_delay)
    }

    pub fn verdict_cache_metrics(&self) -> CacheMetricsSnapshot {
        self.verdicts.metrics()
    }

    pub fn prediction_cache_metrics(&self) -> CacheMetricsSnapshot {
        self.predictions.metrics()
    }

    async fn complete(&self, user_prompt: &str) -> Result<String, GatewayError> {
        match self.backend.complete(prompt::SYSTEM_PROMPT, user_prompt).await? {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(GatewayError::EmptyResponse),
        }
    }

    async fn attempt_verdict(
        &self,
        user_prompt: &str,
        batch: &HashSet<String>,
    ) -> Result<AnalysisVerdict, GatewayError> {
        let text = self.complete(user_prompt).await?;
        parse::parse_verdict(&text, batch, self.config.max_tokens)
    }

    async fn attempt_prediction(&self, user_prompt: &str) -> Result<PricePrediction, GatewayError> {
        let text = self.complete(user_prompt).await?;
        parse::parse_prediction(&text)
    }

    /// Ask the backend which tokens of `batch` deserve a closer look
    pub async fn request_verdict(&self, resolution: TimeResolution, batch: &[TokenSeries]) -> Analysis<AnalysisVerdict> {
        let lookback = self.config.windows.get(resolution).points;
        let tokens: Vec<TokenRef> = batch.iter().map(TokenSeries::token).collect();
        let key = cache::verdict_key(resolution, lookback, &tokens);

        if let Some(verdict) = self.verdicts.lookup(&key, self.config.ttl(resolution), self.now()) {
            log::info!("♻️  Reusing cached {} verdict for {} tokens", resolution, batch.len());
            return Analysis::Genuine(verdict);
        }

        log::info!("🧠 Requesting {} verdict for {} tokens", resolution, batch.len());
        let user_prompt = prompt::verdict_prompt(
            resolution,
            lookback,
            batch,
            SelectionParameters {
                min_confidence: self.config.min_confidence,
                max_tokens: self.config.max_tokens,
            },
        );
        let members: HashSet<String> = tokens.into_iter().map(|t| t.identifier).collect();
        let label = format!("{} verdict", resolution);

        match self
            .retry_policy()
            .run(&label, |_| self.attempt_verdict(&user_prompt, &members))
            .await
        {
            Ok(verdict) => {
                log::info!(
                    "✅ {} verdict: selected {} of {} tokens",
                    resolution,
                    verdict.selected.len(),
                    batch.len()
                );
                self.verdicts.insert(key, verdict.clone(), self.now());
                Analysis::Genuine(verdict)
            }
            Err(e) => {
                log::warn!("⚠️  {} verdict degraded: {}", resolution, e);
                Analysis::Degraded(degraded_verdict())
            }
        }
    }

    /// Ask the backend to project the price path of `series`
    pub async fn request_prediction(&self, series: &TokenSeries, resolution: TimeResolution) -> Analysis<PricePrediction> {
        let lookback = self.config.windows.get(resolution).points;
        let key = cache::prediction_key(resolution, lookback, &series.token());

        if let Some(prediction) = self.predictions.lookup(&key, self.config.ttl(resolution), self.now()) {
            log::info!("♻️  Reusing cached {} prediction for {}", resolution, series.symbol);
            return Analysis::Genuine(prediction);
        }

        log::info!("🔮 Requesting {} prediction for {}", resolution, series.symbol);
        let user_prompt = prompt::prediction_prompt(resolution, lookback, series);
        let label = format!("{} prediction for {}", resolution, series.symbol);

        match self
            .retry_policy()
            .run(&label, |_| self.attempt_prediction(&user_prompt))
            .await
        {
            Ok(prediction) => {
                log::info!(
                    "✅ Prediction for {}: {} timepoints",
                    series.symbol,
                    prediction.timepoints.len()
                );
                self.predictions.insert(key, prediction.clone(), self.now());
                Analysis::Genuine(prediction)
            }
            Err(e) => {
                log::warn!("⚠️  Prediction for {} degraded: {}", series.symbol, e);
                Analysis::Degraded(degraded_prediction(series, self.now()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PricePoint;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Backend replaying scripted responses, then repeating the last one
    struct ScriptedBackend {
        responses: Mutex<Vec<Result<Option<String>, String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(responses: Vec<Result<Option<String>, String>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
            })
        }

        fn always(response: Result<Option<String>, String>) -> Arc<Self> {
            Self::new(vec![response])
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl InferenceBackend for ScriptedBackend {
        async fn complete(&self, _system: &str, _user: &str) -> Result<Option<String>, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            let next = if responses.len() > 1 {
                responses.remove(0)
            } else {
                responses[0].clone()
            };
            next.map_err(InferenceError::Api)
        }
    }

    const VERDICT: &str = r#"{"selectedTokens": ["m1"], "analysis": [], "recommendations": ["ok"]}"#;
    const PREDICTION: &str =
        r#"{"timepoints": [{"timestamp": 5, "price": 2.0, "confidence": 0.8}], "supportLevels": [1.5], "resistanceLevels": [2.5]}"#;

    fn test_config() -> GatewayConfig {
        GatewayConfig {
            retry_delay: Duration::ZERO,
            ..GatewayConfig::default()
        }
    }

    fn gateway_with_clock(backend: Arc<ScriptedBackend>) -> (InferenceGateway, Arc<AtomicI64>) {
        let clock = Arc::new(AtomicI64::new(1_700_000_000_000));
        let clock_fn = clock.clone();
        let gateway = InferenceGateway::new_with_timestamp_fn(
            backend,
            test_config(),
            Box::new(move || clock_fn.load(Ordering::SeqCst)),
        );
        (gateway, clock)
    }

    fn series(id: &str, symbol: &str, last_price: f64) -> TokenSeries {
        TokenSeries::new(
            id,
            symbol,
            vec![
                PricePoint { timestamp: 1, price: last_price * 2.0, volume: 1.0 },
                PricePoint { timestamp: 2, price: last_price, volume: 1.0 },
            ],
        )
    }

    #[tokio::test]
    async fn test_degraded_prediction_for_every_resolution() {
        for resolution in TimeResolution::all() {
            let backend = ScriptedBackend::always(Err("down".to_string()));
            let (gateway, clock) = gateway_with_clock(backend.clone());

            let result = gateway.request_prediction(&series("m1", "A", 100.0), resolution).await;

            assert!(result.is_degraded());
            assert_eq!(backend.calls(), 4, "one call plus three retries");
            let prediction = result.into_inner();
            assert_eq!(prediction.timepoints.len(), 1);
            assert_eq!(prediction.timepoints[0].confidence, 0.1);
            assert_eq!(prediction.timepoints[0].price, 100.0);
            assert_eq!(prediction.timepoints[0].timestamp, clock.load(Ordering::SeqCst));
            assert!((prediction.support_levels[0] - 99.0).abs() < 1e-9);
            assert!((prediction.resistance_levels[0] - 101.0).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn test_degraded_verdict_on_exhaustion() {
        let backend = ScriptedBackend::always(Ok(Some("I cannot help with that".to_string())));
        let (gateway, _) = gateway_with_clock(backend.clone());

        let result = gateway
            .request_verdict(TimeResolution::Daily, &[series("m1", "A", 1.0)])
            .await;

        assert!(result.is_degraded());
        assert_eq!(backend.calls(), 4);
        let verdict = result.into_inner();
        assert!(verdict.selected.is_empty());
        assert_eq!(verdict.notes, vec![DEGRADED_VERDICT_NOTE.to_string()]);
    }

    #[tokio::test]
    async fn test_empty_response_is_retried() {
        let backend = ScriptedBackend::new(vec![
            Ok(None),
            Ok(Some("   ".to_string())),
            Ok(Some(VERDICT.to_string())),
        ]);
        let (gateway, _) = gateway_with_clock(backend.clone());

        let result = gateway
            .request_verdict(TimeResolution::Daily, &[series("m1", "A", 1.0)])
            .await;

        assert!(!result.is_degraded());
        assert_eq!(result.value().selected, vec!["m1".to_string()]);
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn test_verdict_cached_within_ttl() {
        let backend = ScriptedBackend::always(Ok(Some(VERDICT.to_string())));
        let (gateway, clock) = gateway_with_clock(backend.clone());
        let batch = vec![series("m1", "A", 1.0), series("m2", "B", 3.0)];
        let mut reordered = vec![series("m2", "B", 9.0), series("m1", "A", 7.0)];

        gateway.request_verdict(TimeResolution::Hourly, &batch).await;
        clock.fetch_add(59 * 60 * 1000, Ordering::SeqCst);
        let second = gateway.request_verdict(TimeResolution::Hourly, &reordered).await;

        assert_eq!(backend.calls(), 1);
        assert!(!second.is_degraded());
        assert_eq!(gateway.verdict_cache_metrics().hits, 1);

        // A different batch is a different question
        reordered.truncate(1);
        gateway.request_verdict(TimeResolution::Hourly, &reordered).await;
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_verdict_cache_expires_after_ttl() {
        let backend = ScriptedBackend::always(Ok(Some(VERDICT.to_string())));
        let (gateway, clock) = gateway_with_clock(backend.clone());
        let batch = vec![series("m1", "A", 1.0)];

        gateway.request_verdict(TimeResolution::Minutely, &batch).await;
        clock.fetch_add(5 * 60 * 1000, Ordering::SeqCst);
        gateway.request_verdict(TimeResolution::Minutely, &batch).await;

        assert_eq!(backend.calls(), 2);
        assert_eq!(gateway.verdict_cache_metrics().expired, 1);
    }

    #[tokio::test]
    async fn test_degraded_results_are_not_cached() {
        let backend = ScriptedBackend::new(vec![
            Err("down".to_string()),
            Err("down".to_string()),
            Err("down".to_string()),
            Err("down".to_string()),
            Ok(Some(PREDICTION.to_string())),
        ]);
        let (gateway, _) = gateway_with_clock(backend.clone());
        let token = series("m1", "A", 2.0);

        let first = gateway.request_prediction(&token, TimeResolution::Minutely).await;
        let second = gateway.request_prediction(&token, TimeResolution::Minutely).await;
        let third = gateway.request_prediction(&token, TimeResolution::Minutely).await;

        assert!(first.is_degraded());
        assert!(!second.is_degraded());
        assert_eq!(second.value().timepoints[0].price, 2.0);
        assert_eq!(third, second);
        assert_eq!(backend.calls(), 5);
    }

    #[test]
    fn test_degraded_prediction_for_empty_series() {
        let empty = TokenSeries::new("m", "M", vec![]);
        let prediction = degraded_prediction(&empty, 10);
        assert_eq!(prediction.timepoints[0].price, 0.0);
        assert_eq!(prediction.support_levels, vec![0.0]);
    }
}
