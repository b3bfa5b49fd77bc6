//! Cascading multi-timeframe analysis
//!
//! One cycle narrows the candidate set in three stages:
//!
//! ```text
//! Scan (top N)
//!     ↓ Daily series → daily verdict
//! working set
//!     ↓ Hourly series → hourly verdict      (skipped when the working set is empty)
//! finalists
//!     ↓ per finalist: Minutely series → store → publish → prediction → store → publish
//! ```
//!
//! Fetches are sequential with a fixed pause between tokens. A token whose
//! series cannot be collected is dropped from its stage. A failure in one
//! finalist never affects the others.

pub mod scheduler;

use crate::config::PipelineConfig;
use crate::feed::{DataFeed, FeedError};
use crate::gateway::InferenceGateway;
use crate::hub::PublishHub;
use crate::retry::{MaxRetriesExceeded, RetryPolicy};
use crate::store::StateStore;
use crate::types::{now_millis, TimeResolution, TokenSeries};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::sleep;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Candidate scan failed: {0}")]
    Scan(#[from] MaxRetriesExceeded<FeedError>),
}

/// What one cycle did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub candidates: usize,
    pub daily_selected: Vec<String>,
    pub finalists: Vec<String>,
    /// Finalists that got a market and prediction published
    pub published: Vec<String>,
    /// Published finalists whose prediction is the degraded fallback
    pub degraded: Vec<String>,
    /// (resolution, identifier) pairs whose series could not be collected
    pub dropped: Vec<(TimeResolution, String)>,
}

pub struct AnalysisPipeline {
    feed: Arc<dyn DataFeed>,
    gateway: Arc<InferenceGateway>,
    store: Arc<StateStore>,
    hub: Arc<PublishHub>,
    config: PipelineConfig,
    /// Daily-stage selection of the latest cycle
    working_set: Mutex<Vec<String>>,
    /// identifier -> completion time (ms) of its last minute analysis
    last_analysis: Mutex<HashMap<String, i64>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AnalysisPipeline {
    pub fn new(
        feed: Arc<dyn DataFeed>,
        gateway: Arc<InferenceGateway>,
        store: Arc<StateStore>,
        hub: Arc<PublishHub>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            feed,
            gateway,
            store,
            hub,
            config,
            working_set: Mutex::new(Vec::new()),
            last_analysis: Mutex::new(HashMap::new()),
        }
    }

    pub fn working_set(&self) -> Vec<String> {
        locked(&self.working_set).clone()
    }

    pub fn last_analysis(&self) -> HashMap<String, i64> {
        locked(&self.last_analysis).clone()
    }

    fn fetch_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.config.fetch_attempts, self.config.fetch_retry_delay)
    }

    async fn pace(&self) {
        if !self.config.fetch_pacing.is_zero() {
            sleep(self.config.fetch_pacing).await;
        }
    }

    async fn fetch_series(
        &self,
        resolution: TimeResolution,
        identifier: &str,
    ) -> Result<TokenSeries, MaxRetriesExceeded<FeedError>> {
        let label = format!("{} fetch for {}", resolution, identifier);
        self.fetch_policy()
            .run(&label, |_| self.feed.fetch_series(resolution, identifier))
            .await
    }

    /// Collect one series per identifier, dropping the ones that fail
    async fn collect(&self, resolution: TimeResolution, identifiers: &[String], report: &mut CycleReport) -> Vec<TokenSeries> {
        log::info!("📥 Collecting {} data for {} tokens", resolution, identifiers.len());
        let mut collected = Vec::with_capacity(identifiers.len());

        for (i, identifier) in identifiers.iter().enumerate() {
            if i > 0 {
                self.pace().await;
            }
            match self.fetch_series(resolution, identifier).await {
                Ok(series) => collected.push(series),
                Err(e) => {
                    log::warn!("⚠️  Dropping {} from {} stage: {}", identifier, resolution, e);
                    report.dropped.push((resolution, identifier.clone()));
                }
            }
        }
        collected
    }

    /// Collect a stage's series and ask for a verdict; empty when nothing was collected
    async fn narrow(&self, resolution: TimeResolution, identifiers: &[String], report: &mut CycleReport) -> Vec<String> {
        let batch = self.collect(resolution, identifiers, report).await;
        if batch.is_empty() {
            log::info!("📭 No {} series collected, nothing to analyze", resolution);
            return Vec::new();
        }

        let verdict = self.gateway.request_verdict(resolution, &batch).await;
        if verdict.is_degraded() {
            log::warn!("⚠️  {} verdict is degraded, selection is empty", resolution);
        }
        verdict.into_inner().selected
    }

    /// Minute-level deep dive for one finalist.
    ///
    /// The market view is published before the prediction is requested.
    /// Returns whether the prediction was degraded.
    async fn analyze_finalist(&self, identifier: &str) -> Result<bool, MaxRetriesExceeded<FeedError>> {
        let series = self.fetch_series(TimeResolution::Minutely, identifier).await?;

        if let Err(e) = self.store.save_market(&series).await {
            log::warn!("⚠️  Failed to persist market data for {}: {}", series.symbol, e);
        }
        self.hub.publish_market(&series);

        let prediction = self.gateway.request_prediction(&series, TimeResolution::Minutely).await;

        let token = series.token();
        if let Err(e) = self.store.save_prediction(&token, &prediction).await {
            log::warn!("⚠️  Failed to persist prediction for {}: {}", series.symbol, e);
        }
        self.hub.publish_prediction(&token, &prediction);

        locked(&self.last_analysis).insert(identifier.to_string(), now_millis());
        Ok(prediction.is_degraded())
    }

    /// Run one Scan → Daily → Hourly → Minute cycle
    pub async fn run_cycle(&self) -> Result<CycleReport, PipelineError> {
        let mut report = CycleReport::default();

        log::info!("🔍 Scanning top {} candidates", self.config.scan_limit);
        let limit = self.config.scan_limit;
        let mut candidates = self
            .fetch_policy()
            .run("candidate scan", |_| self.feed.list_ranked_candidates(limit))
            .await?;
        candidates.truncate(limit);
        report.candidates = candidates.len();

        let identifiers: Vec<String> = candidates.into_iter().map(|t| t.identifier).collect();
        let daily_selected = self.narrow(TimeResolution::Daily, &identifiers, &mut report).await;
        *locked(&self.working_set) = daily_selected.clone();
        report.daily_selected = daily_selected;

        if report.daily_selected.is_empty() {
            log::info!("📭 Daily stage selected no tokens, skipping hourly and minute stages");
            return Ok(report);
        }

        let daily_selected = report.daily_selected.clone();
        let finalists = self.narrow(TimeResolution::Hourly, &daily_selected, &mut report).await;
        log::info!("🎯 {} finalists: {:?}", finalists.len(), finalists);
        report.finalists = finalists.clone();

        for (i, identifier) in finalists.iter().enumerate() {
            if i > 0 {
                self.pace().await;
            }
            match self.analyze_finalist(identifier).await {
                Ok(degraded) => {
                    if degraded {
                        report.degraded.push(identifier.clone());
                    }
                    report.published.push(identifier.clone());
                }
                Err(e) => {
                    log::error!("❌ Minute analysis for {} skipped: {}", identifier, e);
                    report.dropped.push((TimeResolution::Minutely, identifier.clone()));
                }
            }
        }

        Ok(report)
    }
}
