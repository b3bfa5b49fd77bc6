//! End-to-end cycle tests with a scripted feed and inference backend
//!
//! The backend answers by looking at the prompt: the resolution description
//! ("30-day", "24-hour", "60-minute") tells which stage is asking.

#[cfg(test)]
mod pipeline_integration_tests {
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use tokio::sync::{mpsc, watch};
    use trendcast::config::{GatewayConfig, HubConfig, PipelineConfig};
    use trendcast::feed::{DataFeed, FeedError};
    use trendcast::gateway::backend::{InferenceBackend, InferenceError};
    use trendcast::store::JsonFileBackend;
    use trendcast::{
        AnalysisPipeline, InferenceGateway, PricePoint, PublishHub, StateStore, TimeResolution, TokenRef, TokenSeries,
    };

    struct ScriptedFeed {
        candidates: Vec<TokenRef>,
        failing: HashSet<(TimeResolution, String)>,
        fetches: Mutex<Vec<(TimeResolution, String)>>,
    }

    impl ScriptedFeed {
        fn new(count: usize) -> Self {
            Self {
                candidates: (1..=count).map(|i| TokenRef::new(format!("m{}", i), format!("T{}", i))).collect(),
                failing: HashSet::new(),
                fetches: Mutex::new(Vec::new()),
            }
        }

        fn failing(mut self, resolution: TimeResolution, identifier: &str) -> Self {
            self.failing.insert((resolution, identifier.to_string()));
            self
        }

        fn fetch_count(&self, resolution: TimeResolution) -> usize {
            self.fetches.lock().unwrap().iter().filter(|(r, _)| *r == resolution).count()
        }
    }

    #[async_trait]
    impl DataFeed for ScriptedFeed {
        async fn list_ranked_candidates(&self, limit: usize) -> Result<Vec<TokenRef>, FeedError> {
            Ok(self.candidates.iter().take(limit).cloned().collect())
        }

        async fn fetch_series(&self, resolution: TimeResolution, identifier: &str) -> Result<TokenSeries, FeedError> {
            self.fetches.lock().unwrap().push((resolution, identifier.to_string()));
            if self.failing.contains(&(resolution, identifier.to_string())) {
                return Err(FeedError::Api("upstream timeout".to_string()));
            }
            let token = self
                .candidates
                .iter()
                .find(|t| t.identifier == identifier)
                .ok_or_else(|| FeedError::UnknownToken(identifier.to_string()))?;
            Ok(TokenSeries::new(
                identifier,
                token.symbol.clone(),
                vec![
                    PricePoint { timestamp: 1_000, price: 10.0, volume: 1.0 },
                    PricePoint { timestamp: 2_000, price: 12.0, volume: 2.0 },
                    PricePoint { timestamp: 3_000, price: 9.0, volume: 3.0 },
                ],
            ))
        }
    }

    struct StageBackend {
        daily_pick: Vec<String>,
        hourly_pick: Vec<String>,
        predictions_fail: bool,
        prompts: Mutex<Vec<String>>,
    }

    impl StageBackend {
        fn new(daily_pick: &[&str], hourly_pick: &[&str]) -> Self {
            Self {
                daily_pick: daily_pick.iter().map(|s| s.to_string()).collect(),
                hourly_pick: hourly_pick.iter().map(|s| s.to_string()).collect(),
                predictions_fail: false,
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self, marker: &str) -> usize {
            self.prompts.lock().unwrap().iter().filter(|p| p.contains(marker)).count()
        }

        fn verdict(picks: &[String]) -> String {
            format!(
                r#"{{"selectedTokens": {}, "analysis": [], "recommendations": ["scripted"]}}"#,
                serde_json::to_string(picks).unwrap()
            )
        }
    }

    #[async_trait]
    impl InferenceBackend for StageBackend {
        async fn complete(&self, _system: &str, user: &str) -> Result<Option<String>, InferenceError> {
            self.prompts.lock().unwrap().push(user.to_string());
            if user.contains("30-day") {
                Ok(Some(Self::verdict(&self.daily_pick)))
            } else if user.contains("24-hour") {
                Ok(Some(Self::verdict(&self.hourly_pick)))
            } else if self.predictions_fail {
                Err(InferenceError::Api("model overloaded".to_string()))
            } else {
                Ok(Some(
                    r#"{"timepoints": [{"timestamp": 4000, "price": 11.0, "confidence": 0.8},
                                       {"timestamp": 5000, "price": 13.0, "confidence": 0.6}],
                        "supportLevels": [8.5], "resistanceLevels": [14.0]}"#
                        .to_string(),
                ))
            }
        }
    }

    struct Harness {
        pipeline: Arc<AnalysisPipeline>,
        feed: Arc<ScriptedFeed>,
        backend: Arc<StageBackend>,
        hub: Arc<PublishHub>,
        store: Arc<StateStore>,
        _dir: TempDir,
    }

    async fn harness(feed: ScriptedFeed, backend: StageBackend) -> Harness {
        let dir = tempdir().unwrap();
        let store = Arc::new(StateStore::new(Box::new(JsonFileBackend::new(dir.path()))));
        store.initialize(false).await.unwrap();

        let hub = Arc::new(PublishHub::new(store.clone(), HubConfig::default()));
        let backend = Arc::new(backend);
        let gateway = Arc::new(InferenceGateway::new(
            backend.clone(),
            GatewayConfig {
                retry_delay: Duration::ZERO,
                ..GatewayConfig::default()
            },
        ));
        let feed = Arc::new(feed);
        let config = PipelineConfig {
            fetch_retry_delay: Duration::ZERO,
            fetch_pacing: Duration::ZERO,
            quiescent_interval: Duration::from_secs(60),
            ..PipelineConfig::default()
        };
        let pipeline = Arc::new(AnalysisPipeline::new(
            feed.clone(),
            gateway,
            store.clone(),
            hub.clone(),
            config,
        ));

        Harness {
            pipeline,
            feed,
            backend,
            hub,
            store,
            _dir: dir,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<serde_json::Value> {
        let mut messages = Vec::new();
        while let Ok(raw) = rx.try_recv() {
            messages.push(serde_json::from_str(&raw).unwrap());
        }
        messages
    }

    fn of_type<'a>(messages: &'a [serde_json::Value], kind: &str) -> Vec<&'a serde_json::Value> {
        messages.iter().filter(|m| m["type"] == kind).collect()
    }

    #[tokio::test]
    async fn test_empty_daily_verdict_skips_later_stages() {
        let h = harness(ScriptedFeed::new(5), StageBackend::new(&[], &["m1"])).await;
        let mut sub = h.hub.subscribe();

        let report = h.pipeline.run_cycle().await.unwrap();

        assert_eq!(report.candidates, 5);
        assert!(report.daily_selected.is_empty());
        assert_eq!(h.feed.fetch_count(TimeResolution::Daily), 5);
        assert_eq!(h.feed.fetch_count(TimeResolution::Hourly), 0);
        assert_eq!(h.feed.fetch_count(TimeResolution::Minutely), 0);
        assert_eq!(h.backend.calls("30-day"), 1);
        assert_eq!(h.backend.calls("24-hour"), 0);
        assert_eq!(h.backend.calls("60-minute"), 0);
        assert!(drain(&mut sub.receiver).is_empty());
    }

    #[tokio::test]
    async fn test_one_failed_finalist_does_not_stop_the_others() {
        let all = ["m1", "m2", "m3", "m4", "m5"];
        let feed = ScriptedFeed::new(5).failing(TimeResolution::Minutely, "m3");
        let h = harness(feed, StageBackend::new(&all, &all)).await;
        let mut sub = h.hub.subscribe();

        let report = h.pipeline.run_cycle().await.unwrap();

        assert_eq!(report.finalists.len(), 5);
        assert_eq!(report.published, vec!["m1", "m2", "m4", "m5"]);
        assert_eq!(report.dropped, vec![(TimeResolution::Minutely, "m3".to_string())]);

        let messages = drain(&mut sub.receiver);
        let markets = of_type(&messages, "price");
        let predictions = of_type(&messages, "prediction");
        assert_eq!(markets.len(), 4);
        assert_eq!(predictions.len(), 4);
        assert!(markets.iter().all(|m| m["tokenName"] != "T3"));

        // Each market view goes out before its prediction
        assert_eq!(messages[0]["type"], "price");
        assert_eq!(messages[1]["type"], "prediction");
        assert_eq!(messages[1]["tokenName"], messages[0]["tokenName"]);

        let analyzed = h.pipeline.last_analysis();
        assert_eq!(analyzed.len(), 4);
        assert!(!analyzed.contains_key("m3"));
    }

    #[tokio::test]
    async fn test_failed_daily_fetch_drops_only_that_token() {
        let feed = ScriptedFeed::new(3).failing(TimeResolution::Daily, "m2");
        let h = harness(feed, StageBackend::new(&["m1", "m3"], &["m1"])).await;

        let report = h.pipeline.run_cycle().await.unwrap();

        assert_eq!(report.daily_selected, vec!["m1", "m3"]);
        assert_eq!(report.finalists, vec!["m1"]);
        assert_eq!(report.dropped, vec![(TimeResolution::Daily, "m2".to_string())]);
        // Three attempts for the failing token, one for each healthy one
        assert_eq!(h.feed.fetch_count(TimeResolution::Daily), 5);
        assert_eq!(h.pipeline.working_set(), vec!["m1", "m3"]);
    }

    #[tokio::test]
    async fn test_degraded_prediction_is_still_published() {
        let mut backend = StageBackend::new(&["m1"], &["m1"]);
        backend.predictions_fail = true;
        let h = harness(ScriptedFeed::new(1), backend).await;
        let mut sub = h.hub.subscribe();

        let report = h.pipeline.run_cycle().await.unwrap();
        assert_eq!(report.degraded, vec!["m1"]);

        let messages = drain(&mut sub.receiver);
        let prediction = of_type(&messages, "prediction")[0];
        assert_eq!(prediction["confidence"], 0.1);
        assert_eq!(prediction["degraded"], true);
        assert_eq!(prediction["predictedPrice"], 9.0);
        let support = prediction["supportLevels"][0].as_f64().unwrap();
        let resistance = prediction["resistanceLevels"][0].as_f64().unwrap();
        assert!((support - 8.91).abs() < 1e-9);
        assert!((resistance - 9.09).abs() < 1e-9);
        // One call plus three retries
        assert_eq!(h.backend.calls("60-minute"), 4);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_latest_state() {
        let h = harness(ScriptedFeed::new(2), StageBackend::new(&["m1", "m2"], &["m1", "m2"])).await;
        h.pipeline.run_cycle().await.unwrap();

        let mut late = h.hub.subscribe();
        let messages = drain(&mut late.receiver);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["type"], "price");
        assert_eq!(messages[0]["tokenName"], "T2");
        assert_eq!(messages[0]["priceData"][2]["open"], 12.0);
        assert_eq!(messages[0]["priceData"][2]["low"], 9.0);
        assert_eq!(messages[1]["type"], "prediction");
        assert_eq!(messages[1]["predictedPrice"], 13.0);
        assert_eq!(messages[1]["degraded"], false);

        assert_eq!(h.store.load_market().await.unwrap().identifier, "m2");
    }

    #[tokio::test]
    async fn test_gone_subscriber_is_pruned_on_next_broadcast() {
        let h = harness(ScriptedFeed::new(1), StageBackend::new(&["m1"], &["m1"])).await;
        let mut stays = h.hub.subscribe();
        let leaves = h.hub.subscribe();
        let gone = leaves.id;
        drop(leaves);
        assert_eq!(h.hub.subscriber_count(), 2);

        h.pipeline.run_cycle().await.unwrap();

        assert!(!h.hub.is_subscribed(gone));
        assert_eq!(h.hub.subscriber_count(), 1);
        assert_eq!(drain(&mut stays.receiver).len(), 2);
    }

    #[tokio::test]
    async fn test_second_cycle_reuses_cached_answers() {
        let h = harness(ScriptedFeed::new(2), StageBackend::new(&["m1", "m2"], &["m1"])).await;

        h.pipeline.run_cycle().await.unwrap();
        h.pipeline.run_cycle().await.unwrap();

        assert_eq!(h.backend.calls("30-day"), 1);
        assert_eq!(h.backend.calls("24-hour"), 1);
        assert_eq!(h.backend.calls("60-minute"), 1);
        // Series are still refreshed every cycle
        assert_eq!(h.feed.fetch_count(TimeResolution::Minutely), 2);
    }

    #[tokio::test]
    async fn test_loop_stops_between_cycles() {
        let h = harness(ScriptedFeed::new(1), StageBackend::new(&["m1"], &["m1"])).await;
        let mut sub = h.hub.subscribe();
        let (stop_tx, stop_rx) = watch::channel(false);

        let pipeline = h.pipeline.clone();
        let task = tokio::spawn(async move { pipeline.run(stop_rx).await });

        // First cycle publishes, then the loop sits in its quiescent wait
        let first = tokio::time::timeout(Duration::from_secs(5), sub.receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(first.contains("\"price\""));

        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert_eq!(h.feed.fetch_count(TimeResolution::Minutely), 1);
    }
}
