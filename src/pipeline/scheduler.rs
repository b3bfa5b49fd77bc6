//! Periodic cycle loop

use super::AnalysisPipeline;
use tokio::sync::watch;
use tokio::time::sleep;

impl AnalysisPipeline {
    /// Run cycles until `stop` flips to true.
    ///
    /// The stop flag is only checked between cycles; an in-flight cycle always
    /// completes. A failed cycle is reported to subscribers and the loop
    /// carries on after the usual quiescent interval.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        log::info!(
            "⏰ Starting analysis loop (quiescent interval: {}ms)",
            self.config.quiescent_interval.as_millis()
        );

        let mut cycle = 0u64;
        loop {
            if *stop.borrow() {
                break;
            }
            cycle += 1;

            match self.run_cycle().await {
                Ok(report) => {
                    log::info!(
                        "✅ Cycle {} done: {} candidates, {} daily picks, {} finalists, {} published ({} degraded), {} dropped",
                        cycle,
                        report.candidates,
                        report.daily_selected.len(),
                        report.finalists.len(),
                        report.published.len(),
                        report.degraded.len(),
                        report.dropped.len()
                    );
                }
                Err(e) => {
                    log::error!("❌ Cycle {} aborted: {}", cycle, e);
                    self.hub.broadcast_error(&format!("Analysis cycle failed: {}", e));
                }
            }

            let verdicts = self.gateway.verdict_cache_metrics();
            let predictions = self.gateway.prediction_cache_metrics();
            log::debug!(
                "Cache: verdicts {} hits / {} misses / {} expired, predictions {} hits / {} misses / {} expired",
                verdicts.hits,
                verdicts.misses,
                verdicts.expired,
                predictions.hits,
                predictions.misses,
                predictions.expired
            );

            tokio::select! {
                _ = sleep(self.config.quiescent_interval) => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        // Sender dropped, treat as stop
                        break;
                    }
                }
            }
        }

        log::info!("🛑 Analysis loop stopped after {} cycles", cycle);
    }
}
