//! Subscriber fan-out
//!
//! Every subscriber owns a bounded outbound queue. A subscriber whose queue
//! is closed or full when a message is pushed is dropped on the spot, with no
//! retry. New subscribers are primed from the [`StateStore`] snapshot.

pub mod messages;
pub mod ws;

use crate::config::HubConfig;
use crate::gateway::Analysis;
use crate::store::{StateStore, StoredPrediction};
use crate::types::{PricePrediction, TokenRef, TokenSeries};
use messages::{ClientMessage, HubMessage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

pub use messages::{derive_ohlc, OhlcPoint};

pub type SubscriberId = u64;

/// Handle returned to a newly registered subscriber
pub struct Subscription {
    pub id: SubscriberId,
    pub receiver: mpsc::Receiver<String>,
}

pub struct PublishHub {
    store: Arc<StateStore>,
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<String>>>,
    next_id: AtomicU64,
    config: HubConfig,
}

impl PublishHub {
    pub fn new(store: Arc<StateStore>, config: HubConfig) -> Self {
        Self {
            store,
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    fn subscribers(&self) -> MutexGuard<'_, HashMap<SubscriberId, mpsc::Sender<String>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    pub fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.subscribers().contains_key(&id)
    }

    /// Whether a joining subscriber would receive any replay
    pub fn has_snapshot(&self) -> bool {
        !self.store.snapshot().is_empty()
    }

    /// Register a subscriber and replay the latest snapshot to it.
    ///
    /// The subscriber table stays locked from snapshot read to insert, so a
    /// concurrent publish reaches the new subscriber through the replay, the
    /// live stream, or both.
    pub fn subscribe(&self) -> Subscription {
        let (tx, receiver) = mpsc::channel(self.config.subscriber_buffer.max(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self.subscribers();
        for message in self.replay_messages() {
            match message.to_json() {
                Ok(json) => {
                    if tx.try_send(json).is_err() {
                        log::debug!("Replay to subscriber {} truncated", id);
                        break;
                    }
                }
                Err(e) => log::error!("❌ Failed to encode replay message: {}", e),
            }
        }

        subscribers.insert(id, tx);
        log::info!("🔌 Subscriber {} connected ({} total)", id, subscribers.len());
        Subscription { id, receiver }
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        let mut subscribers = self.subscribers();
        if subscribers.remove(&id).is_some() {
            log::info!("🔌 Subscriber {} disconnected ({} remaining)", id, subscribers.len());
        }
    }

    fn replay_messages(&self) -> Vec<HubMessage> {
        let snapshot = self.store.snapshot();

        let mut messages = Vec::new();
        if let Some(series) = &snapshot.latest_series {
            messages.extend(HubMessage::market(series));
        }
        if let Some(prediction) = &snapshot.latest_prediction {
            messages.extend(HubMessage::prediction(prediction));
        }
        messages
    }

    /// Push one message to every subscriber, pruning those that cannot take it.
    /// Returns how many subscribers received it.
    fn broadcast(&self, message: &HubMessage) -> usize {
        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                log::error!("❌ Failed to encode hub message: {}", e);
                return 0;
            }
        };

        let mut subscribers = self.subscribers();
        subscribers.retain(|id, tx| match tx.try_send(json.clone()) {
            Ok(()) => true,
            Err(e) => {
                log::debug!("Pruning subscriber {}: {}", id, e);
                false
            }
        });
        subscribers.len()
    }

    /// Broadcast the market view of a freshly collected series
    pub fn publish_market(&self, series: &TokenSeries) -> usize {
        match HubMessage::market(series) {
            Some(message) => self.broadcast(&message),
            None => {
                log::debug!("Skipping market publish for {}: no points", series.symbol);
                0
            }
        }
    }

    /// Broadcast a prediction view. Degraded predictions are flagged in the message.
    pub fn publish_prediction(&self, token: &TokenRef, prediction: &Analysis<PricePrediction>) -> usize {
        let stored = StoredPrediction::new(token, prediction);
        match HubMessage::prediction(&stored) {
            Some(message) => self.broadcast(&message),
            None => {
                log::debug!("Skipping prediction publish for {}: no timepoints", token.symbol);
                0
            }
        }
    }

    /// Notify every subscriber of a fatal condition
    pub fn broadcast_error(&self, message: &str) -> usize {
        log::warn!("📣 Broadcasting error to subscribers: {}", message);
        self.broadcast(&HubMessage::error(message))
    }

    /// Liveness ping; dead subscribers are pruned
    pub fn heartbeat(&self) -> usize {
        let before = self.subscriber_count();
        let alive = self.broadcast(&HubMessage::Heartbeat);
        if alive < before {
            log::info!("💓 Heartbeat pruned {} subscriber(s), {} alive", before - alive, alive);
        }
        alive
    }

    /// Handle a text frame sent by a subscriber
    pub fn handle_client_message(&self, id: SubscriberId, text: &str) {
        let parsed: ClientMessage = match serde_json::from_str(text) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::debug!("Ignoring unparseable message from subscriber {}: {}", id, e);
                return;
            }
        };

        if parsed.msg_type == "ping" {
            self.send_to(id, &HubMessage::Pong);
        }
    }

    fn send_to(&self, id: SubscriberId, message: &HubMessage) {
        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                log::error!("❌ Failed to encode hub message: {}", e);
                return;
            }
        };
        let mut subscribers = self.subscribers();
        let failed = match subscribers.get(&id) {
            Some(tx) => tx.try_send(json).is_err(),
            None => false,
        };
        if failed {
            log::debug!("Pruning subscriber {}: send failed", id);
            subscribers.remove(&id);
        }
    }

    /// Run the liveness timer until `stop` flips to true
    pub async fn run_heartbeat(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        // interval() panics on a zero period
        let period = self.config.heartbeat_interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        // First tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.heartbeat();
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        log::info!("💓 Heartbeat stopped");
    }
}
