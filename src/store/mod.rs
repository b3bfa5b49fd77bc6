//! Latest-state store
//!
//! Holds the latest accepted market series and prediction, in memory for
//! readers and durably through a [`RecordBackend`] for warm starts. Each save
//! overwrites. The in-memory snapshot is replaced by swapping a single `Arc`,
//! so readers see either the previous or the next snapshot, never a mix.

pub mod backend;
pub mod json_file;
pub mod sqlite;

use crate::config::{StoreBackendType, StoreConfig};
use crate::gateway::Analysis;
use crate::types::{PricePrediction, TokenRef, TokenSeries};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};

pub use backend::{RecordBackend, RecordKind, StoreError};
pub use json_file::JsonFileBackend;
pub use sqlite::SqliteBackend;

/// Durable prediction record. The token and `degraded` marker survive
/// restarts so replayed views keep their label and marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPrediction {
    /// Absent on records written before the token was tracked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<TokenRef>,
    #[serde(flatten)]
    pub prediction: PricePrediction,
    #[serde(default)]
    pub degraded: bool,
}

impl StoredPrediction {
    pub fn new(token: &TokenRef, analysis: &Analysis<PricePrediction>) -> Self {
        Self {
            token: Some(token.clone()),
            prediction: analysis.value().clone(),
            degraded: analysis.is_degraded(),
        }
    }

    pub fn token_name(&self) -> Option<&str> {
        self.token.as_ref().map(|t| t.symbol.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateSnapshot {
    pub latest_series: Option<TokenSeries>,
    pub latest_prediction: Option<StoredPrediction>,
}

impl StateSnapshot {
    pub fn is_empty(&self) -> bool {
        self.latest_series.is_none() && self.latest_prediction.is_none()
    }
}

pub struct StateStore {
    backend: Box<dyn RecordBackend>,
    current: RwLock<Arc<StateSnapshot>>,
}

impl StateStore {
    pub fn new(backend: Box<dyn RecordBackend>) -> Self {
        Self {
            backend,
            current: RwLock::new(Arc::new(StateSnapshot::default())),
        }
    }

    /// Build the store selected by configuration
    pub fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        let backend: Box<dyn RecordBackend> = match config.backend {
            StoreBackendType::Json => Box::new(JsonFileBackend::new(&config.path)),
            StoreBackendType::Sqlite => Box::new(SqliteBackend::new(&config.path)?),
        };
        log::info!("📦 State store backend: {} ({})", backend.backend_type(), config.path.display());
        Ok(Self::new(backend))
    }

    /// Prepare durable storage, optionally wiping it first, then rehydrate
    /// the in-memory snapshot from whatever records survive.
    pub async fn initialize(&self, clear_existing: bool) -> Result<(), StoreError> {
        if clear_existing {
            log::info!("🧹 Clearing existing state records");
            self.backend.clear().await?;
        }
        self.backend.ensure_ready().await?;

        let snapshot = StateSnapshot {
            latest_series: self.load_market().await,
            latest_prediction: self.load_prediction().await,
        };
        if !snapshot.is_empty() {
            log::info!(
                "♻️  Rehydrated state: market={} prediction={}",
                snapshot.latest_series.as_ref().map(|s| s.symbol.as_str()).unwrap_or("-"),
                snapshot.latest_prediction.is_some()
            );
        }
        self.swap(|_| snapshot);
        Ok(())
    }

    /// Latest in-memory snapshot
    pub fn snapshot(&self) -> Arc<StateSnapshot> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn swap(&self, update: impl FnOnce(&StateSnapshot) -> StateSnapshot) {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let next = update(&guard);
        *guard = Arc::new(next);
    }

    /// Accept a market series. Memory is updated even when the durable write fails.
    pub async fn save_market(&self, series: &TokenSeries) -> Result<(), StoreError> {
        self.swap(|prev| StateSnapshot {
            latest_series: Some(series.clone()),
            ..prev.clone()
        });
        let body = serde_json::to_string_pretty(series)?;
        self.backend.write(RecordKind::Market, &body).await
    }

    /// Accept a prediction for `token`. Memory is updated even when the durable write fails.
    pub async fn save_prediction(
        &self,
        token: &TokenRef,
        prediction: &Analysis<PricePrediction>,
    ) -> Result<(), StoreError> {
        let record = StoredPrediction::new(token, prediction);
        let body = serde_json::to_string_pretty(&record)?;
        self.swap(|prev| StateSnapshot {
            latest_prediction: Some(record),
            ..prev.clone()
        });
        self.backend.write(RecordKind::Prediction, &body).await
    }

    pub async fn load_market(&self) -> Option<TokenSeries> {
        self.load_record(RecordKind::Market).await
    }

    pub async fn load_prediction(&self) -> Option<StoredPrediction> {
        self.load_record(RecordKind::Prediction).await
    }

    async fn load_record<T: serde::de::DeserializeOwned>(&self, kind: RecordKind) -> Option<T> {
        let body = match self.backend.read(kind).await {
            Ok(Some(body)) => body,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("⚠️  Failed to read {} record: {}", kind.as_str(), e);
                return None;
            }
        };
        match serde_json::from_str(&body) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("⚠️  Ignoring corrupt {} record: {}", kind.as_str(), e);
                None
            }
        }
    }
}
