//! Trendcast - cascading multi-timeframe token analysis
//!
//! - `feed` - ranked candidates and price series (Jupiter adapter)
//! - `gateway` - cached, retried, validated inference with degraded fallback
//! - `pipeline` - Daily → Hourly → Minutely funnel and its cycle loop
//! - `store` - latest market/prediction snapshot, JSON or SQLite backed
//! - `hub` - subscriber fan-out, OHLC views, heartbeat, WebSocket transport

pub mod config;
pub mod feed;
pub mod gateway;
pub mod hub;
pub mod pipeline;
pub mod retry;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use config::AppConfig;
pub use gateway::{Analysis, InferenceGateway};
pub use hub::PublishHub;
pub use pipeline::{AnalysisPipeline, CycleReport};
pub use store::StateStore;
pub use types::{AnalysisVerdict, PricePoint, PricePrediction, TimeResolution, TokenRef, TokenSeries};
