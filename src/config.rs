//! Runtime configuration from environment variables
//!
//! Every knob has a default; only the inference API key is mandatory, and
//! only for the binary. Components receive their own section so tests can
//! build them without touching the environment.

use crate::types::TimeResolution;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Lookback and refresh cadence of one resolution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolutionWindow {
    /// Number of points requested for the resolution (30 days, 24 hours, ...)
    pub points: usize,
    /// Refresh cadence in milliseconds
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolutionWindows {
    pub daily: ResolutionWindow,
    pub hourly: ResolutionWindow,
    pub minutely: ResolutionWindow,
}

impl ResolutionWindows {
    pub fn get(&self, resolution: TimeResolution) -> ResolutionWindow {
        match resolution {
            TimeResolution::Daily => self.daily,
            TimeResolution::Hourly => self.hourly,
            TimeResolution::Minutely => self.minutely,
        }
    }
}

impl Default for ResolutionWindows {
    fn default() -> Self {
        Self {
            daily: ResolutionWindow { points: 30, interval_ms: 86_400_000 },
            hourly: ResolutionWindow { points: 24, interval_ms: 3_600_000 },
            minutely: ResolutionWindow { points: 60, interval_ms: 60_000 },
        }
    }
}

/// Inference gateway settings
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub windows: ResolutionWindows,
    pub min_confidence: f64,
    pub max_tokens: usize,
    /// Attempts per request, first call included
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub cache_capacity: u64,
    pub ttl_daily: Duration,
    pub ttl_hourly: Duration,
    pub ttl_minutely: Duration,
}

impl GatewayConfig {
    pub fn ttl(&self, resolution: TimeResolution) -> Duration {
        match resolution {
            TimeResolution::Daily => self.ttl_daily,
            TimeResolution::Hourly => self.ttl_hourly,
            TimeResolution::Minutely => self.ttl_minutely,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            windows: ResolutionWindows::default(),
            min_confidence: 0.7,
            max_tokens: 10,
            retry_attempts: 4,
            retry_delay: Duration::from_secs(1),
            cache_capacity: 512,
            ttl_daily: Duration::from_secs(240 * 60),
            ttl_hourly: Duration::from_secs(60 * 60),
            ttl_minutely: Duration::from_secs(5 * 60),
        }
    }
}

/// Analysis loop settings
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub scan_limit: usize,
    pub fetch_attempts: u32,
    pub fetch_retry_delay: Duration,
    /// Pause inserted between per-token fetches
    pub fetch_pacing: Duration,
    /// Pause between the end of one cycle and the next scan
    pub quiescent_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scan_limit: 10,
            fetch_attempts: 3,
            fetch_retry_delay: Duration::from_secs(2),
            fetch_pacing: Duration::from_millis(500),
            quiescent_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HubConfig {
    pub heartbeat_interval: Duration,
    pub subscriber_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            subscriber_buffer: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackendType {
    Json,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    pub backend: StoreBackendType,
    /// Directory for the JSON backend, database file for SQLite
    pub path: PathBuf,
    pub clear_on_start: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackendType::Json,
            path: PathBuf::from("data"),
            clear_on_start: false,
        }
    }
}

/// External endpoints used by the binary
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointConfig {
    pub openrouter_api_key: String,
    pub openrouter_base_url: String,
    pub inference_model: String,
    pub jupiter_api_endpoint: String,
    pub http_bind: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub endpoints: EndpointConfig,
    pub gateway: GatewayConfig,
    pub pipeline: PipelineConfig,
    pub hub: HubConfig,
    pub store: StoreConfig,
}

impl AppConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup: &lookup };

        let openrouter_api_key = vars
            .string("OPENROUTER_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVariable("OPENROUTER_API_KEY".to_string()))?;

        let endpoints = EndpointConfig {
            openrouter_api_key,
            openrouter_base_url: vars
                .string("OPENROUTER_BASE_URL")
                .unwrap_or_else(|| "https://openrouter.ai/api/v1".to_string()),
            inference_model: vars
                .string("INFERENCE_MODEL")
                .unwrap_or_else(|| "deepseek/deepseek-r1:nitro".to_string()),
            jupiter_api_endpoint: vars
                .string("JUPITER_API_ENDPOINT")
                .unwrap_or_else(|| "https://api.jup.ag".to_string()),
            http_bind: vars
                .string("HTTP_BIND")
                .unwrap_or_else(|| "0.0.0.0:3000".to_string()),
        };

        for (key, url) in [
            ("OPENROUTER_BASE_URL", &endpoints.openrouter_base_url),
            ("JUPITER_API_ENDPOINT", &endpoints.jupiter_api_endpoint),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must start with http:// or https://",
                    key
                )));
            }
        }

        let defaults = GatewayConfig::default();
        let windows = ResolutionWindows {
            daily: ResolutionWindow {
                points: vars.parse("DAILY_HISTORY_DAYS", defaults.windows.daily.points),
                interval_ms: vars.parse("DAILY_UPDATE_INTERVAL_MS", defaults.windows.daily.interval_ms),
            },
            hourly: ResolutionWindow {
                points: vars.parse("HOURLY_HISTORY_HOURS", defaults.windows.hourly.points),
                interval_ms: vars.parse("HOURLY_UPDATE_INTERVAL_MS", defaults.windows.hourly.interval_ms),
            },
            minutely: ResolutionWindow {
                points: vars.parse("MINUTE_HISTORY_MINUTES", defaults.windows.minutely.points),
                interval_ms: vars.parse("MINUTE_UPDATE_INTERVAL_MS", defaults.windows.minutely.interval_ms),
            },
        };

        let min_confidence: f64 = vars.parse("MIN_CONFIDENCE", defaults.min_confidence);
        if !(0.0..=1.0).contains(&min_confidence) {
            return Err(ConfigError::InvalidValue(format!(
                "MIN_CONFIDENCE must be within [0, 1], got {}",
                min_confidence
            )));
        }

        let gateway = GatewayConfig {
            windows: windows.clone(),
            min_confidence,
            max_tokens: vars.parse("MAX_DAILY_TOKENS", defaults.max_tokens),
            retry_attempts: vars.parse("INFERENCE_RETRY_ATTEMPTS", defaults.retry_attempts),
            retry_delay: vars.millis("INFERENCE_RETRY_DELAY_MS", defaults.retry_delay),
            cache_capacity: vars.parse("CACHE_CAPACITY", defaults.cache_capacity),
            ttl_daily: vars.minutes("CACHE_TTL_DAILY_MIN", defaults.ttl_daily),
            ttl_hourly: vars.minutes("CACHE_TTL_HOURLY_MIN", defaults.ttl_hourly),
            ttl_minutely: vars.minutes("CACHE_TTL_MINUTE_MIN", defaults.ttl_minutely),
        };

        let pipeline_defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            scan_limit: vars.parse("SCAN_LIMIT", pipeline_defaults.scan_limit),
            fetch_attempts: vars.parse("FEED_RETRY_ATTEMPTS", pipeline_defaults.fetch_attempts),
            fetch_retry_delay: vars.millis("FEED_RETRY_DELAY_MS", pipeline_defaults.fetch_retry_delay),
            fetch_pacing: vars.millis("FETCH_PACING_MS", pipeline_defaults.fetch_pacing),
            quiescent_interval: Duration::from_millis(windows.minutely.interval_ms),
        };

        let hub_defaults = HubConfig::default();
        let hub = HubConfig {
            heartbeat_interval: vars.millis("HEARTBEAT_INTERVAL_MS", hub_defaults.heartbeat_interval),
            subscriber_buffer: vars.parse("SUBSCRIBER_BUFFER", hub_defaults.subscriber_buffer),
        };
        if hub.heartbeat_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "HEARTBEAT_INTERVAL_MS must be greater than zero".to_string(),
            ));
        }

        let store_defaults = StoreConfig::default();
        let backend = match vars.string("STORE_BACKEND").map(|s| s.to_lowercase()).as_deref() {
            None | Some("json") => StoreBackendType::Json,
            Some("sqlite") => StoreBackendType::Sqlite,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "STORE_BACKEND must be json or sqlite, got {}",
                    other
                )))
            }
        };
        let store = StoreConfig {
            backend,
            path: vars.string("STORE_PATH").map(PathBuf::from).unwrap_or(store_defaults.path),
            clear_on_start: vars.parse("CLEAR_STORE_ON_START", store_defaults.clear_on_start),
        };

        Ok(Self {
            endpoints,
            gateway,
            pipeline,
            hub,
            store,
        })
    }
}

struct Vars<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key).map(|s| s.trim().to_string())
    }

    fn parse<T>(&self, key: &str, default: T) -> T
    where
        T: std::str::FromStr + std::fmt::Debug,
    {
        match self.string(key) {
            None => default,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                log::warn!("Invalid {} '{}', defaulting to {:?}", key, raw, default);
                default
            }),
        }
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        Duration::from_millis(self.parse(key, default.as_millis() as u64))
    }

    fn minutes(&self, key: &str, default: Duration) -> Duration {
        Duration::from_secs(self.parse(key, default.as_secs() / 60) * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = load(&[("OPENROUTER_API_KEY", "sk-test")]).unwrap();

        assert_eq!(config.endpoints.inference_model, "deepseek/deepseek-r1:nitro");
        assert_eq!(config.gateway.windows.daily.points, 30);
        assert_eq!(config.gateway.windows.hourly.points, 24);
        assert_eq!(config.gateway.windows.minutely.points, 60);
        assert_eq!(config.gateway.min_confidence, 0.7);
        assert_eq!(config.gateway.max_tokens, 10);
        assert_eq!(config.gateway.retry_attempts, 4);
        assert_eq!(config.gateway.ttl(TimeResolution::Minutely), Duration::from_secs(300));
        assert_eq!(config.gateway.ttl(TimeResolution::Hourly), Duration::from_secs(3600));
        assert_eq!(config.gateway.ttl(TimeResolution::Daily), Duration::from_secs(14_400));
        assert_eq!(config.pipeline.scan_limit, 10);
        assert_eq!(config.pipeline.fetch_attempts, 3);
        assert_eq!(config.pipeline.fetch_pacing, Duration::from_millis(500));
        assert_eq!(config.pipeline.quiescent_interval, Duration::from_secs(60));
        assert_eq!(config.hub.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.store.backend, StoreBackendType::Json);
        assert!(!config.store.clear_on_start);
    }

    #[test]
    fn test_custom_config() {
        let config = load(&[
            ("OPENROUTER_API_KEY", "sk-test"),
            ("DAILY_HISTORY_DAYS", "14"),
            ("MINUTE_UPDATE_INTERVAL_MS", "5000"),
            ("MAX_DAILY_TOKENS", "3"),
            ("CACHE_TTL_MINUTE_MIN", "1"),
            ("STORE_BACKEND", "SQLite"),
            ("STORE_PATH", "/tmp/trendcast.db"),
            ("CLEAR_STORE_ON_START", "true"),
        ])
        .unwrap();

        assert_eq!(config.gateway.windows.daily.points, 14);
        assert_eq!(config.pipeline.quiescent_interval, Duration::from_secs(5));
        assert_eq!(config.gateway.max_tokens, 3);
        assert_eq!(config.gateway.ttl_minutely, Duration::from_secs(60));
        assert_eq!(config.store.backend, StoreBackendType::Sqlite);
        assert_eq!(config.store.path, PathBuf::from("/tmp/trendcast.db"));
        assert!(config.store.clear_on_start);
    }

    #[test]
    fn test_missing_api_key_is_an_error() {
        assert!(matches!(load(&[]), Err(ConfigError::MissingVariable(_))));
        assert!(matches!(
            load(&[("OPENROUTER_API_KEY", "  ")]),
            Err(ConfigError::MissingVariable(_))
        ));
    }

    #[test]
    fn test_unparseable_number_falls_back_to_default() {
        let config = load(&[("OPENROUTER_API_KEY", "k"), ("SCAN_LIMIT", "lots")]).unwrap();
        assert_eq!(config.pipeline.scan_limit, 10);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            load(&[("OPENROUTER_API_KEY", "k"), ("STORE_BACKEND", "redis")]),
            Err(ConfigError::InvalidValue(_))
        ));
        assert!(matches!(
            load(&[("OPENROUTER_API_KEY", "k"), ("MIN_CONFIDENCE", "1.5")]),
            Err(ConfigError::InvalidValue(_))
        ));
        assert!(matches!(
            load(&[("OPENROUTER_API_KEY", "k"), ("JUPITER_API_ENDPOINT", "ftp://x")]),
            Err(ConfigError::InvalidValue(_))
        ));
        assert!(matches!(
            load(&[("OPENROUTER_API_KEY", "k"), ("HEARTBEAT_INTERVAL_MS", "0")]),
            Err(ConfigError::InvalidValue(_))
        ));
    }
}
