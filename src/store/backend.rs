//! Durable record backend trait
//!
//! A backend holds at most one JSON body per [`RecordKind`]; writes replace.

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Market,
    Prediction,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Market => "market",
            RecordKind::Prediction => "prediction",
        }
    }

    pub fn all() -> [RecordKind; 2] {
        [RecordKind::Market, RecordKind::Prediction]
    }
}

#[async_trait]
pub trait RecordBackend: Send + Sync {
    /// Create whatever storage the backend needs (idempotent)
    async fn ensure_ready(&self) -> Result<(), StoreError>;

    /// Drop every stored record
    async fn clear(&self) -> Result<(), StoreError>;

    /// Stored body, `None` if never written
    async fn read(&self, kind: RecordKind) -> Result<Option<String>, StoreError>;

    /// Replace the stored body
    async fn write(&self, kind: RecordKind, body: &str) -> Result<(), StoreError>;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}
