//! JSON file backend - one pretty-printed file per record kind

use super::backend::{RecordBackend, RecordKind, StoreError};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

pub struct JsonFileBackend {
    dir: PathBuf,
}

impl JsonFileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, kind: RecordKind) -> PathBuf {
        let file = match kind {
            RecordKind::Market => "market-data.json",
            RecordKind::Prediction => "prediction-data.json",
        };
        self.dir.join(file)
    }
}

async fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl RecordBackend for JsonFileBackend {
    async fn ensure_ready(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).await?;
        log::debug!("JSON store directory ready: {}", self.dir.display());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        for kind in RecordKind::all() {
            remove_if_exists(&self.path_for(kind)).await?;
        }
        Ok(())
    }

    async fn read(&self, kind: RecordKind) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path_for(kind)).await {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, kind: RecordKind, body: &str) -> Result<(), StoreError> {
        // Write-then-rename so readers never see a half-written record
        let path = self.path_for(kind);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "JSON"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_write_replaces_and_clear_removes() {
        let dir = tempdir().unwrap();
        let backend = JsonFileBackend::new(dir.path().join("nested"));
        backend.ensure_ready().await.unwrap();

        assert_eq!(backend.read(RecordKind::Market).await.unwrap(), None);

        backend.write(RecordKind::Market, "{\"a\":1}").await.unwrap();
        backend.write(RecordKind::Market, "{\"a\":2}").await.unwrap();
        assert_eq!(backend.read(RecordKind::Market).await.unwrap().as_deref(), Some("{\"a\":2}"));
        assert_eq!(backend.read(RecordKind::Prediction).await.unwrap(), None);
        assert!(!backend.path_for(RecordKind::Market).with_extension("json.tmp").exists());

        backend.clear().await.unwrap();
        assert_eq!(backend.read(RecordKind::Market).await.unwrap(), None);
        // Clearing twice is fine
        backend.clear().await.unwrap();
    }
}
