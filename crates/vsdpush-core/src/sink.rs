//! Result sinks — where a captured bootstrap URL ends up.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Local;

use crate::error::SinkError;

/// Persists a named payload. Returns a human-readable location.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn store(&self, name: &str, payload: &str) -> Result<String, SinkError>;
}

/// Writes each payload to `<dir>/<YYYY_MM_DD_><name>.txt`.
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path the payload for `name` is written to today.
    pub fn path_for(&self, name: &str) -> PathBuf {
        let date = Local::now().format("%Y_%m_%d_");
        self.dir.join(format!("{date}{}.txt", name.trim()))
    }
}

#[async_trait]
impl ResultSink for FileSink {
    async fn store(&self, name: &str, payload: &str) -> Result<String, SinkError> {
        let path = self.path_for(name);
        tokio::fs::write(&path, payload)
            .await
            .map_err(|source| SinkError::Io {
                path: path.display().to_string(),
                source,
            })?;
        tracing::info!(path = %path.display(), "stored bootstrap URL");
        Ok(path.display().to_string())
    }
}
