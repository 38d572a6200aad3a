use crate::error::SinkError;
use crate::reading::Reading;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Upstream destination for accepted readings
#[async_trait]
pub trait Sink: Send + Sync {
    async fn send(&self, reading: &Reading) -> Result<(), SinkError>;

    /// Name used in logs
    fn sink_name(&self) -> &str;
}

/// Sink that only logs readings, for running without an upstream
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl Sink for LogSink {
    async fn send(&self, reading: &Reading) -> Result<(), SinkError> {
        info!(
            device = %reading.device_id,
            bpm = reading.heart_rate,
            rr = ?reading.rr_intervals,
            "Reading accepted"
        );
        Ok(())
    }

    fn sink_name(&self) -> &str {
        "log"
    }
}

/// Appends each reading as one JSON line to a file
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
}

impl JsonLinesSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Sink for JsonLinesSink {
    async fn send(&self, reading: &Reading) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(reading).map_err(|e| SinkError::Rejected {
            details: e.to_string(),
        })?;
        line.push(b'\n');

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SinkError::Write {
                    details: format!("Failed to create {}: {}", parent.display(), e),
                })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| SinkError::Unreachable {
                details: format!("Failed to open {}: {}", self.path.display(), e),
            })?;

        file.write_all(&line).await.map_err(|e| SinkError::Write {
            details: e.to_string(),
        })?;
        file.flush().await.map_err(|e| SinkError::Write {
            details: e.to_string(),
        })?;

        debug!("Appended reading to {}", self.path.display());
        Ok(())
    }

    fn sink_name(&self) -> &str {
        "jsonl"
    }
}
