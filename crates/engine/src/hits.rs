//! Hits and hit outputs
//!
//! A hit is the stored record of a successful (or custom-classified) check.
//! Outputs are at-least-once sinks; a failing output is logged by the job
//! and never stops the run.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::info;
use uuid::Uuid;

use crate::job::JobId;

/// Classification of a hit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitKind {
    Success,
    Custom(String),
}

impl HitKind {
    /// Name used for file names and log fields
    pub fn name(&self) -> &str {
        match self {
            Self::Success => "SUCCESS",
            Self::Custom(name) => name,
        }
    }
}

impl std::fmt::Display for HitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A stored result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hit {
    pub id: Uuid,
    pub job_id: JobId,
    /// The input line that produced the hit
    pub data: String,
    pub captured: BTreeMap<String, String>,
    /// Proxy used for the successful attempt, as `(type)host:port`
    pub proxy: Option<String>,
    pub kind: HitKind,
    pub date: DateTime<Utc>,
}

impl Hit {
    pub fn new(job_id: JobId, data: impl Into<String>, kind: HitKind) -> Self {
        Self {
            id: Uuid::now_v7(),
            job_id,
            data: data.into(),
            captured: BTreeMap::new(),
            proxy: None,
            kind,
            date: Utc::now(),
        }
    }

    pub fn with_captured(mut self, captured: BTreeMap<String, String>) -> Self {
        self.captured = captured;
        self
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Captured variables as `name = value | name = value`
    pub fn captured_to_string(&self) -> String {
        self.captured
            .iter()
            .map(|(name, value)| format!("{name} = {value}"))
            .collect::<Vec<_>>()
            .join(" | ")
    }

    /// One-line text form: the data followed by the captured variables
    pub fn to_line(&self) -> String {
        if self.captured.is_empty() {
            self.data.clone()
        } else {
            format!("{} | {}", self.data, self.captured_to_string())
        }
    }
}

/// Hit output errors
#[derive(Debug, thiserror::Error)]
pub enum HitOutputError {
    #[error("failed to write hit to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Sink for hits
#[async_trait]
pub trait HitOutput: Send + Sync {
    /// Name for logs
    fn name(&self) -> &str;

    /// Persist one hit
    async fn store(&self, hit: &Hit) -> Result<(), HitOutputError>;
}

/// Keeps hits in memory
#[derive(Debug, Default)]
pub struct MemoryHitOutput {
    hits: Mutex<Vec<Hit>>,
}

impl MemoryHitOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies of the stored hits
    pub fn hits(&self) -> Vec<Hit> {
        self.hits.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.hits.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl HitOutput for MemoryHitOutput {
    fn name(&self) -> &str {
        "memory"
    }

    async fn store(&self, hit: &Hit) -> Result<(), HitOutputError> {
        self.hits.lock().push(hit.clone());
        Ok(())
    }
}

/// Appends hits to `<dir>/<KIND>.txt`, one line per hit
#[derive(Debug)]
pub struct FileHitOutput {
    dir: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileHitOutput {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// File a hit of `kind` is written to
    pub fn path_for(&self, kind: &HitKind) -> PathBuf {
        let name: String = kind
            .name()
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{name}.txt"))
    }
}

#[async_trait]
impl HitOutput for FileHitOutput {
    fn name(&self) -> &str {
        "file"
    }

    async fn store(&self, hit: &Hit) -> Result<(), HitOutputError> {
        let path = self.path_for(&hit.kind);
        let io_error = |source| HitOutputError::Io {
            path: path.clone(),
            source,
        };

        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.dir).await.map_err(io_error)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_error)?;

        let mut line = hit.to_line();
        line.push('\n');
        file.write_all(line.as_bytes()).await.map_err(io_error)?;
        file.flush().await.map_err(io_error)?;
        Ok(())
    }
}

/// Logs each hit through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHitOutput;

#[async_trait]
impl HitOutput for LogHitOutput {
    fn name(&self) -> &str {
        "log"
    }

    async fn store(&self, hit: &Hit) -> Result<(), HitOutputError> {
        info!(
            job_id = %hit.job_id,
            kind = %hit.kind,
            proxy = hit.proxy.as_deref().unwrap_or("none"),
            "HIT {}",
            hit.to_line()
        );
        Ok(())
    }
}

/// Serializable hit output selection, stored in job options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HitOutputSpec {
    File { dir: PathBuf },
    Log,
}

impl HitOutputSpec {
    pub fn build(&self) -> Arc<dyn HitOutput> {
        match self {
            Self::File { dir } => Arc::new(FileHitOutput::new(dir.clone())),
            Self::Log => Arc::new(LogHitOutput),
        }
    }
}
