//! Local durable storage for submissions that could not be delivered.
//!
//! The whole backlog is one list read and written under a single well-known key.
//! The file implementation writes tmp + rename so a crash never leaves a
//! half-written list behind.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::error;

use crate::store::Destination;

/// Well-known key the backlog lives under.
pub const PENDING_KEY: &str = "pending_reports_v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedSubmission {
    /// Content hash of `(path, payload)`; enqueueing the same write twice is a no-op.
    pub id: String,
    pub path: Destination,
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
}

impl QueuedSubmission {
    pub fn new(path: Destination, payload: Value, now: DateTime<Utc>) -> Self {
        Self {
            id: submission_id(path, &payload),
            path,
            payload,
            enqueued_at: now,
            attempts: 1,
        }
    }
}

pub fn submission_id(path: Destination, payload: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_path().as_bytes());
    hasher.update(b"\n");
    hasher.update(payload.to_string().as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(16);
    for b in digest.iter().take(8) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[async_trait]
pub trait BacklogStorage: Send + Sync {
    async fn load(&self) -> Result<Vec<QueuedSubmission>>;
    async fn save(&self, items: &[QueuedSubmission]) -> Result<()>;
}

/// JSON file `{dir}/pending_reports_v1.json`.
#[derive(Debug, Clone)]
pub struct FileBacklog {
    path: PathBuf,
}

impl FileBacklog {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{PENDING_KEY}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unreadable content is moved aside rather than overwritten by the next save.
    async fn quarantine(&self, reason: &str) -> Result<()> {
        let aside = self
            .path
            .with_extension(format!("corrupt-{}", Utc::now().timestamp()));
        error!(
            target: "queue",
            path = %self.path.display(),
            aside = %aside.display(),
            reason,
            "backlog file unreadable; moved aside"
        );
        tokio::fs::rename(&self.path, &aside)
            .await
            .with_context(|| format!("moving corrupt backlog to {}", aside.display()))
    }
}

#[async_trait]
impl BacklogStorage for FileBacklog {
    async fn load(&self) -> Result<Vec<QueuedSubmission>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("reading backlog {}", self.path.display()))
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        match serde_json::from_slice(&bytes) {
            Ok(items) => Ok(items),
            Err(e) => {
                self.quarantine(&e.to_string()).await?;
                Ok(Vec::new())
            }
        }
    }

    async fn save(&self, items: &[QueuedSubmission]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating backlog dir {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(items)?;
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing backlog {}", self.path.display()))?;
        Ok(())
    }
}

/// Volatile backlog for tests.
#[derive(Debug, Default)]
pub struct MemoryBacklog {
    items: Mutex<Vec<QueuedSubmission>>,
}

#[async_trait]
impl BacklogStorage for MemoryBacklog {
    async fn load(&self) -> Result<Vec<QueuedSubmission>> {
        Ok(self.items.lock().expect("backlog mutex poisoned").clone())
    }

    async fn save(&self, items: &[QueuedSubmission]) -> Result<()> {
        *self.items.lock().expect("backlog mutex poisoned") = items.to_vec();
        Ok(())
    }
}
