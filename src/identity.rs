//! Report identity allocation: a monotonically increasing counter formatted as `no<N>`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

const PREFIX: &str = "no";

pub fn format_report_id(number: u64) -> String {
    format!("{PREFIX}{number}")
}

/// Inverse of [`format_report_id`]. Returns `None` for anything not shaped `no<digits>`.
pub fn parse_report_id(id: &str) -> Option<u64> {
    let digits = id.trim().strip_prefix(PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Atomic increment-and-read counter owned by an external service.
#[async_trait]
pub trait ReportIdAllocator: Send + Sync {
    async fn next_number(&self) -> Result<u64>;
}

/// Process-local counter (tests, single-node demos).
#[derive(Debug, Default)]
pub struct InMemoryCounter {
    current: AtomicU64,
}

impl InMemoryCounter {
    pub fn starting_at(current: u64) -> Self {
        Self {
            current: AtomicU64::new(current),
        }
    }
}

#[async_trait]
impl ReportIdAllocator for InMemoryCounter {
    async fn next_number(&self) -> Result<u64> {
        Ok(self.current.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

/// Counter persisted to a small JSON file; increments are serialized in-process.
#[derive(Debug)]
pub struct FileCounter {
    path: PathBuf,
    lock: Mutex<()>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CounterFile {
    report_counter: u64,
}

impl FileCounter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ReportIdAllocator for FileCounter {
    async fn next_number(&self) -> Result<u64> {
        let _g = self.lock.lock().await;
        let current = match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => serde_json::from_str::<CounterFile>(&s)
                .with_context(|| format!("parsing counter at {}", self.path.display()))?
                .report_counter,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => {
                return Err(e).with_context(|| format!("reading counter at {}", self.path.display()))
            }
        };
        let next = current + 1;
        write_atomic(&self.path, &CounterFile { report_counter: next }).await?;
        Ok(next)
    }
}

async fn write_atomic(path: &Path, value: &CounterFile) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, serde_json::to_vec(value)?).await?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("replacing counter at {}", path.display()))?;
    Ok(())
}
