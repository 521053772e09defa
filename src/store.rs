//! Report store: append-only writes to a destination path.
//!
//! The production client speaks the REST dialect of a JSON realtime database:
//! `POST {base}/{path}.json` answers `{"name": "<generated key>"}`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    /// General review queue.
    Reports,
    /// Escalation channel.
    HigherAuthorityReports,
}

impl Destination {
    pub fn as_path(&self) -> &'static str {
        match self {
            Destination::Reports => "reports",
            Destination::HigherAuthorityReports => "higher_authority_reports",
        }
    }
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Append `payload` under `dest`; returns the store-generated key.
    async fn push(&self, dest: Destination, payload: &Value) -> Result<String>;

    /// Whether a delivered write outlives this process.
    fn is_durable(&self) -> bool {
        true
    }
}

#[derive(Clone)]
pub struct HttpReportStore {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpReportStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .context("building report store client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: None,
        })
    }

    /// Database auth token, sent as the `auth` query parameter.
    pub fn with_auth(mut self, token: Option<String>) -> Self {
        self.auth_token = token.filter(|t| !t.trim().is_empty());
        self
    }

    fn url(&self, dest: Destination) -> String {
        format!("{}/{}.json", self.base_url, dest.as_path())
    }
}

#[async_trait]
impl ReportStore for HttpReportStore {
    async fn push(&self, dest: Destination, payload: &Value) -> Result<String> {
        #[derive(Deserialize)]
        struct PushResp {
            name: String,
        }

        let mut req = self.client.post(self.url(dest)).json(payload);
        if let Some(token) = &self.auth_token {
            req = req.query(&[("auth", token)]);
        }
        let rsp = req
            .send()
            .await
            .with_context(|| format!("report store request to {} failed", dest.as_path()))?;
        let rsp = rsp
            .error_for_status()
            .map_err(|e| anyhow!("report store rejected write to {}: {e}", dest.as_path()))?;
        let body: PushResp = rsp.json().await.context("decoding report store response")?;
        Ok(body.name)
    }
}

/// In-process store. `fail_next(n)` makes the next `n` writes fail.
#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<Vec<(Destination, String, Value)>>,
    failures_left: AtomicUsize,
    offline: std::sync::atomic::AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// While offline every write fails.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn written(&self, dest: Destination) -> Vec<Value> {
        self.items
            .lock()
            .expect("store mutex poisoned")
            .iter()
            .filter(|(d, _, _)| *d == dest)
            .map(|(_, _, v)| v.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().expect("store mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn push(&self, dest: Destination, payload: &Value) -> Result<String> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(anyhow!("network unavailable"));
        }
        let consumed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            return Err(anyhow!("write rejected"));
        }
        let mut items = self.items.lock().expect("store mutex poisoned");
        let key = format!("-k{:06}", items.len() + 1);
        items.push((dest, key.clone(), payload.clone()));
        Ok(key)
    }

    fn is_durable(&self) -> bool {
        false
    }
}
