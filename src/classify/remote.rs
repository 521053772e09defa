//! Remote classification service client.
//!
//! `POST {base}/analyze` with `{ "text": ... }`. Any timeout, transport error,
//! non-2xx status or undecodable body maps to `None`.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use super::{ClassifierResult, RiskClassifier};
use crate::logging::anon_hash;

pub struct RemoteClassifier {
    http: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl RemoteClassifier {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("report-triage/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/analyze", base_url.trim_end_matches('/')),
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn fetch(&self, text: &str) -> Option<ClassifierResult> {
        #[derive(Serialize)]
        struct Req<'a> {
            text: &'a str,
        }

        let id = anon_hash(text);
        let resp = self
            .http
            .post(&self.endpoint)
            .json(&Req { text })
            .send()
            .await;
        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                warn!(target: "classify", %id, error = %e, "classifier request failed");
                return None;
            }
        };
        if !resp.status().is_success() {
            warn!(target: "classify", %id, status = %resp.status(), "classifier returned non-2xx");
            return None;
        }
        match resp.json::<ClassifierResult>().await {
            Ok(r) => {
                let r = r.normalized();
                debug!(target: "classify", %id, level = r.risk_level.as_str(), "classified");
                Some(r)
            }
            Err(e) => {
                warn!(target: "classify", %id, error = %e, "classifier body did not decode");
                None
            }
        }
    }
}

impl RiskClassifier for RemoteClassifier {
    fn classify<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<ClassifierResult>> + Send + 'a>> {
        Box::pin(async move {
            // Hard ceiling on top of reqwest's own timeout; expiry drops (aborts) the request.
            match tokio::time::timeout(self.timeout, self.fetch(text)).await {
                Ok(out) => out,
                Err(_) => {
                    warn!(
                        target: "classify",
                        timeout_ms = self.timeout.as_millis() as u64,
                        "classifier timed out"
                    );
                    None
                }
            }
        })
    }

    fn strategy_name(&self) -> &'static str {
        "remote"
    }
}
