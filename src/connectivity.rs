//! Connectivity notifier.
//!
//! State lives in a `watch` channel; subscribers see every transition. The probe
//! task is one possible source of transitions, the `/reports/retry` endpoint and
//! tests can drive it too.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Online,
    Offline,
}

#[derive(Debug, Clone)]
pub struct ConnectivityNotifier {
    tx: watch::Sender<Connectivity>,
}

impl ConnectivityNotifier {
    pub fn new(initial: Connectivity) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Publishes only real transitions.
    pub fn set(&self, state: Connectivity) {
        let changed = self.tx.send_if_modified(|cur| {
            if *cur == state {
                false
            } else {
                *cur = state;
                true
            }
        });
        if changed {
            info!(target: "connectivity", ?state, "connectivity changed");
        }
    }

    pub fn current(&self) -> Connectivity {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.tx.subscribe()
    }
}

/// Poll `url` every `interval`; any HTTP response counts as online.
pub fn spawn_probe(
    notifier: ConnectivityNotifier,
    url: String,
    interval: Duration,
) -> anyhow::Result<JoinHandle<()>> {
    let client = Client::builder()
        .timeout(interval.min(Duration::from_secs(5)))
        .build()?;
    Ok(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let state = match client.head(&url).send().await {
                Ok(_) => Connectivity::Online,
                Err(e) => {
                    debug!(target: "connectivity", error = %e, "probe failed");
                    Connectivity::Offline
                }
            };
            notifier.set(state);
        }
    }))
}
