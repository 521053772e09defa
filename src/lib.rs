// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod backlog;
pub mod classify;
pub mod config;
pub mod connectivity;
pub mod decision;
pub mod detect;
pub mod engine;
pub mod error;
pub mod identity;
pub mod live;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod report;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::error::SubmitError;
pub use crate::pipeline::{SubmissionReceipt, TriagePipeline};

use std::sync::Arc;

use tracing::warn;

use crate::backlog::FileBacklog;
use crate::config::{StoreMode, TriageConfig};
use crate::connectivity::ConnectivityNotifier;
use crate::identity::FileCounter;
use crate::live::LiveAnalyzer;
use crate::queue::SubmissionQueue;
use crate::store::{HttpReportStore, MemoryStore, ReportStore};

/// Wire the pipeline from config: classifier, live analyzer, store, backlog, counter.
///
/// Store write outcomes are published to `connectivity`. Fails when no report
/// store is configured and in-memory storage was not chosen explicitly.
pub fn build_pipeline(
    cfg: &TriageConfig,
    connectivity: ConnectivityNotifier,
) -> anyhow::Result<Arc<TriagePipeline>> {
    let classifier = classify::build_classifier(&cfg.classifier)?;
    let live = Arc::new(LiveAnalyzer::new(
        classifier.clone(),
        cfg.classifier.debounce(),
        cfg.classifier.min_live_chars,
    ));

    let store: Arc<dyn ReportStore> = match (cfg.store.mode, &cfg.store.base_url) {
        (StoreMode::Http, Some(url)) => Arc::new(
            HttpReportStore::new(url, cfg.store.timeout())?.with_auth(cfg.store.auth_token.clone()),
        ),
        (StoreMode::Http, None) => anyhow::bail!(
            "no report store configured: set store.base_url or {}, or choose store.mode = \"memory\"",
            config::ENV_REPORT_STORE_URL
        ),
        (StoreMode::Memory, _) => {
            warn!(target: "pipeline", "report store is in memory; reports are lost on restart");
            Arc::new(MemoryStore::new())
        }
    };
    let backlog = Arc::new(FileBacklog::in_dir(&cfg.backlog.path));
    let queue = Arc::new(
        SubmissionQueue::new(store, backlog, cfg.store.timeout()).with_connectivity(connectivity),
    );
    let allocator = Arc::new(FileCounter::new(&cfg.counter.path));

    Ok(Arc::new(TriagePipeline::new(
        classifier,
        live,
        queue,
        allocator,
        cfg.school.canonical_name.clone(),
    )))
}
