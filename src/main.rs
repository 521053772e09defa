//! Report triage service: binary entrypoint.
//! Boots the Axum HTTP server, wiring config, pipeline, connectivity and metrics.

use anyhow::Context;
use tracing::{info, warn};

use report_triage::api::{self, AppState};
use report_triage::config::TriageConfig;
use report_triage::connectivity::{spawn_probe, Connectivity, ConnectivityNotifier};
use report_triage::logging::init_tracing;
use report_triage::metrics::Metrics;
use report_triage::queue::{spawn_backlog_sweeper, spawn_retry_on_reconnect};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = TriageConfig::load()?;
    let notifier = ConnectivityNotifier::new(Connectivity::Online);
    let pipeline = report_triage::build_pipeline(&cfg, notifier.clone())?;

    let metrics = match Metrics::init() {
        Ok(m) => Some(m),
        Err(e) => {
            warn!(error = ?e, "metrics disabled");
            None
        }
    };

    // Anything left over from a previous run gets one sweep at startup.
    match pipeline.queue().pending_count().await {
        Ok(0) => {}
        Ok(n) => {
            info!(pending = n, "backlog found at startup; retrying");
            if let Err(e) = pipeline.queue().retry_pending().await {
                warn!(error = ?e, "startup retry failed");
            }
        }
        Err(e) => warn!(error = ?e, "backlog unreadable at startup"),
    }

    spawn_retry_on_reconnect(pipeline.queue().clone(), notifier.subscribe());
    spawn_backlog_sweeper(pipeline.queue().clone(), cfg.connectivity.interval());
    if let Some(url) = cfg.connectivity.probe_url.clone() {
        spawn_probe(notifier.clone(), url, cfg.connectivity.interval())?;
    }

    let app = api::router(AppState::new(pipeline), metrics.as_ref());

    let listener = tokio::net::TcpListener::bind(&cfg.server.bind)
        .await
        .with_context(|| format!("binding {}", cfg.server.bind))?;
    info!(bind = %cfg.server.bind, "report triage service listening");
    axum::serve(listener, app).await?;
    Ok(())
}
