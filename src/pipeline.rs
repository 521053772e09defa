//! Submission orchestration.
//!
//! validate → detect → decide on cached signals → classify → decide → check
//! → allocate id → build record → deliver (standard, then escalation copy).
//! Preconditions are checked before any network call; the classifier may
//! only add requirements, so the second check catches anything it raises.

use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use metrics::counter;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::classify::{ClassifierResult, DynClassifier, RiskLevel};
use crate::decision::RouteTarget;
use crate::detect::{detect, PatternVerdict};
use crate::engine::{check_preconditions, decide};
use crate::error::SubmitError;
use crate::identity::ReportIdAllocator;
use crate::live::LiveAnalyzer;
use crate::logging::anon_hash;
use crate::queue::{DeliveryOutcome, RetrySummary, SubmissionQueue};
use crate::report::{EscalationMeta, RecordInputs, ReportForm, ReportRecord, ReportStatus};
use crate::store::Destination;

pub const NOTICE_SAVED_LOCALLY: &str =
    "Report saved locally and will be retried automatically when connection is restored.";
pub const NOTICE_ESCALATED: &str =
    "Report automatically escalated to Higher Authority for immediate review.";
pub const NOTICE_ESCALATION_FAILED: &str =
    "Your report was saved, but the escalation copy could not be sent. Please speak to a trusted staff member directly.";

fn submitted_notice(report_id: &str) -> String {
    format!("Report submitted successfully! Your report ID is: {report_id}")
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    pub report_id: String,
    pub status: ReportStatus,
    pub route_target: RouteTarget,
    pub must_escalate: bool,
    /// `None` when the standard channel is skipped (staff-involved reports).
    pub standard: Option<DeliveryOutcome>,
    pub escalation: Option<DeliveryOutcome>,
    pub notices: Vec<String>,
    pub risk_level: String,
    pub guidance: String,
    /// False when the configured store keeps reports in process memory only.
    pub durable: bool,
}

impl SubmissionReceipt {
    fn outcomes(&self) -> impl Iterator<Item = &DeliveryOutcome> {
        [&self.standard, &self.escalation].into_iter().flatten()
    }

    pub fn deferred(&self) -> bool {
        self.outcomes().any(DeliveryOutcome::is_deferred)
    }

    pub fn failed(&self) -> bool {
        self.outcomes().any(DeliveryOutcome::is_failed)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryReceipt {
    #[serde(flatten)]
    pub summary: RetrySummary,
    pub notice: Option<String>,
}

pub struct TriagePipeline {
    classifier: DynClassifier,
    live: Arc<LiveAnalyzer>,
    queue: Arc<SubmissionQueue>,
    allocator: Arc<dyn ReportIdAllocator>,
    canonical_school: Option<String>,
}

impl TriagePipeline {
    pub fn new(
        classifier: DynClassifier,
        live: Arc<LiveAnalyzer>,
        queue: Arc<SubmissionQueue>,
        allocator: Arc<dyn ReportIdAllocator>,
        canonical_school: Option<String>,
    ) -> Self {
        Self {
            classifier,
            live,
            queue,
            allocator,
            canonical_school,
        }
    }

    pub fn live(&self) -> &Arc<LiveAnalyzer> {
        &self.live
    }

    pub fn queue(&self) -> &Arc<SubmissionQueue> {
        &self.queue
    }

    pub fn detect(&self, text: &str) -> PatternVerdict {
        detect(text)
    }

    pub async fn submit(&self, form: ReportForm) -> Result<SubmissionReceipt, SubmitError> {
        let (category, intensity) = form.validate().map_err(SubmitError::Validation)?;
        let ctx = form.person_context(category, intensity);
        let text = form.description.trim();
        let text_id = anon_hash(text);
        let pattern = detect(text);

        // Cached live result only: no network before the precondition check.
        let cached = self.live.cached_for(text);
        let early = decide(&pattern, cached.as_ref(), &ctx);
        check_preconditions(&early).map_err(blocked)?;

        let classification = match cached {
            Some(c) => Some(c),
            None => self.classify(text).await,
        };

        let verdict = decide(&pattern, classification.as_ref(), &ctx);
        check_preconditions(&verdict).map_err(blocked)?;

        let number = self.allocator.next_number().await?;
        let now = Utc::now();
        let record = ReportRecord::assemble(RecordInputs {
            number,
            form: &form,
            context: &ctx,
            pattern: &pattern,
            verdict: &verdict,
            classification: classification.as_ref(),
            canonical_school: self.canonical_school.as_deref(),
            now,
        });

        let standard = if verdict.staff_involved {
            None
        } else {
            Some(self.deliver(Destination::Reports, record.to_payload()?).await)
        };

        // Independent second delivery; its outcome never rewrites the first.
        let escalation = if verdict.must_escalate {
            let meta = EscalationMeta {
                escalated_by: verdict
                    .override_source
                    .map(|s| s.escalated_by())
                    .unwrap_or("keyword_fallback")
                    .to_string(),
                escalated_reason: verdict.escalation_reason.clone().unwrap_or_default(),
                original_report_key: standard
                    .as_ref()
                    .and_then(|o| o.key())
                    .map(str::to_string),
                timestamp: now,
                override_meta: record.override_meta.clone(),
            };
            Some(
                self.deliver(
                    Destination::HigherAuthorityReports,
                    record.escalation_payload(&meta)?,
                )
                .await,
            )
        } else {
            None
        };

        // Only an error when nothing was kept anywhere.
        if [&standard, &escalation]
            .into_iter()
            .flatten()
            .all(DeliveryOutcome::is_failed)
        {
            return Err(SubmitError::Internal(anyhow!(
                "report {} could not be delivered or saved locally",
                record.report_id
            )));
        }

        let route = match verdict.route_target {
            RouteTarget::Standard => "standard",
            RouteTarget::HigherAuthority => "higher_authority",
        };
        counter!("triage_reports_submitted_total", "route" => route).increment(1);

        let level = reporter_level(classification.as_ref(), verdict.must_escalate);
        let mut receipt = SubmissionReceipt {
            report_id: record.report_id.clone(),
            status: record.status,
            route_target: verdict.route_target,
            must_escalate: verdict.must_escalate,
            standard,
            escalation,
            notices: Vec::new(),
            risk_level: record.risk_level.clone(),
            guidance: level.guidance().to_string(),
            durable: self.queue.store_is_durable(),
        };
        receipt.notices.push(if receipt.deferred() {
            NOTICE_SAVED_LOCALLY.to_string()
        } else {
            submitted_notice(&receipt.report_id)
        });
        if receipt.escalation.as_ref().is_some_and(DeliveryOutcome::is_failed) {
            receipt.notices.push(NOTICE_ESCALATION_FAILED.to_string());
        } else if verdict.must_escalate {
            receipt.notices.push(NOTICE_ESCALATED.to_string());
        }

        info!(
            target: "pipeline",
            report_id = %receipt.report_id,
            text = %text_id,
            route,
            deferred = receipt.deferred(),
            failed = receipt.failed(),
            override_source = ?verdict.override_source,
            "report accepted"
        );
        Ok(receipt)
    }

    /// One channel's write. A backlog failure is recorded on that channel's
    /// outcome so it cannot rewrite the other channel's result.
    async fn deliver(&self, dest: Destination, payload: serde_json::Value) -> DeliveryOutcome {
        match self.queue.submit(dest, payload).await {
            Ok(outcome) => outcome,
            Err(e) => {
                counter!("triage_delivery_failures_total", "path" => dest.as_path()).increment(1);
                error!(target: "pipeline", path = dest.as_path(), error = %e, "write failed and could not be saved locally");
                DeliveryOutcome::Failed {
                    reason: "local backlog unavailable".to_string(),
                }
            }
        }
    }

    async fn classify(&self, text: &str) -> Option<ClassifierResult> {
        let out = self.classifier.classify(text).await;
        if out.is_none() {
            counter!("triage_classifier_unavailable_total").increment(1);
            warn!(
                target: "pipeline",
                strategy = self.classifier.strategy_name(),
                "classifier unavailable; continuing on keyword and intensity signals"
            );
        }
        out
    }

    pub async fn retry_pending(&self) -> Result<RetryReceipt, SubmitError> {
        let summary = self.queue.retry_pending().await?;
        let notice = if summary.skipped {
            None
        } else if summary.delivered > 0 && summary.still_pending == 0 {
            Some(format!(
                "{} saved report(s) submitted successfully.",
                summary.delivered
            ))
        } else if summary.still_pending > 0 {
            Some(NOTICE_SAVED_LOCALLY.to_string())
        } else {
            None
        };
        Ok(RetryReceipt { summary, notice })
    }

    pub async fn pending_count(&self) -> Result<usize, SubmitError> {
        Ok(self.queue.pending_count().await?)
    }
}

fn blocked(e: SubmitError) -> SubmitError {
    counter!("triage_precondition_blocks_total", "kind" => e.kind()).increment(1);
    info!(target: "pipeline", kind = e.kind(), "submission blocked on precondition");
    e
}

/// Level used for reporter guidance when the classifier could not be reached.
fn reporter_level(classification: Option<&ClassifierResult>, must_escalate: bool) -> RiskLevel {
    match classification {
        Some(c) => c.risk_level,
        None if must_escalate => RiskLevel::L3,
        None => RiskLevel::L1,
    }
}
