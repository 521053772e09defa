// tests/pipeline_scenarios.rs
//
// End-to-end submission scenarios against in-memory collaborators:
// - staff abuse with unset person type halts, then escalates once clarified
// - low-risk report with the classifier down is delivered as pending
// - anonymous extreme bullying without the accused's name is blocked before any network call
// - an escalating anonymous report asks for a choice, and the override lets it through
// - a lost escalation copy does not turn a delivered primary report into an error

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use report_triage::backlog::{BacklogStorage, MemoryBacklog, QueuedSubmission};
use report_triage::classify::{ClassifierResult, DisabledClassifier, DynClassifier, RiskClassifier, RiskLevel};
use report_triage::decision::{Category, FieldId, Intensity, PersonType, RouteTarget};
use report_triage::identity::InMemoryCounter;
use report_triage::live::LiveAnalyzer;
use report_triage::queue::{DeliveryOutcome, SubmissionQueue};
use report_triage::report::{ReportForm, ReportStatus};
use report_triage::store::{Destination, MemoryStore, ReportStore};
use report_triage::pipeline::NOTICE_ESCALATION_FAILED;
use report_triage::{SubmitError, TriagePipeline};
use serde_json::json;

/// Counts calls; answers with a fixed result (or nothing).
struct CountingClassifier {
    calls: AtomicUsize,
    answer: Option<ClassifierResult>,
}

impl RiskClassifier for CountingClassifier {
    fn classify<'a>(
        &'a self,
        _text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<ClassifierResult>> + Send + 'a>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let out = self.answer.clone();
        Box::pin(async move { out })
    }
    fn strategy_name(&self) -> &'static str {
        "counting"
    }
}

fn pipeline_with(classifier: DynClassifier, store: Arc<MemoryStore>) -> TriagePipeline {
    let live = Arc::new(LiveAnalyzer::new(classifier.clone(), Duration::from_millis(1_500), 20));
    let queue = Arc::new(SubmissionQueue::new(
        store,
        Arc::new(MemoryBacklog::default()),
        Duration::from_secs(2),
    ));
    TriagePipeline::new(
        classifier,
        live,
        queue,
        Arc::new(InMemoryCounter::starting_at(0)),
        Some("Main Campus".to_string()),
    )
}

fn form(category: Category, intensity: Intensity, description: &str) -> ReportForm {
    ReportForm {
        category: Some(category),
        intensity: Some(intensity),
        description: description.to_string(),
        ..ReportForm::default()
    }
}

#[tokio::test]
async fn staff_report_needs_clarification_then_escalates_identified() {
    let store = Arc::new(MemoryStore::new());
    let p = pipeline_with(Arc::new(DisabledClassifier), store.clone());

    let mut f = form(Category::Abuse, Intensity::Medium, "my tr harassed me today");
    f.location = Some("Room 4".into());
    f.is_anonymous = true;

    let err = p.submit(f.clone()).await.expect_err("must halt");
    match &err {
        SubmitError::NeedsClarification(fe) => assert_eq!(fe.field, "personType"),
        other => panic!("expected clarification, got {other:?}"),
    }
    assert!(store.is_empty(), "nothing may be written before clarification");

    f.person_type = Some(PersonType::Teacher);
    let err = p.submit(f.clone()).await.expect_err("name and class required");
    let fields: Vec<String> = err.field_errors().into_iter().map(|e| e.field).collect();
    assert_eq!(fields, vec!["name".to_string(), "classroom".to_string()]);

    f.name = Some("Asha".into());
    f.classroom = Some("7B".into());
    let receipt = p.submit(f).await.expect("escalated submission");
    assert!(receipt.must_escalate);
    assert_eq!(receipt.route_target, RouteTarget::HigherAuthority);
    assert_eq!(receipt.status, ReportStatus::Escalated);
    assert!(receipt.standard.is_none(), "staff reports skip the general queue");
    assert_eq!(receipt.report_id, "no1");

    assert!(store.written(Destination::Reports).is_empty());
    let esc = store.written(Destination::HigherAuthorityReports);
    assert_eq!(esc.len(), 1);
    let rec = &esc[0];
    assert_eq!(rec["isAnonymous"], json!(false));
    assert_eq!(rec["name"], json!("Asha"));
    assert_eq!(rec["school"], json!("Main Campus"));
    assert_eq!(rec["original_location"], json!("Room 4"));
    assert_eq!(rec["escalationMeta"]["escalated_by"], json!("teacher_keyword"));
    assert_eq!(rec["override"]["patternId"], json!("teacher_involved"));
}

#[tokio::test]
async fn student_declaration_keeps_dispute_on_standard_route() {
    let store = Arc::new(MemoryStore::new());
    let p = pipeline_with(Arc::new(DisabledClassifier), store.clone());

    let mut f = form(Category::Other, Intensity::Low, "my tr harassed me today");
    f.person_type = Some(PersonType::Student);
    let receipt = p.submit(f).await.expect("student dispute goes through");
    assert!(!receipt.must_escalate);
    assert_eq!(receipt.route_target, RouteTarget::Standard);
    assert!(store.written(Destination::HigherAuthorityReports).is_empty());
}

#[tokio::test]
async fn low_risk_with_classifier_down_is_pending() {
    let store = Arc::new(MemoryStore::new());
    let p = pipeline_with(Arc::new(DisabledClassifier), store.clone());

    let receipt = p
        .submit(form(Category::Other, Intensity::Low, "I feel scared"))
        .await
        .expect("delivered");
    assert!(!receipt.must_escalate);
    assert_eq!(receipt.status, ReportStatus::Pending);
    assert_eq!(receipt.route_target, RouteTarget::Standard);
    assert_eq!(receipt.risk_level, "manual_review");
    assert_eq!(
        receipt.notices,
        vec!["Report submitted successfully! Your report ID is: no1".to_string()]
    );

    let rows = store.written(Destination::Reports);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["status"], json!("pending"));
    assert_eq!(rows[0]["aiAnalysis"]["status"], json!("failed"));
    assert!(store.written(Destination::HigherAuthorityReports).is_empty());
}

#[tokio::test]
async fn anonymous_extreme_bullying_without_accused_blocks_before_network() {
    let classifier = Arc::new(CountingClassifier {
        calls: AtomicUsize::new(0),
        answer: None,
    });
    let store = Arc::new(MemoryStore::new());
    let p = pipeline_with(classifier.clone(), store.clone());

    let mut f = form(Category::Bullying, Intensity::Extreme, "they push me around every day");
    f.is_anonymous = true;

    let err = p.submit(f).await.expect_err("blocked");
    assert!(matches!(err, SubmitError::MissingFields(_)), "{err:?}");
    let fields = err.field_errors();
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0].field, "bullyName");

    assert_eq!(classifier.calls.load(Ordering::SeqCst), 0, "no classifier call");
    assert!(store.is_empty(), "no store write");
}

#[tokio::test]
async fn anonymous_escalation_requires_choice_then_honours_override() {
    let store = Arc::new(MemoryStore::new());
    let p = pipeline_with(Arc::new(DisabledClassifier), store.clone());

    let mut f = form(Category::Safety, Intensity::Extreme, "someone said they will bring a weapon");
    f.is_anonymous = true;

    match p.submit(f.clone()).await {
        Err(SubmitError::AnonymityChoiceRequired { fields }) => {
            assert_eq!(fields, vec![FieldId::Name, FieldId::Classroom]);
        }
        other => panic!("expected anonymity choice, got {other:?}"),
    }

    f.anonymous_escalation_override = true;
    let receipt = p.submit(f).await.expect("override accepted");
    assert!(receipt.must_escalate);
    assert_eq!(receipt.notices.len(), 2);
    assert_eq!(
        receipt.notices[1],
        "Report automatically escalated to Higher Authority for immediate review."
    );

    let primary = store.written(Destination::Reports);
    let esc = store.written(Destination::HigherAuthorityReports);
    assert_eq!(primary.len(), 1);
    assert_eq!(esc.len(), 1);
    assert_eq!(esc[0]["anonymousEscalationOverride"], json!(true));
    assert!(esc[0]["name"].is_null());
    assert_eq!(esc[0]["escalationMeta"]["escalated_by"], json!("user"));
    assert!(esc[0]["escalationMeta"]["original_report_key"].is_string());
}

#[tokio::test]
async fn classifier_l3_escalates_and_is_attributed_to_ai() {
    let classifier = Arc::new(CountingClassifier {
        calls: AtomicUsize::new(0),
        answer: Some(ClassifierResult {
            category: "self_harm".into(),
            sentiment: None,
            risk_level: RiskLevel::L3,
            risk_score: 0.93,
            route_to: "counselor_immediate".into(),
            human_review_required: true,
            details: json!({}),
        }),
    });
    let store = Arc::new(MemoryStore::new());
    let p = pipeline_with(classifier.clone(), store.clone());

    let mut f = form(Category::Other, Intensity::Medium, "i don't want to be here anymore");
    f.name = Some("Ravi".into());
    f.classroom = Some("9A".into());
    let receipt = p.submit(f).await.expect("escalated");

    assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
    assert!(receipt.must_escalate);
    assert_eq!(receipt.risk_level, "L3");
    let esc = store.written(Destination::HigherAuthorityReports);
    assert_eq!(esc[0]["escalationMeta"]["escalated_by"], json!("ai"));
    assert_eq!(esc[0]["escalationMeta"]["escalated_reason"], json!("counselor_immediate"));
}

#[tokio::test]
async fn short_description_is_a_validation_error() {
    let p = pipeline_with(Arc::new(DisabledClassifier), Arc::new(MemoryStore::new()));
    let err = p
        .submit(ReportForm {
            description: "help".into(),
            ..ReportForm::default()
        })
        .await
        .expect_err("invalid");
    assert_eq!(err.kind(), "validation");
    let fields: Vec<String> = err.field_errors().into_iter().map(|e| e.field).collect();
    assert_eq!(fields, vec!["category", "intensity", "description"]);
}

/// Accepts general reports; the escalation channel is unreachable.
struct EscalationDown {
    inner: MemoryStore,
}

#[async_trait]
impl ReportStore for EscalationDown {
    async fn push(&self, dest: Destination, payload: &serde_json::Value) -> Result<String> {
        match dest {
            Destination::HigherAuthorityReports => Err(anyhow!("escalation channel unreachable")),
            Destination::Reports => self.inner.push(dest, payload).await,
        }
    }
}

/// Local disk is full: nothing can be queued.
struct UnwritableBacklog;

#[async_trait]
impl BacklogStorage for UnwritableBacklog {
    async fn load(&self) -> Result<Vec<QueuedSubmission>> {
        Ok(Vec::new())
    }

    async fn save(&self, _items: &[QueuedSubmission]) -> Result<()> {
        Err(anyhow!("no space left on device"))
    }
}

fn pipeline_over(store: Arc<dyn ReportStore>) -> TriagePipeline {
    let classifier: DynClassifier = Arc::new(DisabledClassifier);
    let live = Arc::new(LiveAnalyzer::new(classifier.clone(), Duration::from_millis(1_500), 20));
    let queue = Arc::new(SubmissionQueue::new(
        store,
        Arc::new(UnwritableBacklog),
        Duration::from_secs(2),
    ));
    TriagePipeline::new(
        classifier,
        live,
        queue,
        Arc::new(InMemoryCounter::starting_at(0)),
        None,
    )
}

#[tokio::test]
async fn lost_escalation_copy_keeps_delivered_primary() {
    let store = Arc::new(EscalationDown {
        inner: MemoryStore::new(),
    });
    let p = pipeline_over(store.clone());

    let receipt = p
        .submit(form(Category::Safety, Intensity::Extreme, "someone said they will bring a weapon"))
        .await
        .expect("primary report was delivered");

    assert!(receipt.must_escalate);
    assert!(receipt.standard.as_ref().is_some_and(DeliveryOutcome::is_delivered));
    assert!(matches!(receipt.escalation, Some(DeliveryOutcome::Failed { .. })));
    assert!(!receipt.deferred());
    assert!(receipt.failed());
    assert_eq!(
        receipt.notices,
        vec![
            "Report submitted successfully! Your report ID is: no1".to_string(),
            NOTICE_ESCALATION_FAILED.to_string(),
        ]
    );
    assert_eq!(store.inner.written(Destination::Reports).len(), 1);
}

#[tokio::test]
async fn nothing_kept_anywhere_is_an_internal_error() {
    let store = Arc::new(MemoryStore::new());
    store.set_offline(true);
    let p = pipeline_over(store);

    let err = p
        .submit(form(Category::Other, Intensity::Low, "I feel scared"))
        .await
        .expect_err("neither delivered nor saved");
    assert_eq!(err.kind(), "internal");
}

#[tokio::test]
async fn in_memory_store_receipts_are_not_durable() {
    let p = pipeline_with(Arc::new(DisabledClassifier), Arc::new(MemoryStore::new()));
    let receipt = p
        .submit(form(Category::Other, Intensity::Low, "I feel scared"))
        .await
        .expect("delivered");
    assert!(!receipt.durable);
}

#[tokio::test]
async fn identified_escalation_only_needs_the_accused_name() {
    let store = Arc::new(MemoryStore::new());
    let p = pipeline_with(Arc::new(DisabledClassifier), store.clone());

    let err = p
        .submit(form(Category::Bullying, Intensity::Extreme, "they push me around every day"))
        .await
        .expect_err("accused name required");
    let fields: Vec<String> = err.field_errors().into_iter().map(|e| e.field).collect();
    assert_eq!(fields, vec!["bullyName".to_string()]);

    let mut f = form(Category::Bullying, Intensity::Extreme, "they push me around every day");
    f.bully_name = Some("Kiran".into());
    let receipt = p.submit(f).await.expect("escalated without name or class");
    assert!(receipt.must_escalate);
    assert_eq!(store.written(Destination::HigherAuthorityReports).len(), 1);
}
