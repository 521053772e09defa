//! Risk classifier client: provider abstraction + strategy factory.
//!
//! Two interchangeable strategies share one output shape:
//! - `remote`: POSTs `{text}` to `{url}/analyze` under a hard timeout,
//! - `demo`:   local curated examples + keyword families, no network.
//!
//! Absence of a result (`None`) is a normal outcome meaning "classifier
//! unavailable"; callers proceed on keyword and intensity signals alone.

pub mod demo;
pub mod remote;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::ClassifierSettings;

pub use demo::DemoClassifier;
pub use remote::RemoteClassifier;

/// Risk tiers, L0 (dismiss) .. L3 (critical).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    L0,
    L1,
    L2,
    L3,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::L0 => "L0",
            RiskLevel::L1 => "L1",
            RiskLevel::L2 => "L2",
            RiskLevel::L3 => "L3",
        }
    }

    /// Short reporter-facing guidance for a risk tier.
    pub fn guidance(&self) -> &'static str {
        match self {
            RiskLevel::L3 => "This looks serious. Please include the child's name, class, and school so we can escalate, or contact a trusted adult/helpline if there's immediate danger.",
            RiskLevel::L2 => "Consider contacting a trusted adult or school counselor and add more details to help our team follow up.",
            RiskLevel::L1 => "Our team will review this; you can submit now or add more details for clarity.",
            RiskLevel::L0 => "You can submit the report; our team will review and reach out if necessary.",
        }
    }
}

/// Structured risk assessment, identical for both strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierResult {
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<String>,
    pub risk_level: RiskLevel,
    /// Normalized to `[0, 1]`.
    pub risk_score: f32,
    pub route_to: String,
    #[serde(default = "default_true")]
    pub human_review_required: bool,
    #[serde(default)]
    pub details: serde_json::Value,
}

fn default_true() -> bool {
    true
}

impl ClassifierResult {
    /// The remote service reports scores on a 0..100 scale; fold them into `[0, 1]`.
    pub fn normalized(mut self) -> Self {
        if !self.risk_score.is_finite() {
            self.risk_score = 0.0;
        } else if self.risk_score > 1.0 {
            self.risk_score /= 100.0;
        }
        self.risk_score = self.risk_score.clamp(0.0, 1.0);
        self
    }
}

/// Classifier seam used by the live analyzer and the submission pipeline.
pub trait RiskClassifier: Send + Sync {
    /// Classify `text`; `None` means unavailable (timeout, non-2xx, network, disabled).
    fn classify<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<ClassifierResult>> + Send + 'a>>;
    /// Strategy name for logs and receipts.
    fn strategy_name(&self) -> &'static str;
}

pub type DynClassifier = Arc<dyn RiskClassifier>;

/// Selectable strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierMode {
    Remote,
    Demo,
    Disabled,
}

impl ClassifierMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "remote" => Some(Self::Remote),
            "demo" | "local" => Some(Self::Demo),
            "disabled" | "off" => Some(Self::Disabled),
            _ => None,
        }
    }
}

/// Always unavailable; used when classification is switched off.
pub struct DisabledClassifier;

impl RiskClassifier for DisabledClassifier {
    fn classify<'a>(
        &'a self,
        _text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<ClassifierResult>> + Send + 'a>> {
        Box::pin(async { None })
    }
    fn strategy_name(&self) -> &'static str {
        "disabled"
    }
}

/// Build the configured strategy.
pub fn build_classifier(settings: &ClassifierSettings) -> anyhow::Result<DynClassifier> {
    let client: DynClassifier = match settings.mode {
        ClassifierMode::Remote => Arc::new(RemoteClassifier::new(
            &settings.url,
            settings.timeout(),
        )?),
        ClassifierMode::Demo => Arc::new(DemoClassifier::new()),
        ClassifierMode::Disabled => Arc::new(DisabledClassifier),
    };
    tracing::info!(
        target: "classify",
        strategy = client.strategy_name(),
        timeout_ms = settings.timeout_ms,
        "risk classifier ready"
    );
    Ok(client)
}
