//! Report form input and the immutable payload delivered to the report store.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::classify::ClassifierResult;
use crate::decision::{Category, EscalationVerdict, Intensity, PersonContext, PersonType, RouteTarget};
use crate::detect::PatternVerdict;
use crate::error::FieldError;
use crate::identity::format_report_id;

pub const MIN_DESCRIPTION_CHARS: usize = 10;
const SNIPPET_CHARS: usize = 80;
const SNIPPET_SENTENCE_FROM: usize = 60;

/// Raw form as submitted by the hosting page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportForm {
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub intensity: Option<Intensity>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub age: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
    #[serde(default)]
    pub classroom: Option<String>,
    #[serde(default)]
    pub bully_name: Option<String>,
    #[serde(default)]
    pub is_anonymous: bool,
    /// Set when the reporter reaffirms anonymity for an escalating report.
    #[serde(default)]
    pub anonymous_escalation_override: bool,
    #[serde(default)]
    pub person_type: Option<PersonType>,
}

impl ReportForm {
    /// Schema checks that run before anything else.
    pub fn validate(&self) -> Result<(Category, Intensity), Vec<FieldError>> {
        let mut errs = Vec::new();
        if self.category.is_none() {
            errs.push(FieldError::new("category", "Please select a category"));
        }
        if self.intensity.is_none() {
            errs.push(FieldError::new("intensity", "Please select an intensity level"));
        }
        if self.description.trim().chars().count() < MIN_DESCRIPTION_CHARS {
            errs.push(FieldError::new(
                "description",
                format!("Description must be at least {MIN_DESCRIPTION_CHARS} characters"),
            ));
        }
        match (self.category, self.intensity) {
            (Some(c), Some(i)) if errs.is_empty() => Ok((c, i)),
            _ => Err(errs),
        }
    }

    pub fn person_context(&self, category: Category, intensity: Intensity) -> PersonContext {
        PersonContext {
            category,
            intensity,
            person_type: self.person_type,
            is_anonymous: self.is_anonymous,
            anonymous_override: self.anonymous_escalation_override,
            name: trimmed(&self.name),
            classroom: trimmed(&self.classroom),
            bully_name: trimmed(&self.bully_name),
            contact: trimmed(&self.contact),
        }
    }
}

fn trimmed(v: &Option<String>) -> Option<String> {
    v.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Pending,
    Escalated,
}

/// Classifier result, or an explicit marker that it was unreachable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClassifierOutcome {
    Classified(ClassifierResult),
    Failed { status: String, note: String },
}

impl ClassifierOutcome {
    pub fn unreachable() -> Self {
        ClassifierOutcome::Failed {
            status: "failed".to_string(),
            note: "classifier unreachable".to_string(),
        }
    }
}

/// Detector audit trail attached to the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideMeta {
    #[serde(rename = "type")]
    pub kind: String,
    pub pattern_id: String,
    pub reason: String,
    pub snippet: String,
}

/// Extra block carried only by the escalation-channel copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationMeta {
    pub escalated_by: String,
    pub escalated_reason: String,
    /// Key of the standard write, or `None` when it was skipped or deferred.
    pub original_report_key: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "override")]
    pub override_meta: Option<OverrideMeta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRecord {
    pub report_id: String,
    pub report_number: u64,
    pub category: Category,
    pub intensity: Intensity,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<String>,
    pub person_type: Option<PersonType>,
    pub is_anonymous: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub anonymous_escalation_override: bool,
    pub name: Option<String>,
    pub contact: Option<String>,
    pub classroom: Option<String>,
    pub bully_name: Option<String>,
    /// What the reporter typed; kept for audit even when `school` is overridden.
    #[serde(rename = "original_location")]
    pub original_location: Option<String>,
    pub school: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub status: ReportStatus,
    pub route_target: RouteTarget,
    pub ai_analysis: ClassifierOutcome,
    pub risk_level: String,
    pub ai_score: f32,
    #[serde(rename = "override", default, skip_serializing_if = "Option::is_none")]
    pub override_meta: Option<OverrideMeta>,
}

/// Everything needed to assemble a record.
pub struct RecordInputs<'a> {
    pub number: u64,
    pub form: &'a ReportForm,
    pub context: &'a PersonContext,
    pub pattern: &'a PatternVerdict,
    pub verdict: &'a EscalationVerdict,
    pub classification: Option<&'a ClassifierResult>,
    /// Canonical location used for escalated staff reports.
    pub canonical_school: Option<&'a str>,
    pub now: DateTime<Utc>,
}

impl ReportRecord {
    pub fn assemble(inp: RecordInputs<'_>) -> Self {
        let ctx = inp.context;
        let verdict = inp.verdict;
        let location = trimmed(&inp.form.location);

        let school = if verdict.staff_involved && verdict.must_escalate {
            inp.canonical_school
                .map(str::to_string)
                .or_else(|| location.clone())
        } else {
            location.clone()
        };

        // Anonymous reports leave the device without reporter identity.
        let (name, contact, classroom) = if verdict.anonymous {
            (None, None, None)
        } else {
            (ctx.name.clone(), ctx.contact.clone(), ctx.classroom.clone())
        };

        let (ai_analysis, risk_level, ai_score) = match inp.classification {
            Some(c) => (
                ClassifierOutcome::Classified(c.clone()),
                c.risk_level.as_str().to_string(),
                c.risk_score,
            ),
            None => (ClassifierOutcome::unreachable(), "manual_review".to_string(), 0.0),
        };

        let override_meta = inp
            .classification
            .and_then(classifier_override)
            .or_else(|| keyword_override(inp.pattern, verdict, &inp.form.description));

        ReportRecord {
            report_id: format_report_id(inp.number),
            report_number: inp.number,
            category: ctx.category,
            intensity: ctx.intensity,
            description: inp.form.description.trim().to_string(),
            age: trimmed(&inp.form.age),
            person_type: ctx.person_type,
            is_anonymous: verdict.anonymous,
            anonymous_escalation_override: verdict.anonymous_escalation_override,
            name,
            contact,
            classroom,
            bully_name: ctx.bully_name.clone(),
            original_location: location,
            school,
            timestamp: inp.now,
            status: if verdict.must_escalate {
                ReportStatus::Escalated
            } else {
                ReportStatus::Pending
            },
            route_target: verdict.route_target,
            ai_analysis,
            risk_level,
            ai_score,
            override_meta,
        }
    }

    pub fn to_payload(&self) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Record plus `escalationMeta`, for the higher-authority channel.
    pub fn escalation_payload(&self, meta: &EscalationMeta) -> anyhow::Result<serde_json::Value> {
        let mut v = self.to_payload()?;
        if let Some(obj) = v.as_object_mut() {
            obj.insert("escalationMeta".to_string(), serde_json::to_value(meta)?);
        }
        Ok(v)
    }
}

fn classifier_override(c: &ClassifierResult) -> Option<OverrideMeta> {
    let raw = c.details.get("override")?;
    serde_json::from_value(raw.clone()).ok()
}

fn keyword_override(
    pattern: &PatternVerdict,
    verdict: &EscalationVerdict,
    description: &str,
) -> Option<OverrideMeta> {
    if !pattern.matched {
        return None;
    }
    let pattern_id = verdict
        .pattern_id
        .or(pattern.pattern_id)
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "keyword".to_string());
    Some(OverrideMeta {
        kind: "keyword".to_string(),
        pattern_id,
        reason: pattern.reason.clone().unwrap_or_else(|| "keyword".to_string()),
        snippet: sanitized_snippet(description),
    })
}

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\w.+-]+@[\w-]+\.[\w.-]+").expect("email regex"));
static LONG_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{6,}\b").expect("digits regex"));
static WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Short reviewer-facing excerpt: emails and long digit runs redacted,
/// whitespace collapsed, at most 80 chars (cut at a sentence end past 60 if one exists).
pub fn sanitized_snippet(text: &str) -> String {
    let s = EMAIL.replace_all(text, "[redacted]");
    let s = LONG_DIGITS.replace_all(&s, "[redacted]");
    let s = WS.replace_all(&s, " ");
    let s = s.trim();

    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= SNIPPET_CHARS {
        return s.to_string();
    }
    if let Some(pos) = chars
        .iter()
        .skip(SNIPPET_SENTENCE_FROM)
        .position(|c| *c == '.')
        .map(|p| p + SNIPPET_SENTENCE_FROM)
    {
        if pos < SNIPPET_CHARS {
            return chars[..=pos].iter().collect();
        }
    }
    let head: String = chars[..SNIPPET_CHARS].iter().collect();
    format!("{}…", head.trim_end())
}
