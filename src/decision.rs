//! Shapes consumed and produced by the escalation engine.
//!
//! `PersonContext` is what the reporter declared; `EscalationVerdict` is what
//! must happen before the report may leave the device. The verdict is derived
//! on demand and never stored.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::detect::PatternId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Bullying,
    Abuse,
    Academic,
    Family,
    Safety,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intensity {
    Low,
    Medium,
    High,
    Extreme,
}

/// Who the accused party is, as declared by the reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonType {
    Student,
    Teacher,
    Staff,
}

/// Reporter-declared context. `person_type == None` means unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonContext {
    pub category: Category,
    pub intensity: Intensity,
    #[serde(default)]
    pub person_type: Option<PersonType>,
    #[serde(default)]
    pub is_anonymous: bool,
    /// Reporter reaffirmed anonymous submission after being told the report escalates.
    #[serde(default)]
    pub anonymous_override: bool,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub classroom: Option<String>,
    #[serde(default)]
    pub bully_name: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
}

impl PersonContext {
    pub fn new(category: Category, intensity: Intensity) -> Self {
        Self {
            category,
            intensity,
            person_type: None,
            is_anonymous: false,
            anonymous_override: false,
            name: None,
            classroom: None,
            bully_name: None,
            contact: None,
        }
    }

    pub fn has_name(&self) -> bool {
        filled(&self.name)
    }

    pub fn has_classroom(&self) -> bool {
        filled(&self.classroom)
    }

    pub fn has_bully_name(&self) -> bool {
        filled(&self.bully_name)
    }

    /// Anonymity as requested, except that a typed name turns it off.
    pub fn requested_anonymity(&self) -> bool {
        self.is_anonymous && !self.has_name()
    }
}

fn filled(v: &Option<String>) -> bool {
    v.as_deref().is_some_and(|s| !s.trim().is_empty())
}

/// Form fields the engine can demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldId {
    PersonType,
    Name,
    Classroom,
    BullyName,
}

impl FieldId {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldId::PersonType => "personType",
            FieldId::Name => "name",
            FieldId::Classroom => "classroom",
            FieldId::BullyName => "bullyName",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteTarget {
    Standard,
    HigherAuthority,
}

/// Which signal caused escalation. Audit only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideSource {
    /// Staff-involvement keyword match.
    StaffKeyword,
    /// Reporter selected extreme intensity.
    User,
    /// Classifier returned L3.
    Ai,
    /// Generic keyword family match.
    Keyword,
}

impl OverrideSource {
    /// Label written into escalation metadata.
    pub fn escalated_by(&self) -> &'static str {
        match self {
            OverrideSource::StaffKeyword => "teacher_keyword",
            OverrideSource::User => "user",
            OverrideSource::Ai => "ai",
            OverrideSource::Keyword => "keyword_fallback",
        }
    }
}

/// Where the submission flow stands after a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    /// May be submitted.
    Ready,
    /// Staff match with no person type; nothing else is evaluated.
    NeedsClarification,
    /// Mandatory fields are empty.
    MissingFields,
    /// Escalating while anonymous: provide details or reaffirm anonymity.
    AnonymityChoice,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationVerdict {
    pub must_escalate: bool,
    pub must_identify: bool,
    /// Anonymity removed regardless of reporter preference (confirmed staff involvement).
    pub anonymity_forced_off: bool,
    /// Whether the report leaves the device anonymous.
    pub anonymous: bool,
    /// Reporter chose anonymous submission of an escalating report.
    pub anonymous_escalation_override: bool,
    pub staff_involved: bool,
    /// Pattern id after any student relabeling.
    pub pattern_id: Option<PatternId>,
    pub required_fields: BTreeSet<FieldId>,
    pub missing_fields: BTreeSet<FieldId>,
    pub route_target: RouteTarget,
    pub override_source: Option<OverrideSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation_reason: Option<String>,
    pub gate: Gate,
}

impl EscalationVerdict {
    pub fn is_ready(&self) -> bool {
        self.gate == Gate::Ready
    }
}
