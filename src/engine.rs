//! # Escalation Engine
//! Pure, testable logic that maps `(pattern verdict, classifier result, person
//! context)` → `EscalationVerdict`. No I/O, never suspends, never fails on a
//! missing classifier result.
//!
//! Rules, in order (later rules only add requirements):
//! 1. a staff match is void if the reporter declared the other party a student,
//! 2. an unclarified staff match halts everything and asks for the person type,
//! 3. a confirmed staff match escalates, forces identification, drops anonymity,
//! 4. otherwise escalate on classifier L3, an escalating keyword, or extreme intensity,
//! 5. escalating + anonymous asks the reporter to identify or reaffirm anonymity,
//! 6. escalated bullying needs the accused party's name,
//! 7. the override source records which signal escalated (audit only).

use std::collections::BTreeSet;

use tracing::debug;

use crate::classify::{ClassifierResult, RiskLevel};
use crate::decision::{
    EscalationVerdict, FieldId, Gate, Intensity, OverrideSource, PersonContext, PersonType,
    RouteTarget,
};
use crate::detect::{PatternId, PatternVerdict};
use crate::error::{FieldError, SubmitError};

pub fn decide(
    pattern: &PatternVerdict,
    classifier: Option<&ClassifierResult>,
    ctx: &PersonContext,
) -> EscalationVerdict {
    // 1) Student override
    let mut pattern_id = pattern.pattern_id;
    let mut keyword_hit = pattern.matched;
    let mut staff = pattern.is(PatternId::TeacherInvolved);
    if staff && ctx.person_type == Some(PersonType::Student) {
        staff = false;
        keyword_hit = false;
        pattern_id = Some(PatternId::StudentDisputeOverride);
    }

    // 2) Blocking clarification
    if staff && ctx.person_type.is_none() {
        let fields = BTreeSet::from([FieldId::PersonType]);
        return EscalationVerdict {
            must_escalate: true,
            must_identify: false,
            anonymity_forced_off: false,
            anonymous: ctx.requested_anonymity(),
            anonymous_escalation_override: false,
            staff_involved: true,
            pattern_id,
            required_fields: fields.clone(),
            missing_fields: fields,
            route_target: RouteTarget::HigherAuthority,
            override_source: Some(OverrideSource::StaffKeyword),
            escalation_reason: Some(staff_reason(pattern)),
            gate: Gate::NeedsClarification,
        };
    }

    let l3 = classifier.is_some_and(|c| c.risk_level == RiskLevel::L3);
    let extreme = ctx.intensity == Intensity::Extreme;

    let mut required = BTreeSet::new();
    let mut anonymous = ctx.requested_anonymity();
    let mut anonymity_forced_off = false;
    let mut anonymous_escalation_override = false;
    let mut choice_pending = false;

    // 3) / 4)
    let must_escalate = staff || l3 || keyword_hit || extreme;
    let must_identify;
    if staff {
        must_identify = true;
        anonymity_forced_off = anonymous || ctx.is_anonymous;
        anonymous = false;
        required.insert(FieldId::Name);
        required.insert(FieldId::Classroom);
    } else if must_escalate && anonymous {
        // 5) Informed choice rather than forced identification.
        must_identify = false;
        if ctx.anonymous_override {
            anonymous_escalation_override = true;
        } else {
            choice_pending = true;
        }
    } else {
        // A non-anonymous reporter is already identified; nothing more is asked.
        must_identify = false;
    }

    // 6) Accused party, independent of anonymity.
    if must_escalate && ctx.category == crate::decision::Category::Bullying {
        required.insert(FieldId::BullyName);
    }

    let missing: BTreeSet<FieldId> = required
        .iter()
        .copied()
        .filter(|f| !field_present(*f, ctx))
        .collect();

    // 7) Audit attribution
    let override_source = if !must_escalate {
        None
    } else if staff {
        Some(OverrideSource::StaffKeyword)
    } else if extreme {
        Some(OverrideSource::User)
    } else if l3 {
        Some(OverrideSource::Ai)
    } else {
        Some(OverrideSource::Keyword)
    };
    let escalation_reason = override_source.map(|src| match src {
        OverrideSource::StaffKeyword => staff_reason(pattern),
        OverrideSource::User => "user_selected_extreme".to_string(),
        OverrideSource::Ai => classifier
            .map(|c| {
                if c.route_to.trim().is_empty() {
                    c.risk_level.as_str().to_string()
                } else {
                    c.route_to.clone()
                }
            })
            .unwrap_or_else(|| RiskLevel::L3.as_str().to_string()),
        OverrideSource::Keyword => pattern.reason.clone().unwrap_or_else(|| "keyword".into()),
    });

    let gate = if !missing.is_empty() {
        Gate::MissingFields
    } else if choice_pending {
        Gate::AnonymityChoice
    } else {
        Gate::Ready
    };

    let verdict = EscalationVerdict {
        must_escalate,
        must_identify,
        anonymity_forced_off,
        anonymous,
        anonymous_escalation_override,
        staff_involved: staff,
        pattern_id,
        required_fields: required,
        missing_fields: missing,
        route_target: if must_escalate {
            RouteTarget::HigherAuthority
        } else {
            RouteTarget::Standard
        },
        override_source,
        escalation_reason,
        gate,
    };
    debug!(
        target: "engine",
        must_escalate = verdict.must_escalate,
        staff = verdict.staff_involved,
        gate = ?verdict.gate,
        source = ?verdict.override_source,
        "escalation verdict"
    );
    verdict
}

/// Convert a non-ready verdict into the field-level error the form should show.
pub fn check_preconditions(verdict: &EscalationVerdict) -> Result<(), SubmitError> {
    match verdict.gate {
        Gate::Ready => Ok(()),
        Gate::NeedsClarification => Err(SubmitError::NeedsClarification(FieldError::for_field(
            FieldId::PersonType,
            "Please specify if this person is a Student, Teacher, or Staff",
        ))),
        Gate::MissingFields => Err(SubmitError::MissingFields(
            verdict
                .missing_fields
                .iter()
                .map(|f| FieldError::for_field(*f, missing_message(*f, verdict.staff_involved)))
                .collect(),
        )),
        Gate::AnonymityChoice => Err(SubmitError::AnonymityChoiceRequired {
            fields: identification_fields(verdict),
        }),
    }
}

/// Fields the reporter would fill when choosing to identify instead of staying anonymous.
fn identification_fields(verdict: &EscalationVerdict) -> Vec<FieldId> {
    let mut out = vec![FieldId::Name, FieldId::Classroom];
    if verdict.required_fields.contains(&FieldId::BullyName) {
        out.push(FieldId::BullyName);
    }
    out
}

fn missing_message(field: FieldId, staff: bool) -> &'static str {
    match (field, staff) {
        (FieldId::PersonType, _) => "Please specify if this person is a Student, Teacher, or Staff",
        (FieldId::Name, true) => "Name is required for teacher/staff reports",
        (FieldId::Name, false) => "Name is required for escalated reports",
        (FieldId::Classroom, true) => "Class is required for teacher/staff reports",
        (FieldId::Classroom, false) => "Class/Section is required for escalated reports",
        (FieldId::BullyName, _) => {
            "Name of the person bullying is required for escalated bullying reports"
        }
    }
}

fn field_present(field: FieldId, ctx: &PersonContext) -> bool {
    match field {
        FieldId::PersonType => ctx.person_type.is_some(),
        FieldId::Name => ctx.has_name(),
        FieldId::Classroom => ctx.has_classroom(),
        FieldId::BullyName => ctx.has_bully_name(),
    }
}

fn staff_reason(pattern: &PatternVerdict) -> String {
    pattern
        .reason
        .clone()
        .unwrap_or_else(|| PatternId::TeacherInvolved.as_str().to_string())
}
