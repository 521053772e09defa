//! Pattern detector: cheap, synchronous keyword triage over reporter text.
//!
//! Runs on every edit, so it must stay pure and never fail. Evaluation order is
//! strict and first-match-wins:
//! 1. staff references (teacher/staff synonyms) with a ±80 char context window,
//! 2. physical threat, sexual abuse, self harm keyword families.
//!
//! Staff references are checked first and exclusively: a confirmed staff match
//! carries mandatory-identification consequences downstream.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Characters inspected on each side of a role token.
pub const CONTEXT_WINDOW: usize = 80;

/// Stable identifiers for detector outcomes. Also used as audit labels on reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternId {
    TeacherInvolved,
    TeacherProtector,
    TeacherMentioned,
    PhysicalThreat,
    SexualAbuse,
    SelfHarm,
    /// Staff match voided because the reporter declared the other party a student.
    StudentDisputeOverride,
}

impl PatternId {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternId::TeacherInvolved => "teacher_involved",
            PatternId::TeacherProtector => "teacher_protector",
            PatternId::TeacherMentioned => "teacher_mentioned",
            PatternId::PhysicalThreat => "physical_threat",
            PatternId::SexualAbuse => "sexual_abuse",
            PatternId::SelfHarm => "self_harm",
            PatternId::StudentDisputeOverride => "student_dispute_override",
        }
    }
}

/// Detector output.
///
/// `matched` is true only for escalating patterns. Informational staff outcomes
/// (`teacher_protector`, `teacher_mentioned`) carry a `pattern_id` and a reason
/// but leave `matched` false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternVerdict {
    pub matched: bool,
    #[serde(rename = "patternId", skip_serializing_if = "Option::is_none")]
    pub pattern_id: Option<PatternId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PatternVerdict {
    pub fn none() -> Self {
        Self {
            matched: false,
            pattern_id: None,
            reason: None,
        }
    }

    fn hit(id: PatternId, reason: &str) -> Self {
        Self {
            matched: true,
            pattern_id: Some(id),
            reason: Some(reason.to_string()),
        }
    }

    fn info(id: PatternId, reason: &str) -> Self {
        Self {
            matched: false,
            pattern_id: Some(id),
            reason: Some(reason.to_string()),
        }
    }

    pub fn is(&self, id: PatternId) -> bool {
        self.pattern_id == Some(id)
    }
}

impl Default for PatternVerdict {
    fn default() -> Self {
        Self::none()
    }
}

static ROLE_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(teacher|t\s*\.?\s*r|tr|mr\.?|ms\.?|sir|madam|staff|faculty|prof)\b")
        .expect("role token regex")
});

// `\w*` gives suffix tolerance: harass -> harassed, harassing.
static HARMFUL_VERB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(kill|stab|beat|hit|punch|abuse|molest|harass|threaten|assault|hurt|raped|touched|force|slap|kick)\w*\b",
    )
    .expect("harmful verb regex")
});

static PROTECTIVE_VERB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(help|saved|protect|stop|prevent|rescued|defend|comfort|support)\w*\b",
    )
    .expect("protective verb regex")
});

static GENERIC_FAMILIES: Lazy<Vec<(PatternId, &'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            PatternId::PhysicalThreat,
            "Physical threat",
            Regex::new(
                r"\b(kill|stab|shoot|threat|threaten|assault|hit|punch|beat|weapon|kidnap|force|intimidate|blackmail|choke|strangle)\b",
            )
            .expect("physical regex"),
        ),
        (
            PatternId::SexualAbuse,
            "Sexual abuse",
            Regex::new(r"\b(rape|sexual|molest|touch me|sexually|sexual assault|abuse)\b")
                .expect("sexual regex"),
        ),
        (
            PatternId::SelfHarm,
            "Self harm",
            Regex::new(r"\b(suicide|kill myself|end my life|cut myself)\b")
                .expect("self harm regex"),
        ),
    ]
});

/// Scan `text` and return the highest-priority pattern. Never panics: an
/// internal fault degrades to "no match".
pub fn detect(text: &str) -> PatternVerdict {
    if text.trim().is_empty() {
        return PatternVerdict::none();
    }
    match std::panic::catch_unwind(|| scan(text)) {
        Ok(v) => v,
        Err(_) => {
            warn!(target: "detect", "pattern scan faulted; treating as no match");
            PatternVerdict::none()
        }
    }
}

/// Generic keyword families only (no staff scan). Shared with the local demo
/// classifier, which orders its own checks independently.
pub fn detect_generic(lowered: &str) -> Option<(PatternId, &'static str)> {
    GENERIC_FAMILIES
        .iter()
        .find(|(_, _, re)| re.is_match(lowered))
        .map(|(id, reason, _)| (*id, *reason))
}

/// True if any staff role token occurs in already-lowercased text.
pub fn mentions_staff(lowered: &str) -> bool {
    ROLE_TOKEN.is_match(lowered)
}

fn scan(text: &str) -> PatternVerdict {
    let lowered = text.to_lowercase();

    // The first role token decides; a neutral mention also returns immediately.
    if let Some(m) = ROLE_TOKEN.find(&lowered) {
        let window = context_window(&lowered, m.start(), CONTEXT_WINDOW);
        if HARMFUL_VERB.is_match(window) {
            return PatternVerdict::hit(PatternId::TeacherInvolved, "Teacher/staff implicated");
        }
        if PROTECTIVE_VERB.is_match(window) {
            return PatternVerdict::info(
                PatternId::TeacherProtector,
                "Teacher mentioned as protector",
            );
        }
        return PatternVerdict::info(PatternId::TeacherMentioned, "Teacher mentioned");
    }

    match detect_generic(&lowered) {
        Some((id, reason)) => PatternVerdict::hit(id, reason),
        None => PatternVerdict::none(),
    }
}

/// Slice `[idx - radius, idx + radius)` clamped to the string and to char boundaries.
fn context_window(s: &str, idx: usize, radius: usize) -> &str {
    let mut start = idx.saturating_sub(radius);
    while !s.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (idx + radius).min(s.len());
    while !s.is_char_boundary(end) {
        end += 1;
    }
    &s[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abbreviation_with_harm_is_staff_involved() {
        let v = detect("my tr harassed me today");
        assert!(v.matched);
        assert_eq!(v.pattern_id, Some(PatternId::TeacherInvolved));
    }

    #[test]
    fn protector_is_informational() {
        let v = detect("my teacher saved me from the boy");
        assert!(!v.matched);
        assert_eq!(v.pattern_id, Some(PatternId::TeacherProtector));
    }

    #[test]
    fn neutral_mention_short_circuits_generic_scan() {
        // "kill" sits far outside the window of the first role token.
        let filler = "a".repeat(120);
        let text = format!("my teacher is nice {filler} they want to kill him");
        let v = detect(&text);
        assert_eq!(v.pattern_id, Some(PatternId::TeacherMentioned));
        assert!(!v.matched);
    }

    #[test]
    fn generic_families_follow_priority() {
        assert_eq!(
            detect("he said he will stab me").pattern_id,
            Some(PatternId::PhysicalThreat)
        );
        assert_eq!(
            detect("there was sexual abuse").pattern_id,
            Some(PatternId::SexualAbuse)
        );
        assert_eq!(
            detect("i think about suicide").pattern_id,
            Some(PatternId::SelfHarm)
        );
    }

    #[test]
    fn empty_and_benign_text() {
        assert_eq!(detect(""), PatternVerdict::none());
        assert_eq!(detect("I feel scared"), PatternVerdict::none());
    }

    #[test]
    fn window_respects_multibyte_boundaries() {
        let text = format!("{}teacher hit me", "é".repeat(100));
        let v = detect(&text);
        assert_eq!(v.pattern_id, Some(PatternId::TeacherInvolved));
    }

    #[test]
    fn role_token_is_word_bounded() {
        // "transfer" must not be read as the "tr" abbreviation.
        assert_eq!(detect("the transfer was quick").pattern_id, None);
    }
}
