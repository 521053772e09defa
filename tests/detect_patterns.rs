// tests/detect_patterns.rs
//
// Hand-picked phrasing grid for the pattern detector: role tokens × verb
// inflections, protector phrasing, and the engine's idempotence on the result.

use report_triage::decision::{Category, Intensity, PersonContext, PersonType, RouteTarget};
use report_triage::detect::{detect, PatternId};
use report_triage::engine::decide;

const ROLES: &[&str] = &["teacher", "tr", "Mr.", "ms", "sir", "madam", "staff", "faculty", "prof"];

#[test]
fn harmful_verb_near_role_is_staff_involved_for_all_inflections() {
    let verbs = [
        "hit", "hits", "hitting", "harassed", "harassing", "threatened", "abused", "kicked",
        "slapped", "assaulted", "hurts",
    ];
    for role in ROLES {
        for verb in verbs {
            let text = format!("My {role} {verb} me yesterday");
            let v = detect(&text);
            assert_eq!(
                v.pattern_id,
                Some(PatternId::TeacherInvolved),
                "role={role} verb={verb}"
            );
            assert!(v.matched, "role={role} verb={verb}");
        }
    }
}

#[test]
fn protective_verb_without_harm_is_protector() {
    for phrase in [
        "my teacher helped me after class",
        "Sir protected us during the fight",
        "the staff defended me",
        "ms rescued my friend",
    ] {
        let v = detect(phrase);
        assert_eq!(v.pattern_id, Some(PatternId::TeacherProtector), "{phrase}");
        assert!(!v.matched, "{phrase}");
    }
}

#[test]
fn harm_wins_over_protection_in_the_same_window() {
    let v = detect("the teacher helped at first but then hit me");
    assert_eq!(v.pattern_id, Some(PatternId::TeacherInvolved));
}

#[test]
fn case_is_ignored() {
    assert_eq!(
        detect("MY TEACHER THREATENED ME").pattern_id,
        Some(PatternId::TeacherInvolved)
    );
    assert_eq!(detect("I WILL KILL MYSELF").pattern_id, Some(PatternId::PhysicalThreat));
}

#[test]
fn decide_is_idempotent_and_student_declaration_never_routes_up() {
    let pattern = detect("my tr harassed me today");
    let mut ctx = PersonContext::new(Category::Other, Intensity::Low);
    ctx.person_type = Some(PersonType::Student);

    let a = decide(&pattern, None, &ctx);
    let b = decide(&pattern, None, &ctx);
    assert_eq!(a, b);
    assert_eq!(a.route_target, RouteTarget::Standard);
    assert_eq!(a.pattern_id, Some(PatternId::StudentDisputeOverride));
}
