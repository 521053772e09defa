// tests/classifier_remote.rs
//
// Remote classification strategy against a mock service:
// success (with 0..100 score normalization), non-2xx, malformed body, slow response.

use std::time::Duration;

use report_triage::classify::{RemoteClassifier, RiskClassifier, RiskLevel};
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn success_is_parsed_and_score_normalized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/analyze"))
        .and(body_json(json!({ "text": "someone threatened me after school" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "category": "physical_threat",
            "risk_level": "L3",
            "risk_score": 87,
            "route_to": "principal_immediate",
            "human_review_required": true,
            "details": { "model": "v2" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let c = RemoteClassifier::new(&server.uri(), Duration::from_secs(2)).unwrap();
    let r = c
        .classify("someone threatened me after school")
        .await
        .expect("classified");
    assert_eq!(r.risk_level, RiskLevel::L3);
    assert!((r.risk_score - 0.87).abs() < 1e-6);
    assert_eq!(r.route_to, "principal_immediate");
    assert_eq!(r.details["model"], json!("v2"));
}

#[tokio::test]
async fn non_2xx_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/analyze"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let c = RemoteClassifier::new(&server.uri(), Duration::from_secs(2)).unwrap();
    assert!(c.classify("anything at all here").await.is_none());
}

#[tokio::test]
async fn malformed_body_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/analyze"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "unexpected": true })))
        .mount(&server)
        .await;

    let c = RemoteClassifier::new(&server.uri(), Duration::from_secs(2)).unwrap();
    assert!(c.classify("anything at all here").await.is_none());
}

#[tokio::test]
async fn slow_service_times_out_as_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/analyze"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(3))
                .set_body_json(json!({
                    "category": "other",
                    "risk_level": "L1",
                    "risk_score": 0.2,
                    "route_to": "counselor_review"
                })),
        )
        .mount(&server)
        .await;

    let c = RemoteClassifier::new(&server.uri(), Duration::from_millis(200)).unwrap();
    let started = std::time::Instant::now();
    assert!(c.classify("anything at all here").await.is_none());
    assert!(started.elapsed() < Duration::from_secs(2), "timeout must bound the call");
}
