//! Pattern recognition against a mocked distribution service

use faultmend::config::{Config, PatternConfig};
use faultmend::context::{ErrorAnalysis, ErrorContext};
use faultmend::patterns::{ErrorPattern, HttpPatternClient, PatternRecognition};
use faultmend::ErrorAnalyzer;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn timeout_ctx() -> ErrorContext {
    ErrorContext::new("checkout", "Checkout", "TimeoutException", "upstream timed out")
        .with_context("region", "eu-west-1")
        .with_context("endpoint", "/pay")
}

fn recognizer(server: &MockServer) -> PatternRecognition {
    let client = HttpPatternClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
    PatternRecognition::new(PatternConfig::default()).with_client(Arc::new(client))
}

fn known_pattern() -> ErrorPattern {
    ErrorPattern::new("checkout", "TimeoutException", "Checkout")
        .with_fingerprint("region", "eu-west-1")
        .with_strategies(vec!["restart".to_string()])
        .with_confidence(0.9)
}

#[tokio::test]
async fn test_overlapping_context_matches_and_other_type_does_not() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/patterns"))
        .and(query_param("service", "checkout"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![known_pattern()]))
        .mount(&server)
        .await;
    let pr = recognizer(&server);

    let hit = pr.find_matching_pattern(&timeout_ctx(), "checkout").await;
    assert_eq!(hit.map(|p| p.error_type), Some("TimeoutException".to_string()));

    let mut other = timeout_ctx();
    other.error_type = "NullReferenceException".to_string();
    assert!(pr.find_matching_pattern(&other, "checkout").await.is_none());
}

#[tokio::test]
async fn test_cache_is_filled_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/patterns"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![known_pattern()]))
        .expect(1)
        .mount(&server)
        .await;
    let pr = recognizer(&server);

    for _ in 0..3 {
        assert!(pr.find_matching_pattern(&timeout_ctx(), "checkout").await.is_some());
    }
    assert_eq!(pr.cached_services(), vec!["checkout".to_string()]);
}

#[tokio::test]
async fn test_failed_fetch_is_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/patterns"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;
    let pr = recognizer(&server);

    assert!(pr.find_matching_pattern(&timeout_ctx(), "checkout").await.is_none());
    assert!(pr.find_matching_pattern(&timeout_ctx(), "checkout").await.is_none());
    assert!(pr.cached_services().is_empty());
}

#[tokio::test]
async fn test_pattern_learned_after_failed_fetch_keeps_entry_cold() {
    let server = MockServer::start().await;
    let remote = known_pattern();
    Mock::given(method("GET"))
        .and(path("/patterns"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/patterns"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![remote.clone()]))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/patterns/update"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    let pr = recognizer(&server);

    let mut ctx = timeout_ctx();
    ctx.error_type = "DeadlockDetected".to_string();
    assert!(pr.find_matching_pattern(&ctx, "checkout").await.is_none());

    let analysis = ErrorAnalysis::for_context(&ctx).with_confidence(0.9);
    let learned = pr
        .create_pattern_from_analysis(&ctx, &analysis, vec!["restart:target=checkout".to_string()])
        .await
        .unwrap();
    assert!(pr.cached_services().is_empty());

    // The next lookup fetches the remote patterns and keeps the learned one
    let patterns = pr.patterns_for("checkout").await;
    let ids: Vec<&str> = patterns.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec![remote.id.as_str(), learned.id.as_str()]);
    assert!(pr.find_matching_pattern(&timeout_ctx(), "checkout").await.is_some());
    assert_eq!(pr.find_matching_pattern(&ctx, "checkout").await, Some(learned));
}

#[tokio::test]
async fn test_invalidate_and_refresh_refetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/patterns"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![known_pattern()]))
        .expect(3)
        .mount(&server)
        .await;
    let pr = recognizer(&server);

    pr.patterns_for("checkout").await;
    assert!(pr.invalidate("checkout"));
    pr.patterns_for("checkout").await;
    assert_eq!(pr.refresh("checkout").await.unwrap(), 1);
}

#[tokio::test]
async fn test_detect_patterns_keeps_input_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/patterns"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![known_pattern()]))
        .mount(&server)
        .await;
    let pr = recognizer(&server);

    let mut miss = timeout_ctx();
    miss.operation_name = "Refund".to_string();
    let contexts = vec![timeout_ctx(), miss, timeout_ctx()];

    let hits = pr.detect_patterns(&contexts, "checkout").await;
    let indices: Vec<usize> = hits.iter().map(|m| m.context_index).collect();
    assert_eq!(indices, vec![0, 2]);
}

#[tokio::test]
async fn test_occurrence_is_pushed_upstream() {
    let server = MockServer::start().await;
    let pattern = known_pattern();
    Mock::given(method("GET"))
        .and(path("/patterns"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![pattern.clone()]))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/patterns/update"))
        .and(body_partial_json(serde_json::json!({"id": pattern.id, "occurrence_count": 2})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    let pr = recognizer(&server);

    pr.patterns_for("checkout").await;
    let updated = pr.record_occurrence("checkout", &pattern.id).await.unwrap();
    assert_eq!(updated.occurrence_count, 2);
}

#[tokio::test]
async fn test_deactivate_calls_delete() {
    let server = MockServer::start().await;
    let pattern = known_pattern();
    Mock::given(method("GET"))
        .and(path("/patterns"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![pattern.clone()]))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/patterns/delete"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    let pr = recognizer(&server);

    pr.patterns_for("checkout").await;
    assert!(pr.deactivate_pattern("checkout", &pattern.id).await.unwrap());
    assert!(pr.find_matching_pattern(&timeout_ctx(), "checkout").await.is_none());
}

const ANALYSIS_TEXT: &str = "**Explanation:** The payment gateway stopped answering.\n\n\
**Root Causes:**\n1. Connection pool exhaustion\n\n\
**Remediation Steps:**\n1. Restart the checkout service\n2. Retry failed payments\n\n\
**Prevention Strategies:**\n- Alert on pool saturation\n\n\
**Confidence:** 85%";

#[tokio::test]
async fn test_analyzer_learns_and_publishes_through_services() {
    let llm = MockServer::start().await;
    let patterns = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"content": ANALYSIS_TEXT}}]
        })))
        .expect(1)
        .mount(&llm)
        .await;
    Mock::given(method("GET"))
        .and(path("/patterns"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<ErrorPattern>::new()))
        .expect(1)
        .mount(&patterns)
        .await;
    Mock::given(method("POST"))
        .and(path("/patterns/update"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&patterns)
        .await;
    Mock::given(method("POST"))
        .and(path("/publish"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&patterns)
        .await;

    let mut config = Config::default();
    config.llm.endpoint = llm.uri();
    config.patterns.service_url = Some(patterns.uri());
    let analyzer = ErrorAnalyzer::from_config(&config).unwrap();

    let ctx = timeout_ctx();
    let first = analyzer.analyze(&ctx).await;
    assert!((first.confidence() - 0.85).abs() < 1e-9);
    assert!(first.matched_pattern.is_none());
    assert_eq!(first.root_causes, vec!["Connection pool exhaustion"]);

    // Second occurrence is served from the learned pattern; the LLM mock
    // expects exactly one call.
    let second = analyzer.analyze(&ctx).await;
    assert!(second.matched_pattern.is_some());
    assert_eq!(
        second.pattern_strategies,
        vec!["restart:target=checkout", "retry:operation=Checkout"]
    );
}
