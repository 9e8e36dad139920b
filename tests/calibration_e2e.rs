use std::time::Duration;

use serde_json::json;
use tempfile::tempdir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sidecar_harness::calibration::{run_calibration, CalibrationError, CalibrationRequest};
use sidecar_harness::evaluator::evaluate;
use sidecar_harness::sidecar::HttpSidecarClient;
use sidecar_harness::store::MetricsStore;

const GOOD_RESPONSE: &str = "The ball costs $0.05. Let the ball cost x; then the bat costs \
x + 1.00, so 2x + 1.00 = 1.10 and x = 0.05.\n\nStep by step: subtract the bat's premium from \
the total cost, then split the remaining $0.10 evenly between the pair.";

fn client_for(server: &MockServer) -> HttpSidecarClient {
    HttpSidecarClient::new(format!("{}/v1", server.uri()), Duration::from_secs(5)).unwrap()
}

async fn mount_models(server: &MockServer, ids: &[&str]) {
    let data: Vec<_> = ids.iter().map(|id| json!({ "id": id })).collect();
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": data })))
        .mount(server)
        .await;
}

async fn mount_chat(server: &MockServer, content: &str) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": { "content": content },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 42, "completion_tokens": 64 }
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn custom_prompt_run_persists_one_scored_test_and_a_metric() {
    let server = MockServer::start().await;
    mount_chat(&server, GOOD_RESPONSE).await;

    let dir = tempdir().unwrap();
    let store = MetricsStore::open(dir.path().join("metrics.db")).unwrap();
    let client = client_for(&server);

    let prompt = "A bat and a ball cost $1.10 in total. How much does the ball cost?";
    let outcome = run_calibration(
        &client,
        &store,
        CalibrationRequest {
            model_id: Some("qwen2.5-7b".to_string()),
            category: "reasoning".to_string(),
            custom_prompt: Some(prompt.to_string()),
            passing_threshold: 0.0,
        },
    )
    .await
    .unwrap();

    assert_eq!(outcome.model_id, "qwen2.5-7b");
    assert_eq!(outcome.summary.total_tests, 1);
    assert_eq!(outcome.summary.passed, 1);
    assert!((outcome.summary.pass_rate - 100.0).abs() < 1e-9);

    // The stored score is exactly what the evaluator says for this pair.
    let expected = evaluate(prompt, GOOD_RESPONSE, "reasoning");
    let rows = store.calibration_results(None, 10).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!((rows[0].quality_score - expected.score).abs() < 1e-9);
    assert_eq!(rows[0].local_response, GOOD_RESPONSE);
    assert_eq!(rows[0].prompt_category, "reasoning");

    // Throughput derives from usage tokens, not zero.
    assert!(rows[0].tokens_per_second > 0.0);

    let metrics = store.summarize_metrics(Some("qwen2.5-7b"), 1).await.unwrap();
    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics[0].total_requests, 1);
    assert_eq!(metrics[0].total_tokens, 106);
    assert_eq!(metrics[0].error_count, 0);
}

#[tokio::test]
async fn passed_flag_follows_the_caller_threshold() {
    let server = MockServer::start().await;
    mount_chat(&server, GOOD_RESPONSE).await;

    let dir = tempdir().unwrap();
    let store = MetricsStore::open(dir.path().join("metrics.db")).unwrap();
    let client = client_for(&server);

    let prompt = "A bat and a ball cost $1.10 in total. How much does the ball cost?";
    let score = evaluate(prompt, GOOD_RESPONSE, "reasoning").score;

    // Just above the actual score: the same response now fails.
    let outcome = run_calibration(
        &client,
        &store,
        CalibrationRequest {
            model_id: Some("qwen2.5-7b".to_string()),
            category: "reasoning".to_string(),
            custom_prompt: Some(prompt.to_string()),
            passing_threshold: score + 0.01,
        },
    )
    .await
    .unwrap();

    assert_eq!(outcome.summary.passed, 0);
    assert!((outcome.summary.pass_rate - 0.0).abs() < 1e-9);
    assert!(!outcome.tests[0].passed);
    assert!((outcome.tests[0].quality_score - score).abs() < 1e-9);
}

#[tokio::test]
async fn known_category_runs_every_prompt_in_it() {
    let server = MockServer::start().await;
    mount_chat(&server, GOOD_RESPONSE).await;

    let dir = tempdir().unwrap();
    let store = MetricsStore::open(dir.path().join("metrics.db")).unwrap();
    let client = client_for(&server);

    let outcome = run_calibration(
        &client,
        &store,
        CalibrationRequest {
            model_id: Some("qwen2.5-7b".to_string()),
            category: "coding".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(outcome.summary.total_tests, 2);
    let rows = store.calibration_results(None, 10).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.prompt_category == "coding"));
}

#[tokio::test]
async fn general_category_smokes_one_prompt_per_category() {
    let server = MockServer::start().await;
    mount_models(&server, &["first-model", "second-model"]).await;
    mount_chat(&server, GOOD_RESPONSE).await;

    let dir = tempdir().unwrap();
    let store = MetricsStore::open(dir.path().join("metrics.db")).unwrap();
    let client = client_for(&server);

    // No model given: the first sidecar model is selected.
    let outcome = run_calibration(&client, &store, CalibrationRequest::default())
        .await
        .unwrap();

    assert_eq!(outcome.model_id, "first-model");
    assert_eq!(
        outcome.summary.total_tests,
        sidecar_harness::prompts::CATEGORIES.len()
    );
    let categories: Vec<_> = outcome
        .tests
        .iter()
        .map(|t| t.prompt_category.as_str())
        .collect();
    assert!(categories.contains(&"reasoning"));
    assert!(categories.contains(&"creative"));
}

#[tokio::test]
async fn failing_sidecar_yields_failed_test_not_aborted_run() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let store = MetricsStore::open(dir.path().join("metrics.db")).unwrap();
    let client = client_for(&server);

    let outcome = run_calibration(
        &client,
        &store,
        CalibrationRequest {
            model_id: Some("qwen2.5-7b".to_string()),
            category: "writing".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    // Both prompts were attempted and recorded as failures.
    assert_eq!(outcome.summary.total_tests, 2);
    assert_eq!(outcome.summary.passed, 0);
    assert!((outcome.summary.average_score - 0.0).abs() < 1e-9);
    for test in &outcome.tests {
        assert!(!test.passed);
        assert_eq!(test.quality_score, 0.0);
        assert!(test
            .evaluation_notes
            .iter()
            .any(|n| n.contains("invocation failed")));
    }

    // Failed invocations still produce error metrics.
    let metrics = store.summarize_metrics(Some("qwen2.5-7b"), 1).await.unwrap();
    assert_eq!(metrics[0].error_count, 2);
}

#[tokio::test]
async fn unknown_category_is_rejected() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    let store = MetricsStore::open(dir.path().join("metrics.db")).unwrap();
    let client = client_for(&server);

    let err = run_calibration(
        &client,
        &store,
        CalibrationRequest {
            model_id: Some("qwen2.5-7b".to_string()),
            category: "juggling".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();

    assert!(matches!(err, CalibrationError::UnknownCategory(c) if c == "juggling"));
}

#[tokio::test]
async fn empty_model_list_is_no_model_available() {
    let server = MockServer::start().await;
    mount_models(&server, &[]).await;

    let dir = tempdir().unwrap();
    let store = MetricsStore::open(dir.path().join("metrics.db")).unwrap();
    let client = client_for(&server);

    let err = run_calibration(&client, &store, CalibrationRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CalibrationError::NoModelAvailable));
}

#[tokio::test]
async fn unreachable_sidecar_is_no_model_available() {
    // Nothing listening on this port.
    let client =
        HttpSidecarClient::new("http://127.0.0.1:1/v1", Duration::from_millis(200)).unwrap();
    let dir = tempdir().unwrap();
    let store = MetricsStore::open(dir.path().join("metrics.db")).unwrap();

    let err = run_calibration(&client, &store, CalibrationRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CalibrationError::NoModelAvailable));
}

#[tokio::test]
async fn reasoning_field_used_when_content_is_empty() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": { "content": "", "reasoning": GOOD_RESPONSE },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 5, "completion_tokens": 7 }
        })))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let store = MetricsStore::open(dir.path().join("metrics.db")).unwrap();
    let client = client_for(&server);

    let outcome = run_calibration(
        &client,
        &store,
        CalibrationRequest {
            model_id: Some("deepseek-r1".to_string()),
            category: "reasoning".to_string(),
            custom_prompt: Some("Explain the bat and ball problem.".to_string()),
            passing_threshold: 0.0,
        },
    )
    .await
    .unwrap();

    assert_eq!(outcome.tests[0].local_response, GOOD_RESPONSE);
}
