//! Anthropic Message Batches client against a mock server.

use audition_core::{
    BatchJob, BatchRequest, BatchStatus, Condition, Prompt, ProviderKind, RequestCounts,
    ResultOutcome,
};
use audition_error::RetryableError;
use audition_interface::{BatchClient, BatchLimits};
use audition_providers::{AnthropicBatchClient, ProviderSettingsBuilder};
use chrono::Utc;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer, max_requests: usize) -> anyhow::Result<AnthropicBatchClient> {
    let settings = ProviderSettingsBuilder::default()
        .api_key("sk-ant-test")
        .base_url(server.uri())
        .limits(BatchLimits::new(max_requests, 1_000_000))
        .status_queries_per_second(0u32)
        .build()?;
    Ok(AnthropicBatchClient::new(settings)?)
}

fn condition(prompt_caching: bool) -> Condition {
    Condition {
        id: 3,
        slug: "haiku-cold".to_string(),
        version: 1,
        provider: ProviderKind::Anthropic,
        model: "claude-3-5-haiku-latest".to_string(),
        temperature: Some(0.0),
        max_tokens: 256,
        system_prompt: Some("You are terse.".to_string()),
        prompt_caching,
        created_at: Utc::now(),
    }
}

fn prompt(id: i64, body: &str) -> Prompt {
    Prompt {
        id,
        content_hash: format!("hash{}", id),
        label: None,
        body: body.to_string(),
        created_at: Utc::now(),
    }
}

fn request(custom_id: &str) -> BatchRequest {
    BatchRequest {
        custom_id: custom_id.to_string(),
        body: json!({"model": "claude-3-5-haiku-latest", "max_tokens": 16, "messages": []}),
    }
}

fn completed_job(batch_id: &str, results_url: Option<String>) -> BatchJob {
    BatchJob {
        batch_id: batch_id.to_string(),
        provider: ProviderKind::Anthropic,
        status: BatchStatus::Completed,
        request_counts: RequestCounts::default(),
        results_location: results_url,
        errors_location: None,
    }
}

#[tokio::test]
async fn submit_sends_cache_markers_and_returns_batch_id() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages/batches"))
        .and(header("x-api-key", "sk-ant-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msgbatch_01",
            "processing_status": "in_progress",
            "request_counts": {"processing": 1}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, 10)?;
    let built = client.build_request(&condition(true), &prompt(9, "Name a color."), "exp_3_9_0")?;
    let batch_id = client.submit(&[built]).await?;
    assert_eq!(batch_id, "msgbatch_01");

    let received = server.received_requests().await.unwrap_or_default();
    let body: serde_json::Value = serde_json::from_slice(&received[0].body)?;
    let entry = &body["requests"][0];
    assert_eq!(entry["custom_id"], "exp_3_9_0");
    assert_eq!(entry["params"]["model"], "claude-3-5-haiku-latest");
    assert_eq!(entry["params"]["max_tokens"], 256);
    assert_eq!(entry["params"]["system"][0]["cache_control"]["type"], "ephemeral");
    assert_eq!(
        entry["params"]["messages"][0]["content"][0]["cache_control"]["type"],
        "ephemeral"
    );
    assert_eq!(entry["params"]["messages"][0]["content"][0]["text"], "Name a color.");
    Ok(())
}

#[tokio::test]
async fn build_request_without_caching_omits_markers() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let client = client(&server, 10)?;

    let built = client.build_request(&condition(false), &prompt(9, "hi"), "exp_3_9_0")?;
    assert!(built.body["system"][0].get("cache_control").is_none());
    assert!(built.body["messages"][0]["content"][0].get("cache_control").is_none());
    Ok(())
}

#[tokio::test]
async fn batch_at_cap_is_sent_and_one_over_is_refused_locally() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages/batches"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msgbatch_cap",
            "processing_status": "in_progress"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, 2)?;
    let at_cap = vec![request("r_1_0"), request("r_1_1")];
    assert_eq!(client.submit(&at_cap).await?, "msgbatch_cap");

    let over_cap = vec![request("r_1_0"), request("r_1_1"), request("r_1_2")];
    let err = client.submit(&over_cap).await.unwrap_err();
    assert!(err.is_admission());
    assert!(!err.is_retryable());
    Ok(())
}

#[tokio::test]
async fn status_normalizes_processing_states() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let cases = [
        ("b_running", json!({"processing_status": "in_progress", "request_counts": {"processing": 4}}), BatchStatus::InProgress),
        ("b_canceling", json!({"processing_status": "canceling"}), BatchStatus::InProgress),
        ("b_done", json!({"processing_status": "ended", "request_counts": {"succeeded": 3, "errored": 1}}), BatchStatus::Completed),
        ("b_canceled", json!({"processing_status": "ended", "request_counts": {"canceled": 4}}), BatchStatus::Cancelled),
        ("b_expired", json!({"processing_status": "ended", "request_counts": {"expired": 4}}), BatchStatus::Expired),
        ("b_weird", json!({"processing_status": "rehydrating"}), BatchStatus::Pending),
    ];
    for (id, mut body, _) in cases.clone() {
        body["id"] = json!(id);
        Mock::given(method("GET"))
            .and(path(format!("/v1/messages/batches/{}", id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;
    }

    let client = client(&server, 10)?;
    for (id, _, expected) in cases {
        let job = client.get_status(id).await?;
        assert_eq!(job.status, expected, "batch {}", id);
        assert_eq!(job.provider, ProviderKind::Anthropic);
    }

    let done = client.get_status("b_done").await?;
    assert_eq!(done.request_counts.total, 4);
    assert_eq!(done.request_counts.succeeded, 3);
    assert_eq!(done.request_counts.errored, 1);
    Ok(())
}

#[tokio::test]
async fn results_decode_every_outcome() -> anyhow::Result<()> {
    let server = MockServer::start().await;

    let mut body = Vec::new();
    for line in [
        json!({"custom_id": "exp_3_9_0", "result": {"type": "succeeded", "message": {
            "content": [{"type": "text", "text": "Cobalt \u{2014} a \u{201c}blue\u{201d}."}],
            "usage": {"input_tokens": 12, "output_tokens": 5, "cache_read_input_tokens": 40}
        }}}),
        json!({"custom_id": "exp_3_9_1", "result": {"type": "errored", "error": {
            "type": "error", "error": {"type": "invalid_request_error", "message": "max_tokens too large"}
        }}}),
        json!({"custom_id": "exp_3_9_2", "result": {"type": "expired"}}),
        json!({"custom_id": "exp_3_9_3", "result": {"type": "succeeded", "message": {
            "content": [{"type": "text", "text": "It\u{e2}\u{20ac}\u{2122}s red"}],
            "usage": {"input_tokens": 12, "output_tokens": 5}
        }}}),
    ] {
        body.extend_from_slice(line.to_string().as_bytes());
        body.push(b'\n');
    }
    body.extend_from_slice(b"{\"custom_id\":\"exp_3_9_4\",\"result\":{\"type\":\"succeeded\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"caf");
    body.push(0xe9);
    body.extend_from_slice(b"\"}]}}}\n");

    Mock::given(method("GET"))
        .and(path("/results/msgbatch_01"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(&server)
        .await;

    let client = client(&server, 10)?;
    let job = completed_job(
        "msgbatch_01",
        Some(format!("{}/results/msgbatch_01", server.uri())),
    );
    let results = client.retrieve_results(&job).await?;
    assert_eq!(results.len(), 5);

    match &results[0].outcome {
        ResultOutcome::Succeeded { text, usage } => {
            assert_eq!(text, "Cobalt \u{2014} a \u{201c}blue\u{201d}.");
            assert_eq!(usage.input_tokens, 12);
            assert_eq!(usage.output_tokens, 5);
            assert_eq!(usage.cache_read_tokens, 40);
        }
        other => panic!("expected success, got {:?}", other),
    }
    assert!(matches!(
        &results[1].outcome,
        ResultOutcome::Errored { message } if message.contains("max_tokens too large")
    ));
    assert!(matches!(
        &results[2].outcome,
        ResultOutcome::Errored { message } if message.contains("expired")
    ));
    assert!(matches!(results[3].outcome, ResultOutcome::Invalid { .. }));
    assert_eq!(results[4].custom_id, "exp_3_9_4");
    assert!(matches!(results[4].outcome, ResultOutcome::Invalid { .. }));
    Ok(())
}

#[tokio::test]
async fn results_default_to_batch_results_path() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/messages/batches/msgbatch_02/results"))
        .respond_with(ResponseTemplate::new(200).set_body_string(""))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, 10)?;
    let results = client
        .retrieve_results(&completed_job("msgbatch_02", None))
        .await?;
    assert!(results.is_empty());
    Ok(())
}

#[tokio::test]
async fn results_refused_before_completion() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client(&server, 10)?;
    let mut job = completed_job("msgbatch_03", None);
    job.status = BatchStatus::InProgress;
    assert!(client.retrieve_results(&job).await.is_err());
    Ok(())
}

#[tokio::test]
async fn overloaded_is_retryable() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/messages/batches/msgbatch_04"))
        .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/messages/batches/msgbatch_05"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;

    let client = client(&server, 10)?;
    assert!(client.get_status("msgbatch_04").await.unwrap_err().is_retryable());
    assert!(!client.get_status("msgbatch_05").await.unwrap_err().is_retryable());
    Ok(())
}

#[tokio::test]
async fn cancel_posts_to_cancel_endpoint() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages/batches/msgbatch_06/cancel"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msgbatch_06",
            "processing_status": "canceling"
        })))
        .expect(1)
        .mount(&server)
        .await;

    client(&server, 10)?.cancel("msgbatch_06").await?;
    Ok(())
}
