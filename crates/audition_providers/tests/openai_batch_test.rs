//! OpenAI Batch API client against a mock server.

use audition_core::{
    BatchJob, BatchRequest, BatchStatus, Condition, Prompt, ProviderKind, RequestCounts,
    ResultOutcome,
};
use audition_interface::{BatchClient, BatchLimits};
use audition_providers::{OpenAiBatchClient, ProviderSettingsBuilder};
use chrono::Utc;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer, max_requests: usize) -> anyhow::Result<OpenAiBatchClient> {
    let settings = ProviderSettingsBuilder::default()
        .api_key("sk-test")
        .base_url(server.uri())
        .limits(BatchLimits::new(max_requests, 1_000_000))
        .status_queries_per_second(0u32)
        .build()?;
    Ok(OpenAiBatchClient::new(settings)?)
}

fn batch_object(id: &str, status: &str) -> serde_json::Value {
    json!({
        "id": id,
        "object": "batch",
        "endpoint": "/v1/chat/completions",
        "status": status,
        "request_counts": {"total": 0, "completed": 0, "failed": 0}
    })
}

fn request(custom_id: &str) -> BatchRequest {
    BatchRequest {
        custom_id: custom_id.to_string(),
        body: json!({"model": "gpt-4o-mini", "max_tokens": 16, "messages": []}),
    }
}

fn completed_job(output: Option<&str>, errors: Option<&str>) -> BatchJob {
    BatchJob {
        batch_id: "batch_abc".to_string(),
        provider: ProviderKind::OpenAi,
        status: BatchStatus::Completed,
        request_counts: RequestCounts::default(),
        results_location: output.map(str::to_string),
        errors_location: errors.map(str::to_string),
    }
}

#[tokio::test]
async fn submit_uploads_jsonl_then_creates_batch() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/files"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "file-abc",
            "object": "file",
            "purpose": "batch"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/batches"))
        .and(body_json(json!({
            "input_file_id": "file-abc",
            "endpoint": "/v1/chat/completions",
            "completion_window": "24h"
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(batch_object("batch_abc", "validating")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, 10)?;
    let condition = Condition {
        id: 4,
        slug: "mini-warm".to_string(),
        version: 2,
        provider: ProviderKind::OpenAi,
        model: "gpt-4o-mini".to_string(),
        temperature: Some(0.7),
        max_tokens: 128,
        system_prompt: Some("Answer in one word.".to_string()),
        prompt_caching: true,
        created_at: Utc::now(),
    };
    let prompt = Prompt {
        id: 11,
        content_hash: "h".to_string(),
        label: None,
        body: "Name a fruit.".to_string(),
        created_at: Utc::now(),
    };
    let requests = vec![
        client.build_request(&condition, &prompt, "exp_4_11_0")?,
        client.build_request(&condition, &prompt, "exp_4_11_1")?,
    ];
    assert_eq!(requests[0].body["messages"][0]["role"], "system");
    assert_eq!(requests[0].body["messages"][1]["content"], "Name a fruit.");

    assert_eq!(client.submit(&requests).await?, "batch_abc");

    let received = server.received_requests().await.unwrap_or_default();
    let upload = String::from_utf8_lossy(&received[0].body);
    assert!(upload.contains("name=\"purpose\""));
    assert!(upload.contains("batch.jsonl"));
    let lines: Vec<serde_json::Value> = upload
        .lines()
        .filter(|line| line.starts_with('{'))
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["custom_id"], "exp_4_11_0");
    assert_eq!(lines[0]["method"], "POST");
    assert_eq!(lines[0]["url"], "/v1/chat/completions");
    assert_eq!(lines[1]["body"]["max_tokens"], 128);
    Ok(())
}

#[tokio::test]
async fn over_cap_batch_never_reaches_the_network() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client(&server, 1)?;
    let err = client
        .submit(&[request("r_1_0"), request("r_1_1")])
        .await
        .unwrap_err();
    assert!(err.is_admission());

    let err = client.submit(&[]).await.unwrap_err();
    assert!(err.is_admission());
    Ok(())
}

#[tokio::test]
async fn status_normalizes_lifecycle() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let cases = [
        ("b_validating", "validating", BatchStatus::Pending),
        ("b_progress", "in_progress", BatchStatus::InProgress),
        ("b_finalizing", "finalizing", BatchStatus::InProgress),
        ("b_cancelling", "cancelling", BatchStatus::InProgress),
        ("b_completed", "completed", BatchStatus::Completed),
        ("b_failed", "failed", BatchStatus::Failed),
        ("b_expired", "expired", BatchStatus::Expired),
        ("b_cancelled", "cancelled", BatchStatus::Cancelled),
    ];
    for (id, status, _) in cases {
        Mock::given(method("GET"))
            .and(path(format!("/v1/batches/{}", id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(batch_object(id, status)))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/v1/batches/b_counts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "b_counts",
            "status": "completed",
            "request_counts": {"total": 10, "completed": 7, "failed": 2},
            "output_file_id": "file-out",
            "error_file_id": "file-err"
        })))
        .mount(&server)
        .await;

    let client = client(&server, 10)?;
    for (id, _, expected) in cases {
        assert_eq!(client.get_status(id).await?.status, expected, "batch {}", id);
    }

    let job = client.get_status("b_counts").await?;
    assert_eq!(job.request_counts.total, 10);
    assert_eq!(job.request_counts.succeeded, 7);
    assert_eq!(job.request_counts.errored, 2);
    assert_eq!(job.request_counts.processing, 1);
    assert_eq!(job.results_location.as_deref(), Some("file-out"));
    assert_eq!(job.errors_location.as_deref(), Some("file-err"));
    Ok(())
}

#[tokio::test]
async fn results_merge_output_and_error_files() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let output = [
        json!({"id": "batch_req_1", "custom_id": "exp_4_11_0", "response": {
            "status_code": 200,
            "body": {
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "Mango"}}],
                "usage": {"prompt_tokens": 30, "completion_tokens": 2,
                          "prompt_tokens_details": {"cached_tokens": 20}}
            }
        }, "error": null}),
        json!({"id": "batch_req_2", "custom_id": "exp_4_11_1", "response": {
            "status_code": 400,
            "body": {"error": {"message": "context length exceeded"}}
        }, "error": null}),
    ]
    .iter()
    .map(|line| line.to_string())
    .collect::<Vec<_>>()
    .join("\n");
    let errors = json!({"id": "batch_req_3", "custom_id": "exp_4_11_2", "response": null,
        "error": {"code": "batch_expired", "message": "request expired"}})
    .to_string();

    Mock::given(method("GET"))
        .and(path("/v1/files/file-out/content"))
        .respond_with(ResponseTemplate::new(200).set_body_string(output))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/files/file-err/content"))
        .respond_with(ResponseTemplate::new(200).set_body_string(errors))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, 10)?;
    let results = client
        .retrieve_results(&completed_job(Some("file-out"), Some("file-err")))
        .await?;
    assert_eq!(results.len(), 3);

    match &results[0].outcome {
        ResultOutcome::Succeeded { text, usage } => {
            assert_eq!(text, "Mango");
            assert_eq!(usage.input_tokens, 10);
            assert_eq!(usage.cache_read_tokens, 20);
            assert_eq!(usage.output_tokens, 2);
        }
        other => panic!("expected success, got {:?}", other),
    }
    assert!(matches!(
        &results[1].outcome,
        ResultOutcome::Errored { message } if message.contains("context length exceeded")
    ));
    assert_eq!(results[2].custom_id, "exp_4_11_2");
    assert!(matches!(
        &results[2].outcome,
        ResultOutcome::Errored { message } if message.contains("batch_expired")
    ));
    Ok(())
}

#[tokio::test]
async fn empty_completion_content_is_invalid() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let output = json!({"custom_id": "exp_4_11_0", "response": {
        "status_code": 200,
        "body": {"choices": [{"message": {"content": null}}], "usage": {}}
    }})
    .to_string();
    Mock::given(method("GET"))
        .and(path("/v1/files/file-out/content"))
        .respond_with(ResponseTemplate::new(200).set_body_string(output))
        .mount(&server)
        .await;

    let results = client(&server, 10)?
        .retrieve_results(&completed_job(Some("file-out"), None))
        .await?;
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0].outcome, ResultOutcome::Invalid { .. }));
    Ok(())
}

#[tokio::test]
async fn completed_without_files_yields_nothing() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let results = client(&server, 10)?
        .retrieve_results(&completed_job(None, None))
        .await?;
    assert!(results.is_empty());
    Ok(())
}

#[tokio::test]
async fn cancel_posts_to_cancel_endpoint() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/batches/batch_abc/cancel"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(batch_object("batch_abc", "cancelling")),
        )
        .expect(1)
        .mount(&server)
        .await;

    client(&server, 10)?.cancel("batch_abc").await?;
    Ok(())
}
