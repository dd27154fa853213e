//! Poll cycle behavior.

mod test_utils;

use audition_core::{AttemptStatus, BatchResult, BatchStatus, ProviderKind, ResultOutcome};
use audition_database::InMemoryRunStore;
use audition_interface::RunStore;
use audition_orchestrator::RunOptions;
use std::sync::Arc;
use test_utils::{MockBatchClient, orchestrator, poller, seed, succeeded};

#[tokio::test]
async fn completed_batch_completes_its_attempts() -> anyhow::Result<()> {
    let store = Arc::new(InMemoryRunStore::new());
    let mock = MockBatchClient::new(ProviderKind::Anthropic);
    let (condition, prompts) = seed(&store, ProviderKind::Anthropic, 2).await?;
    let summary = orchestrator(&store, &mock)
        .run_batch(&condition, &prompts, RunOptions::default())
        .await?;
    mock.complete_echo(&summary.batch_ids[0], "The lighthouse keeper woke.");

    let report = poller(&store, &mock).poll_cycle().await?;

    assert_eq!(report.batches_checked, 1);
    assert_eq!(report.completed, 2);
    assert_eq!(report.finished_runs, vec![summary.run_id.clone()]);
    for attempt in store.list_attempts_for_run(&summary.run_id).await? {
        assert_eq!(attempt.status, AttemptStatus::Completed);
        assert!(attempt.response_text.is_some_and(|text| !text.is_empty()));
        assert_eq!(attempt.usage.map(|u| u.output_tokens), Some(34));
    }
    let run = store.get_run(&summary.run_id).await?;
    assert!(run.completed_at.is_some());
    assert!(run.error_message.is_none());
    Ok(())
}

#[tokio::test]
async fn repeated_cycles_do_not_touch_completed_attempts() -> anyhow::Result<()> {
    let store = Arc::new(InMemoryRunStore::new());
    let mock = MockBatchClient::new(ProviderKind::OpenAi);
    let (condition, prompts) = seed(&store, ProviderKind::OpenAi, 1).await?;
    let summary = orchestrator(&store, &mock)
        .run_batch(&condition, &prompts, RunOptions::default())
        .await?;
    mock.complete_echo(&summary.batch_ids[0], "first answer");
    let poller = poller(&store, &mock);
    poller.poll_cycle().await?;
    let before = store.list_attempts_for_run(&summary.run_id).await?;

    mock.complete_echo(&summary.batch_ids[0], "second answer");
    let report = poller.poll_cycle().await?;

    assert_eq!(report.batches_checked, 0);
    assert_eq!(report.completed, 0);
    assert!(report.finished_runs.is_empty());
    let after = store.list_attempts_for_run(&summary.run_id).await?;
    assert_eq!(before, after);
    assert_eq!(after[0].response_text.as_deref(), Some("first answer"));
    Ok(())
}

#[tokio::test]
async fn expired_batch_fails_every_attempt_without_retry() -> anyhow::Result<()> {
    let store = Arc::new(InMemoryRunStore::new());
    let mock = MockBatchClient::new(ProviderKind::Anthropic);
    let (condition, prompts) = seed(&store, ProviderKind::Anthropic, 2).await?;
    let summary = orchestrator(&store, &mock)
        .run_batch(
            &condition,
            &prompts,
            RunOptions {
                replicates: 2,
                ..RunOptions::default()
            },
        )
        .await?;
    mock.set_status(&summary.batch_ids[0], BatchStatus::Expired);

    let poller = poller(&store, &mock);
    let report = poller.poll_cycle().await?;

    assert_eq!(report.errored, 4);
    for attempt in store.list_attempts_for_run(&summary.run_id).await? {
        assert_eq!(attempt.status, AttemptStatus::Error);
        assert!(
            attempt
                .error_message
                .as_deref()
                .is_some_and(|m| m.contains("expired"))
        );
    }
    let run = store.get_run(&summary.run_id).await?;
    assert!(run.error_message.is_some_and(|m| m.contains("failed")));

    poller.poll_cycle().await?;
    assert_eq!(mock.submit_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn status_errors_are_retried_next_cycle() -> anyhow::Result<()> {
    let store = Arc::new(InMemoryRunStore::new());
    let mock = MockBatchClient::new(ProviderKind::Anthropic);
    let (condition, prompts) = seed(&store, ProviderKind::Anthropic, 1).await?;
    let summary = orchestrator(&store, &mock)
        .run_batch(&condition, &prompts, RunOptions::default())
        .await?;
    let batch_id = &summary.batch_ids[0];
    mock.complete_echo(batch_id, "done");
    mock.fail_status(batch_id);
    let poller = poller(&store, &mock);

    let report = poller.poll_cycle().await?;
    assert_eq!(report.transient_errors, 1);
    assert_eq!(report.completed, 0);
    let pending = store.list_attempts_by_status(AttemptStatus::BatchPending).await?;
    assert_eq!(pending.len(), 1);

    mock.heal_status(batch_id);
    let report = poller.poll_cycle().await?;
    assert_eq!(report.completed, 1);
    Ok(())
}

#[tokio::test]
async fn in_flight_batches_are_left_alone() -> anyhow::Result<()> {
    let store = Arc::new(InMemoryRunStore::new());
    let mock = MockBatchClient::new(ProviderKind::OpenAi);
    let (condition, prompts) = seed(&store, ProviderKind::OpenAi, 1).await?;
    let summary = orchestrator(&store, &mock)
        .run_batch(&condition, &prompts, RunOptions::default())
        .await?;
    mock.set_status(&summary.batch_ids[0], BatchStatus::InProgress);

    let report = poller(&store, &mock).poll_cycle().await?;

    assert_eq!(report.batches_in_flight, 1);
    let attempts = store.list_attempts_for_run(&summary.run_id).await?;
    assert_eq!(attempts[0].status, AttemptStatus::BatchPending);
    Ok(())
}

#[tokio::test]
async fn completed_batch_without_results_is_an_anomaly() -> anyhow::Result<()> {
    let store = Arc::new(InMemoryRunStore::new());
    let mock = MockBatchClient::new(ProviderKind::Anthropic);
    let (condition, prompts) = seed(&store, ProviderKind::Anthropic, 1).await?;
    let summary = orchestrator(&store, &mock)
        .run_batch(&condition, &prompts, RunOptions::default())
        .await?;
    mock.set_status(&summary.batch_ids[0], BatchStatus::Completed);

    let report = poller(&store, &mock).poll_cycle().await?;

    assert_eq!(report.empty_batches, summary.batch_ids);
    let attempts = store.list_attempts_for_run(&summary.run_id).await?;
    assert_eq!(attempts[0].status, AttemptStatus::BatchPending);
    Ok(())
}

#[tokio::test]
async fn untrusted_results_stay_pending_and_errors_are_recorded() -> anyhow::Result<()> {
    let store = Arc::new(InMemoryRunStore::new());
    let mock = MockBatchClient::new(ProviderKind::Anthropic);
    let (condition, prompts) = seed(&store, ProviderKind::Anthropic, 3).await?;
    let summary = orchestrator(&store, &mock)
        .run_batch(&condition, &prompts, RunOptions::default())
        .await?;
    let batch_id = &summary.batch_ids[0];
    let mut attempts = store.list_attempts_for_run(&summary.run_id).await?;
    attempts.sort_by_key(|a| a.prompt_id);

    mock.set_results(
        batch_id,
        vec![
            succeeded(&attempts[0].custom_id, "clean text"),
            BatchResult {
                custom_id: attempts[1].custom_id.clone(),
                outcome: ResultOutcome::Invalid {
                    reason: "mojibake in content".to_string(),
                },
            },
            BatchResult {
                custom_id: attempts[2].custom_id.clone(),
                outcome: ResultOutcome::Errored {
                    message: "invalid_request_error: prompt too long".to_string(),
                },
            },
            succeeded("someone_else_1_2_0", "stray"),
        ],
    );
    mock.set_status(batch_id, BatchStatus::Completed);

    let report = poller(&store, &mock).poll_cycle().await?;

    assert_eq!(report.completed, 1);
    assert_eq!(report.errored, 1);
    assert_eq!(report.refetch.len(), 1);
    assert_eq!(report.refetch[0].custom_id, attempts[1].custom_id);
    assert_eq!(report.unmatched, vec!["someone_else_1_2_0".to_string()]);
    assert!(report.finished_runs.is_empty());

    let second = store.get_attempt(attempts[1].id).await?;
    assert_eq!(second.status, AttemptStatus::BatchPending);
    let third = store.get_attempt(attempts[2].id).await?;
    assert_eq!(third.status, AttemptStatus::Error);
    assert_eq!(
        third.error_message.as_deref(),
        Some("invalid_request_error: prompt too long")
    );
    Ok(())
}

#[tokio::test]
async fn polling_runs_alongside_new_submissions() -> anyhow::Result<()> {
    let store = Arc::new(InMemoryRunStore::new());
    let mock = MockBatchClient::new(ProviderKind::Anthropic);
    let (condition, prompts) = seed(&store, ProviderKind::Anthropic, 2).await?;
    let orchestrator = orchestrator(&store, &mock);
    let first = orchestrator
        .run_batch(&condition, &prompts[..1], RunOptions::default())
        .await?;
    mock.complete_echo(&first.batch_ids[0], "early");
    let poller = poller(&store, &mock);

    let (second, report) = tokio::join!(
        orchestrator.run_batch(&condition, &prompts[1..], RunOptions::default()),
        poller.poll_cycle()
    );
    let second = second?;
    report?;

    poller.poll_cycle().await?;
    let first_attempts = store.list_attempts_for_run(&first.run_id).await?;
    assert_eq!(first_attempts[0].status, AttemptStatus::Completed);
    let second_attempts = store.list_attempts_for_run(&second.run_id).await?;
    assert_eq!(second_attempts[0].status, AttemptStatus::BatchPending);
    Ok(())
}
