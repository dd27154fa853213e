//! `audition status` and `audition cancel`.

use super::{OutputFormat, Services};
use audition::{AttemptStatus, AuditionResult, ConfigError, GenerationRun, RunId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use strum::IntoEnumIterator;
use tracing::warn;

#[derive(Debug, Serialize)]
struct RunStatus {
    run: GenerationRun,
    attempts: BTreeMap<String, usize>,
    batch_ids: BTreeSet<String>,
}

/// Print a run with attempt counts per status.
pub async fn status(services: &Services, run_id: &str, format: OutputFormat) -> AuditionResult<()> {
    let run_id = RunId::new(run_id);
    let run = services.store.get_run(&run_id).await?;
    let attempts = services.store.list_attempts_for_run(&run_id).await?;

    let mut counts: BTreeMap<String, usize> = AttemptStatus::iter()
        .map(|status| (status.to_string(), 0))
        .collect();
    for attempt in &attempts {
        *counts.entry(attempt.status.to_string()).or_default() += 1;
    }
    let status = RunStatus {
        run,
        attempts: counts,
        batch_ids: attempts.iter().filter_map(|a| a.batch_id.clone()).collect(),
    };

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&status)
                .map_err(|e| ConfigError::new(format!("Failed to render status: {}", e)))?;
            println!("{}", json);
        }
        OutputFormat::Human => {
            let run = &status.run;
            println!("Run {}", run.id);
            println!("  Condition: {}", run.condition_id);
            println!("  Replicates: {}", run.replicate_count);
            println!("  Created: {}", run.created_at);
            match run.completed_at {
                Some(at) => println!("  Completed: {}", at),
                None => println!("  Completed: -"),
            }
            if let Some(error) = &run.error_message {
                println!("  Error: {}", error);
            }
            for (status, count) in &status.attempts {
                println!("  {:<14} {}", status, count);
            }
            for batch_id in &status.batch_ids {
                println!("  Batch: {}", batch_id);
            }
        }
    }
    Ok(())
}

/// Cancel a run and wait for the provider cancels to settle.
pub async fn cancel(services: &Services, run_id: &str) -> AuditionResult<()> {
    let cancellation = services
        .orchestrator()
        .cancel_run(&RunId::new(run_id))
        .await?;
    println!("Run {} cancelled", run_id);
    for (batch_id, handle) in cancellation.batch_ids.iter().zip(cancellation.remote) {
        if let Err(e) = handle.await {
            warn!(batch_id = %batch_id, error = %e, "Cancel task did not finish");
        }
        println!("  Cancel requested: {}", batch_id);
    }
    Ok(())
}
