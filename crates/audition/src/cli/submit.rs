//! `audition submit`.

use super::Services;
use audition::{AuditionResult, CustomIdFormat, RunOptions, inputs};
use std::path::Path;
use tracing::info;

/// Arguments of `audition submit`.
#[derive(Debug)]
pub struct SubmitArgs<'a> {
    pub condition: &'a str,
    pub version: Option<i32>,
    pub conditions: Option<&'a Path>,
    pub prompts: &'a Path,
    pub replicates: u32,
    pub single_lane: bool,
}

/// Store conditions and prompts, then run the batch.
pub async fn submit(services: &Services, args: SubmitArgs<'_>) -> AuditionResult<()> {
    if let Some(path) = args.conditions {
        for spec in inputs::read_conditions(path)? {
            let stored = services.store.upsert_condition(&spec).await?;
            info!(slug = %stored.slug, version = stored.version, id = stored.id, "Condition stored");
        }
    }
    let condition = services
        .store
        .get_condition_by_slug(args.condition, args.version)
        .await?;

    let mut prompts = Vec::new();
    for prompt in inputs::read_prompts(args.prompts)? {
        prompts.push(services.store.upsert_prompt(&prompt).await?);
    }

    let options = RunOptions {
        replicates: args.replicates,
        id_format: if args.single_lane {
            CustomIdFormat::WithoutCondition
        } else {
            CustomIdFormat::WithCondition
        },
    };
    let summary = services
        .orchestrator()
        .run_batch(&condition, &prompts, options)
        .await?;

    println!("Run {}", summary.run_id);
    println!(
        "  Condition: {} v{} ({} / {})",
        condition.slug, condition.version, condition.provider, condition.model
    );
    println!("  Attempts: {}", summary.attempts);
    println!("  Submitted: {}", summary.submitted);
    println!("  Failed: {}", summary.failed);
    for batch_id in &summary.batch_ids {
        println!("  Batch: {}", batch_id);
    }
    Ok(())
}
