//! `audition poll` and `audition reconcile`.

use super::Services;
use audition::{AuditionResult, PollReport, ReconcileReport};
use std::time::Duration;
use tracing::{info, warn};

/// Run one poll cycle, or keep cycling until Ctrl-C with `watch`.
pub async fn poll(services: &Services, watch: bool, reconcile: bool) -> AuditionResult<()> {
    let poller = services.poller();
    let reconciler = services.reconciler();

    if !watch {
        print_poll(&poller.poll_cycle().await?);
        if reconcile {
            print_reconcile(&reconciler.reconcile().await?);
        }
        return Ok(());
    }

    let period = Duration::from_secs(services.config.orchestrator.poll_interval_secs.max(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(interval_secs = period.as_secs(), "Watching pending batches");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; stopping");
                return Ok(());
            }
        }

        match poller.poll_cycle().await {
            Ok(report) => print_poll(&report),
            Err(e) => warn!(error = %e, "Poll cycle failed; retrying next tick"),
        }
        if reconcile {
            match reconciler.reconcile().await {
                Ok(report) => print_reconcile(&report),
                Err(e) => warn!(error = %e, "Reconciliation failed; retrying next tick"),
            }
        }
    }
}

/// Run one reconciliation pass.
pub async fn reconcile(services: &Services) -> AuditionResult<()> {
    let report = services.reconciler().reconcile().await?;
    print_reconcile(&report);
    Ok(())
}

fn print_poll(report: &PollReport) {
    println!(
        "Checked {} batches: {} completed, {} errored, {} in flight, {} transient errors",
        report.batches_checked,
        report.completed,
        report.errored,
        report.batches_in_flight,
        report.transient_errors
    );
    for batch_id in &report.empty_batches {
        println!("  Completed with no results: {}", batch_id);
    }
    for refetch in &report.refetch {
        println!(
            "  Re-fetch {} from {}: {}",
            refetch.custom_id, refetch.batch_id, refetch.reason
        );
    }
    if report.unconfigured > 0 {
        println!("  {} batches belong to unconfigured providers", report.unconfigured);
    }
    for run_id in &report.finished_runs {
        println!("  Run finished: {}", run_id);
    }
}

fn print_reconcile(report: &ReconcileReport) {
    println!(
        "{} stuck runs, {} batches scanned ({} unresolved)",
        report.stuck_runs, report.batches_scanned, report.batches_unresolved
    );
    for correction in &report.corrections {
        println!(
            "  Corrected {}: {:?} -> {:?} ({} attempts, {} recovered)",
            correction.run_id,
            correction.from,
            correction.to,
            correction.attempts,
            correction.recovered
        );
    }
    for flag in &report.flagged {
        println!("  Flagged {}: {}", flag.run_id, flag.reason);
    }
    for unanswered in &report.unanswered {
        println!("  Failed {}: {}", unanswered.custom_id, unanswered.reason);
    }
    for run_id in &report.deferred {
        println!("  Deferred {}", run_id);
    }
    for run_id in &report.finished_runs {
        println!("  Run finished: {}", run_id);
    }
}
