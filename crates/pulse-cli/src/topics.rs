//! Topic command handlers for the CLI.
//!
//! These are called from `main` once the store and harvester exist. Output
//! goes to stdout; progress and contained failures go through `tracing`.

use std::time::Duration;

use pulse_harvest::{HarvestError, Harvester, JobOutcome};

use crate::render;

/// Run a topic to completion and print the report.
///
/// # Errors
///
/// Returns an error if the topic is invalid or the job cannot be created.
pub(crate) async fn run_topic(
    harvester: &Harvester,
    topic: &str,
    target_count: u32,
) -> anyhow::Result<()> {
    let outcome = harvester.run(topic, target_count).await?;
    print_outcome(&outcome);
    Ok(())
}

/// Submit a topic and poll its status until the background job finishes.
///
/// # Errors
///
/// Returns an error if the job cannot be created or the background task
/// aborts.
pub(crate) async fn submit_topic(
    harvester: &Harvester,
    topic: &str,
    target_count: u32,
    poll_every: Duration,
) -> anyhow::Result<()> {
    let topic = topic.trim();
    let handle = harvester.submit(topic, target_count).await?;
    let mut ticker = tokio::time::interval(poll_every);
    let mut last_status = String::new();

    while !handle.is_finished() {
        ticker.tick().await;
        match harvester.status(topic).await {
            Ok(job) => {
                let status = render::render_status(&job);
                if status != last_status {
                    print!("{status}");
                    last_status = status;
                }
            }
            Err(e) => tracing::warn!(topic, error = %e, "status poll failed"),
        }
    }

    let outcome = handle
        .await
        .map_err(|e| anyhow::anyhow!("job task for '{topic}' aborted: {e}"))?;
    print_outcome(&outcome);
    Ok(())
}

/// # Errors
///
/// Returns an error if no job exists for the topic or the store fails.
pub(crate) async fn show_status(harvester: &Harvester, topic: &str) -> anyhow::Result<()> {
    match harvester.status(topic).await {
        Ok(job) => print!("{}", render::render_status(&job)),
        Err(HarvestError::JobNotFound(_)) => {
            println!("no job found for '{topic}'; run `submit` first");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// # Errors
///
/// Returns an error if the store fails or the report cannot be serialized.
pub(crate) async fn show_report(
    harvester: &Harvester,
    topic: &str,
    json: bool,
) -> anyhow::Result<()> {
    match harvester.get_result(topic).await {
        Ok(stored) if json => println!("{}", serde_json::to_string_pretty(&stored.report)?),
        Ok(stored) => print!("{}", render::render_report(&stored.report)),
        Err(HarvestError::JobNotReady(_)) => {
            println!("job for '{topic}' is still running; check `status`");
        }
        Err(HarvestError::JobNotFound(_)) => println!("no report found for '{topic}'"),
        Err(HarvestError::ReportNotPersisted(_)) => {
            println!("job for '{topic}' finished but its report was not stored; rerun it");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// # Errors
///
/// Returns an error if the store cannot be read.
pub(crate) async fn show_history(harvester: &Harvester) -> anyhow::Result<()> {
    let entries = harvester.history().await?;
    if entries.is_empty() {
        println!("no analyses stored yet");
        return Ok(());
    }
    print!("{}", render::render_history(&entries));
    Ok(())
}

/// # Errors
///
/// Returns an error if the delete fails.
pub(crate) async fn delete_topic(harvester: &Harvester, topic: &str) -> anyhow::Result<()> {
    if harvester.delete(topic).await? {
        println!("deleted '{topic}'");
    } else {
        println!("nothing stored for '{topic}'");
    }
    Ok(())
}

/// # Errors
///
/// Returns an error if nothing is stored for the topic or the store fails.
pub(crate) async fn reconcile_topic(harvester: &Harvester, topic: &str) -> anyhow::Result<()> {
    let outcome = harvester.reconcile(topic).await?;
    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &JobOutcome) {
    if !outcome.sources.is_empty() {
        print!("{}", render::render_sources(&outcome.sources));
        println!();
    }
    print!("{}", render::render_report(&outcome.report));
    if !outcome.persisted {
        tracing::error!(
            topic = %outcome.report.topic,
            "report was produced but could not be fully persisted"
        );
    }
}
