//! Command handlers

use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing::warn;

use health_event_backfill::aws::{AwsHealthApi, EventBridgeSink};
use health_event_backfill::pipeline::{
    BackfillExecutor, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, format_number,
    run_backfill,
};
use health_event_backfill::sink::JsonLinesSink;

use crate::{RunArgs, TargetArgs};

/// Handle the `run` command
pub fn run(args: &RunArgs) -> Result<ExitCode> {
    let config = args.resolve()?;

    let api = AwsHealthApi::connect(&config.health_region)
        .context("Failed to create the health API client")?;

    eprintln!("Backfilling health events into {}", config.event_bus_arn());

    let report = if config.dry_run {
        eprintln!("DRY RUN MODE - entries are printed, nothing is published or checkpointed");
        let store = seeded_store(&FileCheckpointStore::new(config.checkpoint_path()));
        BackfillExecutor::new(config, api, JsonLinesSink::stdout(), store)?.run()?
    } else {
        let sink = EventBridgeSink::connect(&config.region)
            .context("Failed to create the event bus client")?;
        run_backfill(config, api, sink)?
    };

    report.print_summary();

    if report.is_success() {
        eprintln!();
        eprintln!("Backfill {}", report.status);
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!();
        eprintln!("Backfill stopped early after a failed event page; re-run to continue");
        Ok(ExitCode::FAILURE)
    }
}

/// In-memory copy of the on-disk checkpoint; an unreadable one is ignored
fn seeded_store(file: &FileCheckpointStore) -> MemoryCheckpointStore {
    match file.load() {
        Ok(Some(checkpoint)) => MemoryCheckpointStore::with_checkpoint(checkpoint),
        Ok(None) => MemoryCheckpointStore::new(),
        Err(e) => {
            warn!(error = %e, "Could not load checkpoint, dry run starts from the beginning");
            MemoryCheckpointStore::new()
        }
    }
}

/// Handle the `status` command
pub fn status(args: &TargetArgs) -> Result<ExitCode> {
    let config = args.resolve()?;
    if config.account_id.is_empty() {
        anyhow::bail!("An account ID is required to locate the checkpoint");
    }

    let store = FileCheckpointStore::new(config.checkpoint_path());
    let Some(checkpoint) = store.load()? else {
        eprintln!(
            "No checkpoint found for account {} in {}",
            config.account_id,
            config.checkpoint_dir.display()
        );
        eprintln!("The next run starts from the beginning.");
        return Ok(ExitCode::SUCCESS);
    };

    eprintln!("Backfill Checkpoint");
    eprintln!("===================");
    eprintln!();
    eprintln!("File:      {}", store.path().display());
    eprintln!(
        "Cursor:    {}",
        checkpoint.resume_cursor().unwrap_or("<start>")
    );
    eprintln!("Processed: {}", format_number(checkpoint.processed_count));
    eprintln!(
        "Saved:     {}",
        checkpoint.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    );
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use health_event_backfill::pipeline::Checkpoint;
    use tempfile::TempDir;

    #[test]
    fn test_seeded_store_copies_checkpoint() {
        let temp = TempDir::new().unwrap();
        let file = FileCheckpointStore::for_account(temp.path(), "123456789012");
        file.save(&Checkpoint::new(Some("tok123".to_string()), 7)).unwrap();

        let store = seeded_store(&file);
        let current = store.current().unwrap();
        assert_eq!(current.resume_cursor(), Some("tok123"));
        assert_eq!(current.processed_count, 7);
    }

    #[test]
    fn test_seeded_store_ignores_corrupt_checkpoint() {
        let temp = TempDir::new().unwrap();
        let file = FileCheckpointStore::for_account(temp.path(), "123456789012");
        std::fs::write(file.path(), "{\"cursor\": ").unwrap();

        let store = seeded_store(&file);
        assert!(store.current().is_none());
        assert!(file.path().exists());
    }
}
