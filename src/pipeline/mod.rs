//! Resumable backfill pipeline
//!
//! This module wires the upstream listing, the per-event fan-out, the
//! normalizer and the publisher into a single blocking run:
//! - Fetch one page of organization events
//! - Resolve accounts, details and entities for each event
//! - Publish one record per event (unscoped) or per affected account
//! - Checkpoint the next cursor after every page
//!
//! # Example
//!
//! ```rust,ignore
//! use health_event_backfill::pipeline::{BackfillConfig, BackfillExecutor, FileCheckpointStore};
//!
//! let config = BackfillConfig::new("123456789012", "eu-west-1")
//!     .with_checkpoint_dir("/var/lib/backfill");
//! let store = FileCheckpointStore::new(config.checkpoint_path());
//!
//! let executor = BackfillExecutor::new(config, api, sink, store)?;
//! let report = executor.run()?;
//!
//! println!("Backfill finished in {}", report.duration_formatted());
//! ```
//!
//! # Checkpointing
//!
//! A run that finds a checkpoint always resumes from it. Stopping a run
//! part-way (crash, kill, or `max_pages`) re-processes at most the page
//! that was in flight.

mod checkpoint;
mod config;
mod error;
mod executor;
mod progress;

pub use checkpoint::{
    Checkpoint, CheckpointError, CheckpointResult, CheckpointStore, FileCheckpointStore,
    MemoryCheckpointStore,
};
pub use config::{
    BackfillConfig, DEFAULT_DETAIL_TYPE, DEFAULT_EVENT_SOURCE, DEFAULT_FANOUT_PAGE_SIZE,
    DEFAULT_HEALTH_REGION, DEFAULT_RESOURCE_PREFIX, FetchErrorPolicy,
};
pub use error::{PipelineError, PipelineResult};
pub use executor::{BackfillExecutor, RunCounts, RunReport, RunStatus};
pub use progress::{BackfillProgress, format_number};

use crate::sink::EventSink;
use crate::source::HealthApi;

/// Run a backfill with the checkpoint file named by the configuration
///
/// This is a convenience function for simple backfill execution.
pub fn run_backfill<A, S>(config: BackfillConfig, api: A, sink: S) -> PipelineResult<RunReport>
where
    A: HealthApi,
    S: EventSink,
{
    let store = FileCheckpointStore::new(config.checkpoint_path());
    BackfillExecutor::new(config, api, sink, store)?.run()
}
