//! Health Event Backfill - resumable ingestion of organization health events
//!
//! Walks the organization-wide health event listing page by page, fans each
//! event out into its affected accounts, details and entities, and publishes
//! one normalized record per event or per affected account to an event bus.
//! A checkpoint written after every page lets an interrupted run resume.
//!
//! Provides:
//! - Upstream API abstraction and pagination (`source`)
//! - The canonical record and its normalizer (`record`)
//! - Event bus publishing (`sink`)
//! - The resumable driver, configuration and checkpointing (`pipeline`)
//! - AWS-backed adapters (`aws`, behind the `aws` feature)

pub mod pipeline;
pub mod record;
pub mod sink;
pub mod source;

#[cfg(feature = "aws")]
pub mod aws;

// Re-export commonly used types
pub use pipeline::{
    BackfillConfig, BackfillExecutor, Checkpoint, CheckpointStore, FetchErrorPolicy,
    FileCheckpointStore, MemoryCheckpointStore, PipelineError, PipelineResult, RunReport,
    RunStatus, run_backfill,
};
pub use record::{EventRecord, RecordError, normalize};
pub use sink::{EventEntry, EventSink, JsonLinesSink, PublishError, Publisher, RecordingSink};
pub use source::{HealthApi, HealthEvent, InMemoryHealthApi, Page, SourceError};
