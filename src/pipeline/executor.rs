//! Backfill executor driving the page-by-page state machine
//!
//! ```text
//! ResumeCheck -> FetchPage -> ProcessPage -> Checkpoint -> FetchPage | Done
//! ```
//!
//! Every event on a page is processed in order, each (event, account) pair
//! in isolation: a failing pair is logged and counted, never propagated.
//! After each page the checkpoint is written with the next cursor and the
//! running total of published records. A page without a next cursor ends
//! the run and removes the checkpoint.

use std::time::Instant;

use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use super::checkpoint::{Checkpoint, CheckpointStore};
use super::config::{BackfillConfig, FetchErrorPolicy};
use super::error::{PipelineError, PipelineResult};
use super::progress::{BackfillProgress, format_number};
use crate::record::{flatten_entities, normalize};
use crate::sink::{EventSink, Publisher};
use crate::source::{
    DependencyResolver, HealthApi, HealthEvent, Page, PageFetch, PaginatedFetcher, SourceError,
};

enum Step {
    ResumeCheck,
    FetchPage { cursor: Option<String>, attempt: u32 },
    ProcessPage { page: Page<HealthEvent> },
    Checkpoint { next_cursor: Option<String> },
    Done { status: RunStatus },
}

/// What happened to one (event, account) pair
enum UnitOutcome {
    Published,
    NoDetails,
    NoEntities,
}

/// Executor that runs a backfill to completion or suspension
pub struct BackfillExecutor<A, S, C> {
    config: BackfillConfig,
    api: A,
    publisher: Publisher<S>,
    store: C,
    run_id: String,
}

impl<A: HealthApi, S: EventSink, C: CheckpointStore> BackfillExecutor<A, S, C> {
    /// Create a new executor
    pub fn new(config: BackfillConfig, api: A, sink: S, store: C) -> PipelineResult<Self> {
        config.validate().map_err(PipelineError::ConfigError)?;

        let publisher = Publisher::new(
            sink,
            &config.event_source,
            &config.detail_type,
            config.event_bus_arn(),
        );

        Ok(Self {
            config,
            api,
            publisher,
            store,
            run_id: Uuid::new_v4().to_string(),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn config(&self) -> &BackfillConfig {
        &self.config
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn sink(&self) -> &S {
        self.publisher.sink()
    }

    pub fn store(&self) -> &C {
        &self.store
    }

    /// Run the backfill
    ///
    /// Only configuration errors and an outer fetch failure under the
    /// `Abort` or exhausted `Retry` policy are returned as errors.
    pub fn run(&self) -> PipelineResult<RunReport> {
        let _span = info_span!(
            "backfill_run",
            run_id = %self.run_id,
            account_id = %self.config.account_id,
            dry_run = self.config.dry_run
        )
        .entered();

        let start = Instant::now();
        let progress = BackfillProgress::new(self.config.show_progress);
        let fetcher = PaginatedFetcher::new(&self.api, self.config.event_page_size);
        let resolver = DependencyResolver::new(&self.api, self.config.fanout_page_size);

        info!(
            event_bus = %self.config.event_bus_arn(),
            policy = %self.config.fetch_error_policy,
            max_pages = ?self.config.max_pages,
            "Starting backfill"
        );

        let mut counts = RunCounts::default();
        let mut processed_count = 0u64;
        let mut resumed_from = None;
        let mut step = Step::ResumeCheck;

        let (status, resume_cursor) = loop {
            step = match step {
                Step::ResumeCheck => {
                    let cursor = match self.resume_check() {
                        Some(checkpoint) => {
                            resumed_from = Some(checkpoint.processed_count);
                            processed_count = checkpoint.processed_count;
                            checkpoint.cursor
                        }
                        None => None,
                    };
                    Step::FetchPage { cursor, attempt: 0 }
                }
                Step::FetchPage { cursor, attempt } => {
                    if self.config.max_pages.is_some_and(|max| counts.pages >= max) {
                        info!(
                            pages = counts.pages,
                            cursor = cursor.as_deref().unwrap_or("<start>"),
                            "Page limit reached, suspending"
                        );
                        break (RunStatus::Suspended, cursor);
                    }

                    match fetcher.fetch_page(cursor.as_deref()) {
                        PageFetch::Page(page) if page.is_exhausted() => Step::Done {
                            status: RunStatus::Completed,
                        },
                        PageFetch::Page(page) => Step::ProcessPage { page },
                        PageFetch::Failed(source) => {
                            match self.on_fetch_failure(cursor, attempt, source) {
                                Ok(next) => next,
                                Err(e) => {
                                    progress.finish_error(&e.to_string());
                                    return Err(e);
                                }
                            }
                        }
                    }
                }
                Step::ProcessPage { page } => {
                    counts.pages += 1;
                    let _page_span = info_span!("event_page", page = counts.pages).entered();

                    let published = self.process_page(&resolver, &page.items, &mut counts);
                    processed_count += published;
                    progress.update(counts.pages, counts.records_published, counts.failures());

                    info!(
                        events = page.items.len(),
                        published,
                        total = processed_count,
                        has_more = page.next_cursor.is_some(),
                        "Page processed"
                    );
                    Step::Checkpoint {
                        next_cursor: page.next_cursor,
                    }
                }
                Step::Checkpoint {
                    next_cursor: Some(cursor),
                } => {
                    let checkpoint = Checkpoint::new(Some(cursor.clone()), processed_count);
                    if let Err(e) = self.store.save(&checkpoint) {
                        counts.checkpoint_failures += 1;
                        error!(stage = "checkpoint_save", cursor = %cursor, error = %e, "Failed to save checkpoint");
                        progress.warn(&format!("checkpoint not saved: {e}"));
                    } else {
                        debug!(cursor = %cursor, processed_count, "Checkpoint saved");
                    }
                    Step::FetchPage {
                        cursor: Some(cursor),
                        attempt: 0,
                    }
                }
                Step::Checkpoint { next_cursor: None } => Step::Done {
                    status: RunStatus::Completed,
                },
                Step::Done { status } => {
                    self.clear_checkpoint();
                    break (status, None);
                }
            };
        };

        let report = RunReport {
            run_id: self.run_id.clone(),
            status,
            counts,
            resumed_from,
            processed_count,
            resume_cursor,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            status = %report.status,
            pages = report.counts.pages,
            published = report.counts.records_published,
            failures = report.counts.failures(),
            total = report.processed_count,
            duration_ms = report.duration_ms,
            "Backfill finished"
        );
        progress.finish_success(&format!(
            "{} records published ({})",
            format_number(report.counts.records_published),
            report.status
        ));

        Ok(report)
    }

    /// Load the checkpoint; an unreadable one is logged and ignored
    fn resume_check(&self) -> Option<Checkpoint> {
        match self.store.load() {
            Ok(Some(checkpoint)) => {
                info!(
                    cursor = checkpoint.resume_cursor().unwrap_or("<start>"),
                    processed_count = checkpoint.processed_count,
                    saved_at = %checkpoint.timestamp,
                    "Resuming from checkpoint"
                );
                Some(checkpoint)
            }
            Ok(None) => {
                info!("No checkpoint found, starting from the beginning");
                None
            }
            Err(e) => {
                error!(stage = "checkpoint_load", error = %e, "Could not load checkpoint, starting from the beginning");
                None
            }
        }
    }

    fn clear_checkpoint(&self) {
        match self.store.clear() {
            Ok(()) => info!("Listing exhausted, checkpoint removed"),
            Err(e) => error!(stage = "checkpoint_clear", error = %e, "Failed to remove checkpoint"),
        }
    }

    fn on_fetch_failure(
        &self,
        cursor: Option<String>,
        attempt: u32,
        source: SourceError,
    ) -> PipelineResult<Step> {
        let at = cursor.as_deref().unwrap_or("<start>").to_string();
        match self.config.fetch_error_policy {
            FetchErrorPolicy::Finish => {
                warn!(cursor = %at, error = %source, "Event page fetch failed, treating listing as finished");
                Ok(Step::Done {
                    status: RunStatus::Truncated,
                })
            }
            FetchErrorPolicy::Retry { attempts } if attempt < attempts => {
                let delay = self.config.retry_delay(attempt);
                warn!(
                    cursor = %at,
                    attempt = attempt + 1,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %source,
                    "Event page fetch failed, retrying"
                );
                std::thread::sleep(delay);
                Ok(Step::FetchPage {
                    cursor,
                    attempt: attempt + 1,
                })
            }
            policy => {
                error!(
                    cursor = %at,
                    policy = %policy,
                    transient = source.is_transient(),
                    error = %source,
                    "Event page fetch failed, stopping with checkpoint kept"
                );
                Err(PipelineError::OuterFetch { cursor, source })
            }
        }
    }

    /// Process every event on a page; returns the records published
    fn process_page(
        &self,
        resolver: &DependencyResolver<&A>,
        events: &[HealthEvent],
        counts: &mut RunCounts,
    ) -> u64 {
        let mut published = 0;
        for event in events {
            counts.events += 1;
            published += self.process_event(resolver, event, counts);
        }
        published
    }

    fn process_event(
        &self,
        resolver: &DependencyResolver<&A>,
        event: &HealthEvent,
        counts: &mut RunCounts,
    ) -> u64 {
        debug!(event_arn = %event.arn, "Processing event");

        let scope = resolver.resolve_scope(event);
        if !scope.is_complete() {
            counts.incomplete_listings += 1;
        }
        let accounts = scope.into_items();

        if accounts.is_empty() {
            warn!(event_arn = %event.arn, "No affected accounts found, processing without account scope");
            let outcome = self.process_unit(resolver, event, None, counts);
            return self.settle(event, None, outcome, counts);
        }

        let mut published = 0;
        for account_id in &accounts {
            let account = Some(account_id.as_str()).filter(|id| !id.is_empty());
            let outcome = self.process_unit(resolver, event, account, counts);
            published += self.settle(event, account, outcome, counts);
        }
        published
    }

    fn process_unit(
        &self,
        resolver: &DependencyResolver<&A>,
        event: &HealthEvent,
        account: Option<&str>,
        counts: &mut RunCounts,
    ) -> PipelineResult<UnitOutcome> {
        let details = resolver
            .describe(event, account)
            .map_err(|e| PipelineError::stage_failure("event_details", e))?;
        let Some(details) = details else {
            return Ok(UnitOutcome::NoDetails);
        };
        let Some(detail_event) = details.event.as_ref() else {
            return Ok(UnitOutcome::NoDetails);
        };

        let entities = match account {
            Some(account_id) => {
                let resolved = resolver.resolve_entities(event, account_id);
                if !resolved.is_complete() {
                    counts.incomplete_listings += 1;
                }
                let entities = resolved.into_items();
                if entities.is_empty() {
                    return Ok(UnitOutcome::NoEntities);
                }
                flatten_entities(&entities)
            }
            None => Vec::new(),
        };

        let record = normalize(
            detail_event,
            &details.event_description,
            &details.event_metadata,
            entities,
            account,
        )
        .map_err(|e| PipelineError::stage_failure("normalize", e))?;

        self.publisher
            .publish(&record)
            .map_err(|e| PipelineError::stage_failure("publish", e))?;
        Ok(UnitOutcome::Published)
    }

    /// Log and count the outcome of one unit; returns records published
    fn settle(
        &self,
        event: &HealthEvent,
        account: Option<&str>,
        outcome: PipelineResult<UnitOutcome>,
        counts: &mut RunCounts,
    ) -> u64 {
        let account_id = account.unwrap_or("");
        match outcome {
            Ok(UnitOutcome::Published) => {
                counts.records_published += 1;
                1
            }
            Ok(UnitOutcome::NoDetails) => {
                counts.units_skipped += 1;
                warn!(event_arn = %event.arn, account_id, "No event details found, skipping");
                0
            }
            Ok(UnitOutcome::NoEntities) => {
                counts.units_skipped += 1;
                debug!(event_arn = %event.arn, account_id, "No affected entities, no record");
                0
            }
            Err(e) => {
                let stage = e.stage_name().unwrap_or("process");
                if stage == "publish" {
                    counts.publish_failures += 1;
                } else {
                    counts.unit_failures += 1;
                }
                error!(event_arn = %event.arn, account_id, stage, error = %e, "Failed to process event");
                0
            }
        }
    }
}

/// Final state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// The listing was exhausted and the checkpoint removed
    Completed,
    /// The page limit was hit; the checkpoint is kept for the next run
    Suspended,
    /// An outer fetch failed and was treated as the end of the listing
    Truncated,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Suspended => write!(f, "suspended"),
            Self::Truncated => write!(f, "truncated"),
        }
    }
}

/// Counters collected during a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunCounts {
    /// Outer pages processed
    pub pages: u64,
    /// Events seen on those pages
    pub events: u64,
    pub records_published: u64,
    pub publish_failures: u64,
    /// Pairs that failed before publishing
    pub unit_failures: u64,
    /// Pairs without details or without entities
    pub units_skipped: u64,
    /// Sub-listings that stopped part-way
    pub incomplete_listings: u64,
    pub checkpoint_failures: u64,
}

impl RunCounts {
    /// Failed pairs, whatever the stage
    pub fn failures(&self) -> u64 {
        self.publish_failures + self.unit_failures
    }
}

/// Report from a backfill run
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Run ID
    pub run_id: String,
    /// Final status
    pub status: RunStatus,
    pub counts: RunCounts,
    /// Published count carried over from the checkpoint
    pub resumed_from: Option<u64>,
    /// Published records across all runs so far
    pub processed_count: u64,
    /// Cursor the next run starts from, when suspended
    pub resume_cursor: Option<String>,
    /// Total duration in milliseconds
    pub duration_ms: u64,
}

impl RunReport {
    /// Check if the run ended without a swallowed fetch failure
    pub fn is_success(&self) -> bool {
        self.status != RunStatus::Truncated
    }

    /// Get formatted duration
    pub fn duration_formatted(&self) -> String {
        let secs = self.duration_ms / 1000;
        let mins = secs / 60;
        let remaining_secs = secs % 60;

        if mins > 0 {
            format!("{}m {}s", mins, remaining_secs)
        } else {
            format!("{}s", secs)
        }
    }

    /// Print summary to stderr
    pub fn print_summary(&self) {
        let counts = &self.counts;
        eprintln!();
        eprintln!("Backfill {} - {}", self.run_id, self.status);
        eprintln!("Duration: {}", self.duration_formatted());
        if let Some(from) = self.resumed_from {
            eprintln!("Resumed after {} records", format_number(from));
        }
        eprintln!("Pages: {}", format_number(counts.pages));
        eprintln!("Events: {}", format_number(counts.events));
        eprintln!("Records published: {}", format_number(counts.records_published));
        if counts.failures() > 0 {
            eprintln!("  - publish failures: {}", format_number(counts.publish_failures));
            eprintln!("  - other failures: {}", format_number(counts.unit_failures));
        }
        if counts.units_skipped > 0 {
            eprintln!("Skipped (no details or entities): {}", format_number(counts.units_skipped));
        }
        if counts.incomplete_listings > 0 {
            eprintln!("Incomplete listings: {}", format_number(counts.incomplete_listings));
        }
        eprintln!("Total records processed: {}", format_number(self.processed_count));
        if let Some(cursor) = &self.resume_cursor {
            eprintln!("Next run resumes at cursor {cursor}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::checkpoint::MemoryCheckpointStore;
    use crate::sink::RecordingSink;
    use crate::source::{AffectedEntity, InMemoryHealthApi};
    use chrono::{TimeZone, Utc};

    fn config() -> BackfillConfig {
        BackfillConfig::new("123456789012", "eu-west-1")
    }

    fn event(arn: &str) -> HealthEvent {
        HealthEvent::new(arn)
            .with_region("us-east-1")
            .with_start_time(Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 0).unwrap())
    }

    fn two_page_api() -> InMemoryHealthApi {
        let (e1, e2) = (event("evt-1"), event("evt-2"));
        InMemoryHealthApi::new()
            .with_event_page(vec![e1.clone()], Some("tok123"))
            .with_event_page(vec![e2.clone()], None)
            .with_event_fanout(&e1, "first", Vec::new())
            .with_event_fanout(&e2, "second", Vec::new())
    }

    #[test]
    fn test_executor_rejects_invalid_config() {
        let result = BackfillExecutor::new(
            BackfillConfig::default(),
            InMemoryHealthApi::new(),
            RecordingSink::new(),
            MemoryCheckpointStore::new(),
        );
        assert!(matches!(result, Err(PipelineError::ConfigError(_))));
    }

    #[test]
    fn test_empty_listing_completes() {
        let executor = BackfillExecutor::new(
            config(),
            InMemoryHealthApi::new(),
            RecordingSink::new(),
            MemoryCheckpointStore::new(),
        )
        .unwrap();

        let report = executor.run().unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.counts.pages, 0);
        assert!(executor.store().history().is_empty());
        assert_eq!(executor.store().clears(), 1);
    }

    #[test]
    fn test_entries_target_configured_bus() {
        let executor = BackfillExecutor::new(
            config(),
            two_page_api(),
            RecordingSink::new(),
            MemoryCheckpointStore::new(),
        )
        .unwrap();
        executor.run().unwrap();

        let entries = executor.sink().entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].source, "heidi.health");
        assert_eq!(entries[0].detail_type, "awshealthtest");
        assert_eq!(
            entries[0].event_bus_name,
            "arn:aws:events:eu-west-1:123456789012:event-bus/heidi-DataCollectionBus-123456789012"
        );
    }

    #[test]
    fn test_finish_policy_truncates_and_clears() {
        let api = two_page_api().fail_event_page(Some("tok123"));
        let executor =
            BackfillExecutor::new(config(), api, RecordingSink::new(), MemoryCheckpointStore::new())
                .unwrap();

        let report = executor.run().unwrap();
        assert_eq!(report.status, RunStatus::Truncated);
        assert!(!report.is_success());
        assert_eq!(report.counts.records_published, 1);
        assert!(executor.store().current().is_none());
    }

    #[test]
    fn test_abort_policy_keeps_checkpoint() {
        let api = two_page_api().fail_event_page(Some("tok123"));
        let executor = BackfillExecutor::new(
            config().with_fetch_error_policy(FetchErrorPolicy::Abort),
            api,
            RecordingSink::new(),
            MemoryCheckpointStore::new(),
        )
        .unwrap();

        let err = executor.run().unwrap_err();
        assert!(matches!(
            err,
            PipelineError::OuterFetch { cursor: Some(ref c), .. } if c == "tok123"
        ));
        let kept = executor.store().current().unwrap();
        assert_eq!(kept.resume_cursor(), Some("tok123"));
        assert_eq!(kept.processed_count, 1);
    }

    #[test]
    fn test_retry_policy_reissues_same_cursor() {
        let api = two_page_api().fail_event_page_times(Some("tok123"), 2);
        let executor = BackfillExecutor::new(
            config()
                .with_fetch_error_policy(FetchErrorPolicy::Retry { attempts: 2 })
                .with_retry_backoff_ms(5),
            api,
            RecordingSink::new(),
            MemoryCheckpointStore::new(),
        )
        .unwrap();

        let report = executor.run().unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        // 5ms then 10ms between the three attempts at tok123
        assert!(report.duration_ms >= 15);
        assert_eq!(report.counts.records_published, 2);
        assert_eq!(
            executor.api().event_cursors_seen(),
            vec![
                None,
                Some("tok123".to_string()),
                Some("tok123".to_string()),
                Some("tok123".to_string()),
            ]
        );
    }

    #[test]
    fn test_retry_policy_gives_up() {
        let api = two_page_api().fail_event_page(Some("tok123"));
        let executor = BackfillExecutor::new(
            config()
                .with_fetch_error_policy(FetchErrorPolicy::Retry { attempts: 1 })
                .with_retry_backoff_ms(1),
            api,
            RecordingSink::new(),
            MemoryCheckpointStore::new(),
        )
        .unwrap();

        assert!(matches!(executor.run(), Err(PipelineError::OuterFetch { .. })));
        assert!(executor.store().current().is_some());
    }

    #[test]
    fn test_max_pages_suspends_with_checkpoint() {
        let executor = BackfillExecutor::new(
            config().with_max_pages(1),
            two_page_api(),
            RecordingSink::new(),
            MemoryCheckpointStore::new(),
        )
        .unwrap();

        let report = executor.run().unwrap();
        assert_eq!(report.status, RunStatus::Suspended);
        assert_eq!(report.resume_cursor.as_deref(), Some("tok123"));
        assert_eq!(executor.store().clears(), 0);
        assert_eq!(executor.api().event_cursors_seen(), vec![None]);
    }

    #[test]
    fn test_checkpoint_save_failure_does_not_stop_run() {
        let executor = BackfillExecutor::new(
            config(),
            two_page_api(),
            RecordingSink::new(),
            MemoryCheckpointStore::new().failing_saves(),
        )
        .unwrap();

        let report = executor.run().unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.counts.checkpoint_failures, 1);
        assert_eq!(report.counts.records_published, 2);
    }

    #[test]
    fn test_failures_are_counted_by_stage() {
        let e1 = event("evt-1");
        let e2 = event("evt-2");
        let api = InMemoryHealthApi::new()
            .with_event_page(vec![e1.clone(), e2.clone()], None)
            .with_event_fanout(
                &e1,
                "desc",
                vec![("acct-A", vec![AffectedEntity::new("v1", "IMPAIRED")])],
            )
            .with_accounts("evt-2", &["acct-B"])
            .fail_details("evt-2", Some("acct-B"));
        let executor = BackfillExecutor::new(
            config(),
            api,
            RecordingSink::new().reject_event("evt-1"),
            MemoryCheckpointStore::new(),
        )
        .unwrap();

        let report = executor.run().unwrap();
        assert_eq!(report.counts.records_published, 0);
        assert_eq!(report.counts.publish_failures, 1);
        assert_eq!(report.counts.unit_failures, 1);
        assert_eq!(report.counts.failures(), 2);
    }

    #[test]
    fn test_run_report() {
        let report = RunReport {
            run_id: "test-123".to_string(),
            status: RunStatus::Completed,
            counts: RunCounts::default(),
            resumed_from: Some(10),
            processed_count: 15,
            resume_cursor: None,
            duration_ms: 65000,
        };

        assert!(report.is_success());
        assert_eq!(report.duration_formatted(), "1m 5s");
        assert_eq!(RunStatus::Suspended.to_string(), "suspended");
    }
}
