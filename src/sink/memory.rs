//! Recording sink for tests

use std::cell::RefCell;
use std::collections::HashSet;

use super::{EventEntry, EventSink, PublishError, PublishResult};
use crate::record::EventRecord;

/// Sink that keeps every delivered entry in memory
///
/// Can be told to reject entries for chosen events.
#[derive(Debug, Default)]
pub struct RecordingSink {
    entries: RefCell<Vec<EventEntry>>,
    rejected_events: HashSet<String>,
    attempts: RefCell<usize>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every entry whose record belongs to `event_arn`
    pub fn reject_event(mut self, event_arn: impl Into<String>) -> Self {
        self.rejected_events.insert(event_arn.into());
        self
    }

    /// Entries accepted so far
    pub fn entries(&self) -> Vec<EventEntry> {
        self.entries.borrow().clone()
    }

    /// Accepted entries decoded back into records
    pub fn records(&self) -> Vec<EventRecord> {
        self.entries
            .borrow()
            .iter()
            .filter_map(|entry| serde_json::from_str(&entry.detail).ok())
            .collect()
    }

    /// Deliveries attempted, accepted or not
    pub fn attempts(&self) -> usize {
        *self.attempts.borrow()
    }
}

impl EventSink for RecordingSink {
    fn put_event(&self, entry: &EventEntry) -> PublishResult<()> {
        *self.attempts.borrow_mut() += 1;

        let record: EventRecord = serde_json::from_str(&entry.detail)?;
        if self.rejected_events.contains(&record.event_arn) {
            return Err(PublishError::Rejected {
                code: "InternalFailure".to_string(),
                message: format!("rejected {}", record.event_arn),
            });
        }

        self.entries.borrow_mut().push(entry.clone());
        Ok(())
    }
}
