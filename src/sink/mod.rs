//! Publishing records to the downstream event bus
//!
//! [`EventSink`] is the delivery boundary: one call, one message.
//! [`Publisher`] wraps a sink with the fixed source and detail-type tags
//! and the target bus, and turns records into [`EventEntry`] messages.

pub mod memory;

use std::cell::RefCell;
use std::io::Write;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::record::EventRecord;

pub use memory::RecordingSink;

/// Errors that can occur while publishing
#[derive(Error, Debug)]
pub enum PublishError {
    /// The record could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The sink accepted the call but rejected the entry
    #[error("Entry rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    /// The call did not reach the sink
    #[error("Transport error: {0}")]
    Transport(String),

    /// Writing to a local sink failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for publishing
pub type PublishResult<T> = Result<T, PublishError>;

/// One message for the event bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventEntry {
    pub source: String,
    pub detail_type: String,
    /// Serialized record
    pub detail: String,
    pub event_bus_name: String,
}

/// Delivery target for event entries
pub trait EventSink {
    /// Deliver a single entry
    fn put_event(&self, entry: &EventEntry) -> PublishResult<()>;
}

impl<T: EventSink + ?Sized> EventSink for &T {
    fn put_event(&self, entry: &EventEntry) -> PublishResult<()> {
        (**self).put_event(entry)
    }
}

/// Turns records into entries and hands them to a sink
pub struct Publisher<S> {
    sink: S,
    source: String,
    detail_type: String,
    event_bus: String,
}

impl<S: EventSink> Publisher<S> {
    pub fn new(
        sink: S,
        source: impl Into<String>,
        detail_type: impl Into<String>,
        event_bus: impl Into<String>,
    ) -> Self {
        Self {
            sink,
            source: source.into(),
            detail_type: detail_type.into(),
            event_bus: event_bus.into(),
        }
    }

    /// Build the entry that would be sent for `record`
    pub fn entry_for(&self, record: &EventRecord) -> PublishResult<EventEntry> {
        Ok(EventEntry {
            source: self.source.clone(),
            detail_type: self.detail_type.clone(),
            detail: serde_json::to_string(record)?,
            event_bus_name: self.event_bus.clone(),
        })
    }

    /// Publish one record
    pub fn publish(&self, record: &EventRecord) -> PublishResult<()> {
        let entry = self.entry_for(record)?;
        self.sink.put_event(&entry)?;
        debug!(
            event_arn = %record.event_arn,
            account_id = record.affected_account.as_deref().unwrap_or(""),
            "Sent event"
        );
        Ok(())
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

/// Sink writing each entry as one JSON line
///
/// Used for dry runs, where nothing must reach the real bus.
pub struct JsonLinesSink<W: Write> {
    out: RefCell<W>,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: RefCell::new(out),
        }
    }

    /// Give back the writer
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl JsonLinesSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> EventSink for JsonLinesSink<W> {
    fn put_event(&self, entry: &EventEntry) -> PublishResult<()> {
        let mut out = self.out.borrow_mut();
        serde_json::to_writer(&mut *out, entry)?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }
}
