//! Canonical event record and the normalizer that builds it
//!
//! A record is what gets published: one per event when the event has no
//! affected accounts, otherwise one per affected account that has at
//! least one affected entity. Field names match what downstream
//! consumers of the event bus already parse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::source::{AffectedEntity, EventDescription, HealthEvent};

/// Textual timestamp format used for every time field
pub const TIMESTAMP_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Record keys that pass-through attributes may never overwrite
pub const RESERVED_KEYS: [&str; 10] = [
    "eventArn",
    "eventRegion",
    "eventTypeCode",
    "startTime",
    "eventDescription",
    "eventMetadata",
    "affectedAccount",
    "affectedEntities",
    "endTime",
    "lastUpdatedTime",
];

/// Errors raised while normalizing an event
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// The event carries no start time to render
    #[error("Event {event_arn} has no start time")]
    MissingStartTime { event_arn: String },
}

/// Result type for normalization
pub type RecordResult<T> = Result<T, RecordError>;

/// Description entry as published
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptionEntry {
    pub latest_description: String,
}

/// Flattened affected entity as published
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatEntity {
    pub entity_value: String,
    pub status: String,
}

/// Canonical output record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub event_arn: String,
    pub event_region: String,
    pub event_type_code: String,
    pub start_time: String,
    /// Always exactly one entry
    pub event_description: Vec<DescriptionEntry>,
    pub event_metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_account: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected_entities: Vec<FlatEntity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_time: Option<String>,
    /// Source attributes with no dedicated field; never holds a reserved key
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EventRecord {
    /// True when the record is scoped to an account
    pub fn is_scoped(&self) -> bool {
        self.affected_account.is_some()
    }
}

/// Render a timestamp in [`TIMESTAMP_FORMAT`]
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Flatten entities to `{entityValue, status}` pairs
///
/// Missing values and statuses become `"UNKNOWN"`; unrecognised status
/// codes are kept verbatim.
pub fn flatten_entities(entities: &[AffectedEntity]) -> Vec<FlatEntity> {
    entities
        .iter()
        .map(|e| FlatEntity {
            entity_value: e
                .entity_value
                .clone()
                .unwrap_or_else(|| "UNKNOWN".to_string()),
            status: e
                .status_code
                .as_ref()
                .map(|s| s.as_str().to_string())
                .unwrap_or_else(|| "UNKNOWN".to_string()),
        })
        .collect()
}

/// Build the record for one event, optionally scoped to an account
pub fn normalize(
    event: &HealthEvent,
    description: &EventDescription,
    metadata: &Map<String, Value>,
    entities: Vec<FlatEntity>,
    account_id: Option<&str>,
) -> RecordResult<EventRecord> {
    let start_time = event
        .start_time
        .as_ref()
        .map(format_timestamp)
        .ok_or_else(|| RecordError::MissingStartTime {
            event_arn: event.arn.clone(),
        })?;

    let extra = event
        .extra
        .iter()
        .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Ok(EventRecord {
        event_arn: event.arn.clone(),
        event_region: event.region.clone().unwrap_or_default(),
        event_type_code: event.event_type_code.clone().unwrap_or_default(),
        start_time,
        event_description: vec![DescriptionEntry {
            latest_description: description.latest_description.clone().unwrap_or_default(),
        }],
        event_metadata: metadata.clone(),
        affected_account: account_id
            .filter(|id| !id.is_empty())
            .map(str::to_string),
        affected_entities: entities,
        end_time: event.end_time.as_ref().map(format_timestamp),
        last_updated_time: event.last_updated_time.as_ref().map(format_timestamp),
        extra,
    })
}
