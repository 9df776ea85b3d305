//! Upstream health API data types

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A top-level organization health event
///
/// Only the identifier, region, type code and the three timestamps are
/// interpreted. Every other attribute the upstream sends is kept in
/// `extra` and travels through to the published record untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthEvent {
    /// Event identifier, unique within a run
    pub arn: String,
    /// Region the event applies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Event type classifier (e.g. `AWS_EC2_OPERATIONAL_ISSUE`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type_code: Option<String>,
    /// When the event started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// When the event ended, if it has
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// When the event was last updated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_time: Option<DateTime<Utc>>,
    /// Remaining source attributes
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HealthEvent {
    /// Create an event with only an identifier
    pub fn new(arn: impl Into<String>) -> Self {
        Self {
            arn: arn.into(),
            region: None,
            event_type_code: None,
            start_time: None,
            end_time: None,
            last_updated_time: None,
            extra: Map::new(),
        }
    }

    /// Set the region
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Set the event type code
    pub fn with_type_code(mut self, code: impl Into<String>) -> Self {
        self.event_type_code = Some(code.into());
        self
    }

    /// Set the start time
    pub fn with_start_time(mut self, at: DateTime<Utc>) -> Self {
        self.start_time = Some(at);
        self
    }

    /// Set the end time
    pub fn with_end_time(mut self, at: DateTime<Utc>) -> Self {
        self.end_time = Some(at);
        self
    }

    /// Set the last-updated time
    pub fn with_last_updated_time(mut self, at: DateTime<Utc>) -> Self {
        self.last_updated_time = Some(at);
        self
    }

    /// Add a pass-through attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Latest human-readable description of an event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_description: Option<String>,
}

impl EventDescription {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            latest_description: Some(text.into()),
        }
    }
}

/// One successful entry of an event detail lookup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDetails {
    /// Account the details were requested for, if scoped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_account_id: Option<String>,
    /// Full event payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<HealthEvent>,
    /// Description payload
    #[serde(default)]
    pub event_description: EventDescription,
    /// Opaque metadata, passed through as-is
    #[serde(default)]
    pub event_metadata: Map<String, Value>,
}

impl EventDetails {
    /// Create details wrapping an event
    pub fn new(event: HealthEvent) -> Self {
        Self {
            event: Some(event),
            ..Default::default()
        }
    }

    /// Set the account the details belong to
    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.aws_account_id = Some(account_id.into());
        self
    }

    /// Set the latest description
    pub fn with_description(mut self, text: impl Into<String>) -> Self {
        self.event_description = EventDescription::new(text);
        self
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.event_metadata.insert(key.into(), value.into());
        self
    }
}

/// Status of an affected entity
///
/// Codes outside the documented set are kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntityStatus {
    Impaired,
    Unimpaired,
    Unknown,
    Pending,
    Other(String),
}

impl EntityStatus {
    /// The status codes requested from the entity API
    pub const FILTER: [EntityStatus; 4] = [
        EntityStatus::Impaired,
        EntityStatus::Unimpaired,
        EntityStatus::Unknown,
        EntityStatus::Pending,
    ];

    /// Wire representation
    pub fn as_str(&self) -> &str {
        match self {
            Self::Impaired => "IMPAIRED",
            Self::Unimpaired => "UNIMPAIRED",
            Self::Unknown => "UNKNOWN",
            Self::Pending => "PENDING",
            Self::Other(code) => code,
        }
    }
}

impl From<String> for EntityStatus {
    fn from(code: String) -> Self {
        match code.as_str() {
            "IMPAIRED" => Self::Impaired,
            "UNIMPAIRED" => Self::Unimpaired,
            "UNKNOWN" => Self::Unknown,
            "PENDING" => Self::Pending,
            _ => Self::Other(code),
        }
    }
}

impl From<&str> for EntityStatus {
    fn from(code: &str) -> Self {
        Self::from(code.to_string())
    }
}

impl From<EntityStatus> for String {
    fn from(status: EntityStatus) -> Self {
        match status {
            EntityStatus::Other(code) => code,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A leaf entity affected by an event in one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffectedEntity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<EntityStatus>,
}

impl AffectedEntity {
    pub fn new(value: impl Into<String>, status: impl Into<EntityStatus>) -> Self {
        Self {
            entity_value: Some(value.into()),
            status_code: Some(status.into()),
        }
    }
}

/// Server-side filter for an affected-entities listing
#[derive(Debug, Clone, PartialEq)]
pub struct EntityFilter {
    pub event_arn: String,
    pub account_id: String,
    pub status_codes: Vec<EntityStatus>,
}

impl EntityFilter {
    /// Filter on one (event, account) pair with every known status code
    pub fn for_account(event_arn: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            event_arn: event_arn.into(),
            account_id: account_id.into(),
            status_codes: EntityStatus::FILTER.to_vec(),
        }
    }
}

/// One page of a paginated listing
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Continuation cursor; `None` when the listing is exhausted
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next_cursor: Option<String>) -> Self {
        Self { items, next_cursor }
    }

    /// The terminal "nothing more" page
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
        }
    }

    /// True for an empty page without continuation
    pub fn is_exhausted(&self) -> bool {
        self.items.is_empty() && self.next_cursor.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_status_passes_unknown_codes_through() {
        let status: EntityStatus = serde_json::from_value(json!("RESOLVED")).unwrap();
        assert_eq!(status, EntityStatus::Other("RESOLVED".to_string()));
        assert_eq!(serde_json::to_value(&status).unwrap(), json!("RESOLVED"));

        let status: EntityStatus = serde_json::from_value(json!("IMPAIRED")).unwrap();
        assert_eq!(status, EntityStatus::Impaired);
        assert_eq!(status.to_string(), "IMPAIRED");
    }

    #[test]
    fn test_health_event_keeps_unknown_attributes() {
        let event: HealthEvent = serde_json::from_value(json!({
            "arn": "evt-1",
            "region": "eu-west-1",
            "service": "EC2",
            "statusCode": "open",
            "startTime": "2024-03-01T10:00:00Z"
        }))
        .unwrap();

        assert_eq!(event.arn, "evt-1");
        assert_eq!(event.region.as_deref(), Some("eu-west-1"));
        assert!(event.start_time.is_some());
        assert_eq!(event.extra.get("service"), Some(&json!("EC2")));
        assert_eq!(event.extra.get("statusCode"), Some(&json!("open")));
        assert!(!event.extra.contains_key("arn"));
    }

    #[test]
    fn test_entity_filter_requests_all_statuses() {
        let filter = EntityFilter::for_account("evt-1", "111111111111");
        assert_eq!(filter.status_codes.len(), 4);
        assert!(filter.status_codes.contains(&EntityStatus::Pending));
    }

    #[test]
    fn test_page_exhaustion() {
        assert!(Page::<String>::empty().is_exhausted());
        assert!(!Page::<String>::new(Vec::new(), Some("next".into())).is_exhausted());
        assert!(!Page::new(vec!["a".to_string()], None).is_exhausted());
    }
}
