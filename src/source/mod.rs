//! Upstream health API abstraction
//!
//! The [`HealthApi`] trait is the boundary to the source-of-record. Every
//! call blocks until the upstream answers; the pipeline is strictly
//! sequential, so implementations need no interior locking beyond what
//! their own clients require.
//!
//! - [`pagination`]: cursor handling and the lazy [`Pages`] sequence
//! - [`resolver`]: per-event fan-out into accounts, details and entities
//! - [`memory`]: scripted in-memory backend for tests and dry runs

mod error;
pub mod memory;
pub mod pagination;
pub mod resolver;
mod types;

pub use error::{SourceError, SourceResult};
pub use memory::InMemoryHealthApi;
pub use pagination::{MIN_CURSOR_LEN, PageFetch, PaginatedFetcher, Pages, normalize_cursor};
pub use resolver::{DependencyResolver, Resolved};
pub use types::{
    AffectedEntity, EntityFilter, EntityStatus, EventDescription, EventDetails, HealthEvent, Page,
};

/// Storage contract for the upstream organization health API
///
/// Cursors are opaque: whatever a page hands back must be passed to the
/// next call verbatim. A page without a cursor ends the listing.
pub trait HealthApi {
    /// List one page of organization events
    fn list_events(
        &self,
        cursor: Option<&str>,
        page_size: Option<u32>,
    ) -> SourceResult<Page<HealthEvent>>;

    /// List one page of accounts affected by an event
    fn list_affected_accounts(
        &self,
        event_arn: &str,
        cursor: Option<&str>,
        page_size: u32,
    ) -> SourceResult<Page<String>>;

    /// Look up event details, optionally scoped to one account
    ///
    /// An empty result means no detail is available, not an error.
    fn describe_event_details(
        &self,
        event_arn: &str,
        account_id: Option<&str>,
    ) -> SourceResult<Vec<EventDetails>>;

    /// List one page of entities affected by an event in one account
    fn list_affected_entities(
        &self,
        filter: &EntityFilter,
        cursor: Option<&str>,
        page_size: u32,
    ) -> SourceResult<Page<AffectedEntity>>;
}

impl<T: HealthApi + ?Sized> HealthApi for &T {
    fn list_events(
        &self,
        cursor: Option<&str>,
        page_size: Option<u32>,
    ) -> SourceResult<Page<HealthEvent>> {
        (**self).list_events(cursor, page_size)
    }

    fn list_affected_accounts(
        &self,
        event_arn: &str,
        cursor: Option<&str>,
        page_size: u32,
    ) -> SourceResult<Page<String>> {
        (**self).list_affected_accounts(event_arn, cursor, page_size)
    }

    fn describe_event_details(
        &self,
        event_arn: &str,
        account_id: Option<&str>,
    ) -> SourceResult<Vec<EventDetails>> {
        (**self).describe_event_details(event_arn, account_id)
    }

    fn list_affected_entities(
        &self,
        filter: &EntityFilter,
        cursor: Option<&str>,
        page_size: u32,
    ) -> SourceResult<Page<AffectedEntity>> {
        (**self).list_affected_entities(filter, cursor, page_size)
    }
}
