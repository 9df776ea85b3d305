//! Per-event fan-out into affected accounts, details and entities

use tracing::{debug, warn};

use super::HealthApi;
use super::error::{SourceError, SourceResult};
use super::pagination::Pages;
use super::types::{AffectedEntity, EntityFilter, EventDetails, HealthEvent, Page};

/// Accumulated result of a fully driven sub-listing
///
/// `error` is set when a page failed part-way; `items` then holds what
/// arrived before the failure.
#[derive(Debug)]
pub struct Resolved<T> {
    pub items: Vec<T>,
    pub error: Option<SourceError>,
}

impl<T> Resolved<T> {
    /// True when the listing ran to its last page
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

/// Resolves the dependent collections of one event
pub struct DependencyResolver<A> {
    api: A,
    page_size: u32,
}

impl<A: HealthApi> DependencyResolver<A> {
    /// Create a resolver using `page_size` for both sub-listings
    pub fn new(api: A, page_size: u32) -> Self {
        Self { api, page_size }
    }

    /// All accounts affected by `event`
    pub fn resolve_scope(&self, event: &HealthEvent) -> Resolved<String> {
        let pages = Pages::new(
            |cursor: Option<&str>| {
                self.api
                    .list_affected_accounts(&event.arn, cursor, self.page_size)
            },
            None,
        );
        drain(pages, "affected_accounts", &event.arn, None)
    }

    /// All entities affected by `event` in `account_id`
    pub fn resolve_entities(&self, event: &HealthEvent, account_id: &str) -> Resolved<AffectedEntity> {
        let filter = EntityFilter::for_account(&event.arn, account_id);
        let pages = Pages::new(
            |cursor: Option<&str>| {
                self.api
                    .list_affected_entities(&filter, cursor, self.page_size)
            },
            None,
        );
        drain(pages, "affected_entities", &event.arn, Some(account_id))
    }

    /// Detail lookup for `event`, scoped to an account or unscoped
    ///
    /// Returns `Ok(None)` when the upstream has no usable entry.
    pub fn describe(
        &self,
        event: &HealthEvent,
        account_id: Option<&str>,
    ) -> SourceResult<Option<EventDetails>> {
        let entries = self.api.describe_event_details(&event.arn, account_id)?;
        Ok(entries.into_iter().find(|d| d.event.is_some()))
    }
}

fn drain<T, F>(
    pages: Pages<T, F>,
    stage: &'static str,
    event_arn: &str,
    account_id: Option<&str>,
) -> Resolved<T>
where
    F: FnMut(Option<&str>) -> SourceResult<Page<T>>,
{
    let mut items = Vec::new();
    let mut page_count = 0usize;

    for page in pages {
        match page {
            Ok(page) => {
                page_count += 1;
                items.extend(page.items);
            }
            Err(e) => {
                warn!(
                    event_arn,
                    account_id = account_id.unwrap_or(""),
                    stage,
                    kept = items.len(),
                    error = %e,
                    "Sub-listing failed, keeping partial result"
                );
                return Resolved {
                    items,
                    error: Some(e),
                };
            }
        }
    }

    debug!(event_arn, stage, pages = page_count, items = items.len(), "Sub-listing complete");
    Resolved { items, error: None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::memory::InMemoryHealthApi;
    use crate::source::EntityStatus;

    #[test]
    fn test_resolve_scope_pages_to_exhaustion() {
        let api = InMemoryHealthApi::new().with_accounts("evt-1", &["a1", "a2", "a3", "a4", "a5"]);
        let resolver = DependencyResolver::new(&api, 2);

        let scope = resolver.resolve_scope(&HealthEvent::new("evt-1"));
        assert!(scope.is_complete());
        assert_eq!(scope.items, vec!["a1", "a2", "a3", "a4", "a5"]);
        assert_eq!(api.account_calls(), 3);
    }

    #[test]
    fn test_resolve_scope_keeps_partial_result_on_error() {
        let api = InMemoryHealthApi::new()
            .with_accounts("evt-1", &["a1", "a2", "a3", "a4"])
            .fail_accounts_after("evt-1", 2);
        let resolver = DependencyResolver::new(&api, 2);

        let scope = resolver.resolve_scope(&HealthEvent::new("evt-1"));
        assert!(!scope.is_complete());
        assert_eq!(scope.items, vec!["a1", "a2"]);
    }

    /// Upstream whose sub-listings hand out two-character tokens
    struct ShortTokenApi;

    impl HealthApi for ShortTokenApi {
        fn list_events(
            &self,
            _cursor: Option<&str>,
            _page_size: Option<u32>,
        ) -> SourceResult<Page<HealthEvent>> {
            Ok(Page::empty())
        }

        fn list_affected_accounts(
            &self,
            _event_arn: &str,
            cursor: Option<&str>,
            _page_size: u32,
        ) -> SourceResult<Page<String>> {
            match cursor {
                None => Ok(Page::new(vec!["acct-A".to_string()], Some("p2".to_string()))),
                Some("p2") => Ok(Page::new(vec!["acct-B".to_string()], None)),
                Some(other) => Err(SourceError::api("ListAccounts", format!("bad token {other}"))),
            }
        }

        fn describe_event_details(
            &self,
            _event_arn: &str,
            _account_id: Option<&str>,
        ) -> SourceResult<Vec<EventDetails>> {
            Ok(Vec::new())
        }

        fn list_affected_entities(
            &self,
            _filter: &EntityFilter,
            cursor: Option<&str>,
            _page_size: u32,
        ) -> SourceResult<Page<AffectedEntity>> {
            Ok(match cursor {
                None => Page::new(
                    vec![AffectedEntity::new("v1", EntityStatus::Impaired)],
                    Some("e2".to_string()),
                ),
                Some(_) => Page::new(vec![AffectedEntity::new("v2", EntityStatus::Impaired)], None),
            })
        }
    }

    #[test]
    fn test_sub_listings_follow_short_tokens() {
        let resolver = DependencyResolver::new(ShortTokenApi, 1);
        let event = HealthEvent::new("evt-1");

        let scope = resolver.resolve_scope(&event);
        assert!(scope.is_complete());
        assert_eq!(scope.items, vec!["acct-A", "acct-B"]);

        let entities = resolver.resolve_entities(&event, "acct-B");
        assert!(entities.is_complete());
        let values: Vec<&str> = entities
            .items
            .iter()
            .filter_map(|e| e.entity_value.as_deref())
            .collect();
        assert_eq!(values, vec!["v1", "v2"]);
    }

    #[test]
    fn test_resolve_entities_uses_status_filter() {
        let api = InMemoryHealthApi::new().with_entities(
            "evt-1",
            "acct-A",
            vec![
                AffectedEntity::new("v1", EntityStatus::Impaired),
                AffectedEntity::new("v2", EntityStatus::Pending),
            ],
        );
        let resolver = DependencyResolver::new(&api, 50);

        let entities = resolver.resolve_entities(&HealthEvent::new("evt-1"), "acct-A");
        assert!(entities.is_complete());
        assert_eq!(entities.items.len(), 2);
        assert!(resolver
            .resolve_entities(&HealthEvent::new("evt-1"), "acct-B")
            .items
            .is_empty());
    }

    #[test]
    fn test_describe_skips_entries_without_event() {
        let event = HealthEvent::new("evt-1");
        let api = InMemoryHealthApi::new()
            .with_details("evt-1", None, vec![EventDetails::default()])
            .with_details("evt-1", Some("acct-A"), vec![EventDetails::new(event.clone())]);
        let resolver = DependencyResolver::new(&api, 50);

        assert!(resolver.describe(&event, None).unwrap().is_none());
        assert!(resolver.describe(&event, Some("acct-A")).unwrap().is_some());
        assert!(resolver.describe(&event, Some("acct-B")).unwrap().is_none());
    }

    #[test]
    fn test_describe_propagates_errors() {
        let api = InMemoryHealthApi::new().fail_details("evt-1", Some("acct-A"));
        let resolver = DependencyResolver::new(&api, 50);

        let err = resolver
            .describe(&HealthEvent::new("evt-1"), Some("acct-A"))
            .unwrap_err();
        assert_eq!(err.operation(), "DescribeEventDetailsForOrganization");
    }
}
