//! Scripted in-memory health API
//!
//! Serves pre-built pages and fan-out data, records the cursors it was
//! asked for, and can be told to fail at chosen points.

use std::cell::RefCell;
use std::collections::HashMap;

use super::error::{SourceError, SourceResult};
use super::types::{AffectedEntity, EntityFilter, EventDetails, HealthEvent, Page};
use super::HealthApi;

const OFFSET_PREFIX: &str = "offset-";

#[derive(Debug, Default)]
struct Calls {
    event_cursors: Vec<Option<String>>,
    account_calls: usize,
    detail_calls: Vec<(String, Option<String>)>,
    entity_calls: usize,
}

/// In-memory [`HealthApi`] backed by scripted data
#[derive(Debug, Default)]
pub struct InMemoryHealthApi {
    event_pages: HashMap<Option<String>, Page<HealthEvent>>,
    last_event_cursor: Option<Option<String>>,
    event_failures: RefCell<HashMap<Option<String>, u32>>,
    accounts: HashMap<String, Vec<String>>,
    account_failures: HashMap<String, usize>,
    details: HashMap<(String, Option<String>), Vec<EventDetails>>,
    detail_failures: Vec<(String, Option<String>)>,
    entities: HashMap<(String, String), Vec<AffectedEntity>>,
    entity_failures: HashMap<(String, String), usize>,
    calls: RefCell<Calls>,
}

impl InMemoryHealthApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an outer page
    ///
    /// The first page answers the cursor-less request; each later page
    /// answers the cursor returned by the page before it.
    pub fn with_event_page(mut self, events: Vec<HealthEvent>, next_cursor: Option<&str>) -> Self {
        let key = self.last_event_cursor.take().flatten();
        let next = next_cursor.map(str::to_string);
        self.last_event_cursor = Some(next.clone());
        self.event_pages.insert(key, Page::new(events, next));
        self
    }

    /// Make every request for `cursor` fail
    pub fn fail_event_page(self, cursor: Option<&str>) -> Self {
        self.fail_event_page_times(cursor, u32::MAX)
    }

    /// Make the next `times` requests for `cursor` fail
    pub fn fail_event_page_times(self, cursor: Option<&str>, times: u32) -> Self {
        self.event_failures
            .borrow_mut()
            .insert(cursor.map(str::to_string), times);
        self
    }

    /// Script the affected accounts of an event
    pub fn with_accounts(mut self, event_arn: &str, accounts: &[&str]) -> Self {
        self.accounts.insert(
            event_arn.to_string(),
            accounts.iter().map(|a| a.to_string()).collect(),
        );
        self
    }

    /// Fail account listing once `served` accounts have been returned
    pub fn fail_accounts_after(mut self, event_arn: &str, served: usize) -> Self {
        self.account_failures.insert(event_arn.to_string(), served);
        self
    }

    /// Script the detail lookup for an event, scoped or unscoped
    pub fn with_details(
        mut self,
        event_arn: &str,
        account_id: Option<&str>,
        details: Vec<EventDetails>,
    ) -> Self {
        self.details.insert(
            (event_arn.to_string(), account_id.map(str::to_string)),
            details,
        );
        self
    }

    /// Make a detail lookup fail
    pub fn fail_details(mut self, event_arn: &str, account_id: Option<&str>) -> Self {
        self.detail_failures
            .push((event_arn.to_string(), account_id.map(str::to_string)));
        self
    }

    /// Script the affected entities for an (event, account) pair
    pub fn with_entities(
        mut self,
        event_arn: &str,
        account_id: &str,
        entities: Vec<AffectedEntity>,
    ) -> Self {
        self.entities
            .insert((event_arn.to_string(), account_id.to_string()), entities);
        self
    }

    /// Fail entity listing once `served` entities have been returned
    pub fn fail_entities_after(mut self, event_arn: &str, account_id: &str, served: usize) -> Self {
        self.entity_failures
            .insert((event_arn.to_string(), account_id.to_string()), served);
        self
    }

    /// Script a complete fan-out for one event
    ///
    /// Each account gets a scoped detail entry built from `event` plus the
    /// given entities. With no accounts, an unscoped detail entry is
    /// scripted instead.
    pub fn with_event_fanout(
        self,
        event: &HealthEvent,
        description: &str,
        accounts: Vec<(&str, Vec<AffectedEntity>)>,
    ) -> Self {
        let arn = event.arn.clone();
        if accounts.is_empty() {
            let details = EventDetails::new(event.clone()).with_description(description);
            return self.with_details(&arn, None, vec![details]);
        }

        let ids: Vec<&str> = accounts.iter().map(|(id, _)| *id).collect();
        let mut api = self.with_accounts(&arn, &ids);
        for (account, entities) in accounts {
            let details = EventDetails::new(event.clone())
                .with_account(account)
                .with_description(description);
            api = api
                .with_details(&arn, Some(account), vec![details])
                .with_entities(&arn, account, entities);
        }
        api
    }

    /// Cursors the outer listing was called with, in order
    pub fn event_cursors_seen(&self) -> Vec<Option<String>> {
        self.calls.borrow().event_cursors.clone()
    }

    /// Number of account-listing calls made
    pub fn account_calls(&self) -> usize {
        self.calls.borrow().account_calls
    }

    /// Detail lookups made, as (event, account) pairs
    pub fn detail_calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.borrow().detail_calls.clone()
    }

    /// Number of entity-listing calls made
    pub fn entity_calls(&self) -> usize {
        self.calls.borrow().entity_calls
    }
}

fn parse_offset(operation: &'static str, cursor: Option<&str>) -> SourceResult<usize> {
    match cursor {
        None => Ok(0),
        Some(raw) => raw
            .strip_prefix(OFFSET_PREFIX)
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| SourceError::api(operation, format!("invalid next token: {raw}"))),
    }
}

fn slice_page<T: Clone>(items: &[T], offset: usize, page_size: u32) -> Page<T> {
    let size = page_size.max(1) as usize;
    let end = (offset + size).min(items.len());
    let chunk = items.get(offset..end).unwrap_or_default().to_vec();
    let next = (end < items.len()).then(|| format!("{OFFSET_PREFIX}{end}"));
    Page::new(chunk, next)
}

impl HealthApi for InMemoryHealthApi {
    fn list_events(
        &self,
        cursor: Option<&str>,
        _page_size: Option<u32>,
    ) -> SourceResult<Page<HealthEvent>> {
        const OP: &str = "DescribeEventsForOrganization";
        let key = cursor.map(str::to_string);
        self.calls.borrow_mut().event_cursors.push(key.clone());

        if let Some(remaining) = self.event_failures.borrow_mut().get_mut(&key) {
            if *remaining > 0 {
                *remaining = remaining.saturating_sub(1);
                return Err(SourceError::transport(OP, "connection reset"));
            }
        }

        match self.event_pages.get(&key) {
            Some(page) => Ok(page.clone()),
            None if key.is_none() => Ok(Page::empty()),
            None => Err(SourceError::api(
                OP,
                format!("unknown next token: {}", key.unwrap_or_default()),
            )),
        }
    }

    fn list_affected_accounts(
        &self,
        event_arn: &str,
        cursor: Option<&str>,
        page_size: u32,
    ) -> SourceResult<Page<String>> {
        const OP: &str = "DescribeAffectedAccountsForOrganization";
        self.calls.borrow_mut().account_calls += 1;

        let offset = parse_offset(OP, cursor)?;
        if let Some(&served) = self.account_failures.get(event_arn) {
            if offset >= served {
                return Err(SourceError::transport(OP, "read timed out"));
            }
        }

        let accounts = self.accounts.get(event_arn).map(Vec::as_slice).unwrap_or(&[]);
        Ok(slice_page(accounts, offset, page_size))
    }

    fn describe_event_details(
        &self,
        event_arn: &str,
        account_id: Option<&str>,
    ) -> SourceResult<Vec<EventDetails>> {
        let key = (event_arn.to_string(), account_id.map(str::to_string));
        self.calls.borrow_mut().detail_calls.push(key.clone());

        if self.detail_failures.contains(&key) {
            return Err(SourceError::api(
                "DescribeEventDetailsForOrganization",
                "access denied",
            ));
        }
        Ok(self.details.get(&key).cloned().unwrap_or_default())
    }

    fn list_affected_entities(
        &self,
        filter: &EntityFilter,
        cursor: Option<&str>,
        page_size: u32,
    ) -> SourceResult<Page<AffectedEntity>> {
        const OP: &str = "DescribeAffectedEntitiesForOrganization";
        self.calls.borrow_mut().entity_calls += 1;

        let offset = parse_offset(OP, cursor)?;
        let key = (filter.event_arn.clone(), filter.account_id.clone());
        if let Some(&served) = self.entity_failures.get(&key) {
            if offset >= served {
                return Err(SourceError::transport(OP, "read timed out"));
            }
        }

        let matching: Vec<AffectedEntity> = self
            .entities
            .get(&key)
            .map(|all| {
                all.iter()
                    .filter(|e| match &e.status_code {
                        Some(status) => filter.status_codes.contains(status),
                        None => true,
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(slice_page(&matching, offset, page_size))
    }
}
