//! Cursor pagination over upstream listings
//!
//! Every listing follows the same protocol: send the cursor from the
//! previous page, stop when a page comes back without one. On the outer
//! event listing only, cursors shorter than [`MIN_CURSOR_LEN`] are treated
//! as absent in both directions, so a truncated leftover value from a
//! checkpoint is never sent back. Sub-listings pass cursors verbatim.

use std::marker::PhantomData;

use tracing::{debug, warn};

use super::error::{SourceError, SourceResult};
use super::types::{HealthEvent, Page};
use super::HealthApi;

/// Shortest cursor that is still passed to the upstream
pub const MIN_CURSOR_LEN: usize = 4;

/// Drop cursors too short to be genuine
pub fn normalize_cursor(cursor: Option<&str>) -> Option<&str> {
    cursor.filter(|c| c.len() >= MIN_CURSOR_LEN)
}

fn normalize_owned(cursor: Option<String>) -> Option<String> {
    cursor.filter(|c| c.len() >= MIN_CURSOR_LEN)
}

/// Outcome of a single outer page fetch
///
/// Keeps "the upstream failed" apart from "the listing is done" so the
/// driver can decide what a failure means.
#[derive(Debug)]
pub enum PageFetch<T> {
    /// A page arrived (possibly empty, possibly the last one)
    Page(Page<T>),
    /// The fetch failed before a page arrived
    Failed(SourceError),
}

impl<T> PageFetch<T> {
    /// Collapse a failure into an empty page without cursor
    ///
    /// Callers using this cannot tell a failure from exhaustion.
    pub fn into_page_lossy(self) -> Page<T> {
        match self {
            Self::Page(page) => page,
            Self::Failed(_) => Page::empty(),
        }
    }

    /// Convert into a plain result
    pub fn into_result(self) -> SourceResult<Page<T>> {
        match self {
            Self::Page(page) => Ok(page),
            Self::Failed(err) => Err(err),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Fetcher for the top-level event listing
pub struct PaginatedFetcher<A> {
    api: A,
    page_size: Option<u32>,
}

impl<A: HealthApi> PaginatedFetcher<A> {
    /// Create a fetcher with an optional page-size hint
    pub fn new(api: A, page_size: Option<u32>) -> Self {
        Self { api, page_size }
    }

    /// Fetch one page starting at `cursor`
    pub fn fetch_page(&self, cursor: Option<&str>) -> PageFetch<HealthEvent> {
        let cursor = normalize_cursor(cursor);
        debug!(cursor = cursor.unwrap_or("<start>"), "Fetching event page");

        match self.api.list_events(cursor, self.page_size) {
            Ok(page) => PageFetch::Page(Page::new(page.items, normalize_owned(page.next_cursor))),
            Err(e) => {
                warn!(
                    cursor = cursor.unwrap_or("<start>"),
                    operation = e.operation(),
                    error = %e,
                    "Event page fetch failed"
                );
                PageFetch::Failed(e)
            }
        }
    }

    /// Lazily walk the listing from `start`
    pub fn pages(
        &self,
        start: Option<String>,
    ) -> Pages<HealthEvent, impl FnMut(Option<&str>) -> SourceResult<Page<HealthEvent>> + '_> {
        Pages::new(
            move |cursor: Option<&str>| self.fetch_page(cursor).into_result(),
            start,
        )
    }

    /// The wrapped API
    pub fn api(&self) -> &A {
        &self.api
    }
}

/// Forward-only sequence of pages
///
/// Each call to `next` performs one fetch. Cursors are handed back exactly
/// as received; the sequence ends after a page without a cursor or after
/// the first error, which is yielded once.
pub struct Pages<T, F> {
    fetch: F,
    cursor: Option<String>,
    done: bool,
    _item: PhantomData<fn() -> T>,
}

impl<T, F> Pages<T, F>
where
    F: FnMut(Option<&str>) -> SourceResult<Page<T>>,
{
    pub fn new(fetch: F, start: Option<String>) -> Self {
        Self {
            fetch,
            cursor: start,
            done: false,
            _item: PhantomData,
        }
    }

    /// Cursor the next fetch will send
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }
}

impl<T, F> Iterator for Pages<T, F>
where
    F: FnMut(Option<&str>) -> SourceResult<Page<T>>,
{
    type Item = SourceResult<Page<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match (self.fetch)(self.cursor.as_deref()) {
            Ok(page) => {
                self.cursor = page.next_cursor.clone();
                self.done = self.cursor.is_none();
                Some(Ok(page))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
