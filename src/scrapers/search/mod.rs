//! Paginated search crawl over the portal's result pages.
//!
//! Pages are fetched one at a time through a [`ResultPageSource`] and merged
//! into a deduplicated list. The crawl ends on an empty page, a short page, two
//! consecutive pages with nothing new, cancellation, or any error other than
//! rate limiting. Errors never discard what was already collected.

pub mod extract;

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::models::{SearchFilters, SearchResultItem};
use crate::scrapers::urls::{PortalUrls, PAGE_SIZE};

pub use extract::extract_records;

/// Consecutive pages without new identifiers that end a crawl.
pub const STALE_PAGE_LIMIT: u32 = 2;

/// Items found on one result page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageResult {
    pub items: Vec<SearchResultItem>,
    /// Whether a following page may hold more results.
    pub has_more: bool,
}

impl PageResult {
    /// A rendered page; it is the last one unless it is full.
    pub fn from_items(items: Vec<SearchResultItem>) -> Self {
        let has_more = items.len() >= PAGE_SIZE;
        Self { items, has_more }
    }

    /// A page whose results never rendered. Later pages may still have data.
    pub fn unrendered() -> Self {
        Self {
            items: Vec::new(),
            has_more: true,
        }
    }
}

/// Turns a search URL into the records on that page.
#[async_trait]
pub trait ResultPageSource: Send {
    async fn fetch_page(&mut self, url: &str) -> Result<PageResult>;

    /// Release any resources held by the source.
    async fn close(&mut self) {}
}

/// Events emitted while a search is running.
#[derive(Debug, Clone)]
pub enum SearchEvent {
    /// First-seen records from one page.
    Partial {
        new_items: Vec<SearchResultItem>,
        running_total: usize,
        page_number: u32,
    },
    /// A page finished, with or without new records.
    Progress { page_number: u32, running_total: usize },
    /// The crawl ended.
    Finished {
        final_total: usize,
        pages_queried: u32,
    },
}

/// Result of a crawl.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    /// Distinct records in first-seen order.
    pub items: Vec<SearchResultItem>,
    pub pages_queried: u32,
    /// Error that ended the crawl early, if any.
    pub aborted: Option<String>,
    pub cancelled: bool,
}

/// Pauses between page requests.
#[derive(Debug, Clone, Copy)]
pub struct CrawlTiming {
    pub page_delay: Duration,
    pub rate_limit_wait: Duration,
}

impl Default for CrawlTiming {
    fn default() -> Self {
        Self {
            page_delay: Duration::from_millis(500),
            rate_limit_wait: Duration::from_secs(5),
        }
    }
}

impl CrawlTiming {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            page_delay: Duration::from_millis(settings.page_delay_ms),
            rate_limit_wait: Duration::from_millis(settings.rate_limit_wait_ms),
        }
    }
}

/// Search crawler over any page source.
pub struct SearchCrawler<S> {
    source: S,
    urls: PortalUrls,
    timing: CrawlTiming,
}

impl<S: ResultPageSource> SearchCrawler<S> {
    pub fn new(source: S, urls: PortalUrls, timing: CrawlTiming) -> Self {
        Self {
            source,
            urls,
            timing,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Crawl every result page for `term`.
    ///
    /// Fails only when the search cannot start (blank term). Cancellation is
    /// checked before each page, so one in-flight page always completes.
    pub async fn search(
        &mut self,
        term: &str,
        filters: &SearchFilters,
        cancel: &CancellationToken,
        events: Option<&mpsc::Sender<SearchEvent>>,
    ) -> Result<SearchOutcome> {
        let term = term.trim();
        if term.is_empty() {
            return Err(Error::MissingSearchTerm);
        }
        info!("Searching for '{}'", term);

        let mut outcome = SearchOutcome::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut page_number: u32 = 1;
        let mut stale_pages: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                info!("Search cancelled before page {}", page_number);
                outcome.cancelled = true;
                break;
            }

            let url = self.urls.search_url(term, page_number, filters)?;
            debug!("Fetching page {}: {}", page_number, url);

            let page = match self.source.fetch_page(&url).await {
                Ok(page) => page,
                Err(e) if e.is_rate_limit() => {
                    warn!(
                        "Rate limited on page {}, retrying in {:?}",
                        page_number, self.timing.rate_limit_wait
                    );
                    pause(self.timing.rate_limit_wait, cancel).await;
                    continue;
                }
                Err(e) => {
                    error!("Search aborted on page {}: {}", page_number, e);
                    outcome.aborted = Some(e.to_string());
                    break;
                }
            };
            outcome.pages_queried += 1;

            let raw_count = page.items.len();
            let new_items: Vec<SearchResultItem> = page
                .items
                .into_iter()
                .filter(|item| seen.insert(item.identifier.clone()))
                .collect();

            if new_items.is_empty() {
                if raw_count > 0 || page.has_more {
                    stale_pages += 1;
                    warn!(
                        "Page {} had no new records ({} consecutive)",
                        page_number, stale_pages
                    );
                }
            } else {
                stale_pages = 0;
                outcome.items.extend(new_items.iter().cloned());
                send(
                    events,
                    SearchEvent::Partial {
                        new_items,
                        running_total: outcome.items.len(),
                        page_number,
                    },
                )
                .await;
            }

            info!(
                "Page {}: {} record(s), {} total",
                page_number,
                raw_count,
                outcome.items.len()
            );
            send(
                events,
                SearchEvent::Progress {
                    page_number,
                    running_total: outcome.items.len(),
                },
            )
            .await;

            if raw_count == 0 && !page.has_more {
                debug!("Page {} is empty, end of results", page_number);
                break;
            }
            if stale_pages >= STALE_PAGE_LIMIT {
                info!("Stopping after {} pages without new records", stale_pages);
                break;
            }
            if !page.has_more {
                debug!("Page {} is the last page", page_number);
                break;
            }

            page_number += 1;
            pause(self.timing.page_delay, cancel).await;
        }

        info!(
            "Search finished: {} record(s) over {} page(s)",
            outcome.items.len(),
            outcome.pages_queried
        );
        send(
            events,
            SearchEvent::Finished {
                final_total: outcome.items.len(),
                pages_queried: outcome.pages_queried,
            },
        )
        .await;

        Ok(outcome)
    }
}

/// Sleep for `duration`, waking early on cancellation.
async fn pause(duration: Duration, cancel: &CancellationToken) {
    if duration.is_zero() {
        return;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = cancel.cancelled() => {}
    }
}

async fn send(events: Option<&mpsc::Sender<SearchEvent>>, event: SearchEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_page_may_have_more() {
        let items: Vec<SearchResultItem> = (0..PAGE_SIZE)
            .map(|n| SearchResultItem::new(format!("1-1-{n}/2024-1"), n.to_string(), None, None))
            .collect();
        assert!(PageResult::from_items(items).has_more);
        assert!(!PageResult::from_items(Vec::new()).has_more);
        assert!(PageResult::unrendered().has_more);
    }

    struct Blank;

    #[async_trait]
    impl ResultPageSource for Blank {
        async fn fetch_page(&mut self, _url: &str) -> Result<PageResult> {
            Ok(PageResult::default())
        }
    }

    #[tokio::test]
    async fn blank_term_is_rejected() {
        let mut crawler = SearchCrawler::new(Blank, PortalUrls::default(), CrawlTiming::default());
        let result = crawler
            .search("   ", &SearchFilters::default(), &CancellationToken::new(), None)
            .await;
        assert!(matches!(result, Err(Error::MissingSearchTerm)));
    }
}
