//! Search crawl loop against scripted result pages.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use atacquire::models::{SearchFilters, SearchResultItem};
use atacquire::scrapers::{
    CrawlTiming, PageResult, PortalUrls, ResultPageSource, SearchCrawler, SearchEvent, PAGE_SIZE,
};
use atacquire::{Error, Result};

/// Serves pre-recorded pages in order; past the script every page is empty.
struct ScriptedSource {
    pages: VecDeque<Result<PageResult>>,
    requested: Vec<String>,
    cancel_on_request: Option<(usize, CancellationToken)>,
}

impl ScriptedSource {
    fn new(pages: Vec<Result<PageResult>>) -> Self {
        Self {
            pages: pages.into(),
            requested: Vec::new(),
            cancel_on_request: None,
        }
    }
}

#[async_trait]
impl ResultPageSource for ScriptedSource {
    async fn fetch_page(&mut self, url: &str) -> Result<PageResult> {
        self.requested.push(url.to_string());
        if let Some((n, ref token)) = self.cancel_on_request {
            if self.requested.len() == n {
                token.cancel();
            }
        }
        self.pages
            .pop_front()
            .unwrap_or_else(|| Ok(PageResult::default()))
    }
}

fn items(range: std::ops::Range<usize>) -> Vec<SearchResultItem> {
    range
        .map(|n| {
            SearchResultItem::new(
                format!("1-1-{n}/2024-1"),
                format!("{n}/2024"),
                Some("Prefeitura".into()),
                Some("Merenda escolar".into()),
            )
        })
        .collect()
}

fn page(range: std::ops::Range<usize>) -> Result<PageResult> {
    Ok(PageResult::from_items(items(range)))
}

fn crawler(pages: Vec<Result<PageResult>>) -> SearchCrawler<ScriptedSource> {
    SearchCrawler::new(
        ScriptedSource::new(pages),
        PortalUrls::default(),
        CrawlTiming {
            page_delay: Duration::ZERO,
            rate_limit_wait: Duration::from_millis(1),
        },
    )
}

async fn run(
    crawler: &mut SearchCrawler<ScriptedSource>,
    cancel: &CancellationToken,
) -> (atacquire::scrapers::SearchOutcome, Vec<SearchEvent>) {
    let (tx, mut rx) = mpsc::channel(64);
    let outcome = crawler
        .search("merenda escolar", &SearchFilters::default(), cancel, Some(&tx))
        .await
        .unwrap();
    drop(tx);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    (outcome, events)
}

#[tokio::test]
async fn full_page_then_short_page() {
    let mut crawler = crawler(vec![page(0..PAGE_SIZE), page(PAGE_SIZE..PAGE_SIZE + 50)]);
    let (outcome, events) = run(&mut crawler, &CancellationToken::new()).await;

    assert_eq!(outcome.items.len(), 383);
    assert_eq!(outcome.pages_queried, 2);
    assert!(outcome.aborted.is_none());

    let requested = &crawler.source().requested;
    assert_eq!(requested.len(), 2);
    assert!(requested[0].contains("q=merenda%20escolar"));
    assert!(requested[0].contains("pagina=1&tam_pagina=333"));
    assert!(requested[1].contains("pagina=2&"));

    let partial_totals: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            SearchEvent::Partial { running_total, .. } => Some(*running_total),
            _ => None,
        })
        .collect();
    assert_eq!(partial_totals, vec![333, 383]);
    assert!(matches!(
        events.last(),
        Some(SearchEvent::Finished {
            final_total: 383,
            pages_queried: 2
        })
    ));
}

#[tokio::test]
async fn duplicates_are_forwarded_once_in_first_seen_order() {
    let mut crawler = crawler(vec![
        page(0..PAGE_SIZE),
        page(300..300 + PAGE_SIZE),
        page(600..610),
    ]);
    let (outcome, events) = run(&mut crawler, &CancellationToken::new()).await;

    assert_eq!(outcome.items.len(), 633);
    assert_eq!(outcome.pages_queried, 3);
    assert_eq!(outcome.items[0].identifier, "1-1-0/2024-1");
    assert_eq!(outcome.items[333].identifier, "1-1-333/2024-1");

    let forwarded: usize = events
        .iter()
        .map(|e| match e {
            SearchEvent::Partial { new_items, .. } => new_items.len(),
            _ => 0,
        })
        .sum();
    assert_eq!(forwarded, 633);
}

#[tokio::test]
async fn two_stale_pages_end_the_crawl() {
    let mut crawler = crawler(vec![
        page(0..PAGE_SIZE),
        page(0..PAGE_SIZE),
        page(0..PAGE_SIZE),
        page(1000..1000 + PAGE_SIZE),
    ]);
    let (outcome, _) = run(&mut crawler, &CancellationToken::new()).await;

    assert_eq!(outcome.items.len(), PAGE_SIZE);
    assert_eq!(outcome.pages_queried, 3);
    assert_eq!(crawler.source().requested.len(), 3);
}

#[tokio::test]
async fn stale_counter_resets_on_new_records() {
    let mut crawler = crawler(vec![
        page(0..PAGE_SIZE),
        page(0..PAGE_SIZE),
        page(PAGE_SIZE..2 * PAGE_SIZE),
        page(0..PAGE_SIZE),
        page(2 * PAGE_SIZE..2 * PAGE_SIZE + 1),
    ]);
    let (outcome, _) = run(&mut crawler, &CancellationToken::new()).await;

    assert_eq!(outcome.items.len(), 2 * PAGE_SIZE + 1);
    assert_eq!(outcome.pages_queried, 5);
}

#[tokio::test]
async fn short_page_ends_the_crawl() {
    let mut crawler = crawler(vec![page(0..10), page(10..20)]);
    let (outcome, _) = run(&mut crawler, &CancellationToken::new()).await;

    assert_eq!(outcome.items.len(), 10);
    assert_eq!(outcome.pages_queried, 1);
}

#[tokio::test]
async fn empty_page_ends_the_crawl() {
    let mut crawler = crawler(vec![page(0..PAGE_SIZE), page(0..0)]);
    let (outcome, _) = run(&mut crawler, &CancellationToken::new()).await;

    assert_eq!(outcome.items.len(), PAGE_SIZE);
    assert_eq!(outcome.pages_queried, 2);
}

#[tokio::test]
async fn unrendered_page_does_not_end_the_crawl() {
    let mut crawler = crawler(vec![
        page(0..PAGE_SIZE),
        Ok(PageResult::unrendered()),
        page(PAGE_SIZE..PAGE_SIZE + 5),
    ]);
    let (outcome, _) = run(&mut crawler, &CancellationToken::new()).await;

    assert_eq!(outcome.items.len(), PAGE_SIZE + 5);
    assert_eq!(outcome.pages_queried, 3);
}

#[tokio::test]
async fn rate_limited_page_is_retried() {
    let mut crawler = crawler(vec![
        page(0..PAGE_SIZE),
        Err(Error::Browser("HTTP 429 Too Many Requests".into())),
        Err(Error::RateLimited),
        page(PAGE_SIZE..PAGE_SIZE + 3),
    ]);
    let (outcome, _) = run(&mut crawler, &CancellationToken::new()).await;

    assert_eq!(outcome.items.len(), PAGE_SIZE + 3);
    assert_eq!(outcome.pages_queried, 2);

    let requested = &crawler.source().requested;
    assert_eq!(requested.len(), 4);
    assert!(requested[1..].iter().all(|url| url.contains("pagina=2&")));
}

#[tokio::test]
async fn other_errors_abort_with_partial_results() {
    let mut crawler = crawler(vec![
        page(0..PAGE_SIZE),
        Err(Error::Browser("navigation failed".into())),
        page(PAGE_SIZE..PAGE_SIZE + 3),
    ]);
    let (outcome, events) = run(&mut crawler, &CancellationToken::new()).await;

    assert_eq!(outcome.items.len(), PAGE_SIZE);
    assert_eq!(outcome.pages_queried, 1);
    assert!(outcome.aborted.unwrap().contains("navigation failed"));
    assert!(matches!(
        events.last(),
        Some(SearchEvent::Finished { final_total, .. }) if *final_total == PAGE_SIZE
    ));
}

#[tokio::test]
async fn cancellation_stops_after_the_current_page() {
    let cancel = CancellationToken::new();
    let mut source = ScriptedSource::new(vec![page(0..PAGE_SIZE), page(PAGE_SIZE..2 * PAGE_SIZE)]);
    source.cancel_on_request = Some((1, cancel.clone()));

    let mut crawler = SearchCrawler::new(source, PortalUrls::default(), CrawlTiming::default());
    let (outcome, _) = run(&mut crawler, &cancel).await;

    assert!(outcome.cancelled);
    assert_eq!(outcome.items.len(), PAGE_SIZE);
    assert_eq!(outcome.pages_queried, 1);
    assert_eq!(crawler.source().requested.len(), 1);
}

#[tokio::test]
async fn filters_are_encoded_into_the_url() {
    let mut crawler = crawler(vec![page(0..1)]);
    let filters = SearchFilters {
        spheres: vec!["Federal".into(), "municipal".into()],
        states: vec!["SP".into(), "RJ".into()],
        status: Some("vigente".into()),
        organs: vec![],
    };
    crawler
        .search("ata", &filters, &CancellationToken::new(), None)
        .await
        .unwrap();

    let url = &crawler.source().requested[0];
    assert!(url.contains("esferas=F%7CM"));
    assert!(url.contains("ufs=SP%7CRJ"));
    assert!(url.contains("status=vigente"));
    assert!(!url.contains("orgaos="));
}
