//! Search command.

use std::path::Path;

use console::style;
use indicatif::ProgressBar;
use tokio::sync::mpsc;

use atacquire::config::Settings;
use atacquire::models::SearchFilters;
use atacquire::scrapers::{BrowserFetcher, CrawlTiming, SearchCrawler, SearchEvent};
use atacquire::services::BatchRecord;

use super::download::run_batch;
use crate::cli::helpers::{cancel_on_ctrl_c, spinner_style};

/// Crawl every result page for `term`, printing records as they arrive.
pub async fn cmd_search(
    settings: &Settings,
    term: &str,
    filters: &SearchFilters,
    output: Option<&Path>,
    download: bool,
) -> anyhow::Result<()> {
    let cancel = cancel_on_ctrl_c();

    let source = BrowserFetcher::new(settings.browser.clone(), settings.user_agent.as_deref());
    let mut crawler = SearchCrawler::new(
        source,
        settings.urls(),
        CrawlTiming::from_settings(settings),
    );

    println!("{} Searching for '{}'", style("→").cyan(), term.trim());

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(spinner_style());
    spinner.enable_steady_tick(std::time::Duration::from_millis(120));
    spinner.set_message("Loading page 1...");

    let (event_tx, mut event_rx) = mpsc::channel::<SearchEvent>(100);
    let display = spinner.clone();
    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                SearchEvent::Partial { new_items, .. } => {
                    for item in new_items {
                        display.println(format!(
                            "  {} {}  {}  {}",
                            style("•").green(),
                            style(&item.identifier).bold(),
                            item.display_number,
                            style(&item.org_name).dim()
                        ));
                    }
                }
                SearchEvent::Progress {
                    page_number,
                    running_total,
                } => {
                    display.set_message(format!(
                        "Page {} done, {} record(s) so far",
                        page_number, running_total
                    ));
                }
                SearchEvent::Finished { .. } => display.finish_and_clear(),
            }
        }
    });

    let result = crawler.search(term, filters, &cancel, Some(&event_tx)).await;
    drop(event_tx);
    crawler.into_source().close().await;

    if let Err(e) = printer.await {
        tracing::warn!("Search display task failed: {}", e);
    }
    spinner.finish_and_clear();

    let outcome = result?;

    println!(
        "{} Found {} record(s) over {} page(s)",
        style("✓").green(),
        outcome.items.len(),
        outcome.pages_queried
    );
    if let Some(ref error) = outcome.aborted {
        println!(
            "  {} Search stopped early: {}",
            style("!").yellow(),
            error
        );
    }
    if outcome.cancelled {
        println!("  {} Search cancelled", style("!").yellow());
    }

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&outcome.items)?;
        std::fs::write(path, json)?;
        println!(
            "  {} Results written to {}",
            style("→").dim(),
            path.display()
        );
    }

    if download && !outcome.items.is_empty() {
        if cancel.is_cancelled() {
            println!("{} Skipping downloads after cancellation", style("!").yellow());
            return Ok(());
        }
        let records: Vec<BatchRecord> = outcome.items.iter().map(BatchRecord::from).collect();
        run_batch(settings, &records, &cancel).await?;
    }

    Ok(())
}
