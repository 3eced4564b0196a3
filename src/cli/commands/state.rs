//! Progress and folder counter commands.

use console::style;

use atacquire::config::Settings;
use atacquire::repository::ProgressStore;
use atacquire::storage::FolderCounter;

use crate::cli::helpers::{actionable, download_root};

/// Show progress statistics for the download root.
pub async fn cmd_status(settings: &Settings) -> anyhow::Result<()> {
    let root = download_root(settings)?;
    let store = ProgressStore::open(root);
    let stats = store.statistics();
    let counter = FolderCounter::new(root);

    println!("\n{}", style("Download Status").bold());
    println!("{}", "-".repeat(40));
    println!("{:<20} {}", "Directory:", root.display());
    println!("{:<20} {}", "Layout:", settings.organization);
    println!("{:<20} {}", "Records:", stats.total);
    println!(
        "{:<20} {}",
        "Succeeded:",
        style(stats.succeeded).green()
    );
    if stats.failed > 0 {
        println!("{:<20} {}", "Failed:", style(stats.failed).red());
    } else {
        println!("{:<20} {}", "Failed:", stats.failed);
    }
    println!("{:<20} {}", "Files:", stats.total_files);
    println!("{:<20} {:04}", "Last folder:", counter.current());
    match stats.last_updated {
        Some(when) => println!(
            "{:<20} {}",
            "Last updated:",
            when.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
        ),
        None => println!("{:<20} {}", "Last updated:", style("never").dim()),
    }

    Ok(())
}

/// Reset the organized folder counter.
pub async fn cmd_reset_counter(settings: &Settings) -> anyhow::Result<()> {
    let root = download_root(settings)?;
    FolderCounter::new(root).reset().map_err(actionable)?;
    println!(
        "{} Folder counter reset; the next record goes into 0001",
        style("✓").green()
    );
    Ok(())
}

/// Delete the progress file.
pub async fn cmd_clear_progress(settings: &Settings, confirm: bool) -> anyhow::Result<()> {
    let root = download_root(settings)?;
    let mut store = ProgressStore::open(root);
    let total = store.statistics().total;

    if !confirm {
        println!(
            "{} This will forget {} recorded outcome(s) in {}",
            style("!").yellow(),
            total,
            root.display()
        );
        println!("  Run with --confirm to proceed");
        return Ok(());
    }

    store.clear().map_err(actionable)?;
    println!(
        "{} Cleared {} recorded outcome(s)",
        style("✓").green(),
        total
    );
    Ok(())
}
