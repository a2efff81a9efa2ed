//! Catalog statistics, people listing and extraction progress.
//!
//! `pcat stats` summarises what is catalogued, `pcat people` ranks detected
//! persons by how many records mention them, and `pcat progress <source>`
//! compares what the producer has materialized against what is ingested.

use anyhow::Result;
use serde::Serialize;
use std::path::Path;
use walkdir::WalkDir;

use crate::artifacts::thumbnail_dir;
use crate::config::Config;
use crate::error::PipelineError;
use crate::liveness::{probe_from_config, ProducerProbe};
use crate::page_source::{DirectoryPageSource, PageSource};
use crate::repository::{Repository, SqliteRepository};

/// Run the stats command: query the catalog and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let repository = SqliteRepository::open(config).await?;
    let result = repository.stats().await;
    repository.close().await;
    let stats = result?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Page Catalog — Database Stats");
    println!("=============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Records:     {}", stats.total_documents);
    println!("  People:      {}", stats.people);

    print_breakdown("By type", "TYPE", &stats.by_type);
    print_breakdown("By source", "SOURCE", &stats.by_source);
    println!();

    Ok(())
}

fn print_breakdown(heading: &str, column: &str, rows: &[(String, i64)]) {
    if rows.is_empty() {
        return;
    }
    println!();
    println!("  {}:", heading);
    println!("  {:<40} {:>8}", column, "RECORDS");
    println!("  {}", "-".repeat(49));
    for (name, count) in rows {
        println!("  {:<40} {:>8}", name, count);
    }
}

/// `pcat people`: persons by descending record count.
pub async fn run_people(config: &Config, limit: i64) -> Result<()> {
    let repository = SqliteRepository::open(config).await?;
    let result = repository.list_people(limit).await;
    repository.close().await;
    let people = result?;

    if people.is_empty() {
        println!("No people detected.");
        return Ok(());
    }

    println!("  {:<32} {:>8}", "NAME", "RECORDS");
    println!("  {}", "-".repeat(41));
    for p in &people {
        println!("  {:<32} {:>8}", p.name, p.doc_count);
    }
    Ok(())
}

/// Producer output versus catalog contents for one source.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ExtractionProgress {
    pub source_id: String,
    pub materialized: usize,
    pub thumbnails: usize,
    pub ingested: i64,
    pub producer_active: bool,
}

impl ExtractionProgress {
    /// Pages materialized but not yet catalogued.
    pub fn backlog(&self) -> i64 {
        (self.materialized as i64 - self.ingested).max(0)
    }
}

pub async fn extraction_progress(
    source: &dyn PageSource,
    repository: &dyn Repository,
    probe: &dyn ProducerProbe,
    store_root: &Path,
    source_id: &str,
) -> Result<ExtractionProgress, PipelineError> {
    let materialized = source.materialized(source_id).await?.len();
    let ingested = repository.count_for_source(source_id).await?;
    let producer_active = probe.is_producer_active(source_id).await;
    Ok(ExtractionProgress {
        source_id: source_id.to_string(),
        materialized,
        thumbnails: count_pngs(&store_root.join(thumbnail_dir(source_id))),
        ingested,
        producer_active,
    })
}

fn count_pngs(dir: &Path) -> usize {
    if !dir.is_dir() {
        return 0;
    }
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "png"))
        .count()
}

/// `pcat progress <source>`.
pub async fn run_progress(config: &Config, source_id: &str) -> Result<()> {
    let source = DirectoryPageSource::new(&config.pipeline.extracted_root)?;
    let probe = probe_from_config(&config.watch);
    let repository = SqliteRepository::open(config).await?;
    let result = extraction_progress(
        &source,
        &repository,
        probe.as_ref(),
        &config.pipeline.store_root,
        source_id,
    )
    .await;
    repository.close().await;
    let progress = result?;

    println!("progress {}", source_id);
    println!("  materialized pages: {}", progress.materialized);
    println!("  thumbnails:         {}", progress.thumbnails);
    println!("  ingested records:   {}", progress.ingested);
    println!("  backlog:            {}", progress.backlog());
    println!(
        "  producer:           {}",
        if progress.producer_active {
            "running"
        } else {
            "not running"
        }
    );
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
