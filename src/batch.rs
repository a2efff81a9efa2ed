//! Batch ingestion over a fixed index range, and manifest import.
//!
//! A batch run fans the requested indices out to a bounded pool of
//! coordinator calls. Pages are started in ascending order; completion order
//! is whatever the workers produce. Per-page failures only show up in the
//! counts, so re-running the same range is always safe and picks up where an
//! interrupted run stopped.

use anyhow::{Context, Result};
use futures::future;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::coordinator::{build_record, IngestionCoordinator, PageArtifacts, RecordLimits};
use crate::error::PipelineError;
use crate::models::{IngestOutcome, NewRecord, RunReport};
use crate::progress::{ProgressEvent, ProgressMode, ProgressReporter};
use crate::repository::{Repository, SqliteRepository};

/// Records per transaction when importing a manifest.
pub const IMPORT_BATCH_SIZE: usize = 500;

/// Ingests `indices` through the coordinator with at most `workers` pages in flight.
pub async fn run_batch(
    coordinator: &IngestionCoordinator,
    source_id: &str,
    indices: Vec<u32>,
    workers: usize,
    reporter: &dyn ProgressReporter,
    progress_every: u64,
) -> Result<RunReport, PipelineError> {
    let total = indices.len() as u64;
    let mut report = RunReport::default();

    ingest_indices(
        coordinator,
        source_id,
        indices,
        workers,
        &CancellationToken::new(),
        |_, outcome| {
            report.record(outcome);
            if progress_every > 0 && report.processed % progress_every == 0 {
                reporter.report(ProgressEvent::Pages {
                    source: source_id.to_string(),
                    n: report.processed,
                    total,
                    inserted: report.inserted,
                });
            }
        },
    )
    .await?;

    Ok(report)
}

/// Worker pool shared by batch and watch runs. Once `cancel` fires no
/// further page is started; pages already in flight run to completion.
pub(crate) async fn ingest_indices<F>(
    coordinator: &IngestionCoordinator,
    source_id: &str,
    indices: Vec<u32>,
    workers: usize,
    cancel: &CancellationToken,
    mut on_outcome: F,
) -> Result<(), PipelineError>
where
    F: FnMut(u32, &IngestOutcome),
{
    let mut outcomes = stream::iter(indices)
        .take_while(|_| future::ready(!cancel.is_cancelled()))
        .map(|index| async move { (index, coordinator.ingest_page(source_id, index).await) })
        .buffer_unordered(workers.max(1));

    while let Some((index, outcome)) = outcomes.next().await {
        on_outcome(index, &outcome?);
    }
    Ok(())
}

/// Clamps an optional `[start, end)` request to the source's page count.
pub fn resolve_range(
    page_count: u32,
    start: Option<u32>,
    end: Option<u32>,
) -> Result<Range<u32>, PipelineError> {
    let start = start.unwrap_or(0);
    let end = end.map_or(page_count, |e| e.min(page_count));
    if start > end {
        return Err(PipelineError::InvalidRequest(format!(
            "start {} is past end {} (source has {} pages)",
            start, end, page_count
        )));
    }
    Ok(start..end)
}

/// `pcat ingest <source>`: one pass over `[start, end)`.
pub async fn run_ingest(
    config: &Config,
    source_id: &str,
    start: Option<u32>,
    end: Option<u32>,
    mode: ProgressMode,
) -> Result<()> {
    let repository = Arc::new(SqliteRepository::open(config).await?);
    let coordinator = IngestionCoordinator::from_config(config, repository.clone())?;

    let page_count = coordinator.source().page_count(source_id).await?;
    let range = resolve_range(page_count, start, end)?;
    info!(source = source_id, start = range.start, end = range.end, "starting batch ingest");

    let reporter = mode.reporter();
    let result = run_batch(
        &coordinator,
        source_id,
        range.collect(),
        config.pipeline.workers,
        reporter.as_ref(),
        config.pipeline.progress_every,
    )
    .await;
    repository.close().await;

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            error!(source = source_id, error = %e, "batch ingest aborted");
            return Err(e.into());
        }
    };

    println!("ingest {}", source_id);
    print_report(&report);
    println!("ok");
    Ok(())
}

pub(crate) fn print_report(report: &RunReport) {
    println!("  processed: {}", report.processed);
    println!("  inserted: {}", report.inserted);
    println!("  skipped: {}", report.skipped);
    if report.failed > 0 {
        println!("  failed (will retry on next run): {}", report.failed);
    }
}

/// One page as listed in the producer's extraction manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    pub source_pdf: String,
    pub page_number: u32,
    pub file_path: String,
    #[serde(default)]
    pub thumbnail_path: Option<String>,
    #[serde(default)]
    pub ocr_text: Option<String>,
}

impl ManifestEntry {
    fn to_record(&self, limits: &RecordLimits) -> NewRecord {
        build_record(
            limits,
            &self.source_pdf,
            self.page_number,
            self.ocr_text.as_deref(),
            PageArtifacts {
                artifact_path: Some(self.file_path.clone()),
                thumbnail_path: self.thumbnail_path.clone(),
                content_sha256: None,
            },
        )
    }
}

/// Inserts manifest entries in chunks of [`IMPORT_BATCH_SIZE`]. Entries whose
/// natural key already exists count as skipped.
pub async fn import_entries(
    repository: &dyn Repository,
    limits: &RecordLimits,
    entries: &[ManifestEntry],
    reporter: &dyn ProgressReporter,
) -> Result<RunReport, PipelineError> {
    let mut report = RunReport::default();
    let total = entries.len() as u64;

    for chunk in entries.chunks(IMPORT_BATCH_SIZE) {
        let records: Vec<NewRecord> = chunk.iter().map(|e| e.to_record(limits)).collect();
        let inserted = repository.batch_insert_if_absent(&records).await?;
        report.processed += records.len() as u64;
        report.inserted += inserted;
        report.skipped += records.len() as u64 - inserted;

        reporter.report(ProgressEvent::Pages {
            source: "manifest".to_string(),
            n: report.processed,
            total,
            inserted: report.inserted,
        });
    }

    Ok(report)
}

/// `pcat import <manifest.json>`.
pub async fn run_import(config: &Config, manifest: &Path, mode: ProgressMode) -> Result<()> {
    let content = std::fs::read_to_string(manifest)
        .with_context(|| format!("Failed to read manifest: {}", manifest.display()))?;
    let entries: Vec<ManifestEntry> =
        serde_json::from_str(&content).with_context(|| "Failed to parse manifest")?;
    let limits = RecordLimits::from_config(&config.pipeline)?;

    let repository = SqliteRepository::open(config).await?;
    let reporter = mode.reporter();
    let result = import_entries(&repository, &limits, &entries, reporter.as_ref()).await;
    repository.close().await;
    let report = result?;

    println!("import {}", manifest.display());
    print_report(&report);
    println!("ok");
    Ok(())
}
