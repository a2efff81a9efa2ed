//! Per-page ingestion: the unit of work shared by batch, watch and import.
//!
//! [`IngestionCoordinator::ingest_page`] checks the repository, fetches the
//! page, stores its artifacts, classifies its text and performs one
//! idempotent insert. Anything that goes wrong with a single page becomes
//! [`IngestOutcome::Skipped`]; only repository failures abort the caller.

use anyhow::Result;
use chrono::NaiveDate;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::artifacts::{content_sha256, ArtifactWriter, FsArtifactWriter};
use crate::classify::classify;
use crate::config::{Config, PipelineConfig};
use crate::error::{PageError, PipelineError};
use crate::models::{truncate_chars, IngestOutcome, NewRecord};
use crate::page_source::{DirectoryPageSource, PageSource};
use crate::people::detect_people;
use crate::repository::Repository;

/// Field caps and provenance applied when building records.
#[derive(Debug, Clone)]
pub struct RecordLimits {
    pub raw_text_cap: usize,
    pub description_cap: usize,
    pub context_cap: usize,
    pub release_date: NaiveDate,
}

impl RecordLimits {
    pub fn from_config(pipeline: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            raw_text_cap: pipeline.raw_text_cap,
            description_cap: pipeline.description_cap,
            context_cap: pipeline.context_cap,
            release_date: pipeline.release_date()?,
        })
    }
}

/// Locators and fingerprint of a page's stored artifacts.
#[derive(Debug, Clone, Default)]
pub struct PageArtifacts {
    pub artifact_path: Option<String>,
    pub thumbnail_path: Option<String>,
    pub content_sha256: Option<String>,
}

/// Classifies `raw_text` and assembles the record for one page.
pub fn build_record(
    limits: &RecordLimits,
    source_id: &str,
    index: u32,
    raw_text: Option<&str>,
    artifacts: PageArtifacts,
) -> NewRecord {
    let raw_text = raw_text.filter(|t| !t.trim().is_empty());
    let classification = classify(raw_text);
    let people = raw_text.map(detect_people).unwrap_or_default();

    let label = match &classification.external_id {
        Some(ext) => format!("{} - Page {}", ext, index),
        None => format!("Page {}", index),
    };
    let title = match &classification.description {
        Some(desc) => format!("{} - {} - {}", desc, label, source_id),
        None => format!("Document {} - {}", label, source_id),
    };

    let mut metadata = json!({
        "source_id": source_id,
        "page_index": index,
        "classification": classification.category.as_str(),
        "has_thumbnail": artifacts.thumbnail_path.is_some(),
        "detected_people": people,
    });
    if let Some(sha) = &artifacts.content_sha256 {
        metadata["content_sha256"] = json!(sha);
    }
    if let Some(ext) = &classification.external_id {
        metadata["external_id"] = json!(ext);
    }

    NewRecord {
        source_id: source_id.to_string(),
        page_index: index,
        title,
        doc_type: classification.category.doc_type().to_string(),
        subcategory: classification.category.subcategory().map(str::to_string),
        description: classification
            .description
            .as_deref()
            .map(|d| truncate_chars(d, limits.description_cap)),
        context: classification
            .context
            .as_deref()
            .map(|c| truncate_chars(c, limits.context_cap)),
        raw_text: raw_text.map(|t| truncate_chars(t, limits.raw_text_cap)),
        external_id: classification.external_id,
        artifact_path: artifacts.artifact_path,
        thumbnail_path: artifacts.thumbnail_path,
        release_date: limits.release_date,
        metadata,
        people,
    }
}

pub struct IngestionCoordinator {
    source: Arc<dyn PageSource>,
    artifacts: Arc<dyn ArtifactWriter>,
    repository: Arc<dyn Repository>,
    limits: RecordLimits,
    page_timeout: Duration,
}

impl IngestionCoordinator {
    pub fn new(
        source: Arc<dyn PageSource>,
        artifacts: Arc<dyn ArtifactWriter>,
        repository: Arc<dyn Repository>,
        limits: RecordLimits,
        page_timeout: Duration,
    ) -> Self {
        Self {
            source,
            artifacts,
            repository,
            limits,
            page_timeout,
        }
    }

    /// Coordinator over the producer's output directory and the filesystem
    /// artifact store named in `config`.
    pub fn from_config(config: &Config, repository: Arc<dyn Repository>) -> Result<Self> {
        let source = DirectoryPageSource::new(&config.pipeline.extracted_root)?
            .with_settle(config.watch.settle());
        let artifacts = FsArtifactWriter::new(
            &config.pipeline.store_root,
            config.pipeline.thumbnail_max_px,
        );
        Ok(Self::new(
            Arc::new(source),
            Arc::new(artifacts),
            repository,
            RecordLimits::from_config(&config.pipeline)?,
            config.pipeline.page_timeout(),
        ))
    }

    pub fn limits(&self) -> &RecordLimits {
        &self.limits
    }

    pub fn source(&self) -> &Arc<dyn PageSource> {
        &self.source
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    /// Ingests one page. `Err` is returned only for run-level failures.
    pub async fn ingest_page(
        &self,
        source_id: &str,
        index: u32,
    ) -> Result<IngestOutcome, PipelineError> {
        if self.repository.exists(source_id, index).await? {
            debug!(source = source_id, page = index, "already ingested");
            return Ok(IngestOutcome::AlreadyPresent);
        }

        let prepared = match tokio::time::timeout(self.page_timeout, self.prepare(source_id, index))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(PageError::Timeout(self.page_timeout)),
        };

        let record = match prepared {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(IngestOutcome::NotAvailable),
            Err(e) => {
                warn!(source = source_id, page = index, reason = %e, "skipping page");
                return Ok(IngestOutcome::Skipped {
                    reason: e.to_string(),
                });
            }
        };

        match self.repository.insert_if_absent(&record).await {
            Ok(true) => {
                debug!(source = source_id, page = index, doc_type = %record.doc_type, "ingested page");
                Ok(IngestOutcome::Inserted)
            }
            // Another worker won the race for this natural key.
            Ok(false) => Ok(IngestOutcome::AlreadyPresent),
            Err(PipelineError::InvalidRecord(reason)) => {
                warn!(source = source_id, page = index, %reason, "skipping invalid record");
                Ok(IngestOutcome::Skipped { reason })
            }
            Err(e) => Err(e),
        }
    }

    async fn prepare(&self, source_id: &str, index: u32) -> Result<Option<NewRecord>, PageError> {
        let page = match self.source.get_page(source_id, index).await? {
            Some(page) => page,
            None => return Ok(None),
        };

        let artifact_path = self
            .artifacts
            .store_image(source_id, index, &page.image)
            .await?;

        let thumbnail_path = match self.artifacts.derive_thumbnail(&artifact_path).await {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(source = source_id, page = index, error = %e, "thumbnail generation failed");
                None
            }
        };

        Ok(Some(build_record(
            &self.limits,
            source_id,
            index,
            page.raw_text.as_deref(),
            PageArtifacts {
                artifact_path: Some(artifact_path),
                thumbnail_path,
                content_sha256: Some(content_sha256(&page.image)),
            },
        )))
    }
}
