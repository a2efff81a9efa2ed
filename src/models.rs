//! Core data models used throughout the catalog.
//!
//! A [`Page`] is produced on demand by a page source, classified into a
//! [`Classification`], turned into a [`NewRecord`] by the coordinator and
//! persisted once as a [`DocumentRecord`].

use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;

use crate::error::PipelineError;

/// One rendered page of a paginated source. Never persisted itself.
#[derive(Debug, Clone)]
pub struct Page {
    pub source_id: String,
    pub index: u32,
    pub raw_text: Option<String>,
    pub image: Vec<u8>,
}

/// Closed set of content categories a page can be classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Photo,
    FlightLog,
    Contact,
    Financial,
    Email,
    Legal,
    Calendar,
    Medical,
    Redacted,
    Unknown,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Photo => "photo",
            Category::FlightLog => "flight_log",
            Category::Contact => "contact",
            Category::Financial => "financial",
            Category::Email => "email",
            Category::Legal => "legal",
            Category::Calendar => "calendar",
            Category::Medical => "medical",
            Category::Redacted => "redacted",
            Category::Unknown => "unknown",
        }
    }

    /// Record type stored for this category. Photos, redaction notices and
    /// unrecognised pages are catalogued as page scans.
    pub fn doc_type(&self) -> &'static str {
        match self {
            Category::Photo | Category::Redacted | Category::Unknown => DOC_TYPE_IMAGE,
            other => other.as_str(),
        }
    }

    pub fn subcategory(&self) -> Option<&'static str> {
        match self {
            Category::Unknown => None,
            other => Some(other.as_str()),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const DOC_TYPE_IMAGE: &str = "image";

/// Deterministic derivation of a page's raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: Category,
    pub context: Option<String>,
    pub description: Option<String>,
    pub external_id: Option<String>,
}

/// A record ready for insertion. `id` is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub source_id: String,
    pub page_index: u32,
    pub title: String,
    pub doc_type: String,
    pub subcategory: Option<String>,
    pub description: Option<String>,
    pub context: Option<String>,
    pub raw_text: Option<String>,
    pub external_id: Option<String>,
    pub artifact_path: Option<String>,
    pub thumbnail_path: Option<String>,
    pub release_date: NaiveDate,
    pub metadata: serde_json::Value,
    /// Names linked to the record through the people association on insert.
    pub people: Vec<String>,
}

impl NewRecord {
    /// Image records must reference a stored artifact.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.doc_type == DOC_TYPE_IMAGE && self.artifact_path.is_none() {
            return Err(PipelineError::InvalidRecord(format!(
                "{}#{}: image record without artifact_path",
                self.source_id, self.page_index
            )));
        }
        Ok(())
    }
}

/// Persisted record as exposed to the query layer.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DocumentRecord {
    pub id: i64,
    pub source_id: String,
    pub page_index: u32,
    pub title: String,
    pub doc_type: String,
    pub subcategory: Option<String>,
    pub description: Option<String>,
    pub context: Option<String>,
    pub raw_text: Option<String>,
    pub external_id: Option<String>,
    pub artifact_path: Option<String>,
    pub thumbnail_path: Option<String>,
    pub release_date: String,
    pub metadata: serde_json::Value,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub doc_count: i64,
}

/// Result of ingesting a single page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Inserted,
    /// A record with the same natural key already exists.
    AlreadyPresent,
    /// The page has not been produced yet.
    NotAvailable,
    /// A per-page failure; the page is eligible for retry on the next pass.
    Skipped { reason: String },
}

impl IngestOutcome {
    pub fn inserted(&self) -> bool {
        matches!(self, IngestOutcome::Inserted)
    }
}

/// Counts reported by batch, watch and import runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub processed: u64,
    pub inserted: u64,
    pub skipped: u64,
    /// Subset of `skipped` caused by per-page failures rather than duplicates.
    pub failed: u64,
}

impl RunReport {
    pub fn record(&mut self, outcome: &IngestOutcome) {
        self.processed += 1;
        match outcome {
            IngestOutcome::Inserted => self.inserted += 1,
            IngestOutcome::Skipped { .. } => {
                self.skipped += 1;
                self.failed += 1;
            }
            IngestOutcome::AlreadyPresent | IngestOutcome::NotAvailable => self.skipped += 1,
        }
    }

    pub fn merge(&mut self, other: RunReport) {
        self.processed += other.processed;
        self.inserted += other.inserted;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Truncates `text` to at most `cap` characters, on a char boundary.
pub fn truncate_chars(text: &str, cap: usize) -> String {
    match text.char_indices().nth(cap) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}
