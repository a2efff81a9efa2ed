//! Record store abstraction.
//!
//! The [`Repository`] trait is the only shared mutable resource in the
//! pipeline. Its uniqueness guarantee lives in
//! [`insert_if_absent`](Repository::insert_if_absent): an insert that is a
//! no-op when the natural key `(source_id, page_index)` already exists.
//! [`exists`](Repository::exists) is advisory and only saves work.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`exists`](Repository::exists) | Natural-key existence check |
//! | [`insert_if_absent`](Repository::insert_if_absent) | Idempotent insert of one record |
//! | [`batch_insert_if_absent`](Repository::batch_insert_if_absent) | Idempotent insert of many records |
//! | [`query`](Repository::query) | Filtered, paginated listing (newest first) |
//! | [`search`](Repository::search) | Ranked full-text search |
//! | [`get`](Repository::get) | Single record by id |
//! | [`people_for`](Repository::people_for) | Names linked to a record |
//! | [`list_people`](Repository::list_people) | Persons by document count |
//! | [`stats`](Repository::stats) | Catalog totals |

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::PipelineError;
use crate::models::{DocumentRecord, NewRecord, Person};

pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;

/// Optional filters shared by listing and search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    /// Exact record type (`image`, `flight_log`, ...). `all` means no filter.
    pub category: Option<String>,
    /// Case-insensitive substring of the source id.
    pub source: Option<String>,
}

impl RecordFilter {
    pub fn category(&self) -> Option<&str> {
        self.category
            .as_deref()
            .filter(|c| !c.is_empty() && *c != "all")
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref().filter(|s| !s.is_empty())
    }
}

/// A search hit: the record, its relevance (higher is better) and an excerpt.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RankedRecord {
    #[serde(flatten)]
    pub record: DocumentRecord,
    pub score: f64,
    pub snippet: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CatalogStats {
    pub total_documents: i64,
    pub by_type: Vec<(String, i64)>,
    pub by_source: Vec<(String, i64)>,
    pub people: i64,
}

#[async_trait]
pub trait Repository: Send + Sync {
    async fn exists(&self, source_id: &str, page_index: u32) -> Result<bool, PipelineError>;

    /// Inserts the record unless its natural key exists. Returns `true` if a
    /// new row was created. Linked people are only recorded for new rows.
    async fn insert_if_absent(&self, record: &NewRecord) -> Result<bool, PipelineError>;

    /// Inserts every absent record atomically; returns how many were new.
    async fn batch_insert_if_absent(&self, records: &[NewRecord]) -> Result<u64, PipelineError>;

    /// Filtered listing ordered by descending id. Returns `(items, total)`.
    async fn query(
        &self,
        filter: &RecordFilter,
        page: i64,
        per_page: i64,
    ) -> Result<(Vec<DocumentRecord>, i64), PipelineError>;

    /// Full-text search over raw text, description and title, ordered by
    /// descending relevance then descending id. Returns `(items, total)`.
    async fn search(
        &self,
        text_query: &str,
        filter: &RecordFilter,
        page: i64,
        per_page: i64,
    ) -> Result<(Vec<RankedRecord>, i64), PipelineError>;

    async fn get(&self, id: i64) -> Result<Option<DocumentRecord>, PipelineError>;

    async fn people_for(&self, id: i64) -> Result<Vec<String>, PipelineError>;

    async fn list_people(&self, limit: i64) -> Result<Vec<Person>, PipelineError>;

    /// Number of records for one source.
    async fn count_for_source(&self, source_id: &str) -> Result<i64, PipelineError>;

    async fn stats(&self) -> Result<CatalogStats, PipelineError>;
}

/// Splits free text into search terms: alphanumeric runs, lower-cased.
/// All terms must match (implicit AND).
pub fn query_terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Row offset of a 1-based page.
pub(crate) fn offset(page: i64, per_page: i64) -> i64 {
    (page.max(1) - 1).saturating_mul(per_page.max(0))
}
