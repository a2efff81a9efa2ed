//! Read API over the catalog: ranked search and filtered listing.
//!
//! A request with a non-empty `text_query` is a ranked full-text search
//! (relevance descending, id descending on ties). Without one it is a plain
//! listing, newest record first. Both share the same filters and pagination,
//! and both are deterministic for a fixed corpus so page boundaries never
//! shift between identical calls.

use anyhow::Result;
use serde::Serialize;

use crate::config::{Config, RetrievalConfig};
use crate::error::PipelineError;
use crate::models::DocumentRecord;
use crate::repository::{query_terms, RecordFilter, Repository, SqliteRepository};

#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub text_query: Option<String>,
    pub category: Option<String>,
    pub source_filter: Option<String>,
    pub page: i64,
    pub per_page: i64,
}

impl SearchRequest {
    fn filter(&self) -> RecordFilter {
        RecordFilter {
            category: self.category.clone(),
            source: self.source_filter.clone(),
        }
    }

    /// The query text, or `None` when it has no searchable terms.
    fn text(&self) -> Option<&str> {
        self.text_query
            .as_deref()
            .map(str::trim)
            .filter(|q| !query_terms(q).is_empty())
    }

    pub fn validate(&self, retrieval: &RetrievalConfig) -> Result<(), PipelineError> {
        if self.page < 1 {
            return Err(PipelineError::InvalidRequest(format!(
                "page must be >= 1 (got {})",
                self.page
            )));
        }
        if self.per_page < 1 || self.per_page > retrieval.max_per_page {
            return Err(PipelineError::InvalidRequest(format!(
                "per_page must be in [1, {}] (got {})",
                retrieval.max_per_page, self.per_page
            )));
        }
        if (self.page - 1).checked_mul(self.per_page).is_none() {
            return Err(PipelineError::InvalidRequest(format!(
                "page {} is out of range",
                self.page
            )));
        }
        Ok(())
    }
}

/// One result row. `score` and `snippet` are only set for ranked searches.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub record: DocumentRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

/// Validates `request` and runs it against `repository`.
pub async fn execute(
    repository: &dyn Repository,
    retrieval: &RetrievalConfig,
    request: &SearchRequest,
) -> Result<SearchResponse, PipelineError> {
    request.validate(retrieval)?;
    let filter = request.filter();

    let (results, total) = match request.text() {
        Some(text) => {
            let (hits, total) = repository
                .search(text, &filter, request.page, request.per_page)
                .await?;
            let results = hits
                .into_iter()
                .map(|h| SearchHit {
                    record: h.record,
                    score: Some(h.score),
                    snippet: Some(h.snippet),
                })
                .collect();
            (results, total)
        }
        None => {
            let (records, total) = repository
                .query(&filter, request.page, request.per_page)
                .await?;
            let results = records
                .into_iter()
                .map(|record| SearchHit {
                    record,
                    score: None,
                    snippet: None,
                })
                .collect();
            (results, total)
        }
    };

    Ok(SearchResponse {
        results,
        total,
        page: request.page,
        per_page: request.per_page,
    })
}

/// `pcat search` and `pcat list`.
pub async fn run_search(config: &Config, request: SearchRequest) -> Result<()> {
    let repository = SqliteRepository::open(config).await?;
    let result = execute(&repository, &config.retrieval, &request).await;
    repository.close().await;
    let response = result?;

    if response.results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    let first = (response.page - 1).saturating_mul(response.per_page);
    for (i, hit) in response.results.iter().enumerate() {
        let r = &hit.record;
        match hit.score {
            Some(score) => println!(
                "{}. [{:.2}] {} / {}",
                first + i as i64 + 1,
                score,
                r.doc_type,
                r.title
            ),
            None => println!("{}. {} / {}", first + i as i64 + 1, r.doc_type, r.title),
        }
        println!("    source: {} page {}", r.source_id, r.page_index);
        if let Some(ref ext) = r.external_id {
            println!("    external id: {}", ext);
        }
        if let Some(ref snippet) = hit.snippet {
            println!("    excerpt: \"{}\"", snippet.replace('\n', " ").trim());
        }
        println!("    id: {}", r.id);
        println!();
    }
    println!(
        "page {} of {} ({} total)",
        response.page,
        total_pages(response.total, response.per_page),
        response.total
    );

    Ok(())
}

fn total_pages(total: i64, per_page: i64) -> i64 {
    if per_page <= 0 {
        return 0;
    }
    (total + per_page - 1) / per_page
}
