//! Record retrieval by id.
//!
//! Fetches one catalog record together with the people linked to it. Used by
//! the `pcat get` command.

use anyhow::{bail, Result};
use serde::Serialize;

use crate::config::Config;
use crate::error::PipelineError;
use crate::models::DocumentRecord;
use crate::repository::{Repository, SqliteRepository};

#[derive(Debug, Clone, Serialize)]
pub struct RecordDetail {
    #[serde(flatten)]
    pub record: DocumentRecord,
    pub people: Vec<String>,
}

pub async fn get_record(
    repository: &dyn Repository,
    id: i64,
) -> Result<Option<RecordDetail>, PipelineError> {
    let Some(record) = repository.get(id).await? else {
        return Ok(None);
    };
    let people = repository.people_for(id).await?;
    Ok(Some(RecordDetail { record, people }))
}

pub async fn run_get(config: &Config, id: i64) -> Result<()> {
    let repository = SqliteRepository::open(config).await?;
    let result = get_record(&repository, id).await;
    repository.close().await;

    let Some(detail) = result? else {
        bail!("Record not found: {}", id);
    };
    let r = &detail.record;

    println!("--- Record ---");
    println!("id:            {}", r.id);
    println!("title:         {}", r.title);
    println!("source_id:     {}", r.source_id);
    println!("page_index:    {}", r.page_index);
    println!("doc_type:      {}", r.doc_type);
    if let Some(ref sub) = r.subcategory {
        println!("subcategory:   {}", sub);
    }
    if let Some(ref ext) = r.external_id {
        println!("external_id:   {}", ext);
    }
    if let Some(ref path) = r.artifact_path {
        println!("artifact_path: {}", path);
    }
    if let Some(ref path) = r.thumbnail_path {
        println!("thumbnail:     {}", path);
    }
    println!("release_date:  {}", r.release_date);
    println!("created_at:    {}", format_ts_iso(r.created_at));
    if !detail.people.is_empty() {
        println!("people:        {}", detail.people.join(", "));
    }
    println!("metadata:      {}", r.metadata);
    println!();

    if let Some(ref desc) = r.description {
        println!("--- Description ---");
        println!("{}", desc);
        if let Some(ref ctx) = r.context {
            println!("{}", ctx);
        }
        println!();
    }

    println!("--- Text ---");
    println!("{}", r.raw_text.as_deref().unwrap_or("(no text)"));

    Ok(())
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
