//! SQLite-backed [`Repository`].
//!
//! Uniqueness of the natural key is enforced by the `UNIQUE(source_id,
//! page_index)` constraint and `ON CONFLICT DO NOTHING`, so concurrent
//! writers racing on the same page produce exactly one row. The full-text
//! row and people links are written in the same transaction as the record.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use super::{offset, query_terms, CatalogStats, RankedRecord, RecordFilter, Repository};
use crate::config::Config;
use crate::error::PipelineError;
use crate::{db, migrate};
use crate::models::{DocumentRecord, NewRecord, Person};

const RECORD_COLUMNS: &str = "d.id, d.source_id, d.page_index, d.title, d.doc_type, \
     d.subcategory, d.description, d.context, d.raw_text, d.external_id, d.artifact_path, \
     d.thumbnail_path, d.release_date, d.metadata_json, d.created_at";

const FILTER_CLAUSE: &str = r"(? IS NULL OR d.doc_type = ?) AND (? IS NULL OR d.source_id LIKE ? ESCAPE '\')";

pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connects to the configured database and ensures the schema exists.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// FTS5 expression with every term quoted, so user input never parses as syntax.
fn fts_expression(text: &str) -> Option<String> {
    let terms = query_terms(text);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" "),
    )
}

fn row_to_record(row: &SqliteRow) -> DocumentRecord {
    let metadata_json: String = row.get("metadata_json");
    let page_index: i64 = row.get("page_index");
    DocumentRecord {
        id: row.get("id"),
        source_id: row.get("source_id"),
        page_index: page_index as u32,
        title: row.get("title"),
        doc_type: row.get("doc_type"),
        subcategory: row.get("subcategory"),
        description: row.get("description"),
        context: row.get("context"),
        raw_text: row.get("raw_text"),
        external_id: row.get("external_id"),
        artifact_path: row.get("artifact_path"),
        thumbnail_path: row.get("thumbnail_path"),
        release_date: row.get("release_date"),
        metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({})),
        created_at: row.get("created_at"),
    }
}

/// Inserts one record on an open connection. Returns `false` on natural-key conflict.
async fn insert_record(conn: &mut SqliteConnection, record: &NewRecord) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO documents (source_id, page_index, title, doc_type, subcategory, description,
                               context, raw_text, external_id, artifact_path, thumbnail_path,
                               release_date, metadata_json, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(source_id, page_index) DO NOTHING
        "#,
    )
    .bind(&record.source_id)
    .bind(record.page_index as i64)
    .bind(&record.title)
    .bind(&record.doc_type)
    .bind(&record.subcategory)
    .bind(&record.description)
    .bind(&record.context)
    .bind(&record.raw_text)
    .bind(&record.external_id)
    .bind(&record.artifact_path)
    .bind(&record.thumbnail_path)
    .bind(record.release_date.format("%Y-%m-%d").to_string())
    .bind(record.metadata.to_string())
    .bind(chrono::Utc::now().timestamp())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(false);
    }
    let doc_id = result.last_insert_rowid();

    sqlx::query("INSERT INTO documents_fts (doc_id, title, description, raw_text) VALUES (?, ?, ?, ?)")
        .bind(doc_id)
        .bind(&record.title)
        .bind(record.description.as_deref().unwrap_or(""))
        .bind(record.raw_text.as_deref().unwrap_or(""))
        .execute(&mut *conn)
        .await?;

    for name in &record.people {
        sqlx::query("INSERT INTO people (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
            .bind(name)
            .execute(&mut *conn)
            .await?;
        let person_id: i64 = sqlx::query_scalar("SELECT id FROM people WHERE name = ?")
            .bind(name)
            .fetch_one(&mut *conn)
            .await?;
        sqlx::query("INSERT OR IGNORE INTO document_people (document_id, person_id) VALUES (?, ?)")
            .bind(doc_id)
            .bind(person_id)
            .execute(&mut *conn)
            .await?;
    }

    Ok(true)
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn exists(&self, source_id: &str, page_index: u32) -> Result<bool, PipelineError> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT id FROM documents WHERE source_id = ? AND page_index = ?")
                .bind(source_id)
                .bind(page_index as i64)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    async fn insert_if_absent(&self, record: &NewRecord) -> Result<bool, PipelineError> {
        record.validate()?;
        let mut tx = self.pool.begin().await?;
        let inserted = insert_record(&mut *tx, record).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    async fn batch_insert_if_absent(&self, records: &[NewRecord]) -> Result<u64, PipelineError> {
        for record in records {
            record.validate()?;
        }
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for record in records {
            if insert_record(&mut *tx, record).await? {
                inserted += 1;
            }
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn query(
        &self,
        filter: &RecordFilter,
        page: i64,
        per_page: i64,
    ) -> Result<(Vec<DocumentRecord>, i64), PipelineError> {
        let category = filter.category();
        let source = filter.source().map(like_pattern);

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM documents d WHERE {}",
            FILTER_CLAUSE
        ))
        .bind(category)
        .bind(category)
        .bind(source.as_deref())
        .bind(source.as_deref())
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM documents d WHERE {} ORDER BY d.id DESC LIMIT ? OFFSET ?",
            RECORD_COLUMNS, FILTER_CLAUSE
        ))
        .bind(category)
        .bind(category)
        .bind(source.as_deref())
        .bind(source.as_deref())
        .bind(per_page)
        .bind(offset(page, per_page))
        .fetch_all(&self.pool)
        .await?;

        Ok((rows.iter().map(row_to_record).collect(), total))
    }

    async fn search(
        &self,
        text_query: &str,
        filter: &RecordFilter,
        page: i64,
        per_page: i64,
    ) -> Result<(Vec<RankedRecord>, i64), PipelineError> {
        let expr = match fts_expression(text_query) {
            Some(e) => e,
            None => return Ok((Vec::new(), 0)),
        };
        let category = filter.category();
        let source = filter.source().map(like_pattern);

        let total: i64 = sqlx::query_scalar(&format!(
            r#"
            SELECT COUNT(*)
            FROM documents_fts
            JOIN documents d ON d.id = documents_fts.doc_id
            WHERE documents_fts MATCH ? AND {}
            "#,
            FILTER_CLAUSE
        ))
        .bind(&expr)
        .bind(category)
        .bind(category)
        .bind(source.as_deref())
        .bind(source.as_deref())
        .fetch_one(&self.pool)
        .await?;

        // bm25() is lower-is-better; order on it directly and break ties by id.
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}, bm25(documents_fts) AS bm25_score,
                   snippet(documents_fts, 3, '>>>', '<<<', '...', 32) AS snippet
            FROM documents_fts
            JOIN documents d ON d.id = documents_fts.doc_id
            WHERE documents_fts MATCH ? AND {}
            ORDER BY bm25_score ASC, d.id DESC
            LIMIT ? OFFSET ?
            "#,
            RECORD_COLUMNS, FILTER_CLAUSE
        ))
        .bind(&expr)
        .bind(category)
        .bind(category)
        .bind(source.as_deref())
        .bind(source.as_deref())
        .bind(per_page)
        .bind(offset(page, per_page))
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .iter()
            .map(|row| {
                let bm25_score: f64 = row.get("bm25_score");
                RankedRecord {
                    record: row_to_record(row),
                    score: -bm25_score,
                    snippet: row.get("snippet"),
                }
            })
            .collect();

        Ok((items, total))
    }

    async fn get(&self, id: i64) -> Result<Option<DocumentRecord>, PipelineError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents d WHERE d.id = ?",
            RECORD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_record))
    }

    async fn people_for(&self, id: i64) -> Result<Vec<String>, PipelineError> {
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT p.name FROM people p
            JOIN document_people dp ON dp.person_id = p.id
            WHERE dp.document_id = ?
            ORDER BY p.name
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn list_people(&self, limit: i64) -> Result<Vec<Person>, PipelineError> {
        let rows = sqlx::query(
            r#"
            SELECT p.id, p.name, COUNT(dp.document_id) AS doc_count
            FROM people p
            JOIN document_people dp ON p.id = dp.person_id
            GROUP BY p.id, p.name
            ORDER BY doc_count DESC, p.name ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| Person {
                id: row.get("id"),
                name: row.get("name"),
                doc_count: row.get("doc_count"),
            })
            .collect())
    }

    async fn count_for_source(&self, source_id: &str) -> Result<i64, PipelineError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE source_id = ?")
            .bind(source_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn stats(&self) -> Result<CatalogStats, PipelineError> {
        let total_documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;

        let by_type: Vec<(String, i64)> = sqlx::query(
            "SELECT doc_type AS k, COUNT(*) AS n FROM documents GROUP BY doc_type ORDER BY n DESC, k ASC",
        )
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| (row.get("k"), row.get("n")))
        .collect();

        let by_source: Vec<(String, i64)> = sqlx::query(
            "SELECT source_id AS k, COUNT(*) AS n FROM documents GROUP BY source_id ORDER BY n DESC, k ASC",
        )
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| (row.get("k"), row.get("n")))
        .collect();

        let people: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM people")
            .fetch_one(&self.pool)
            .await?;

        Ok(CatalogStats {
            total_documents,
            by_type,
            by_source,
            people,
        })
    }
}
