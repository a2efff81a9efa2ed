//! In-memory [`Repository`] for tests and embedding callers.
//!
//! A single `Mutex` guards all state, so the natural-key check and the
//! insert happen atomically. Search scores a record by how often the query
//! terms occur in its raw text, description and title; every term must occur.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{offset, query_terms, CatalogStats, RankedRecord, RecordFilter, Repository};
use crate::error::PipelineError;
use crate::models::{DocumentRecord, NewRecord, Person};

#[derive(Default)]
struct State {
    records: BTreeMap<i64, DocumentRecord>,
    keys: HashMap<(String, u32), i64>,
    next_id: i64,
    people: BTreeMap<String, i64>,
    links: BTreeSet<(i64, i64)>,
}

impl State {
    fn insert(&mut self, record: &NewRecord) -> bool {
        let key = (record.source_id.clone(), record.page_index);
        if self.keys.contains_key(&key) {
            return false;
        }
        self.next_id += 1;
        let id = self.next_id;
        self.keys.insert(key, id);
        self.records.insert(
            id,
            DocumentRecord {
                id,
                source_id: record.source_id.clone(),
                page_index: record.page_index,
                title: record.title.clone(),
                doc_type: record.doc_type.clone(),
                subcategory: record.subcategory.clone(),
                description: record.description.clone(),
                context: record.context.clone(),
                raw_text: record.raw_text.clone(),
                external_id: record.external_id.clone(),
                artifact_path: record.artifact_path.clone(),
                thumbnail_path: record.thumbnail_path.clone(),
                release_date: record.release_date.format("%Y-%m-%d").to_string(),
                metadata: record.metadata.clone(),
                created_at: chrono::Utc::now().timestamp(),
            },
        );
        for name in &record.people {
            let next_person = self.people.len() as i64 + 1;
            let person_id = *self.people.entry(name.clone()).or_insert(next_person);
            self.links.insert((id, person_id));
        }
        true
    }

    fn matching<'a>(
        &'a self,
        filter: &'a RecordFilter,
    ) -> impl Iterator<Item = &'a DocumentRecord> + 'a {
        let category = filter.category();
        let source = filter.source().map(str::to_lowercase);
        self.records.values().rev().filter(move |r| {
            category.map_or(true, |c| r.doc_type == c)
                && source
                    .as_deref()
                    .map_or(true, |s| r.source_id.to_lowercase().contains(s))
        })
    }
}

fn lock_error() -> PipelineError {
    PipelineError::InvalidRequest("in-memory repository lock poisoned".to_string())
}

fn score(record: &DocumentRecord, terms: &[String]) -> Option<f64> {
    let haystack = format!(
        "{} {} {}",
        record.raw_text.as_deref().unwrap_or(""),
        record.description.as_deref().unwrap_or(""),
        record.title
    )
    .to_lowercase();
    let words: Vec<&str> = haystack
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let mut total = 0usize;
    for term in terms {
        let hits = words.iter().filter(|w| **w == term.as_str()).count();
        if hits == 0 {
            return None;
        }
        total += hits;
    }
    Some(total as f64)
}

/// In-memory record store.
#[derive(Default)]
pub struct InMemoryRepository {
    state: Mutex<State>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records in ascending id order.
    pub fn records(&self) -> Vec<DocumentRecord> {
        self.state
            .lock()
            .map(|s| s.records.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn exists(&self, source_id: &str, page_index: u32) -> Result<bool, PipelineError> {
        let state = self.state.lock().map_err(|_| lock_error())?;
        Ok(state
            .keys
            .contains_key(&(source_id.to_string(), page_index)))
    }

    async fn insert_if_absent(&self, record: &NewRecord) -> Result<bool, PipelineError> {
        record.validate()?;
        let mut state = self.state.lock().map_err(|_| lock_error())?;
        Ok(state.insert(record))
    }

    async fn batch_insert_if_absent(&self, records: &[NewRecord]) -> Result<u64, PipelineError> {
        for record in records {
            record.validate()?;
        }
        let mut state = self.state.lock().map_err(|_| lock_error())?;
        Ok(records.iter().filter(|r| state.insert(r)).count() as u64)
    }

    async fn query(
        &self,
        filter: &RecordFilter,
        page: i64,
        per_page: i64,
    ) -> Result<(Vec<DocumentRecord>, i64), PipelineError> {
        let state = self.state.lock().map_err(|_| lock_error())?;
        let total = state.matching(filter).count() as i64;
        let items = state
            .matching(filter)
            .skip(offset(page, per_page) as usize)
            .take(per_page.max(0) as usize)
            .cloned()
            .collect();
        Ok((items, total))
    }

    async fn search(
        &self,
        text_query: &str,
        filter: &RecordFilter,
        page: i64,
        per_page: i64,
    ) -> Result<(Vec<RankedRecord>, i64), PipelineError> {
        let terms = query_terms(text_query);
        if terms.is_empty() {
            return Ok((Vec::new(), 0));
        }
        let state = self.state.lock().map_err(|_| lock_error())?;
        let mut hits: Vec<RankedRecord> = state
            .matching(filter)
            .filter_map(|r| {
                score(r, &terms).map(|s| RankedRecord {
                    record: r.clone(),
                    score: s,
                    snippet: r
                        .raw_text
                        .as_deref()
                        .unwrap_or("")
                        .chars()
                        .take(160)
                        .collect(),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.record.id.cmp(&a.record.id))
        });

        let total = hits.len() as i64;
        let items = hits
            .into_iter()
            .skip(offset(page, per_page) as usize)
            .take(per_page.max(0) as usize)
            .collect();
        Ok((items, total))
    }

    async fn get(&self, id: i64) -> Result<Option<DocumentRecord>, PipelineError> {
        let state = self.state.lock().map_err(|_| lock_error())?;
        Ok(state.records.get(&id).cloned())
    }

    async fn people_for(&self, id: i64) -> Result<Vec<String>, PipelineError> {
        let state = self.state.lock().map_err(|_| lock_error())?;
        let mut names: Vec<String> = state
            .people
            .iter()
            .filter(|(_, pid)| state.links.contains(&(id, **pid)))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn list_people(&self, limit: i64) -> Result<Vec<Person>, PipelineError> {
        let state = self.state.lock().map_err(|_| lock_error())?;
        let mut people: Vec<Person> = state
            .people
            .iter()
            .map(|(name, pid)| Person {
                id: *pid,
                name: name.clone(),
                doc_count: state.links.iter().filter(|(_, p)| p == pid).count() as i64,
            })
            .filter(|p| p.doc_count > 0)
            .collect();
        people.sort_by(|a, b| b.doc_count.cmp(&a.doc_count).then(a.name.cmp(&b.name)));
        people.truncate(limit.max(0) as usize);
        Ok(people)
    }

    async fn count_for_source(&self, source_id: &str) -> Result<i64, PipelineError> {
        let state = self.state.lock().map_err(|_| lock_error())?;
        Ok(state
            .records
            .values()
            .filter(|r| r.source_id == source_id)
            .count() as i64)
    }

    async fn stats(&self) -> Result<CatalogStats, PipelineError> {
        let state = self.state.lock().map_err(|_| lock_error())?;
        let mut by_type: BTreeMap<String, i64> = BTreeMap::new();
        let mut by_source: BTreeMap<String, i64> = BTreeMap::new();
        for r in state.records.values() {
            *by_type.entry(r.doc_type.clone()).or_default() += 1;
            *by_source.entry(r.source_id.clone()).or_default() += 1;
        }
        let ordered = |m: BTreeMap<String, i64>| {
            let mut v: Vec<(String, i64)> = m.into_iter().collect();
            v.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
            v
        };
        Ok(CatalogStats {
            total_documents: state.records.len() as i64,
            by_type: ordered(by_type),
            by_source: ordered(by_source),
            people: state.people.len() as i64,
        })
    }
}
