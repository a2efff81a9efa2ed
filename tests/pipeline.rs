//! End-to-end pipeline tests against a temp-dir SQLite catalog.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use page_catalog::artifacts::FsArtifactWriter;
use page_catalog::batch::run_batch;
use page_catalog::config::{Config, RetrievalConfig};
use page_catalog::coordinator::{IngestionCoordinator, RecordLimits};
use page_catalog::models::IngestOutcome;
use page_catalog::page_source::{page_file_name, DirectoryPageSource, MemoryPageSource};
use page_catalog::progress::NoProgress;
use page_catalog::repository::{RecordFilter, Repository, SqliteRepository};
use page_catalog::search::{execute, SearchRequest};
use tempfile::TempDir;

struct Catalog {
    tmp: TempDir,
    source: Arc<MemoryPageSource>,
    repo: Arc<SqliteRepository>,
    coordinator: Arc<IngestionCoordinator>,
}

async fn catalog() -> Catalog {
    let tmp = TempDir::new().unwrap();
    let config = Config::rooted_at(tmp.path());
    let repo = Arc::new(SqliteRepository::open(&config).await.unwrap());
    let source = Arc::new(MemoryPageSource::new());
    let coordinator = Arc::new(IngestionCoordinator::new(
        source.clone(),
        Arc::new(FsArtifactWriter::new(&config.pipeline.store_root, 300)),
        repo.clone(),
        limits(),
        Duration::from_secs(10),
    ));
    Catalog {
        tmp,
        source,
        repo,
        coordinator,
    }
}

fn limits() -> RecordLimits {
    RecordLimits {
        raw_text_cap: 50_000,
        description_cap: 2000,
        context_cap: 2000,
        release_date: NaiveDate::from_ymd_opt(2025, 12, 19).unwrap(),
    }
}

fn request(text: Option<&str>, per_page: i64, page: i64) -> SearchRequest {
    SearchRequest {
        text_query: text.map(str::to_string),
        page,
        per_page,
        ..SearchRequest::default()
    }
}

#[tokio::test]
async fn three_page_source_yields_three_records() {
    let c = catalog().await;
    c.source
        .add_page("a.pdf", 0, Some("Flight log, N908JE, Palm Beach"), b"img0");
    c.source.add_page("a.pdf", 1, None, b"img1");
    c.source
        .add_page("a.pdf", 2, Some("Exhibit EFTA12345678 attached"), b"img2");

    let report = run_batch(&c.coordinator, "a.pdf", (0..3).collect(), 2, &NoProgress, 100)
        .await
        .unwrap();
    assert_eq!(report.inserted, 3);
    assert_eq!(report.skipped, 0);

    let (records, total) = c
        .repo
        .query(&RecordFilter::default(), 1, 10)
        .await
        .unwrap();
    assert_eq!(total, 3);

    let by_index = |i: u32| records.iter().find(|r| r.page_index == i).unwrap();
    assert_eq!(by_index(0).doc_type, "flight_log");

    let blank = by_index(1);
    assert_eq!(blank.doc_type, "image");
    assert_eq!(blank.metadata["classification"], "unknown");
    assert!(blank.raw_text.is_none());
    assert_eq!(
        blank.artifact_path.as_deref(),
        Some("extracted/a/page_00001.png")
    );
    assert!(c.tmp.path().join("store/extracted/a/page_00001.png").exists());

    assert_eq!(by_index(2).external_id.as_deref(), Some("EFTA12345678"));
    assert_eq!(by_index(2).release_date, "2025-12-19");
}

#[tokio::test]
async fn concurrent_ingest_of_same_page_inserts_once() {
    let c = catalog().await;
    c.source.add_page("a.pdf", 5, Some("court filing"), b"img");

    let (first, second) = tokio::join!(
        c.coordinator.ingest_page("a.pdf", 5),
        c.coordinator.ingest_page("a.pdf", 5)
    );
    let outcomes = [first.unwrap(), second.unwrap()];
    assert_eq!(outcomes.iter().filter(|o| o.inserted()).count(), 1);
    assert!(outcomes.contains(&IngestOutcome::AlreadyPresent));
    assert_eq!(c.repo.count_for_source("a.pdf").await.unwrap(), 1);
}

#[tokio::test]
async fn interrupted_batch_resumes_without_duplicates() {
    let c = catalog().await;
    for i in 0..10 {
        c.source.add_page("big.pdf", i, Some("meeting schedule"), b"img");
    }

    // First run stops partway through the range.
    let partial = run_batch(&c.coordinator, "big.pdf", (0..4).collect(), 3, &NoProgress, 0)
        .await
        .unwrap();
    assert_eq!(partial.inserted, 4);

    let full = run_batch(&c.coordinator, "big.pdf", (0..10).collect(), 3, &NoProgress, 0)
        .await
        .unwrap();
    assert_eq!(full.inserted, 6);
    assert_eq!(full.skipped, 4);
    assert_eq!(c.repo.count_for_source("big.pdf").await.unwrap(), 10);
}

#[tokio::test]
async fn failing_page_does_not_stop_the_batch() {
    let c = catalog().await;
    for i in 0..4 {
        c.source.add_page("f.pdf", i, None, b"img");
    }
    c.source.fail_page("f.pdf", 1);

    let report = run_batch(&c.coordinator, "f.pdf", (0..4).collect(), 2, &NoProgress, 0)
        .await
        .unwrap();
    assert_eq!(report.inserted, 3);
    assert_eq!(report.failed, 1);

    c.source.clear_failure("f.pdf", 1);
    let retry = run_batch(&c.coordinator, "f.pdf", (0..4).collect(), 2, &NoProgress, 0)
        .await
        .unwrap();
    assert_eq!(retry.inserted, 1);
    assert_eq!(c.repo.count_for_source("f.pdf").await.unwrap(), 4);
}

#[tokio::test]
async fn oversized_text_is_stored_truncated() {
    let c = catalog().await;
    let text = "deposition ".repeat(10_000);
    c.source.add_page("t.pdf", 0, Some(&text), b"img");

    assert!(c.coordinator.ingest_page("t.pdf", 0).await.unwrap().inserted());
    let (records, _) = c
        .repo
        .query(&RecordFilter::default(), 1, 1)
        .await
        .unwrap();
    assert_eq!(records[0].raw_text.as_ref().unwrap().chars().count(), 50_000);
}

#[tokio::test]
async fn search_ranks_by_relevance_then_newest() {
    let c = catalog().await;
    c.source
        .add_page("s.pdf", 0, Some("passenger passenger passenger"), b"i");
    c.source.add_page("s.pdf", 1, Some("passenger"), b"i");
    c.source.add_page("s.pdf", 2, Some("passenger"), b"i");
    c.source.add_page("s.pdf", 3, Some("nothing relevant"), b"i");
    for i in 0..4 {
        c.coordinator.ingest_page("s.pdf", i).await.unwrap();
    }

    let retrieval = RetrievalConfig::default();
    let response = execute(c.repo.as_ref(), &retrieval, &request(Some("passenger"), 10, 1))
        .await
        .unwrap();
    assert_eq!(response.total, 3);
    let indices: Vec<u32> = response
        .results
        .iter()
        .map(|h| h.record.page_index)
        .collect();
    assert_eq!(indices[0], 0);
    // Equal scores fall back to descending id.
    assert!(response.results[1].record.id > response.results[2].record.id);

    let again = execute(c.repo.as_ref(), &retrieval, &request(Some("passenger"), 10, 1))
        .await
        .unwrap();
    let ids = |r: &page_catalog::search::SearchResponse| {
        r.results.iter().map(|h| h.record.id).collect::<Vec<_>>()
    };
    assert_eq!(ids(&response), ids(&again));

    // Page boundaries are consistent with the full ordering.
    let page2 = execute(c.repo.as_ref(), &retrieval, &request(Some("passenger"), 2, 2))
        .await
        .unwrap();
    assert_eq!(page2.results.len(), 1);
    assert_eq!(page2.results[0].record.id, ids(&response)[2]);
}

#[tokio::test]
async fn listing_filters_and_orders_newest_first() {
    let c = catalog().await;
    c.source.add_page("alpha.pdf", 0, Some("flight log"), b"i");
    c.source.add_page("alpha.pdf", 1, Some("court order"), b"i");
    c.source.add_page("beta.pdf", 0, Some("flight log"), b"i");
    c.coordinator.ingest_page("alpha.pdf", 0).await.unwrap();
    c.coordinator.ingest_page("alpha.pdf", 1).await.unwrap();
    c.coordinator.ingest_page("beta.pdf", 0).await.unwrap();

    let retrieval = RetrievalConfig::default();
    let mut req = request(None, 10, 1);
    req.category = Some("flight_log".into());
    let response = execute(c.repo.as_ref(), &retrieval, &req).await.unwrap();
    assert_eq!(response.total, 2);
    assert_eq!(response.results[0].record.source_id, "beta.pdf");
    assert!(response.results[0].score.is_none());

    req.category = Some("all".into());
    req.source_filter = Some("ALPHA".into());
    let response = execute(c.repo.as_ref(), &retrieval, &req).await.unwrap();
    assert_eq!(response.total, 2);
    assert!(response.results.iter().all(|h| h.record.source_id == "alpha.pdf"));

    let bad = execute(c.repo.as_ref(), &retrieval, &request(None, 10, 0)).await;
    assert!(bad.is_err());
}

#[tokio::test]
async fn people_are_linked_once_per_record() {
    let c = catalog().await;
    c.source
        .add_page("p.pdf", 0, Some("Photo of Bill Clinton and Jeffrey Epstein"), b"i");
    c.source.add_page("p.pdf", 1, Some("letter to Bill  Clinton"), b"i");
    c.coordinator.ingest_page("p.pdf", 0).await.unwrap();
    c.coordinator.ingest_page("p.pdf", 1).await.unwrap();
    c.coordinator.ingest_page("p.pdf", 1).await.unwrap();

    let people = c.repo.list_people(10).await.unwrap();
    assert_eq!(people[0].name, "Bill Clinton");
    assert_eq!(people[0].doc_count, 2);
    assert_eq!(people[1].name, "Jeffrey Epstein");
    assert_eq!(people[1].doc_count, 1);

    let stats = c.repo.stats().await.unwrap();
    assert_eq!(stats.total_documents, 2);
    assert_eq!(stats.people, 2);
    assert_eq!(stats.by_source, vec![("p.pdf".to_string(), 2)]);
}

#[tokio::test]
async fn page_written_before_its_text_is_ingested_with_text() {
    let c = catalog().await;
    let config = Config::rooted_at(c.tmp.path());
    let pages = config.pipeline.extracted_root.join("late");
    std::fs::create_dir_all(&pages).unwrap();
    std::fs::write(pages.join(page_file_name(0)), b"img").unwrap();

    let source = DirectoryPageSource::new(&config.pipeline.extracted_root)
        .unwrap()
        .with_settle(Duration::from_secs(60));
    let coordinator = IngestionCoordinator::new(
        Arc::new(source),
        Arc::new(FsArtifactWriter::new(&config.pipeline.store_root, 300)),
        c.repo.clone(),
        limits(),
        Duration::from_secs(10),
    );

    assert_eq!(
        coordinator.ingest_page("late.pdf", 0).await.unwrap(),
        IngestOutcome::NotAvailable
    );
    assert_eq!(c.repo.count_for_source("late.pdf").await.unwrap(), 0);

    std::fs::write(pages.join("page_00000.txt"), "Exhibit EFTA87654321 court filing").unwrap();
    assert!(coordinator.ingest_page("late.pdf", 0).await.unwrap().inserted());

    let (records, _) = c
        .repo
        .query(&RecordFilter::default(), 1, 10)
        .await
        .unwrap();
    assert_eq!(records[0].doc_type, "legal");
    assert!(records[0].raw_text.as_deref().unwrap().contains("court filing"));
    assert_eq!(records[0].external_id.as_deref(), Some("EFTA87654321"));
}
