//! Continuous ingestion alongside a running page producer.
//!
//! The runner is a small state machine:
//!
//! ```text
//! SCANNING ──▶ WAITING ──(no growth, producer idle)──▶ TERMINATING ──▶ DONE
//!                 ▲   │
//!                 └───┘ new pages or producer still active
//! ```
//!
//! Only `WAITING` (poll interval) and `TERMINATING` (grace period) sleep.
//! Cancellation is honoured at the top of every `WAITING` iteration and
//! during either sleep; pages already handed to workers finish, no new page
//! is started.

use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::batch::{ingest_indices, print_report};
use crate::config::Config;
use crate::coordinator::IngestionCoordinator;
use crate::error::PipelineError;
use crate::liveness::{probe_from_config, ProducerProbe};
use crate::models::{IngestOutcome, RunReport};
use crate::progress::{NoProgress, ProgressEvent, ProgressMode, ProgressReporter};
use crate::repository::SqliteRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchState {
    Scanning,
    Waiting,
    Terminating,
    Done,
}

impl fmt::Display for WatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WatchState::Scanning => "SCANNING",
            WatchState::Waiting => "WAITING",
            WatchState::Terminating => "TERMINATING",
            WatchState::Done => "DONE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct WatchSettings {
    pub poll_interval: Duration,
    pub grace: Duration,
    pub workers: usize,
}

impl WatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.watch.poll_interval_secs),
            grace: Duration::from_secs(config.watch.grace_secs),
            workers: config.pipeline.workers,
        }
    }
}

/// Outcome of a completed watch run.
#[derive(Debug, Clone, Serialize)]
pub struct WatchReport {
    pub report: RunReport,
    /// Pages materialized by the producer when the runner stopped.
    pub materialized: usize,
    /// Records stored for the source when the runner stopped.
    pub ingested: i64,
    pub cancelled: bool,
    /// Every state entered, in order.
    pub states: Vec<WatchState>,
}

pub struct WatchRunner {
    coordinator: Arc<IngestionCoordinator>,
    probe: Arc<dyn ProducerProbe>,
    settings: WatchSettings,
    reporter: Box<dyn ProgressReporter>,
}

/// Mutable bookkeeping for one run.
struct Pass<'a> {
    source_id: &'a str,
    /// Indices whose record is known to exist. Anything else that is
    /// materialized gets (re)tried on the next enumeration.
    done: BTreeSet<u32>,
    last_count: usize,
    report: RunReport,
    states: Vec<WatchState>,
}

impl WatchRunner {
    pub fn new(
        coordinator: Arc<IngestionCoordinator>,
        probe: Arc<dyn ProducerProbe>,
        settings: WatchSettings,
    ) -> Self {
        Self {
            coordinator,
            probe,
            settings,
            reporter: Box::new(NoProgress),
        }
    }

    pub fn with_reporter(mut self, reporter: Box<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub async fn run(
        &self,
        source_id: &str,
        cancel: &CancellationToken,
    ) -> Result<WatchReport, PipelineError> {
        let mut pass = Pass {
            source_id,
            done: BTreeSet::new(),
            last_count: 0,
            report: RunReport::default(),
            states: Vec::new(),
        };

        self.enter(&mut pass, WatchState::Scanning);
        self.sweep(&mut pass, cancel).await?;
        self.enter(&mut pass, WatchState::Waiting);

        let mut cancelled = false;
        loop {
            if cancel.is_cancelled() || !self.pause(self.settings.poll_interval, cancel).await {
                cancelled = true;
                break;
            }

            let grew = self.sweep(&mut pass, cancel).await?;
            self.reporter.report(ProgressEvent::Watching {
                source: source_id.to_string(),
                report: pass.report,
            });
            if grew {
                continue;
            }
            if !self.probe.is_producer_active(source_id).await {
                break;
            }
        }

        if !cancelled {
            self.enter(&mut pass, WatchState::Terminating);
            if self.pause(self.settings.grace, cancel).await {
                self.sweep(&mut pass, cancel).await?;
            } else {
                cancelled = true;
            }
        }

        self.enter(&mut pass, WatchState::Done);
        let ingested = self
            .coordinator
            .repository()
            .count_for_source(source_id)
            .await?;

        Ok(WatchReport {
            report: pass.report,
            materialized: pass.last_count,
            ingested,
            cancelled,
            states: pass.states,
        })
    }

    fn enter(&self, pass: &mut Pass<'_>, state: WatchState) {
        info!(source = pass.source_id, state = %state, "watch state");
        pass.states.push(state);
        self.reporter.report(ProgressEvent::WatchState {
            source: pass.source_id.to_string(),
            state: state.to_string(),
        });
    }

    /// Sleeps for `duration`. Returns `false` if cancelled first.
    async fn pause(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// Enumerates materialized pages and ingests every one not yet known to
    /// be stored, in ascending order. Returns whether the materialized count
    /// grew since the previous enumeration.
    async fn sweep(
        &self,
        pass: &mut Pass<'_>,
        cancel: &CancellationToken,
    ) -> Result<bool, PipelineError> {
        let materialized = self
            .coordinator
            .source()
            .materialized(pass.source_id)
            .await?;
        let grew = materialized.len() > pass.last_count;
        pass.last_count = materialized.len();

        let pending: Vec<u32> = materialized
            .into_iter()
            .filter(|i| !pass.done.contains(i))
            .collect();
        if pending.is_empty() {
            return Ok(grew);
        }

        let report = &mut pass.report;
        let done = &mut pass.done;
        ingest_indices(
            &self.coordinator,
            pass.source_id,
            pending,
            self.settings.workers,
            cancel,
            |index, outcome| {
                report.record(outcome);
                if matches!(
                    outcome,
                    IngestOutcome::Inserted | IngestOutcome::AlreadyPresent
                ) {
                    done.insert(index);
                }
            },
        )
        .await?;

        Ok(grew)
    }
}

/// `pcat watch <source>`: runs until the producer finishes or Ctrl-C.
pub async fn run_watch(
    config: &Config,
    source_id: &str,
    interval: Option<u64>,
    grace: Option<u64>,
    mode: ProgressMode,
) -> Result<()> {
    let repository = Arc::new(SqliteRepository::open(config).await?);
    let coordinator = Arc::new(IngestionCoordinator::from_config(
        config,
        repository.clone(),
    )?);

    let mut settings = WatchSettings::from_config(config);
    if let Some(secs) = interval {
        settings.poll_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = grace {
        settings.grace = Duration::from_secs(secs);
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping after in-flight pages");
            on_signal.cancel();
        }
    });

    let runner = WatchRunner::new(coordinator, probe_from_config(&config.watch), settings)
        .with_reporter(mode.reporter());
    let result = runner.run(source_id, &cancel).await;
    repository.close().await;

    let watch = match result {
        Ok(watch) => watch,
        Err(e) => {
            error!(source = source_id, error = %e, "watch aborted");
            return Err(e.into());
        }
    };

    println!("watch {}", source_id);
    print_report(&watch.report);
    println!("  ingested: {} / {} pages", watch.ingested, watch.materialized);
    if watch.cancelled {
        println!("  cancelled");
    }
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::FsArtifactWriter;
    use crate::coordinator::RecordLimits;
    use crate::liveness::FlagProbe;
    use crate::page_source::MemoryPageSource;
    use crate::repository::InMemoryRepository;
    use chrono::NaiveDate;
    use std::time::Instant;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        source: Arc<MemoryPageSource>,
        repo: Arc<InMemoryRepository>,
        probe: Arc<FlagProbe>,
        runner: WatchRunner,
    }

    fn fixture(poll_ms: u64, grace_ms: u64) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(MemoryPageSource::new());
        let repo = Arc::new(InMemoryRepository::new());
        let probe = Arc::new(FlagProbe::new(true));
        let coordinator = IngestionCoordinator::new(
            source.clone(),
            Arc::new(FsArtifactWriter::new(tmp.path(), 300)),
            repo.clone(),
            RecordLimits {
                raw_text_cap: 50_000,
                description_cap: 2000,
                context_cap: 2000,
                release_date: NaiveDate::from_ymd_opt(2025, 12, 19).unwrap(),
            },
            Duration::from_secs(5),
        );
        let runner = WatchRunner::new(
            Arc::new(coordinator),
            probe.clone(),
            WatchSettings {
                poll_interval: Duration::from_millis(poll_ms),
                grace: Duration::from_millis(grace_ms),
                workers: 2,
            },
        );
        Fixture {
            _tmp: tmp,
            source,
            repo,
            probe,
            runner,
        }
    }

    #[tokio::test]
    async fn picks_up_pages_produced_while_watching() {
        let fx = fixture(20, 40);
        for i in 0..5 {
            fx.source.add_page("live.pdf", i, Some("court filing"), b"img");
        }

        let producer = async {
            tokio::time::sleep(Duration::from_millis(60)).await;
            for i in 5..10 {
                fx.source.add_page("live.pdf", i, None, b"img");
            }
            tokio::time::sleep(Duration::from_millis(60)).await;
            fx.probe.set_active(false);
        };

        let cancel = CancellationToken::new();
        let (result, _) = tokio::join!(fx.runner.run("live.pdf", &cancel), producer);
        let watch = result.unwrap();

        assert_eq!(fx.repo.len(), 10);
        assert_eq!(watch.report.inserted, 10);
        assert_eq!(watch.ingested, 10);
        assert_eq!(watch.materialized, 10);
        assert!(!watch.cancelled);
        assert_eq!(watch.states.first(), Some(&WatchState::Scanning));
        assert_eq!(
            &watch.states[watch.states.len() - 2..],
            &[WatchState::Terminating, WatchState::Done]
        );
    }

    #[tokio::test]
    async fn terminates_within_poll_plus_grace_when_producer_idle() {
        let fx = fixture(30, 60);
        fx.source.add_page("done.pdf", 0, None, b"img");
        fx.probe.set_active(false);

        let started = Instant::now();
        let watch = fx
            .runner
            .run("done.pdf", &CancellationToken::new())
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(90));
        assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);
        assert_eq!(
            watch.states,
            vec![
                WatchState::Scanning,
                WatchState::Waiting,
                WatchState::Terminating,
                WatchState::Done
            ]
        );
        assert_eq!(watch.report.inserted, 1);
    }

    #[tokio::test]
    async fn single_page_from_empty_start_then_producer_stops() {
        let fx = fixture(30, 60);

        // Lands after the initial scan, while the runner is waiting.
        let producer = async {
            tokio::time::sleep(Duration::from_millis(45)).await;
            fx.source.add_page("one.pdf", 0, Some("flight log"), b"img");
            fx.probe.set_active(false);
        };
        let cancel = CancellationToken::new();
        let (result, _) = tokio::join!(fx.runner.run("one.pdf", &cancel), producer);
        let watch = result.unwrap();

        assert_eq!(
            watch.states,
            vec![
                WatchState::Scanning,
                WatchState::Waiting,
                WatchState::Terminating,
                WatchState::Done
            ]
        );
        assert_eq!(watch.report.inserted, 1);
        assert_eq!(watch.materialized, 1);
        assert_eq!(watch.ingested, 1);
        assert_eq!(fx.repo.len(), 1);
        assert!(!watch.cancelled);
    }

    #[tokio::test]
    async fn grace_period_catches_stragglers() {
        let fx = fixture(20, 100);
        fx.probe.set_active(false);

        let straggler = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            fx.source.add_page("late.pdf", 0, None, b"img");
        };
        let cancel = CancellationToken::new();
        let (result, _) = tokio::join!(fx.runner.run("late.pdf", &cancel), straggler);

        assert_eq!(result.unwrap().report.inserted, 1);
        assert_eq!(fx.repo.len(), 1);
    }

    #[tokio::test]
    async fn cancellation_skips_grace() {
        let fx = fixture(20, 10_000);
        fx.source.add_page("c.pdf", 0, None, b"img");

        let cancel = CancellationToken::new();
        let stopper = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        };

        let started = Instant::now();
        let (result, _) = tokio::join!(fx.runner.run("c.pdf", &cancel), stopper);
        let watch = result.unwrap();

        assert!(watch.cancelled);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!watch.states.contains(&WatchState::Terminating));
        assert_eq!(watch.states.last(), Some(&WatchState::Done));
        assert_eq!(fx.repo.len(), 1);
    }

    #[tokio::test]
    async fn failed_page_is_retried_on_next_poll() {
        let fx = fixture(20, 20);
        fx.source.add_page("r.pdf", 0, None, b"img");
        fx.source.fail_page("r.pdf", 0);

        let recover = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            fx.source.clear_failure("r.pdf", 0);
            tokio::time::sleep(Duration::from_millis(50)).await;
            fx.probe.set_active(false);
        };
        let cancel = CancellationToken::new();
        let (result, _) = tokio::join!(fx.runner.run("r.pdf", &cancel), recover);
        let watch = result.unwrap();

        assert_eq!(fx.repo.len(), 1);
        assert!(watch.report.failed >= 1);
        assert_eq!(watch.report.inserted, 1);
    }
}
