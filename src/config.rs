//! TOML configuration for the catalog pipeline.
//!
//! Every section except `[db]` is optional; missing keys fall back to the
//! defaults below. [`load_config`] validates ranges before anything touches
//! the database or the filesystem.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Directory the page producer writes `<stem>/page_NNNNN.png` (+ `.txt`) into.
    #[serde(default = "default_extracted_root")]
    pub extracted_root: PathBuf,
    /// Root that stored artifact and thumbnail paths are relative to.
    #[serde(default = "default_store_root")]
    pub store_root: PathBuf,
    #[serde(default = "default_release_date")]
    pub release_date: String,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_page_timeout_secs")]
    pub page_timeout_secs: u64,
    #[serde(default = "default_raw_text_cap")]
    pub raw_text_cap: usize,
    #[serde(default = "default_field_cap")]
    pub description_cap: usize,
    #[serde(default = "default_field_cap")]
    pub context_cap: usize,
    #[serde(default = "default_thumbnail_max_px")]
    pub thumbnail_max_px: u32,
    #[serde(default = "default_progress_every")]
    pub progress_every: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            extracted_root: default_extracted_root(),
            store_root: default_store_root(),
            release_date: default_release_date(),
            workers: default_workers(),
            page_timeout_secs: default_page_timeout_secs(),
            raw_text_cap: default_raw_text_cap(),
            description_cap: default_field_cap(),
            context_cap: default_field_cap(),
            thumbnail_max_px: default_thumbnail_max_px(),
            progress_every: default_progress_every(),
        }
    }
}

fn default_extracted_root() -> PathBuf {
    PathBuf::from("./data/extracted")
}
fn default_store_root() -> PathBuf {
    PathBuf::from("./data")
}
fn default_release_date() -> String {
    "2025-12-19".to_string()
}
fn default_workers() -> usize {
    4
}
fn default_page_timeout_secs() -> u64 {
    60
}
fn default_raw_text_cap() -> usize {
    50_000
}
fn default_field_cap() -> usize {
    2_000
}
fn default_thumbnail_max_px() -> u32 {
    300
}
fn default_progress_every() -> u64 {
    100
}

impl PipelineConfig {
    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    pub fn release_date(&self) -> Result<NaiveDate> {
        NaiveDate::parse_from_str(&self.release_date, "%Y-%m-%d")
            .with_context(|| format!("invalid pipeline.release_date: {}", self.release_date))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    /// Substring matched against running processes' command lines.
    #[serde(default = "default_producer_pattern")]
    pub producer_pattern: String,
    /// When set, the producer counts as finished once this file exists.
    #[serde(default)]
    pub done_marker: Option<PathBuf>,
    /// A rendered page with no text file yet is treated as not produced
    /// until it is this old, since the producer writes the text last.
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,
}

impl WatchConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            grace_secs: default_grace_secs(),
            producer_pattern: default_producer_pattern(),
            done_marker: None,
            settle_secs: default_settle_secs(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    5
}
fn default_grace_secs() -> u64 {
    30
}
fn default_settle_secs() -> u64 {
    10
}
fn default_producer_pattern() -> String {
    "extract_images".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_per_page")]
    pub default_per_page: i64,
    #[serde(default = "default_max_per_page")]
    pub max_per_page: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_per_page: default_per_page(),
            max_per_page: default_max_per_page(),
        }
    }
}

fn default_per_page() -> i64 {
    50
}
fn default_max_per_page() -> i64 {
    200
}

impl Config {
    /// Configuration rooted at `dir`, used by tests and `pcat init` without a file.
    pub fn rooted_at(dir: &Path) -> Self {
        Self {
            db: DbConfig {
                path: dir.join("catalog.sqlite"),
            },
            pipeline: PipelineConfig {
                extracted_root: dir.join("extracted"),
                store_root: dir.join("store"),
                ..PipelineConfig::default()
            },
            watch: WatchConfig::default(),
            retrieval: RetrievalConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let p = &config.pipeline;
    if p.workers == 0 {
        anyhow::bail!("pipeline.workers must be >= 1");
    }
    if p.page_timeout_secs == 0 {
        anyhow::bail!("pipeline.page_timeout_secs must be >= 1");
    }
    if p.raw_text_cap == 0 || p.description_cap == 0 || p.context_cap == 0 {
        anyhow::bail!("pipeline text caps must be > 0");
    }
    if p.thumbnail_max_px == 0 {
        anyhow::bail!("pipeline.thumbnail_max_px must be > 0");
    }
    p.release_date()?;

    let r = &config.retrieval;
    if r.max_per_page < 1 {
        anyhow::bail!("retrieval.max_per_page must be >= 1");
    }
    if !(1..=r.max_per_page).contains(&r.default_per_page) {
        anyhow::bail!("retrieval.default_per_page must be in [1, max_per_page]");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = parse("[db]\npath = \"/tmp/x.sqlite\"\n").unwrap();
        assert_eq!(cfg.pipeline.workers, 4);
        assert_eq!(cfg.pipeline.raw_text_cap, 50_000);
        assert_eq!(cfg.watch.poll_interval_secs, 5);
        assert_eq!(cfg.watch.grace_secs, 30);
        assert!(cfg.watch.done_marker.is_none());
        assert_eq!(cfg.watch.settle(), Duration::from_secs(10));
        assert_eq!(cfg.retrieval.default_per_page, 50);
    }

    #[test]
    fn zero_workers_rejected() {
        let err = parse("[db]\npath = \"x\"\n[pipeline]\nworkers = 0\n").unwrap_err();
        assert!(err.to_string().contains("workers"));
    }

    #[test]
    fn bad_release_date_rejected() {
        let err = parse("[db]\npath = \"x\"\n[pipeline]\nrelease_date = \"soon\"\n").unwrap_err();
        assert!(err.to_string().contains("release_date"));
    }

    #[test]
    fn per_page_bounds_checked() {
        let err = parse("[db]\npath = \"x\"\n[retrieval]\ndefault_per_page = 500\n").unwrap_err();
        assert!(err.to_string().contains("default_per_page"));
    }
}
