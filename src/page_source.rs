//! Page sources: where rendered pages and their raw text come from.
//!
//! Rendering and OCR happen in an external producer process that writes
//! `page_NNNNN.png` (and optionally `page_NNNNN.txt`) into a per-source
//! directory. [`DirectoryPageSource`] reads that output; the pipeline never
//! talks to the producer directly.
//!
//! The producer writes the image first and the text file last. A fresh image
//! without its text is reported as not yet produced until the settle time has
//! passed, so a poll landing between the two writes does not store the page
//! without its text.

use async_trait::async_trait;
use globset::{Glob, GlobMatcher};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, SystemTime};
use walkdir::WalkDir;

use crate::error::{PageError, PipelineError};
use crate::models::Page;

#[async_trait]
pub trait PageSource: Send + Sync {
    /// Number of pages in the source, i.e. the exclusive upper bound of
    /// the index range a batch run covers.
    async fn page_count(&self, source_id: &str) -> Result<u32, PipelineError>;

    /// Indices whose rendered page currently exists, ascending.
    async fn materialized(&self, source_id: &str) -> Result<Vec<u32>, PipelineError>;

    /// Fetches one page. `Ok(None)` means the page has not been produced.
    async fn get_page(&self, source_id: &str, index: u32) -> Result<Option<Page>, PageError>;
}

/// File name of the rendered page at `index`.
pub fn page_file_name(index: u32) -> String {
    format!("page_{:05}.png", index)
}

fn text_file_name(index: u32) -> String {
    format!("page_{:05}.txt", index)
}

/// Directory name used for a source: its file stem (`bundle.pdf` -> `bundle`).
pub fn source_stem(source_id: &str) -> String {
    Path::new(source_id)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| source_id.to_string())
}

fn parse_page_index(file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix("page_")?
        .strip_suffix(".png")?
        .parse()
        .ok()
}

/// Reads pages materialized on disk by the producer.
pub struct DirectoryPageSource {
    root: PathBuf,
    matcher: GlobMatcher,
    settle: Duration,
}

impl DirectoryPageSource {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let matcher = Glob::new("page_*.png")
            .map_err(|e| PipelineError::SourceUnavailable(e.to_string()))?
            .compile_matcher();
        Ok(Self {
            root: root.into(),
            matcher,
            settle: Duration::ZERO,
        })
    }

    /// Minimum age of an image without a text file before it is read.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    async fn is_settled(&self, image: &Path) -> bool {
        if self.settle.is_zero() {
            return true;
        }
        let modified = match tokio::fs::metadata(image).await.and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => return true,
        };
        // Clock skew: a modification time in the future counts as settled.
        match SystemTime::now().duration_since(modified) {
            Ok(age) => age >= self.settle,
            Err(_) => true,
        }
    }

    pub fn source_dir(&self, source_id: &str) -> PathBuf {
        self.root.join(source_stem(source_id))
    }

    fn scan(&self, dir: &Path) -> Result<Vec<u32>, PipelineError> {
        let mut indices = BTreeSet::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| PipelineError::SourceUnavailable(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !self.matcher.is_match(name.as_ref()) {
                continue;
            }
            if let Some(index) = parse_page_index(&name) {
                indices.insert(index);
            }
        }
        Ok(indices.into_iter().collect())
    }
}

#[async_trait]
impl PageSource for DirectoryPageSource {
    async fn page_count(&self, source_id: &str) -> Result<u32, PipelineError> {
        let dir = self.source_dir(source_id);
        if !dir.is_dir() {
            return Err(PipelineError::SourceUnavailable(format!(
                "no extracted pages for {} at {}",
                source_id,
                dir.display()
            )));
        }
        let indices = self.scan(&dir)?;
        Ok(indices.last().map(|last| last + 1).unwrap_or(0))
    }

    async fn materialized(&self, source_id: &str) -> Result<Vec<u32>, PipelineError> {
        if !self.root.is_dir() {
            return Err(PipelineError::SourceUnavailable(format!(
                "extracted root does not exist: {}",
                self.root.display()
            )));
        }
        let dir = self.source_dir(source_id);
        // The producer creates the directory with its first page.
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        self.scan(&dir)
    }

    async fn get_page(&self, source_id: &str, index: u32) -> Result<Option<Page>, PageError> {
        let dir = self.source_dir(source_id);
        let image_path = dir.join(page_file_name(index));
        let image = match tokio::fs::read(&image_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PageError::Render(e.to_string())),
        };

        let raw_text = match tokio::fs::read(dir.join(text_file_name(index))).await {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if !self.is_settled(&image_path).await {
                    tracing::debug!(source = source_id, page = index, "page text not written yet");
                    return Ok(None);
                }
                None
            }
            Err(e) => {
                tracing::warn!(source = source_id, page = index, error = %e, "could not read page text");
                None
            }
        };

        Ok(Some(Page {
            source_id: source_id.to_string(),
            index,
            raw_text,
            image,
        }))
    }
}

/// In-memory page source for tests and embedding callers.
///
/// Pages can be added while a runner is polling, which makes it usable as a
/// stand-in for a live producer.
#[derive(Default)]
pub struct MemoryPageSource {
    pages: RwLock<BTreeMap<(String, u32), Page>>,
    failing: RwLock<BTreeSet<(String, u32)>>,
    delay: RwLock<Option<Duration>>,
}

impl MemoryPageSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_page(&self, source_id: &str, index: u32, raw_text: Option<&str>, image: &[u8]) {
        let page = Page {
            source_id: source_id.to_string(),
            index,
            raw_text: raw_text.map(str::to_string),
            image: image.to_vec(),
        };
        if let Ok(mut pages) = self.pages.write() {
            pages.insert((source_id.to_string(), index), page);
        }
    }

    /// Makes `get_page` fail for this page until [`clear_failure`](Self::clear_failure).
    pub fn fail_page(&self, source_id: &str, index: u32) {
        if let Ok(mut failing) = self.failing.write() {
            failing.insert((source_id.to_string(), index));
        }
    }

    pub fn clear_failure(&self, source_id: &str, index: u32) {
        if let Ok(mut failing) = self.failing.write() {
            failing.remove(&(source_id.to_string(), index));
        }
    }

    /// Delays every `get_page` call, to exercise per-page time budgets.
    pub fn set_delay(&self, delay: Option<Duration>) {
        if let Ok(mut d) = self.delay.write() {
            *d = delay;
        }
    }

    fn indices(&self, source_id: &str) -> Vec<u32> {
        self.pages
            .read()
            .map(|pages| {
                pages
                    .keys()
                    .filter(|(src, _)| src == source_id)
                    .map(|(_, idx)| *idx)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl PageSource for MemoryPageSource {
    async fn page_count(&self, source_id: &str) -> Result<u32, PipelineError> {
        Ok(self
            .indices(source_id)
            .last()
            .map(|last| last + 1)
            .unwrap_or(0))
    }

    async fn materialized(&self, source_id: &str) -> Result<Vec<u32>, PipelineError> {
        Ok(self.indices(source_id))
    }

    async fn get_page(&self, source_id: &str, index: u32) -> Result<Option<Page>, PageError> {
        let delay = self.delay.read().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let key = (source_id.to_string(), index);
        let failing = self
            .failing
            .read()
            .map(|f| f.contains(&key))
            .unwrap_or(false);
        if failing {
            return Err(PageError::Render(format!("page {} could not be rendered", index)));
        }
        Ok(self
            .pages
            .read()
            .ok()
            .and_then(|pages| pages.get(&key).cloned()))
    }
}
