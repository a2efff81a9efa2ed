//! Durable storage of rendered pages and their thumbnails.
//!
//! Paths handed back to callers are relative to the writer's store root
//! (`extracted/<stem>/page_NNNNN.png`, `thumbnails/<stem>/page_NNNNN.png`)
//! and depend only on the source and page index, so repeating a write for
//! the same page lands on the same file.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::PageError;
use crate::page_source::{page_file_name, source_stem};

const ARTIFACT_DIR: &str = "extracted";
const THUMBNAIL_DIR: &str = "thumbnails";

static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

#[async_trait]
pub trait ArtifactWriter: Send + Sync {
    /// Persists the rendered page and returns its stable relative path.
    async fn store_image(&self, source_id: &str, index: u32, bytes: &[u8])
        -> Result<String, PageError>;

    /// Derives a thumbnail from a stored artifact and returns its relative path.
    async fn derive_thumbnail(&self, artifact_path: &str) -> Result<String, PageError>;
}

/// Hex SHA-256 of a page image, recorded in record metadata.
pub fn content_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Relative artifact path for a page.
pub fn artifact_path(source_id: &str, index: u32) -> String {
    format!(
        "{}/{}/{}",
        ARTIFACT_DIR,
        source_stem(source_id),
        page_file_name(index)
    )
}

/// Relative thumbnail path for a stored artifact.
pub fn thumbnail_path(artifact_path: &str) -> String {
    let rest = artifact_path
        .strip_prefix(ARTIFACT_DIR)
        .map(|r| r.trim_start_matches('/'))
        .unwrap_or(artifact_path);
    format!("{}/{}", THUMBNAIL_DIR, rest)
}

/// Relative directory holding a source's thumbnails.
pub fn thumbnail_dir(source_id: &str) -> String {
    format!("{}/{}", THUMBNAIL_DIR, source_stem(source_id))
}

/// Writes artifacts under a local directory.
pub struct FsArtifactWriter {
    store_root: PathBuf,
    thumbnail_max_px: u32,
}

impl FsArtifactWriter {
    pub fn new(store_root: impl Into<PathBuf>, thumbnail_max_px: u32) -> Self {
        Self {
            store_root: store_root.into(),
            thumbnail_max_px,
        }
    }

    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.store_root.join(relative)
    }
}

async fn same_content(path: &Path, bytes: &[u8]) -> bool {
    match tokio::fs::read(path).await {
        Ok(existing) => existing.len() == bytes.len() && existing == bytes,
        Err(_) => false,
    }
}

#[async_trait]
impl ArtifactWriter for FsArtifactWriter {
    async fn store_image(
        &self,
        source_id: &str,
        index: u32,
        bytes: &[u8],
    ) -> Result<String, PageError> {
        let relative = artifact_path(source_id, index);
        let target = self.resolve(&relative);

        // The producer may already have written this exact file in place.
        if same_content(&target, bytes).await {
            return Ok(relative);
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write then rename so readers never observe a half-written page.
        // Concurrent writers of the same page each get their own temp file.
        let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = target.with_extension(format!("png.{}-{}.part", std::process::id(), seq));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &target).await?;
        Ok(relative)
    }

    async fn derive_thumbnail(&self, artifact_path: &str) -> Result<String, PageError> {
        let relative = thumbnail_path(artifact_path);
        let source = self.resolve(artifact_path);
        let target = self.resolve(&relative);
        let max_px = self.thumbnail_max_px;

        tokio::task::spawn_blocking(move || -> Result<(), PageError> {
            let img = image::open(&source).map_err(|e| PageError::Render(e.to_string()))?;
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            img.thumbnail(max_px, max_px)
                .save(&target)
                .map_err(|e| PageError::Render(e.to_string()))
        })
        .await
        .map_err(|e| PageError::Render(e.to_string()))??;

        Ok(relative)
    }
}
