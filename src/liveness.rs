//! Liveness of the external page producer.
//!
//! The watch runner only needs a yes/no answer: is something still writing
//! pages for this source? Two probes are provided: a process-table scan for
//! a command-line substring, and a completion marker file.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::WatchConfig;

#[async_trait]
pub trait ProducerProbe: Send + Sync {
    async fn is_producer_active(&self, source_id: &str) -> bool;
}

/// Active while any other process's command line contains `pattern`.
pub struct ProcessProbe {
    pattern: String,
}

impl ProcessProbe {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }
}

fn scan_proc(pattern: &str) -> Option<bool> {
    let entries = std::fs::read_dir("/proc").ok()?;
    let own_pid = std::process::id();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let pid: u32 = match name.to_string_lossy().parse() {
            Ok(pid) => pid,
            Err(_) => continue,
        };
        if pid == own_pid {
            continue;
        }
        let Ok(raw) = std::fs::read(entry.path().join("cmdline")) else {
            continue;
        };
        let cmdline = String::from_utf8_lossy(&raw).replace('\0', " ");
        if cmdline.contains(pattern) {
            return Some(true);
        }
    }
    Some(false)
}

fn scan_ps(pattern: &str) -> bool {
    let output = match std::process::Command::new("ps").args(["-eo", "pid=,args="]).output() {
        Ok(o) => o,
        Err(e) => {
            tracing::warn!(error = %e, "cannot list processes; assuming producer inactive");
            return false;
        }
    };
    let own_pid = std::process::id().to_string();
    String::from_utf8_lossy(&output.stdout).lines().any(|line| {
        let line = line.trim_start();
        let (pid, args) = line.split_once(' ').unwrap_or((line, ""));
        pid != own_pid && args.contains(pattern) && !args.starts_with("ps ")
    })
}

#[async_trait]
impl ProducerProbe for ProcessProbe {
    async fn is_producer_active(&self, _source_id: &str) -> bool {
        let pattern = self.pattern.clone();
        tokio::task::spawn_blocking(move || scan_proc(&pattern).unwrap_or_else(|| scan_ps(&pattern)))
            .await
            .unwrap_or(false)
    }
}

/// Active until the marker file exists.
pub struct MarkerProbe {
    marker: PathBuf,
}

impl MarkerProbe {
    pub fn new(marker: impl Into<PathBuf>) -> Self {
        Self {
            marker: marker.into(),
        }
    }
}

#[async_trait]
impl ProducerProbe for MarkerProbe {
    async fn is_producer_active(&self, _source_id: &str) -> bool {
        !tokio::fs::try_exists(&self.marker).await.unwrap_or(false)
    }
}

/// Probe whose answer is set by the caller.
pub struct FlagProbe {
    active: AtomicBool,
}

impl FlagProbe {
    pub fn new(active: bool) -> Self {
        Self {
            active: AtomicBool::new(active),
        }
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProducerProbe for FlagProbe {
    async fn is_producer_active(&self, _source_id: &str) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Marker file when configured, otherwise the process-table scan.
pub fn probe_from_config(watch: &WatchConfig) -> Arc<dyn ProducerProbe> {
    match &watch.done_marker {
        Some(marker) => Arc::new(MarkerProbe::new(marker.clone())),
        None => Arc::new(ProcessProbe::new(watch.producer_pattern.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn marker_probe_flips_when_file_appears() {
        let tmp = TempDir::new().unwrap();
        let marker = tmp.path().join("DONE");
        let probe = MarkerProbe::new(&marker);
        assert!(probe.is_producer_active("x.pdf").await);
        std::fs::write(&marker, "").unwrap();
        assert!(!probe.is_producer_active("x.pdf").await);
    }

    #[tokio::test]
    async fn process_probe_misses_unlikely_pattern() {
        let probe = ProcessProbe::new("no-such-producer-7f3a9c1e");
        assert!(!probe.is_producer_active("x.pdf").await);
    }

    #[tokio::test]
    async fn flag_probe_reports_what_it_is_told() {
        let probe = FlagProbe::new(true);
        assert!(probe.is_producer_active("x.pdf").await);
        probe.set_active(false);
        assert!(!probe.is_producer_active("x.pdf").await);
    }
}
