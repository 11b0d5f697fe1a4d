//! Completion ledger: which (channel, video) pairs were already handed to the
//! actuator.
//!
//! ## File format
//!
//! ```json
//! { "<channel_id>": { "<video_id>": { "title": "…", "completed_at": "…", "timestamp": 0 } } }
//! ```
//!
//! Entries are never overwritten or removed. Writes go to a sibling temp file
//! which is renamed over the ledger, so a crash mid-write leaves the previous
//! ledger intact.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::model::LedgerEntry;
use crate::platform;

pub type LedgerMap = BTreeMap<String, BTreeMap<String, LedgerEntry>>;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger I/O on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ledger {path:?} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("ledger serialisation failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Cloneable handle; all clones share one cache and one write lock.
#[derive(Clone)]
pub struct CompletionLedger {
    path: PathBuf,
    entries: Arc<Mutex<LedgerMap>>,
}

impl CompletionLedger {
    /// Open the ledger at `path`. A missing file is an empty ledger; an
    /// unreadable one is an error so it never gets clobbered.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let entries = Self::read_file(&path)?;
        let count: usize = entries.values().map(BTreeMap::len).sum();
        info!(
            "[ledger] {} completed videos across {} channels in {:?}",
            count,
            entries.len(),
            path
        );
        Ok(Self {
            path,
            entries: Arc::new(Mutex::new(entries)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn is_completed(&self, channel_id: &str, video_id: &str) -> bool {
        self.entries
            .lock()
            .await
            .get(channel_id)
            .is_some_and(|videos| videos.contains_key(video_id))
    }

    /// Record a handled video. Returns `Ok(false)` when the pair is already
    /// present (the existing entry wins). On error neither the cache nor the
    /// file changes.
    pub async fn record(
        &self,
        channel_id: &str,
        video_id: &str,
        entry: LedgerEntry,
    ) -> Result<bool, LedgerError> {
        let mut entries = self.entries.lock().await;
        if entries
            .get(channel_id)
            .is_some_and(|videos| videos.contains_key(video_id))
        {
            debug!("[ledger] {}/{} already recorded", channel_id, video_id);
            return Ok(false);
        }

        let mut next = entries.clone();
        next.entry(channel_id.to_string())
            .or_default()
            .insert(video_id.to_string(), entry);

        let json = serde_json::to_string_pretty(&next)?;
        let path = self.path.clone();
        let written =
            tokio::task::spawn_blocking(move || platform::write_atomic(&path, json.as_bytes()))
                .await
                .unwrap_or_else(|e| Err(std::io::Error::new(std::io::ErrorKind::Other, e)));
        if let Err(source) = written {
            error!("[ledger] write failed, keeping previous state: {}", source);
            return Err(LedgerError::Io {
                path: self.path.clone(),
                source,
            });
        }

        *entries = next;
        info!("[ledger] recorded {}/{}", channel_id, video_id);
        Ok(true)
    }

    /// Point-in-time copy of the whole ledger.
    pub async fn snapshot(&self) -> LedgerMap {
        self.entries.lock().await.clone()
    }

    fn read_file(path: &Path) -> Result<LedgerMap, LedgerError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LedgerMap::new()),
            Err(source) => {
                return Err(LedgerError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        if content.trim().is_empty() {
            return Ok(LedgerMap::new());
        }
        serde_json::from_str(&content).map_err(|source| LedgerError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DispatchJob;

    fn entry(video_id: &str, result: &str) -> LedgerEntry {
        let job = DispatchJob {
            channel_id: "C1".into(),
            video_id: video_id.into(),
            title: Some(format!("title {}", video_id)),
            message: "thanks".into(),
        };
        LedgerEntry::completed_now(&job, result.into())
    }

    #[tokio::test]
    async fn test_record_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("completed.json");

        let ledger = CompletionLedger::open(&path).unwrap();
        assert!(!ledger.is_completed("C1", "v100").await);
        assert!(ledger.record("C1", "v100", entry("v100", "ok")).await.unwrap());
        assert!(ledger.is_completed("C1", "v100").await);
        assert!(!ledger.is_completed("C2", "v100").await);

        let reopened = CompletionLedger::open(&path).unwrap();
        assert!(reopened.is_completed("C1", "v100").await);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let stored = &raw["C1"]["v100"];
        assert_eq!(stored["title"], "title v100");
        assert!(stored["timestamp"].is_i64());
        assert!(stored["completed_at"].is_string());
    }

    #[tokio::test]
    async fn test_existing_entry_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = CompletionLedger::open(dir.path().join("completed.json")).unwrap();

        assert!(ledger.record("C1", "v1", entry("v1", "first")).await.unwrap());
        assert!(!ledger.record("C1", "v1", entry("v1", "second")).await.unwrap());

        let snapshot = ledger.snapshot().await;
        assert_eq!(snapshot["C1"]["v1"].result, "first");
    }

    #[tokio::test]
    async fn test_concurrent_records_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("completed.json");
        let ledger = CompletionLedger::open(&path).unwrap();

        let mut tasks = Vec::new();
        for i in 0..16 {
            let ledger = ledger.clone();
            tasks.push(tokio::spawn(async move {
                let video = format!("v{}", i);
                ledger.record(&format!("C{}", i % 3), &video, entry(&video, "ok")).await
            }));
        }
        for t in tasks {
            assert!(t.await.unwrap().unwrap());
        }

        let reopened = CompletionLedger::open(&path).unwrap();
        let total: usize = reopened.snapshot().await.values().map(BTreeMap::len).sum();
        assert_eq!(total, 16);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("completed.json");
        let ledger = CompletionLedger::open(&path).unwrap();
        ledger.record("C1", "v1", entry("v1", "ok")).await.unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        std::fs::create_dir(dir.path().join("completed.json.tmp")).unwrap();
        assert!(ledger.record("C1", "v2", entry("v2", "ok")).await.is_err());

        assert!(!ledger.is_completed("C1", "v2").await);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn test_corrupt_file_refuses_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("completed.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            CompletionLedger::open(&path),
            Err(LedgerError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_fractional_timestamps_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("completed.json");
        std::fs::write(
            &path,
            r#"{"C1":{"v1":{"title":"t","completed_at":"2025-06-01T12:00:00.123456","timestamp":1748746800.123}}}"#,
        )
        .unwrap();

        let ledger = CompletionLedger::open(&path).unwrap();
        assert_eq!(ledger.path(), path.as_path());
        assert!(ledger.is_completed("C1", "v1").await);
        assert_eq!(ledger.snapshot().await["C1"]["v1"].timestamp, 1748746800);
    }
}
