//! Checkpoint ledger: durable record of which work items are done.
//!
//! The ledger is a JSON document kept fully in memory and written back
//! atomically (temp file in the same directory, fsync, rename), so a crash
//! at any point leaves either the previous or the new document on disk.
//! Only `processed` excludes an item from later runs; `failed` records are
//! informational.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use batch_scan_core::{CheckpointRecord, ScanStatus, WorkItem, WorkItemId};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{OpsError, OpsResult};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointDocument {
    version: u32,
    #[serde(default)]
    records: Vec<CheckpointRecord>,
}

#[derive(Debug, Default)]
struct Ledger {
    records: BTreeMap<WorkItemId, CheckpointRecord>,
    /// Records changed since the last write.
    dirty: usize,
}

impl Ledger {
    /// Insert following the precedence rules. Returns whether anything changed.
    fn upsert(&mut self, record: CheckpointRecord) -> bool {
        let id = record.id();
        match self.records.get(&id) {
            Some(existing) if !supersedes(&record, existing) => false,
            _ => {
                self.records.insert(id, record);
                self.dirty += 1;
                true
            }
        }
    }
}

/// `processed` always wins; otherwise the newer record wins.
fn supersedes(new: &CheckpointRecord, old: &CheckpointRecord) -> bool {
    match (new.is_processed(), old.is_processed()) {
        (true, false) => true,
        (false, true) => false,
        _ => new.updated_at > old.updated_at,
    }
}

/// Totals over the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointStats {
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
}

/// Per-repository ledger totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSummary {
    pub repository_url: String,
    pub processed: usize,
    pub failed: usize,
    /// Most recent update for this repository (unix millis).
    pub last_updated: u64,
}

/// Shared, single-writer checkpoint ledger.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    flush_every: usize,
    ledger: Mutex<Ledger>,
}

impl CheckpointStore {
    /// Load the ledger at `path`.
    ///
    /// A missing file yields an empty ledger. An unreadable or corrupt file
    /// is logged and also yields an empty ledger; the next write replaces it.
    pub fn load(path: impl Into<PathBuf>, flush_every: usize) -> Self {
        let path = path.into();
        let records = match read_document(&path) {
            Ok(Some(records)) => {
                info!(path = %path.display(), records = records.len(), "Loaded checkpoint");
                records
            }
            Ok(None) => {
                debug!(path = %path.display(), "No checkpoint yet, starting empty");
                vec![]
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Checkpoint corrupt, starting empty");
                vec![]
            }
        };

        let mut ledger = Ledger::default();
        for record in records {
            ledger.upsert(record);
        }
        ledger.dirty = 0;

        Self {
            path,
            flush_every: flush_every.max(1),
            ledger: Mutex::new(ledger),
        }
    }

    /// Read another checkpoint file strictly (for merging).
    pub fn read_records(path: &Path) -> OpsResult<Vec<CheckpointRecord>> {
        match read_document(path) {
            Ok(Some(records)) => Ok(records),
            Ok(None) => Err(OpsError::CheckpointCorrupt {
                path: path.to_path_buf(),
                message: "file not found".into(),
            }),
            Err(message) => Err(OpsError::CheckpointCorrupt {
                path: path.to_path_buf(),
                message,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record an outcome. Writes the ledger once enough records accumulated.
    ///
    /// A `processed` record is never downgraded.
    pub async fn record(
        &self,
        item: &WorkItem,
        status: ScanStatus,
        error: Option<String>,
    ) -> OpsResult<()> {
        let mut ledger = self.ledger.lock().await;
        let mut record = CheckpointRecord::new(item, status, error);
        if let Some(existing) = ledger.records.get(&record.id()) {
            // Same-millisecond updates still replace the previous attempt.
            record.updated_at = record.updated_at.max(existing.updated_at + 1);
        }
        ledger.upsert(record);

        if ledger.dirty >= self.flush_every {
            self.write(&mut ledger).await?;
        }
        Ok(())
    }

    /// Write pending changes.
    pub async fn flush(&self) -> OpsResult<()> {
        let mut ledger = self.ledger.lock().await;
        if ledger.dirty == 0 {
            return Ok(());
        }
        self.write(&mut ledger).await
    }

    /// Mark an item processed regardless of its history, and write.
    pub async fn mark_processed(
        &self,
        id: &WorkItemId,
        project_key: Option<String>,
    ) -> OpsResult<CheckpointRecord> {
        let mut ledger = self.ledger.lock().await;
        let project_key = project_key
            .or_else(|| ledger.records.get(id).map(|r| r.project_key.clone()))
            .unwrap_or_default();
        let item = WorkItem::new(
            id.repository_url.clone(),
            id.commit_sha.clone(),
            Some(project_key),
        );
        let record = CheckpointRecord::new(&item, ScanStatus::Processed, None);

        ledger.records.insert(id.clone(), record.clone());
        ledger.dirty += 1;
        self.write(&mut ledger).await?;
        Ok(record)
    }

    /// Fold records from another ledger in, and write. Returns how many changed.
    pub async fn merge(
        &self,
        records: impl IntoIterator<Item = CheckpointRecord>,
    ) -> OpsResult<usize> {
        let mut ledger = self.ledger.lock().await;
        let mut changed = 0;
        for record in records {
            if ledger.upsert(record) {
                changed += 1;
            }
        }
        if ledger.dirty > 0 {
            self.write(&mut ledger).await?;
        }
        Ok(changed)
    }

    pub async fn is_processed(&self, id: &WorkItemId) -> bool {
        self.ledger
            .lock()
            .await
            .records
            .get(id)
            .is_some_and(|r| r.is_processed())
    }

    pub async fn get(&self, id: &WorkItemId) -> Option<CheckpointRecord> {
        self.ledger.lock().await.records.get(id).cloned()
    }

    pub async fn stats(&self) -> CheckpointStats {
        let ledger = self.ledger.lock().await;
        let processed = ledger.records.values().filter(|r| r.is_processed()).count();
        CheckpointStats {
            total: ledger.records.len(),
            processed,
            failed: ledger.records.len() - processed,
        }
    }

    /// Failed records, most recent first.
    pub async fn failed(&self) -> Vec<CheckpointRecord> {
        let ledger = self.ledger.lock().await;
        let mut failed: Vec<CheckpointRecord> = ledger
            .records
            .values()
            .filter(|r| r.status == ScanStatus::Failed)
            .cloned()
            .collect();
        failed.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        failed
    }

    /// Totals per repository, ordered by URL.
    pub async fn repo_summary(&self) -> Vec<RepoSummary> {
        let ledger = self.ledger.lock().await;
        let mut repos: BTreeMap<&str, RepoSummary> = BTreeMap::new();
        for record in ledger.records.values() {
            let entry = repos
                .entry(record.repository_url.as_str())
                .or_insert_with(|| RepoSummary {
                    repository_url: record.repository_url.clone(),
                    processed: 0,
                    failed: 0,
                    last_updated: 0,
                });
            match record.status {
                ScanStatus::Processed => entry.processed += 1,
                ScanStatus::Failed => entry.failed += 1,
            }
            entry.last_updated = entry.last_updated.max(record.updated_at);
        }
        repos.into_values().collect()
    }

    /// Serialize under the lock and replace the file atomically.
    async fn write(&self, ledger: &mut Ledger) -> OpsResult<()> {
        let document = CheckpointDocument {
            version: FORMAT_VERSION,
            records: ledger.records.values().cloned().collect(),
        };
        let bytes = serde_json::to_vec_pretty(&document)?;
        let path = self.path.clone();

        let result = tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))
            .and_then(|r| r);

        match result {
            Ok(()) => {
                debug!(
                    path = %self.path.display(),
                    records = document.records.len(),
                    "Checkpoint written"
                );
                ledger.dirty = 0;
                Ok(())
            }
            Err(e) => Err(OpsError::checkpoint_persist(&self.path, e.to_string())),
        }
    }
}

fn read_document(path: &Path) -> Result<Option<Vec<CheckpointRecord>>, String> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.to_string()),
    };
    let document: CheckpointDocument =
        serde_json::from_str(&contents).map_err(|e| e.to_string())?;
    if document.version != FORMAT_VERSION {
        return Err(format!("unsupported checkpoint version {}", document.version));
    }
    Ok(Some(document.records))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = write_temp(path, bytes)?;
    // A failed rename drops the temp file and leaves `path` as it was.
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Write and sync `bytes` to a temp file beside `path`.
fn write_temp(path: &Path, bytes: &[u8]) -> std::io::Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".checkpoint-")
        .suffix(".tmp")
        .tempfile_in(&dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn item(sha: &str) -> WorkItem {
        WorkItem::new("https://github.com/acme/widgets.git", sha, None)
    }

    fn record_at(item: &WorkItem, status: ScanStatus, at: u64) -> CheckpointRecord {
        let mut record = CheckpointRecord::new(item, status, None);
        record.updated_at = at;
        record
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::load(temp.path().join("cp.json"), 10);
        assert_eq!(store.stats().await, CheckpointStats::default());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_empty_and_replaced() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cp.json");
        std::fs::write(&path, "{\"version\": 1, \"records\": [tru").unwrap();

        let store = CheckpointStore::load(&path, 1);
        assert_eq!(store.stats().await.total, 0);

        store.record(&item("a"), ScanStatus::Processed, None).await.unwrap();
        let reloaded = CheckpointStore::load(&path, 1);
        assert!(reloaded.is_processed(&item("a").id()).await);
    }

    #[tokio::test]
    async fn test_round_trip_through_disk() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("cp.json");
        let store = CheckpointStore::load(&path, 100);

        store.record(&item("a"), ScanStatus::Processed, None).await.unwrap();
        store
            .record(&item("b"), ScanStatus::Failed, Some("analyzer failed".into()))
            .await
            .unwrap();
        assert!(!path.exists(), "below flush threshold");
        store.flush().await.unwrap();

        let reloaded = CheckpointStore::load(&path, 100);
        assert!(reloaded.is_processed(&item("a").id()).await);
        assert!(!reloaded.is_processed(&item("b").id()).await);
        let failed = reloaded.get(&item("b").id()).await.unwrap();
        assert_eq!(failed.error.as_deref(), Some("analyzer failed"));
        assert_eq!(failed.project_key, "widgets_b");
    }

    #[tokio::test]
    async fn test_flushes_every_n_records() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cp.json");
        let store = CheckpointStore::load(&path, 2);

        store.record(&item("a"), ScanStatus::Processed, None).await.unwrap();
        assert!(!path.exists());
        store.record(&item("b"), ScanStatus::Processed, None).await.unwrap();
        assert_eq!(CheckpointStore::read_records(&path).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_processed_is_never_downgraded() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::load(temp.path().join("cp.json"), 10);

        store.record(&item("a"), ScanStatus::Processed, None).await.unwrap();
        store
            .record(&item("a"), ScanStatus::Failed, Some("late".into()))
            .await
            .unwrap();
        assert!(store.is_processed(&item("a").id()).await);
    }

    #[tokio::test]
    async fn test_failed_then_processed() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::load(temp.path().join("cp.json"), 10);

        store
            .record(&item("a"), ScanStatus::Failed, Some("x".into()))
            .await
            .unwrap();
        store.record(&item("a"), ScanStatus::Processed, None).await.unwrap();
        assert_eq!(store.stats().await.processed, 1);
        assert!(store.failed().await.is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_write_leaves_previous_document() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cp.json");
        let store = CheckpointStore::load(&path, 1);
        store.record(&item("a"), ScanStatus::Processed, None).await.unwrap();
        let before = std::fs::read(&path).unwrap();

        // Crash after the temp file is synced but before the rename.
        let (_, stray) = write_temp(&path, b"{\"version\": 1, \"records\": []}")
            .unwrap()
            .keep()
            .unwrap();
        assert!(stray.exists());

        assert_eq!(std::fs::read(&path).unwrap(), before);
        let reloaded = CheckpointStore::load(&path, 1);
        assert!(reloaded.is_processed(&item("a").id()).await);
    }

    #[tokio::test]
    async fn test_failed_rename_keeps_target_and_drops_temp() {
        let temp = TempDir::new().unwrap();
        // A non-empty directory cannot be replaced by a rename.
        let path = temp.path().join("cp.json");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), "previous").unwrap();

        let store = CheckpointStore::load(&path, 1);
        let err = store
            .record(&item("a"), ScanStatus::Processed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, OpsError::CheckpointPersist { .. }));

        assert_eq!(std::fs::read_to_string(path.join("keep")).unwrap(), "previous");
        let leftovers: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".checkpoint-"))
            .collect();
        assert!(leftovers.is_empty(), "temp file left behind");
    }

    #[tokio::test]
    async fn test_persist_failure_is_reported() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let store = CheckpointStore::load(blocker.join("cp.json"), 1);

        let err = store
            .record(&item("a"), ScanStatus::Processed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, OpsError::CheckpointPersist { .. }));
    }

    #[tokio::test]
    async fn test_merge_precedence() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::load(temp.path().join("cp.json"), 10);
        store.merge([
            record_at(&item("a"), ScanStatus::Processed, 10),
            record_at(&item("b"), ScanStatus::Failed, 10),
            record_at(&item("c"), ScanStatus::Failed, 10),
        ])
        .await
        .unwrap();

        let changed = store
            .merge([
                // Older failure cannot replace processed.
                record_at(&item("a"), ScanStatus::Failed, 99),
                // Processed wins over failure even when older.
                record_at(&item("b"), ScanStatus::Processed, 1),
                // Newer failure replaces older failure.
                record_at(&item("c"), ScanStatus::Failed, 20),
                // Stale failure is ignored.
                record_at(&item("c"), ScanStatus::Failed, 5),
            ])
            .await
            .unwrap();

        assert_eq!(changed, 2);
        assert!(store.is_processed(&item("a").id()).await);
        assert!(store.is_processed(&item("b").id()).await);
        assert_eq!(store.get(&item("c").id()).await.unwrap().updated_at, 20);
        assert!(temp.path().join("cp.json").exists());
    }

    #[tokio::test]
    async fn test_mark_processed_keeps_project_key() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cp.json");
        let store = CheckpointStore::load(&path, 10);
        let it = WorkItem::new("https://github.com/acme/widgets.git", "a", Some("custom".into()));
        store
            .record(&it, ScanStatus::Failed, Some("x".into()))
            .await
            .unwrap();

        let record = store.mark_processed(&it.id(), None).await.unwrap();
        assert_eq!(record.project_key, "custom");
        assert!(CheckpointStore::load(&path, 10).is_processed(&it.id()).await);
    }

    #[tokio::test]
    async fn test_repo_summary() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::load(temp.path().join("cp.json"), 10);
        let other = WorkItem::new("https://github.com/acme/gadgets.git", "z", None);
        store.record(&item("a"), ScanStatus::Processed, None).await.unwrap();
        store.record(&item("b"), ScanStatus::Failed, None).await.unwrap();
        store.record(&other, ScanStatus::Processed, None).await.unwrap();

        let summary = store.repo_summary().await;
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].repository_url, "https://github.com/acme/gadgets.git");
        assert_eq!(summary[1].processed, 1);
        assert_eq!(summary[1].failed, 1);
    }

    #[tokio::test]
    async fn test_read_records_is_strict() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cp.json");
        assert!(CheckpointStore::read_records(&path).is_err());
        std::fs::write(&path, "nope").unwrap();
        assert!(matches!(
            CheckpointStore::read_records(&path),
            Err(OpsError::CheckpointCorrupt { .. })
        ));
    }
}
