//! Stored uploads and their scan lifecycle.
//!
//! Each upload is a `<id>.csv` with a `<id>.json` metadata file beside it.
//! Metadata is rewritten through a temp file and a rename, and status
//! changes are serialized so two requests cannot both queue the same
//! upload.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use batch_scan_core::{now_millis, JobId, UploadStatus};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::error::{OpsError, OpsResult};
use crate::input::summarize;
use crate::requests::UploadRequest;
use crate::responses::UploadInfo;

/// Directory of uploaded CSVs. Clones share the status lock.
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
    status_lock: Arc<Mutex<()>>,
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            status_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Validate and store an uploaded CSV.
    pub async fn save(&self, request: UploadRequest) -> OpsResult<UploadInfo> {
        let summary = summarize(request.content.as_bytes())?;
        let upload_id = Uuid::new_v4().to_string();
        tokio::fs::create_dir_all(&self.dir).await?;

        let info = UploadInfo {
            upload_id: upload_id.clone(),
            name: request.name,
            created_at: now_millis(),
            total_commits: summary.total_commits,
            invalid: summary.invalid,
            repos: summary.repos,
            status: UploadStatus::Uploaded,
            job_id: None,
            error: None,
        };
        tokio::fs::write(self.csv_path(&upload_id), request.content).await?;
        self.write_meta(&info).await?;

        info!(upload_id = %upload_id, commits = info.total_commits, "Stored upload");
        Ok(info)
    }

    /// Stored uploads, newest first.
    pub async fn list(&self) -> OpsResult<Vec<UploadInfo>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let mut uploads = vec![];
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                let bytes = tokio::fs::read(&path).await?;
                if let Ok(info) = serde_json::from_slice::<UploadInfo>(&bytes) {
                    uploads.push(info);
                }
            }
        }
        uploads.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(uploads)
    }

    /// Look up a stored upload and the path of its CSV.
    pub async fn get(&self, upload_id: &str) -> OpsResult<(UploadInfo, PathBuf)> {
        let not_found = || OpsError::UploadNotFound {
            id: upload_id.to_string(),
        };
        // Only ids we generated; anything else could escape the directory.
        let id = Uuid::parse_str(upload_id).map_err(|_| not_found())?.to_string();

        let csv = self.csv_path(&id);
        let bytes = match tokio::fs::read(self.meta_path(&id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };
        if !csv.exists() {
            return Err(not_found());
        }
        Ok((serde_json::from_slice(&bytes)?, csv))
    }

    /// Mark an upload queued, unless a job for it is already queued or
    /// running.
    pub async fn claim(&self, upload_id: &str) -> OpsResult<(UploadInfo, PathBuf)> {
        let _guard = self.status_lock.lock().await;
        let (mut info, csv) = self.get(upload_id).await?;
        if info.status.is_busy() {
            return Err(OpsError::UploadBusy {
                id: info.upload_id,
                status: info.status,
            });
        }
        info.status = UploadStatus::Queued;
        info.job_id = None;
        info.error = None;
        self.write_meta(&info).await?;
        Ok((info, csv))
    }

    /// Record the latest job state of an upload.
    pub async fn update(
        &self,
        upload_id: &str,
        status: UploadStatus,
        job_id: Option<JobId>,
        error: Option<String>,
    ) -> OpsResult<UploadInfo> {
        let _guard = self.status_lock.lock().await;
        let (mut info, _) = self.get(upload_id).await?;
        info.status = status;
        info.job_id = job_id;
        info.error = error;
        self.write_meta(&info).await?;
        Ok(info)
    }

    /// Put uploads left queued or running by a previous process back to
    /// `uploaded`. Returns them oldest first.
    pub async fn reset_interrupted(&self) -> OpsResult<Vec<UploadInfo>> {
        let _guard = self.status_lock.lock().await;
        let mut interrupted: Vec<UploadInfo> = self
            .list()
            .await?
            .into_iter()
            .filter(|u| u.status.is_busy())
            .collect();
        interrupted.reverse();

        for info in &mut interrupted {
            info.status = UploadStatus::Uploaded;
            info.job_id = None;
            self.write_meta(info).await?;
        }
        Ok(interrupted)
    }

    fn csv_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", id))
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    async fn write_meta(&self, info: &UploadInfo) -> OpsResult<()> {
        let path = self.meta_path(&info.upload_id);
        let tmp = tmp_path(&path);
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(info)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CSV: &str = "repo_url,commit_sha\n\
                       https://github.com/acme/a.git,good1\n\
                       https://github.com/acme/a.git,bad1\n\
                       https://github.com/acme/b.git,good2\n\
                       https://github.com/acme/b.git,\n";

    fn store(temp: &TempDir) -> UploadStore {
        UploadStore::new(temp.path().join("uploads"))
    }

    async fn save(store: &UploadStore, name: &str) -> UploadInfo {
        store
            .save(UploadRequest {
                name: name.into(),
                content: CSV.into(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_uploads_round_trip() {
        let temp = TempDir::new().unwrap();
        let uploads = store(&temp);

        let info = save(&uploads, "batch.csv").await;
        assert_eq!(info.total_commits, 3);
        assert_eq!(info.invalid, 1);
        assert_eq!(info.repos["https://github.com/acme/a.git"], 2);
        assert_eq!(info.status, UploadStatus::Uploaded);

        let listed = uploads.list().await.unwrap();
        assert_eq!(listed, vec![info.clone()]);

        let (found, path) = uploads.get(&info.upload_id).await.unwrap();
        assert_eq!(found.name, "batch.csv");
        assert_eq!(std::fs::read_to_string(path).unwrap(), CSV);
    }

    #[tokio::test]
    async fn test_lookup_rejects_unknown_and_bogus_ids() {
        let temp = TempDir::new().unwrap();
        let uploads = store(&temp);

        assert!(matches!(
            uploads.get("../../etc/passwd").await,
            Err(OpsError::UploadNotFound { .. })
        ));
        assert!(matches!(
            uploads.get(&Uuid::new_v4().to_string()).await,
            Err(OpsError::UploadNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_upload_without_required_columns_is_rejected() {
        let temp = TempDir::new().unwrap();
        let uploads = store(&temp);
        let err = uploads
            .save(UploadRequest {
                name: "bad.csv".into(),
                content: "name,value\nx,y\n".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OpsError::Input(_)));
        assert!(uploads.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_claim_refuses_busy_upload() {
        let temp = TempDir::new().unwrap();
        let uploads = store(&temp);
        let info = save(&uploads, "batch.csv").await;

        let (claimed, _) = uploads.claim(&info.upload_id).await.unwrap();
        assert_eq!(claimed.status, UploadStatus::Queued);
        let err = uploads.claim(&info.upload_id).await.unwrap_err();
        assert!(matches!(
            err,
            OpsError::UploadBusy {
                status: UploadStatus::Queued,
                ..
            }
        ));

        let job_id = JobId::new();
        uploads
            .update(&info.upload_id, UploadStatus::Running, Some(job_id), None)
            .await
            .unwrap();
        assert!(uploads.claim(&info.upload_id).await.is_err());

        // Finished uploads can be claimed again.
        uploads
            .update(&info.upload_id, UploadStatus::Error, Some(job_id), Some("boom".into()))
            .await
            .unwrap();
        let (again, _) = uploads.claim(&info.upload_id).await.unwrap();
        assert_eq!(again.error, None);
        assert_eq!(again.job_id, None);
    }

    #[tokio::test]
    async fn test_status_survives_reload() {
        let temp = TempDir::new().unwrap();
        let info = save(&store(&temp), "batch.csv").await;
        let job_id = JobId::new();
        store(&temp)
            .update(&info.upload_id, UploadStatus::Completed, Some(job_id), None)
            .await
            .unwrap();

        let (found, _) = store(&temp).get(&info.upload_id).await.unwrap();
        assert_eq!(found.status, UploadStatus::Completed);
        assert_eq!(found.job_id, Some(job_id));
    }

    #[tokio::test]
    async fn test_reset_interrupted_oldest_first() {
        let temp = TempDir::new().unwrap();
        let uploads = store(&temp);
        let first = save(&uploads, "first.csv").await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = save(&uploads, "second.csv").await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let done = save(&uploads, "done.csv").await;

        uploads.claim(&second.upload_id).await.unwrap();
        uploads
            .update(&first.upload_id, UploadStatus::Running, Some(JobId::new()), None)
            .await
            .unwrap();
        uploads
            .update(&done.upload_id, UploadStatus::Completed, Some(JobId::new()), None)
            .await
            .unwrap();

        let reset = uploads.reset_interrupted().await.unwrap();
        let names: Vec<_> = reset.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["first.csv", "second.csv"]);

        let (first, _) = uploads.get(&first.upload_id).await.unwrap();
        assert_eq!(first.status, UploadStatus::Uploaded);
        let (done, _) = uploads.get(&done.upload_id).await.unwrap();
        assert_eq!(done.status, UploadStatus::Completed);
    }
}
