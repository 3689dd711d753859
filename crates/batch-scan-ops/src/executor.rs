//! Scan one work item end to end.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use batch_scan_core::{ScanResult, WorkItem};
use batch_scan_git::{
    prepare_workspace, CommitResolver, CommitSearch, GitHubCommitSearch, MirrorCache, TokenPool,
};
use tracing::{info, warn};

use crate::analyzer::{AnalysisRequest, Analyzer, SonarScanner};
use crate::config::Config;
use crate::error::ScanError;

/// Anything that can turn a work item into a pass/fail result.
///
/// Implementations must not panic or return errors for per-item problems;
/// those become a failure result.
#[async_trait]
pub trait ScanRunner: Send + Sync {
    async fn run(&self, item: &WorkItem) -> ScanResult;
}

/// Analyzer connection settings shared by all items.
#[derive(Debug, Clone)]
pub struct AnalyzerSettings {
    pub host_url: String,
    pub token: Option<String>,
    pub exclusions: Vec<String>,
}

impl AnalyzerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            host_url: config.analyzer_host_url.clone(),
            token: config.analyzer_token.clone(),
            exclusions: config.exclusions.clone(),
        }
    }
}

/// Production runner: mirror, isolated workspace, commit resolution, analysis.
pub struct ScanExecutor {
    mirrors: MirrorCache,
    resolver: CommitResolver,
    analyzer: Arc<dyn Analyzer>,
    settings: AnalyzerSettings,
    temp_root: PathBuf,
}

impl ScanExecutor {
    pub fn new(
        mirrors: MirrorCache,
        resolver: CommitResolver,
        analyzer: Arc<dyn Analyzer>,
        settings: AnalyzerSettings,
        temp_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            mirrors,
            resolver,
            analyzer,
            settings,
            temp_root: temp_root.into(),
        }
    }

    /// Wire the executor from configuration with the real scanner and
    /// GitHub commit search.
    pub fn from_config(config: &Config) -> Self {
        let search: Arc<dyn CommitSearch> =
            Arc::new(GitHubCommitSearch::new(config.github_api_url.clone()));
        let tokens = Arc::new(TokenPool::new(config.github_tokens.iter().cloned()));
        let analyzer = Arc::new(SonarScanner::new(
            config.scanner_bin.clone(),
            Duration::from_secs(config.analyzer_timeout_secs),
        ));

        Self::new(
            MirrorCache::new(config.mirrors_dir(), config.git_auth()),
            CommitResolver::new(Some(search), tokens, config.git_auth()),
            analyzer,
            AnalyzerSettings::from_config(config),
            config.temp_dir(),
        )
    }

    async fn scan(&self, item: &WorkItem) -> Result<(), ScanError> {
        let mirror = self
            .mirrors
            .ensure_mirror(&item.repository_url)
            .await
            .map_err(|e| ScanError::WorkspacePrep(format!("mirror: {}", e)))?;

        tokio::fs::create_dir_all(&self.temp_root)
            .await
            .map_err(|e| ScanError::WorkspacePrep(e.to_string()))?;
        let prefix: String = item
            .project_key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        // Removed on every exit path when dropped.
        let workspace = tempfile::Builder::new()
            .prefix(&format!("{}-", prefix))
            .tempdir_in(&self.temp_root)
            .map_err(|e| ScanError::WorkspacePrep(e.to_string()))?;
        let repo_dir = workspace.path().join("src");

        let (m, d, url) = (mirror.clone(), repo_dir.clone(), item.repository_url.clone());
        tokio::task::spawn_blocking(move || prepare_workspace(&m, &d, &url).map(|_| ()))
            .await
            .map_err(|e| ScanError::WorkspacePrep(e.to_string()))?
            .map_err(|e| ScanError::WorkspacePrep(e.to_string()))?;

        let source_dir = self
            .resolver
            .ensure_commit(&repo_dir, &item.repository_url, &item.commit_sha)
            .await?;

        let request = AnalysisRequest {
            project_key: item.project_key.clone(),
            project_version: item.commit_sha.clone(),
            source_dir,
            host_url: self.settings.host_url.clone(),
            token: self.settings.token.clone(),
            exclusions: self.settings.exclusions.clone(),
        };
        self.analyzer.analyze(&request).await
    }
}

#[async_trait]
impl ScanRunner for ScanExecutor {
    async fn run(&self, item: &WorkItem) -> ScanResult {
        match self.scan(item).await {
            Ok(()) => {
                info!(
                    repo = %item.repository_url,
                    commit = %item.commit_sha,
                    project_key = %item.project_key,
                    "Scan succeeded"
                );
                ScanResult::success("analysis completed")
            }
            Err(e) => {
                warn!(
                    repo = %item.repository_url,
                    commit = %item.commit_sha,
                    project_key = %item.project_key,
                    error = %e,
                    "Scan failed"
                );
                ScanResult::failure(e.to_string())
            }
        }
    }
}
