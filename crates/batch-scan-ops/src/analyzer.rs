//! External analyzer invocation.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::ScanError;

/// Everything one analysis run needs.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub project_key: String,
    /// Version label, the commit being analysed.
    pub project_version: String,
    /// Working tree checked out at the commit.
    pub source_dir: PathBuf,
    pub host_url: String,
    pub token: Option<String>,
    pub exclusions: Vec<String>,
}

/// Capability that analyses a checked-out tree.
///
/// Only success or failure is observed; output is never interpreted.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<(), ScanError>;
}

/// `sonar-scanner` launched as a child process.
#[derive(Debug, Clone)]
pub struct SonarScanner {
    bin: String,
    timeout: Duration,
}

impl SonarScanner {
    pub fn new(bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            timeout,
        }
    }

    /// Command-line properties for a request.
    pub fn args(request: &AnalysisRequest) -> Vec<String> {
        let mut args = vec![
            format!("-Dsonar.projectKey={}", request.project_key),
            format!("-Dsonar.projectName={}", request.project_key),
            format!("-Dsonar.projectVersion={}", request.project_version),
            "-Dsonar.sources=.".to_string(),
            format!("-Dsonar.host.url={}", request.host_url),
            "-Dsonar.scm.disabled=true".to_string(),
            "-Dsonar.java.binaries=.".to_string(),
        ];
        if let Some(token) = &request.token {
            args.push(format!("-Dsonar.token={}", token));
        }
        if !request.exclusions.is_empty() {
            args.push(format!("-Dsonar.exclusions={}", request.exclusions.join(",")));
        }
        args
    }
}

#[async_trait]
impl Analyzer for SonarScanner {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<(), ScanError> {
        debug!(project_key = %request.project_key, bin = %self.bin, "Launching scanner");

        let child = Command::new(&self.bin)
            .args(Self::args(request))
            .current_dir(&request.source_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ScanError::AnalyzerFailure(format!("cannot launch {}: {}", self.bin, e)))?;

        // Dropping the child on timeout kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| ScanError::AnalyzerFailure(e.to_string()))?,
            Err(_) => {
                return Err(ScanError::AnalyzerFailure(format!(
                    "timed out after {}s",
                    self.timeout.as_secs_f32()
                )));
            }
        };

        if output.status.success() {
            info!(project_key = %request.project_key, "Analysis succeeded");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(ScanError::AnalyzerFailure(format!(
            "exited with {}{}",
            output.status,
            tail(&stderr)
                .map(|t| format!(": {}", t))
                .unwrap_or_default()
        )))
    }
}

/// Last non-empty line of the process' error output, capped.
fn tail(stderr: &str) -> Option<String> {
    let line = stderr.lines().rev().map(str::trim).find(|l| !l.is_empty())?;
    Some(line.chars().take(300).collect())
}
