//! Configuration for the operations layer.

use std::path::PathBuf;

use batch_scan_git::GitAuth;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::{OpsError, OpsResult};

/// Keys accepted by [`Config::get`] and [`Config::set`].
pub const CONFIG_KEYS: &[&str] = &[
    "analyzer_host_url",
    "analyzer_token",
    "scanner_bin",
    "analyzer_timeout_secs",
    "exclusions",
    "github_tokens",
    "github_api_url",
    "git_username",
    "git_token",
    "work_dir",
    "concurrency",
    "batch_size",
    "checkpoint_file",
    "checkpoint_flush_every",
];

/// Configuration for batch-scan operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Analysis server URL.
    #[serde(default = "default_host_url")]
    pub analyzer_host_url: String,

    /// Analysis server token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer_token: Option<String>,

    /// Scanner executable.
    #[serde(default = "default_scanner_bin")]
    pub scanner_bin: String,

    /// Upper bound for one analyzer invocation.
    #[serde(default = "default_timeout_secs")]
    pub analyzer_timeout_secs: u64,

    /// Exclusion patterns passed to the analyzer.
    #[serde(default)]
    pub exclusions: Vec<String>,

    /// Tokens for the commit-search API, rotated round-robin.
    #[serde(default)]
    pub github_tokens: Vec<String>,

    /// Base URL of the commit-search API.
    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,

    /// HTTPS username for git fetches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_username: Option<String>,

    /// HTTPS token for git fetches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_token: Option<String>,

    /// Root for mirrors, temporary workspaces and uploads.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Maximum scans in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Input rows read per chunk.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Checkpoint location; `<work_dir>/scan_checkpoint.json` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_file: Option<PathBuf>,

    /// Records between checkpoint writes.
    #[serde(default = "default_flush_every")]
    pub checkpoint_flush_every: usize,
}

fn default_host_url() -> String {
    "http://localhost:9000".to_string()
}

fn default_scanner_bin() -> String {
    "sonar-scanner".to_string()
}

fn default_timeout_secs() -> u64 {
    1800
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_work_dir() -> PathBuf {
    ProjectDirs::from("com", "batch-scan", "batch-scan")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".batch-scan"))
}

fn default_concurrency() -> usize {
    4
}

fn default_batch_size() -> usize {
    50
}

fn default_flush_every() -> usize {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            analyzer_host_url: default_host_url(),
            analyzer_token: None,
            scanner_bin: default_scanner_bin(),
            analyzer_timeout_secs: default_timeout_secs(),
            exclusions: vec![],
            github_tokens: vec![],
            github_api_url: default_github_api_url(),
            git_username: None,
            git_token: None,
            work_dir: default_work_dir(),
            concurrency: default_concurrency(),
            batch_size: default_batch_size(),
            checkpoint_file: None,
            checkpoint_flush_every: default_flush_every(),
        }
    }
}

impl Config {
    /// Load configuration from disk with environment overrides.
    pub fn load() -> OpsResult<Self> {
        Self::from_file()?.with_env(|key| std::env::var(key).ok())
    }

    /// Load the saved configuration only, without environment overrides.
    ///
    /// Use this before [`Config::save`] so environment values never end up
    /// in the config file.
    pub fn from_file() -> OpsResult<Self> {
        match Self::config_file_path() {
            Some(path) if path.exists() => {
                let contents = std::fs::read_to_string(&path)?;
                Ok(serde_json::from_str(&contents)?)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Apply overrides from an environment lookup.
    pub fn with_env(mut self, env: impl Fn(&str) -> Option<String>) -> OpsResult<Self> {
        let overrides = [
            ("SONAR_HOST_URL", "analyzer_host_url"),
            ("SONAR_TOKEN", "analyzer_token"),
            ("SONAR_SCANNER_BIN", "scanner_bin"),
            ("SCAN_TIMEOUT_SECS", "analyzer_timeout_secs"),
            ("SONAR_EXCLUSIONS", "exclusions"),
            ("GITHUB_TOKENS", "github_tokens"),
            ("GITHUB_API_URL", "github_api_url"),
            ("GIT_USERNAME", "git_username"),
            ("GIT_TOKEN", "git_token"),
            ("WORK_DIR", "work_dir"),
            ("CONCURRENT_SCANS", "concurrency"),
            ("BATCH_SIZE", "batch_size"),
            ("CHECKPOINT_FILE", "checkpoint_file"),
            ("CHECKPOINT_FLUSH_EVERY", "checkpoint_flush_every"),
        ];

        for (var, key) in overrides {
            if let Some(value) = env(var).filter(|v| !v.trim().is_empty()) {
                self.set(key, &value)
                    .map_err(|e| OpsError::Config(format!("{}: {}", var, e)))?;
            }
        }
        Ok(self)
    }

    /// Save configuration to disk.
    pub fn save(&self) -> OpsResult<()> {
        if let Some(path) = Self::config_file_path() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let contents = serde_json::to_string_pretty(self)?;
            std::fs::write(&path, contents)?;
        }
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_file_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "batch-scan", "batch-scan")
            .map(|dirs| dirs.config_dir().join("config.json"))
    }

    /// Checkpoint file in effect.
    pub fn checkpoint_path(&self) -> PathBuf {
        self.checkpoint_file
            .clone()
            .unwrap_or_else(|| self.work_dir.join("scan_checkpoint.json"))
    }

    /// Bare repository mirrors.
    pub fn mirrors_dir(&self) -> PathBuf {
        self.work_dir.join("repos")
    }

    /// Parent of per-item workspaces.
    pub fn temp_dir(&self) -> PathBuf {
        self.work_dir.join("temp")
    }

    /// Stored CSV uploads (service mode).
    pub fn uploads_dir(&self) -> PathBuf {
        self.work_dir.join("uploads")
    }

    /// Git HTTPS credentials, when both parts are configured.
    pub fn git_auth(&self) -> Option<GitAuth> {
        match (&self.git_username, &self.git_token) {
            (Some(username), Some(token)) => Some(GitAuth {
                username: username.clone(),
                token: token.clone(),
            }),
            _ => None,
        }
    }

    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> OpsResult<()> {
        if self.concurrency == 0 {
            return Err(OpsError::Config("concurrency must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(OpsError::Config("batch_size must be at least 1".into()));
        }
        Ok(())
    }

    /// Get a configuration value by key. Secrets are masked.
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "analyzer_host_url" => Some(self.analyzer_host_url.clone()),
            "analyzer_token" => self.analyzer_token.as_ref().map(|_| "***".to_string()),
            "scanner_bin" => Some(self.scanner_bin.clone()),
            "analyzer_timeout_secs" => Some(self.analyzer_timeout_secs.to_string()),
            "exclusions" => Some(self.exclusions.join(",")),
            "github_tokens" => Some(format!("{} configured", self.github_tokens.len())),
            "github_api_url" => Some(self.github_api_url.clone()),
            "git_username" => self.git_username.clone(),
            "git_token" => self.git_token.as_ref().map(|_| "***".to_string()),
            "work_dir" => Some(self.work_dir.display().to_string()),
            "concurrency" => Some(self.concurrency.to_string()),
            "batch_size" => Some(self.batch_size.to_string()),
            "checkpoint_file" => Some(self.checkpoint_path().display().to_string()),
            "checkpoint_flush_every" => Some(self.checkpoint_flush_every.to_string()),
            _ => None,
        }
    }

    /// Set a configuration value by key.
    pub fn set(&mut self, key: &str, value: &str) -> OpsResult<()> {
        let value = value.trim();
        match key {
            "analyzer_host_url" => self.analyzer_host_url = value.to_string(),
            "analyzer_token" => self.analyzer_token = Some(value.to_string()),
            "scanner_bin" => self.scanner_bin = value.to_string(),
            "analyzer_timeout_secs" => self.analyzer_timeout_secs = parse_number(value)?,
            "exclusions" => self.exclusions = split_list(value),
            "github_tokens" => self.github_tokens = split_list(value),
            "github_api_url" => self.github_api_url = value.to_string(),
            "git_username" => self.git_username = Some(value.to_string()),
            "git_token" => self.git_token = Some(value.to_string()),
            "work_dir" => self.work_dir = PathBuf::from(value),
            "concurrency" => self.concurrency = parse_number(value)?,
            "batch_size" => self.batch_size = parse_number(value)?,
            "checkpoint_file" => self.checkpoint_file = Some(PathBuf::from(value)),
            "checkpoint_flush_every" => self.checkpoint_flush_every = parse_number(value)?,
            _ => {
                return Err(OpsError::Config(format!("Unknown config key: {}", key)));
            }
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(value: &str) -> OpsResult<T> {
    value
        .parse()
        .map_err(|_| OpsError::Config(format!("Invalid number: {}", value)))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
