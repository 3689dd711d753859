//! Commit-search API: find repositories (usually forks) containing a commit.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use octocrab::Octocrab;
use serde::Deserialize;
use tracing::debug;

/// A repository reported to contain the searched commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkCandidate {
    /// `owner/name`.
    pub full_name: String,
    /// URL suitable for `git fetch`.
    pub clone_url: String,
}

/// Failure of a single search call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    /// The token used is throttled; `reset_at` is unix seconds when known.
    RateLimited { reset_at: Option<u64> },
    /// Any other API failure.
    Api(String),
}

/// Capability for locating repositories that contain a commit.
#[async_trait]
pub trait CommitSearch: Send + Sync {
    /// Search for `commit_sha` authenticating with `token`.
    async fn find_repositories(
        &self,
        commit_sha: &str,
        token: &str,
    ) -> Result<Vec<ForkCandidate>, SearchError>;
}

#[derive(Debug, Deserialize)]
struct SearchCommitsPage {
    #[serde(default)]
    items: Vec<SearchCommitItem>,
}

#[derive(Debug, Deserialize)]
struct SearchCommitItem {
    repository: SearchRepository,
}

#[derive(Debug, Deserialize)]
struct SearchRepository {
    full_name: String,
    html_url: String,
}

/// GitHub `GET /search/commits?q=hash:<sha>` backed by octocrab.
///
/// One client is built lazily per token and reused.
pub struct GitHubCommitSearch {
    api_url: String,
    clients: Mutex<HashMap<String, Octocrab>>,
}

impl GitHubCommitSearch {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client(&self, token: &str) -> Result<Octocrab, SearchError> {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(token) {
            return Ok(client.clone());
        }

        let client = Octocrab::builder()
            .base_uri(self.api_url.as_str())
            .map_err(|e| SearchError::Api(format!("Invalid API url {}: {}", self.api_url, e)))?
            .personal_token(token.to_string())
            .build()
            .map_err(|e| SearchError::Api(e.to_string()))?;
        clients.insert(token.to_string(), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl CommitSearch for GitHubCommitSearch {
    async fn find_repositories(
        &self,
        commit_sha: &str,
        token: &str,
    ) -> Result<Vec<ForkCandidate>, SearchError> {
        let client = self.client(token)?;
        let uri = format!("/search/commits?q=hash:{}&per_page=30", commit_sha);

        let response = client._get(uri).await.map_err(classify_octocrab_error)?;

        let status = response.status().as_u16();
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let remaining = header("x-ratelimit-remaining");
        let reset_at = header("x-ratelimit-reset").and_then(|v| v.parse::<u64>().ok());

        if (status == 403 || status == 429) && remaining.as_deref() == Some("0") {
            return Err(SearchError::RateLimited { reset_at });
        }
        if status == 429 {
            return Err(SearchError::RateLimited { reset_at });
        }
        // GitHub answers 422 for hashes it refuses to search; treat as no match.
        if status == 422 {
            return Ok(vec![]);
        }

        let body = client
            .body_to_string(response)
            .await
            .map_err(|e| SearchError::Api(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(SearchError::Api(format!("HTTP {}: {}", status, body)));
        }

        let candidates = parse_search_page(&body)?;
        debug!(
            commit = %commit_sha,
            matches = candidates.len(),
            "Commit search completed"
        );
        Ok(candidates)
    }
}

fn classify_octocrab_error(err: octocrab::Error) -> SearchError {
    let message = err.to_string();
    if message.to_ascii_lowercase().contains("rate limit") {
        SearchError::RateLimited { reset_at: None }
    } else {
        SearchError::Api(message)
    }
}

/// Parse a search response body into de-duplicated candidates.
fn parse_search_page(body: &str) -> Result<Vec<ForkCandidate>, SearchError> {
    let page: SearchCommitsPage =
        serde_json::from_str(body).map_err(|e| SearchError::Api(e.to_string()))?;

    let mut candidates: Vec<ForkCandidate> = Vec::new();
    for item in page.items {
        let repo = item.repository;
        if candidates.iter().any(|c| c.full_name == repo.full_name) {
            continue;
        }
        candidates.push(ForkCandidate {
            clone_url: format!("{}.git", repo.html_url.trim_end_matches('/')),
            full_name: repo.full_name,
        });
    }
    Ok(candidates)
}
