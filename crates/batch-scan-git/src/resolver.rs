//! Make a commit available in a workspace, replaying it from a fork if needed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::{build::CheckoutBuilder, Oid, Repository};
use tracing::{debug, info, warn};

use crate::error::ResolveError;
use crate::search::{CommitSearch, ForkCandidate, SearchError};
use crate::tokens::TokenPool;
use crate::workspace::{fetch_options, GitAuth};

/// Refs pulled from the primary remote when a commit is missing locally.
const ORIGIN_REFSPECS: &[&str] = &[
    "+refs/heads/*:refs/remotes/origin/*",
    "+refs/tags/*:refs/tags/*",
    "+refs/pull/*/head:refs/remotes/origin/pull/*",
];

/// Ensures a requested commit is checked out in a workspace.
///
/// Resolution order: the workspace's own history, a fresh fetch from the
/// primary remote, then every fork the commit-search API reports.
pub struct CommitResolver {
    search: Option<Arc<dyn CommitSearch>>,
    tokens: Arc<TokenPool>,
    auth: Option<GitAuth>,
}

impl CommitResolver {
    pub fn new(
        search: Option<Arc<dyn CommitSearch>>,
        tokens: Arc<TokenPool>,
        auth: Option<GitAuth>,
    ) -> Self {
        Self {
            search,
            tokens,
            auth,
        }
    }

    /// Check out `commit_sha` (detached) in `workspace` and return its path.
    ///
    /// The workspace must be owned by the caller for the duration: remotes
    /// are added to and removed from it.
    pub async fn ensure_commit(
        &self,
        workspace: &Path,
        repository_url: &str,
        commit_sha: &str,
    ) -> Result<PathBuf, ResolveError> {
        let path = workspace.to_path_buf();
        let sha = commit_sha.trim().to_string();

        let (p, s) = (path.clone(), sha.clone());
        if tokio::task::spawn_blocking(move || try_checkout(&p, &s)).await?? {
            debug!(commit = %sha, "Commit present locally");
            return Ok(path);
        }

        let (p, s) = (path.clone(), sha.clone());
        let auth = self.auth.clone();
        if tokio::task::spawn_blocking(move || fetch_origin_and_checkout(&p, &s, auth.as_ref()))
            .await??
        {
            debug!(commit = %sha, "Commit found after refreshing origin");
            return Ok(path);
        }

        info!(repo = %repository_url, commit = %sha, "Commit not on primary remote, searching forks");
        let candidates = self.search_forks(&sha).await?;
        let candidates: Vec<ForkCandidate> = candidates
            .into_iter()
            .filter(|c| !same_remote(&c.clone_url, repository_url))
            .collect();
        if candidates.is_empty() {
            return Err(ResolveError::unresolvable(
                &sha,
                "commit search found no other repository containing it",
            ));
        }

        let (p, s) = (path.clone(), sha.clone());
        let auth = self.auth.clone();
        let replayed = tokio::task::spawn_blocking(move || {
            replay_from_forks(&p, &s, &candidates, auth.as_ref())
        })
        .await??;

        match replayed {
            Some(fork) => {
                info!(repo = %repository_url, commit = %sha, fork = %fork, "Commit replayed from fork");
                Ok(path)
            }
            None => Err(ResolveError::unresolvable(
                &sha,
                "no candidate fork could provide the commit",
            )),
        }
    }

    /// Query the search API, rotating tokens past rate limits.
    async fn search_forks(&self, sha: &str) -> Result<Vec<ForkCandidate>, ResolveError> {
        let Some(search) = self.search.as_ref() else {
            return Err(ResolveError::unresolvable(sha, "commit search is not configured"));
        };
        if self.tokens.is_empty() {
            return Err(ResolveError::unresolvable(sha, "no search tokens configured"));
        }

        loop {
            let token = self
                .tokens
                .acquire()
                .map_err(|t| ResolveError::AuthExhausted { retry_at: t.retry_at })?;

            match search.find_repositories(sha, &token.token).await {
                Ok(candidates) => return Ok(candidates),
                Err(SearchError::RateLimited { reset_at }) => {
                    self.tokens.mark_rate_limited(&token, reset_at);
                }
                Err(SearchError::Api(message)) => {
                    warn!(commit = %sha, error = %message, "Commit search failed");
                    return Err(ResolveError::unresolvable(
                        sha,
                        format!("commit search failed: {}", message),
                    ));
                }
            }
        }
    }
}

/// Detach HEAD at `sha` if the object exists. `Ok(false)` when it does not.
fn try_checkout(path: &Path, sha: &str) -> Result<bool, ResolveError> {
    let repo = Repository::open(path)?;
    let commit = match repo
        .revparse_single(&format!("{}^{{commit}}", sha))
        .and_then(|obj| obj.peel_to_commit())
    {
        Ok(commit) => commit,
        Err(_) => return Ok(false),
    };

    repo.set_head_detached(commit.id())?;
    let mut checkout = CheckoutBuilder::new();
    checkout.force().remove_untracked(true);
    repo.checkout_head(Some(&mut checkout))?;
    Ok(true)
}

fn fetch_origin_and_checkout(
    path: &Path,
    sha: &str,
    auth: Option<&GitAuth>,
) -> Result<bool, ResolveError> {
    {
        let repo = Repository::open(path)?;
        let mut origin = repo.find_remote("origin")?;
        if let Err(e) = origin.fetch(ORIGIN_REFSPECS, Some(&mut fetch_options(auth)), None) {
            warn!(commit = %sha, error = %e, "Fetch from origin failed");
        }
        if is_full_sha(sha) {
            // Servers that allow fetching reachable objects by id.
            let _ = origin.fetch(&[sha], Some(&mut fetch_options(auth)), None);
        }
    }
    try_checkout(path, sha)
}

/// Try each fork in turn. Returns the fork that provided the commit.
fn replay_from_forks(
    path: &Path,
    sha: &str,
    candidates: &[ForkCandidate],
    auth: Option<&GitAuth>,
) -> Result<Option<String>, ResolveError> {
    for (i, fork) in candidates.iter().enumerate() {
        let name = format!("fork-{}", i);
        {
            let repo = Repository::open(path)?;
            // Leftovers from an earlier attempt on the same workspace.
            let _ = repo.remote_delete(&name);
            let mut remote = repo.remote(&name, &fork.clone_url)?;

            let by_id = is_full_sha(sha)
                && remote
                    .fetch(&[sha], Some(&mut fetch_options(auth)), None)
                    .is_ok()
                && has_commit(&repo, sha);
            if !by_id {
                let heads = format!("+refs/heads/*:refs/remotes/{}/*", name);
                if let Err(e) = remote.fetch(&[heads.as_str()], Some(&mut fetch_options(auth)), None)
                {
                    warn!(fork = %fork.full_name, error = %e, "Fetch from fork failed");
                }
            }
        }

        let found = try_checkout(path, sha)?;
        let repo = Repository::open(path)?;
        if let Err(e) = repo.remote_delete(&name) {
            debug!(fork = %fork.full_name, error = %e, "Could not remove fork remote");
        }
        if found {
            return Ok(Some(fork.full_name.clone()));
        }
    }
    Ok(None)
}

fn has_commit(repo: &Repository, sha: &str) -> bool {
    Oid::from_str(sha)
        .and_then(|oid| repo.find_commit(oid))
        .is_ok()
}

fn is_full_sha(sha: &str) -> bool {
    sha.len() == 40 && sha.chars().all(|c| c.is_ascii_hexdigit())
}

fn same_remote(a: &str, b: &str) -> bool {
    let norm = |s: &str| {
        s.trim()
            .trim_end_matches('/')
            .trim_end_matches(".git")
            .to_ascii_lowercase()
    };
    norm(a) == norm(b)
}
