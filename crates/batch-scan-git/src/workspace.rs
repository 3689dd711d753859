//! Repository mirrors and per-item workspaces.
//!
//! Each repository gets one bare mirror under the cache root. A work item
//! gets its own fresh repository whose object database borrows the mirror's
//! objects through `objects/info/alternates` (the same layout as
//! `git clone --shared`), so creating a workspace copies no objects and the
//! item's remotes and refs are private to it.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use batch_scan_core::{github_slug, repo_name_from_url};
use git2::{Cred, FetchOptions, RemoteCallbacks, Repository};
use tracing::{debug, info, warn};

use crate::error::ResolveError;

/// Mirror fetch refspecs: branches and tags land under their own names.
const MIRROR_REFSPECS: &[&str] = &["+refs/heads/*:refs/heads/*", "+refs/tags/*:refs/tags/*"];

/// HTTPS credentials for private repositories.
#[derive(Debug, Clone)]
pub struct GitAuth {
    pub username: String,
    pub token: String,
}

/// Build fetch options, attaching credentials when available.
pub fn fetch_options(auth: Option<&GitAuth>) -> FetchOptions<'_> {
    let mut fetch_options = FetchOptions::new();
    if let Some(auth) = auth {
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(move |_url, _username_from_url, _allowed_types| {
            Cred::userpass_plaintext(&auth.username, &auth.token)
        });
        fetch_options.remote_callbacks(callbacks);
    }
    fetch_options
}

/// Cache of bare repository mirrors.
///
/// Creation and refresh of a given mirror are serialized; a mirror is
/// refreshed from its remote at most once per cache lifetime.
#[derive(Debug)]
pub struct MirrorCache {
    root: PathBuf,
    auth: Option<GitAuth>,
    // Per-mirror lock; the flag records whether it was refreshed already.
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<bool>>>>,
}

impl MirrorCache {
    pub fn new(root: impl Into<PathBuf>, auth: Option<GitAuth>) -> Self {
        Self {
            root: root.into(),
            auth,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Where the mirror for `url` lives.
    ///
    /// The directory name is readable and salted with a hash of the URL so
    /// two repositories with the same name never share a mirror.
    pub fn mirror_path(&self, url: &str) -> PathBuf {
        let readable = match github_slug(url) {
            Some((owner, repo)) => format!("{}_{}", owner, repo),
            None => repo_name_from_url(url),
        };
        let mut hasher = DefaultHasher::new();
        url.trim().hash(&mut hasher);
        let safe: String = readable
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root
            .join(format!("{}-{:08x}.git", safe, hasher.finish() as u32))
    }

    /// Make sure a mirror of `url` exists and has been refreshed once.
    pub async fn ensure_mirror(&self, url: &str) -> Result<PathBuf, ResolveError> {
        let path = self.mirror_path(url);
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(path.clone()).or_default().clone()
        };
        let mut refreshed = lock.lock().await;
        if *refreshed {
            return Ok(path);
        }

        let url = url.to_string();
        let auth = self.auth.clone();
        let mirror = path.clone();
        tokio::task::spawn_blocking(move || sync_mirror(&url, &mirror, auth.as_ref())).await??;

        *refreshed = true;
        Ok(path)
    }
}

/// Create the mirror if missing, otherwise fetch updates (best effort).
fn sync_mirror(url: &str, path: &Path, auth: Option<&GitAuth>) -> Result<(), ResolveError> {
    if path.join("objects").exists() {
        let repo = Repository::open_bare(path)?;
        let mut remote = repo.find_remote("origin")?;
        if let Err(e) = remote.fetch(MIRROR_REFSPECS, Some(&mut fetch_options(auth)), None) {
            warn!(repo = %url, error = %e, "Mirror refresh failed, using cached objects");
        } else {
            debug!(repo = %url, "Mirror refreshed");
        }
        return Ok(());
    }

    info!(repo = %url, path = %path.display(), "Creating mirror");
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let result = (|| -> Result<(), git2::Error> {
        let repo = Repository::init_bare(path)?;
        let mut remote = repo.remote("origin", url)?;
        remote.fetch(MIRROR_REFSPECS, Some(&mut fetch_options(auth)), None)
    })();

    if let Err(e) = result {
        // A half-initialized mirror would be mistaken for a usable one next time.
        let _ = std::fs::remove_dir_all(path);
        return Err(e.into());
    }
    Ok(())
}

/// Lay out a fresh working repository at `dest` backed by `mirror`.
///
/// The mirror's branches become `refs/remotes/origin/*` and its tags are
/// copied, giving later fetches a good negotiation base. `origin` points at
/// `repository_url`, the primary remote.
pub fn prepare_workspace(
    mirror: &Path,
    dest: &Path,
    repository_url: &str,
) -> Result<Repository, ResolveError> {
    let mirror_repo = Repository::open_bare(mirror)?;

    Repository::init(dest)?;
    let objects = mirror.canonicalize()?.join("objects");
    let info_dir = dest.join(".git").join("objects").join("info");
    std::fs::create_dir_all(&info_dir)?;
    std::fs::write(info_dir.join("alternates"), format!("{}\n", objects.display()))?;

    // Reopen so the object database picks up the alternate.
    let repo = Repository::open(dest)?;
    for reference in mirror_repo.references()? {
        let reference = reference?;
        let (Some(name), Some(target)) = (reference.name(), reference.target()) else {
            continue;
        };
        let local_name = if let Some(branch) = name.strip_prefix("refs/heads/") {
            format!("refs/remotes/origin/{}", branch)
        } else if name.starts_with("refs/tags/") {
            name.to_string()
        } else {
            continue;
        };
        repo.reference(&local_name, target, true, "seed from mirror")?;
    }
    repo.remote("origin", repository_url)?;

    Ok(repo)
}
