//! Local repositories for tests.

use std::path::Path;

use git2::{Oid, Repository, RepositoryInitOptions, Signature};

/// Non-bare repository with `main` as its initial branch.
pub(crate) fn init_repo(path: &Path) -> Repository {
    let mut opts = RepositoryInitOptions::new();
    opts.initial_head("main");
    Repository::init_opts(path, &opts).unwrap()
}

/// Write `name` and commit it on the current branch.
pub(crate) fn commit_file(repo: &Repository, name: &str, content: &str, message: &str) -> Oid {
    let workdir = repo.workdir().unwrap();
    std::fs::write(workdir.join(name), content).unwrap();

    let mut index = repo.index().unwrap();
    index.add_path(Path::new(name)).unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();

    let sig = Signature::now("Test", "test@example.com").unwrap();
    let parent = repo
        .head()
        .ok()
        .and_then(|h| h.target())
        .map(|oid| repo.find_commit(oid).unwrap());
    let parents: Vec<&git2::Commit> = parent.iter().collect();

    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .unwrap()
}

/// Clone `source` into `dest` (a fork in the tests' sense).
pub(crate) fn fork_repo(source: &Path, dest: &Path) -> Repository {
    let repo = Repository::clone(source.to_str().unwrap(), dest).unwrap();
    // Make sure later commits land on `main` like the upstream.
    if repo.find_branch("main", git2::BranchType::Local).is_err() {
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        repo.branch("main", &head, true).unwrap();
        repo.set_head("refs/heads/main").unwrap();
    }
    repo
}
