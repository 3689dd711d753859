//! Git plumbing for batch-scan.
//!
//! - [`MirrorCache`] keeps one bare mirror per repository and hands out
//!   cheap per-item workspaces that borrow the mirror's objects.
//! - [`CommitResolver`] makes sure a commit is checked out in a workspace,
//!   replaying it from a fork located through a commit-search API when the
//!   primary remote does not have it.
//! - [`TokenPool`] rotates API tokens and tracks rate-limit cooldowns.

mod error;
mod resolver;
mod search;
mod tokens;
mod workspace;

pub use error::ResolveError;
pub use resolver::CommitResolver;
pub use search::{CommitSearch, ForkCandidate, GitHubCommitSearch, SearchError};
pub use tokens::{AllThrottled, PooledToken, TokenPool};
pub use workspace::{fetch_options, prepare_workspace, GitAuth, MirrorCache};

#[cfg(test)]
pub(crate) mod test_support;
