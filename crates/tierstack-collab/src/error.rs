//! Error types for collaborator adapters.

use thiserror::Error;

/// Errors produced while talking to the ticket tracker, git, or the forge.
#[derive(Debug, Error)]
pub enum CollabError {
    /// The branch is already checked out in another worktree.
    #[error("branch {branch} is already checked out at {path}")]
    BranchExists { branch: String, path: String },

    /// The start point for a new branch does not resolve to a commit.
    #[error("start point not found: {start_point}")]
    BaseNotFound { start_point: String },

    /// An existing branch was expected but neither a local nor remote ref exists.
    #[error("branch not found: {branch}")]
    BranchNotFound { branch: String },

    /// A merge stopped on conflicts and was aborted.
    #[error("merge of {source_branch} into {target} conflicted in: {files:?}")]
    MergeConflict {
        source_branch: String,
        target: String,
        files: Vec<String>,
    },

    /// Pushing directly to a protected branch was refused.
    #[error("refusing to push protected branch {branch}")]
    ProtectedBranch { branch: String },

    #[error("ticket not found: {id}")]
    TicketNotFound { id: String },

    #[error("project not found: {id}")]
    ProjectNotFound { id: String },

    #[error("pull request not found: #{number}")]
    PullRequestNotFound { number: u64 },

    /// The directory a command was asked to run in does not exist.
    #[error("working directory does not exist: {path}")]
    WorkdirMissing { path: String },

    /// An external command exited non-zero.
    #[error("`{program} {args}` failed: {stderr}")]
    CommandFailed {
        program: String,
        args: String,
        stderr: String,
    },

    /// The collaborator could not be reached at all (missing binary, auth, network).
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("failed to parse collaborator output: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CollabError {
    /// `true` when the error means the collaborator itself is unusable, as
    /// opposed to a failure scoped to one branch, ticket, or PR.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, CollabError::Unavailable(_) | CollabError::Io(_))
    }
}

/// Convenience result alias.
pub type CollabResult<T> = std::result::Result<T, CollabError>;
