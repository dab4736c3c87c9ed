//! Collaborator trait definitions for tierstack
//!
//! These traits define the external systems the orchestrator consumes:
//! - `TicketTracker`: ticket and project CRUD plus status/comments
//! - `VersionControl`: worktrees, commits, pushes, merges
//! - `Forge`: pull requests and CI status
//!
//! All traits are async and backend-agnostic. CLI-backed implementations
//! live in `git`, `forge` and `tracker`; in-memory fakes for testing live in
//! the `fakes` module.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CollabResult;

// ---------------------------------------------------------------------------
// TicketTracker
// ---------------------------------------------------------------------------

/// Workflow state of a ticket as the tracker names it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TicketStatus {
    Backlog,
    Todo,
    InProgress,
    InReview,
    Done,
    Canceled,
    /// A team-specific state the orchestrator does not interpret.
    Other(String),
}

impl TicketStatus {
    /// The display name the tracker expects (`"In Progress"`, ...).
    pub fn as_tracker_name(&self) -> &str {
        match self {
            TicketStatus::Backlog => "Backlog",
            TicketStatus::Todo => "Todo",
            TicketStatus::InProgress => "In Progress",
            TicketStatus::InReview => "In Review",
            TicketStatus::Done => "Done",
            TicketStatus::Canceled => "Canceled",
            TicketStatus::Other(name) => name,
        }
    }

    /// Parse a tracker state name. Matching ignores case, spaces, dashes
    /// and underscores so `"in_progress"` and `"In Progress"` agree.
    pub fn from_tracker_name(name: &str) -> Self {
        let key: String = name
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .flat_map(char::to_lowercase)
            .collect();
        match key.as_str() {
            "backlog" => TicketStatus::Backlog,
            "todo" => TicketStatus::Todo,
            "inprogress" => TicketStatus::InProgress,
            "inreview" => TicketStatus::InReview,
            "done" => TicketStatus::Done,
            "canceled" | "cancelled" => TicketStatus::Canceled,
            _ => TicketStatus::Other(name.to_string()),
        }
    }
}

impl From<String> for TicketStatus {
    fn from(value: String) -> Self {
        TicketStatus::from_tracker_name(&value)
    }
}

impl From<TicketStatus> for String {
    fn from(value: TicketStatus) -> Self {
        value.as_tracker_name().to_string()
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_tracker_name())
    }
}

/// A project as returned by the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub description: String,
}

/// A ticket as returned by the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRecord {
    /// Opaque tracker id.
    pub id: String,
    /// Human-facing key, e.g. `"STAFF-123"`.
    pub identifier: String,
    pub title: String,
    #[serde(default)]
    pub url: String,
    pub status: TicketStatus,
    #[serde(default)]
    pub description: String,
    /// Titles or identifiers of tickets this one depends on.
    #[serde(default)]
    pub blocked_by: Vec<String>,
    #[serde(default)]
    pub project_id: Option<String>,
}

/// Input for [`TicketTracker::create_project`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProject {
    pub team: String,
    pub name: String,
    pub description: String,
}

/// Input for [`TicketTracker::create_ticket`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTicket {
    pub team: String,
    pub title: String,
    pub description: String,
    pub project_id: Option<String>,
    pub status: Option<TicketStatus>,
}

/// Ticket tracker collaborator.
///
/// Updates are keyed by ticket id, so implementations must tolerate
/// concurrent calls for distinct tickets.
#[async_trait]
pub trait TicketTracker: Send + Sync {
    async fn get_project(&self, id: &str) -> CollabResult<ProjectRecord>;

    async fn get_project_tickets(&self, id: &str) -> CollabResult<Vec<TicketRecord>>;

    async fn get_ticket(&self, id: &str) -> CollabResult<TicketRecord>;

    async fn update_status(&self, id: &str, status: &TicketStatus) -> CollabResult<()>;

    async fn add_comment(&self, id: &str, body: &str) -> CollabResult<()>;

    /// Record that `id` is blocked by `blocked_by`.
    async fn block_ticket(&self, id: &str, blocked_by: &str) -> CollabResult<()>;

    async fn create_project(&self, project: NewProject) -> CollabResult<ProjectRecord>;

    async fn create_ticket(&self, ticket: NewTicket) -> CollabResult<TicketRecord>;
}

// ---------------------------------------------------------------------------
// VersionControl
// ---------------------------------------------------------------------------

/// One entry of the worktree list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    /// `None` for detached or bare entries.
    pub branch: Option<String>,
}

/// Result of merging one branch into another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum MergeOutcome {
    /// A merge commit was created.
    Merged { commit: String },
    /// The source was already contained in the target; nothing happened.
    AlreadyUpToDate,
}

/// Version control collaborator.
///
/// Every operation that acts on a checkout receives the worktree path
/// explicitly; there is no implicit "current directory".
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Name of the trunk branch (`main`, `master`, or configured).
    async fn trunk(&self) -> CollabResult<String>;

    /// Whether a local or remote branch named `branch` exists.
    async fn branch_exists(&self, branch: &str) -> CollabResult<bool>;

    /// Create `branch` from `start_point` (trunk when `None`) in a fresh worktree.
    ///
    /// Fails with `BranchExists` if the branch is checked out elsewhere and
    /// `BaseNotFound` if the start point does not resolve.
    async fn create_worktree(&self, branch: &str, start_point: Option<&str>)
        -> CollabResult<PathBuf>;

    /// Attach a worktree to an existing branch, re-using a current checkout.
    async fn checkout_worktree(&self, branch: &str) -> CollabResult<PathBuf>;

    /// Remove a worktree. Removing an absent path is a no-op.
    async fn remove_worktree(&self, path: &Path) -> CollabResult<()>;

    async fn list_worktrees(&self) -> CollabResult<Vec<WorktreeInfo>>;

    /// Whether the worktree has uncommitted changes.
    async fn has_changes(&self, worktree: &Path) -> CollabResult<bool>;

    /// Stage and commit everything. Returns `false` when there was nothing to commit.
    async fn commit(&self, worktree: &Path, message: &str) -> CollabResult<bool>;

    async fn push(&self, worktree: &Path, branch: &str) -> CollabResult<()>;

    /// Merge `source_branch` into the branch checked out at `worktree`.
    async fn merge(
        &self,
        worktree: &Path,
        source_branch: &str,
        message: &str,
    ) -> CollabResult<MergeOutcome>;

    /// Files changed on the worktree's branch relative to `base`.
    async fn changed_files(&self, worktree: &Path, base: &str) -> CollabResult<Vec<String>>;
}

// ---------------------------------------------------------------------------
// Forge
// ---------------------------------------------------------------------------

/// Reference to an open pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub number: u64,
    pub url: String,
    pub head: String,
    pub base: String,
}

/// Input for [`Forge::create_pr`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPullRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

/// State of a single CI check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckState {
    Success,
    Failure,
    Pending,
    InProgress,
    Skipped,
    Neutral,
    Cancelled,
    Unknown,
}

impl CheckState {
    /// Map a forge state string (`"SUCCESS"`, `"FAILURE"`, `"ERROR"`, ...).
    pub fn from_forge_state(state: &str) -> Self {
        match state.to_ascii_uppercase().as_str() {
            "SUCCESS" => CheckState::Success,
            "FAILURE" | "ERROR" => CheckState::Failure,
            "PENDING" | "QUEUED" | "WAITING" | "REQUESTED" => CheckState::Pending,
            "IN_PROGRESS" => CheckState::InProgress,
            "SKIPPED" => CheckState::Skipped,
            "NEUTRAL" => CheckState::Neutral,
            "CANCELLED" => CheckState::Cancelled,
            _ => CheckState::Unknown,
        }
    }
}

/// A CI check attached to a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiCheck {
    pub name: String,
    pub state: CheckState,
    pub url: Option<String>,
}

/// Aggregated CI status for a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiStatus {
    Passing,
    Failing,
    Pending,
    Unknown,
}

impl CiStatus {
    /// Aggregate individual checks.
    ///
    /// No checks is `Unknown`; any failure wins, then any pending check,
    /// then all-green (success/skipped/neutral) is `Passing`.
    pub fn from_checks(checks: &[CiCheck]) -> Self {
        if checks.is_empty() {
            return CiStatus::Unknown;
        }
        if checks.iter().any(|c| c.state == CheckState::Failure) {
            return CiStatus::Failing;
        }
        if checks
            .iter()
            .any(|c| matches!(c.state, CheckState::Pending | CheckState::InProgress))
        {
            return CiStatus::Pending;
        }
        if checks.iter().all(|c| {
            matches!(
                c.state,
                CheckState::Success | CheckState::Skipped | CheckState::Neutral
            )
        }) {
            return CiStatus::Passing;
        }
        CiStatus::Unknown
    }
}

/// A pull request together with its CI checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrStatus {
    pub pr: PullRequestRef,
    pub title: String,
    /// `owner/repo`, empty when unknown.
    pub repo: String,
    pub checks: Vec<CiCheck>,
    pub ci_status: CiStatus,
}

impl PrStatus {
    /// Short display name, `owner/repo#12` or `#12`.
    pub fn display_name(&self) -> String {
        if self.repo.is_empty() {
            format!("#{}", self.pr.number)
        } else {
            format!("{}#{}", self.repo, self.pr.number)
        }
    }
}

/// Forge (pull requests and CI) collaborator.
#[async_trait]
pub trait Forge: Send + Sync {
    /// The open PR whose head is `head`, if any.
    async fn find_pr_for_branch(&self, head: &str) -> CollabResult<Option<PullRequestRef>>;

    async fn create_pr(&self, pr: NewPullRequest) -> CollabResult<PullRequestRef>;

    /// Retarget an existing PR onto a new base branch.
    async fn update_pr_base(&self, number: u64, base: &str) -> CollabResult<()>;

    /// All of the user's open PRs with aggregated CI status.
    async fn all_prs_status(&self) -> CollabResult<Vec<PrStatus>>;

    async fn pr_checks(&self, number: u64) -> CollabResult<Vec<CiCheck>>;

    /// Only the failing checks of a PR.
    async fn failed_checks(&self, number: u64) -> CollabResult<Vec<CiCheck>> {
        Ok(self
            .pr_checks(number)
            .await?
            .into_iter()
            .filter(|c| c.state == CheckState::Failure)
            .collect())
    }

    /// Failure logs for a PR, optionally restricted to one check.
    async fn ci_logs(&self, number: u64, check: Option<&str>) -> CollabResult<String>;

    /// Head branch name of a PR.
    async fn pr_branch(&self, number: u64) -> CollabResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(state: CheckState) -> CiCheck {
        CiCheck {
            name: "ci".to_string(),
            state,
            url: None,
        }
    }

    #[test]
    fn test_ticket_status_parses_tracker_names() {
        assert_eq!(
            TicketStatus::from_tracker_name("In Progress"),
            TicketStatus::InProgress
        );
        assert_eq!(
            TicketStatus::from_tracker_name("in_review"),
            TicketStatus::InReview
        );
        assert_eq!(TicketStatus::from_tracker_name("TODO"), TicketStatus::Todo);
        assert_eq!(
            TicketStatus::from_tracker_name("Triage"),
            TicketStatus::Other("Triage".to_string())
        );
    }

    #[test]
    fn test_ticket_record_deserializes_tracker_json() {
        let json = r#"{
            "id": "uuid-1",
            "identifier": "STAFF-1",
            "title": "Add parser",
            "url": "https://linear.app/x/STAFF-1",
            "status": "In Progress",
            "description": ""
        }"#;
        let record: TicketRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.status, TicketStatus::InProgress);
        assert!(record.blocked_by.is_empty());
        assert_eq!(record.project_id, None);
    }

    #[test]
    fn test_ticket_status_serializes_as_display_name() {
        let json = serde_json::to_string(&TicketStatus::InReview).unwrap();
        assert_eq!(json, "\"In Review\"");
    }

    #[test]
    fn test_ci_status_aggregation() {
        assert_eq!(CiStatus::from_checks(&[]), CiStatus::Unknown);
        assert_eq!(
            CiStatus::from_checks(&[check(CheckState::Success), check(CheckState::Failure)]),
            CiStatus::Failing
        );
        assert_eq!(
            CiStatus::from_checks(&[check(CheckState::Success), check(CheckState::Pending)]),
            CiStatus::Pending
        );
        assert_eq!(
            CiStatus::from_checks(&[check(CheckState::Success), check(CheckState::Skipped)]),
            CiStatus::Passing
        );
        assert_eq!(
            CiStatus::from_checks(&[check(CheckState::Cancelled)]),
            CiStatus::Unknown
        );
    }

    #[test]
    fn test_check_state_maps_error_to_failure() {
        assert_eq!(CheckState::from_forge_state("ERROR"), CheckState::Failure);
        assert_eq!(CheckState::from_forge_state("success"), CheckState::Success);
        assert_eq!(CheckState::from_forge_state(""), CheckState::Unknown);
    }
}
