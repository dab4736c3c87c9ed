//! CI triage for open pull requests.
//!
//! Finds PRs whose checks fail, pulls their failure logs, and prepares a
//! worktree on a PR's head branch so a fix can be pushed to it.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument};

use tierstack_collab::{CheckState, CiCheck, CiStatus, Forge, PrStatus};

use crate::error::OrchestratorResult;
use crate::worktree::{Worktree, WorktreeManager};

/// A pull request with at least one failing check.
#[derive(Debug, Clone, Serialize)]
pub struct FailingPr {
    pub status: PrStatus,
    pub failed_checks: Vec<CiCheck>,
}

/// Counts per aggregated CI status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CiOverview {
    pub passing: usize,
    pub failing: usize,
    pub pending: usize,
    pub unknown: usize,
}

impl CiOverview {
    pub fn from_statuses(prs: &[PrStatus]) -> Self {
        let mut o = CiOverview::default();
        for pr in prs {
            match pr.ci_status {
                CiStatus::Passing => o.passing += 1,
                CiStatus::Failing => o.failing += 1,
                CiStatus::Pending => o.pending += 1,
                CiStatus::Unknown => o.unknown += 1,
            }
        }
        o
    }
}

/// Workspace prepared for fixing a PR's CI.
#[derive(Debug, Clone, Serialize)]
pub struct FixWorkspace {
    pub pr: u64,
    pub worktree: Worktree,
    pub failed_checks: Vec<CiCheck>,
}

pub struct CiTriage {
    forge: Arc<dyn Forge>,
    worktrees: Arc<WorktreeManager>,
}

impl CiTriage {
    pub fn new(forge: Arc<dyn Forge>, worktrees: Arc<WorktreeManager>) -> Self {
        Self { forge, worktrees }
    }

    pub async fn status(&self) -> OrchestratorResult<Vec<PrStatus>> {
        Ok(self.forge.all_prs_status().await?)
    }

    /// Open PRs whose aggregated status is failing, with the failing checks.
    pub async fn failing(&self) -> OrchestratorResult<Vec<FailingPr>> {
        let mut out = Vec::new();
        for status in self.status().await? {
            if status.ci_status != CiStatus::Failing {
                continue;
            }
            let failed_checks = status
                .checks
                .iter()
                .filter(|c| c.state == CheckState::Failure)
                .cloned()
                .collect();
            out.push(FailingPr {
                status,
                failed_checks,
            });
        }
        Ok(out)
    }

    pub async fn logs(&self, pr: u64, check: Option<&str>) -> OrchestratorResult<String> {
        Ok(self.forge.ci_logs(pr, check).await?)
    }

    /// Check out the PR's head branch, re-using an existing worktree.
    #[instrument(skip(self))]
    pub async fn prepare_fix(&self, pr: u64) -> OrchestratorResult<FixWorkspace> {
        let branch = self.forge.pr_branch(pr).await?;
        let failed_checks = self.forge.failed_checks(pr).await?;
        let worktree = self.worktrees.checkout_existing(&branch).await?;
        info!(
            branch = %branch,
            path = %worktree.path.display(),
            failing = failed_checks.len(),
            "fix worktree ready"
        );
        Ok(FixWorkspace {
            pr,
            worktree,
            failed_checks,
        })
    }
}
