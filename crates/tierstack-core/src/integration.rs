//! Tier integration branches and stacked pull requests.
//!
//! Tier `N` integrates into `<prefix>/tier-N`, forked from tier `N-1`'s
//! integration branch (the trunk for tier 0). Its pull request uses that same
//! branch as base, so the PRs form a linear review stack.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use tierstack_collab::{Forge, MergeOutcome, NewPullRequest, PullRequestRef, VersionControl};

use crate::error::{FailureKind, OrchestratorError, OrchestratorResult};
use crate::ticket::compare_identifiers;
use crate::worktree::{Worktree, WorktreeManager};

/// Branch naming for one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchNames {
    prefix: String,
    trunk: String,
}

impl BranchNames {
    pub fn new(prefix: impl Into<String>, trunk: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            trunk: trunk.into(),
        }
    }

    pub fn trunk(&self) -> &str {
        &self.trunk
    }

    /// `<prefix>/<identifier>`, lowercased, with unsafe characters replaced.
    pub fn ticket_branch(&self, identifier: &str) -> String {
        let mut slug: String = identifier
            .to_lowercase()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        // Keep ticket branches out of the integration namespace.
        if slug.starts_with("tier-") {
            slug.insert_str(0, "ticket-");
        }
        format!("{}/{}", self.prefix, slug)
    }

    pub fn integration_branch(&self, tier: usize) -> String {
        format!("{}/tier-{tier}", self.prefix)
    }

    /// Start point for tier `tier` and base of its pull request.
    pub fn tier_base(&self, tier: usize) -> String {
        match tier {
            0 => self.trunk.clone(),
            n => self.integration_branch(n - 1),
        }
    }

    pub fn pr_base(&self, tier: usize) -> String {
        self.tier_base(tier)
    }
}

/// A ticket branch waiting to be merged into its tier.
#[derive(Debug, Clone)]
pub struct MergeCandidate {
    pub identifier: String,
    pub branch: String,
}

/// A ticket whose branch could not be merged.
#[derive(Debug, Clone, Serialize)]
pub struct MergeFailure {
    pub identifier: String,
    pub kind: FailureKind,
    pub reason: String,
    /// Conflicting paths, when the failure is a merge conflict.
    pub files: Vec<String>,
}

/// Result of merging one tier's ticket branches.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeReport {
    /// Identifiers merged by this call, in merge order.
    pub merged: Vec<String>,
    /// Identifiers already contained in the integration branch.
    pub already_merged: Vec<String>,
    pub failures: Vec<MergeFailure>,
}

impl MergeReport {
    /// Every ticket whose work is now in the integration branch.
    pub fn integrated(&self) -> impl Iterator<Item = &String> {
        self.merged.iter().chain(self.already_merged.iter())
    }
}

/// Builds integration branches and keeps the PR stack consistent.
pub struct IntegrationEngine {
    vcs: Arc<dyn VersionControl>,
    forge: Arc<dyn Forge>,
    worktrees: Arc<WorktreeManager>,
    names: BranchNames,
}

impl IntegrationEngine {
    pub fn new(
        vcs: Arc<dyn VersionControl>,
        forge: Arc<dyn Forge>,
        worktrees: Arc<WorktreeManager>,
        names: BranchNames,
    ) -> Self {
        Self {
            vcs,
            forge,
            worktrees,
            names,
        }
    }

    pub fn names(&self) -> &BranchNames {
        &self.names
    }

    /// Worktree on the tier's integration branch.
    ///
    /// A branch left by an earlier run is re-used and brought up to date with
    /// its base, which is a no-op when nothing changed below it.
    pub async fn prepare_branch(&self, tier: usize) -> OrchestratorResult<Worktree> {
        let branch = self.names.integration_branch(tier);
        let base = self.names.tier_base(tier);
        let wt = self.worktrees.ensure(&branch, &base).await?;
        if wt.reused {
            let msg = format!("Sync {branch} with {base}");
            if let MergeOutcome::Merged { commit } = self.vcs.merge(&wt.path, &base, &msg).await? {
                info!(branch = %branch, base = %base, commit = %commit, "synced integration branch with base");
            }
        }
        Ok(wt)
    }

    /// Merge `candidates` into the integration worktree in identifier order.
    ///
    /// A conflict or missing branch is recorded against that ticket and the
    /// remaining candidates are still merged. Infrastructure errors abort.
    pub async fn merge_tickets(
        &self,
        integration: &Worktree,
        candidates: &[MergeCandidate],
    ) -> OrchestratorResult<MergeReport> {
        let mut ordered: Vec<&MergeCandidate> = candidates.iter().collect();
        ordered.sort_by(|a, b| compare_identifiers(&a.identifier, &b.identifier));

        let mut report = MergeReport::default();
        for c in ordered {
            let msg = format!(
                "Merge {} ({}) into {}",
                c.branch, c.identifier, integration.branch
            );
            match self.vcs.merge(&integration.path, &c.branch, &msg).await {
                Ok(MergeOutcome::Merged { commit }) => {
                    info!(ticket = %c.identifier, branch = %c.branch, commit = %commit, "merged ticket branch");
                    report.merged.push(c.identifier.clone());
                }
                Ok(MergeOutcome::AlreadyUpToDate) => {
                    info!(ticket = %c.identifier, branch = %c.branch, "ticket branch already merged");
                    report.already_merged.push(c.identifier.clone());
                }
                Err(e) => {
                    let err = OrchestratorError::from(e);
                    if err.is_run_fatal() {
                        return Err(err);
                    }
                    warn!(ticket = %c.identifier, error = %err, "could not merge ticket branch");
                    let files = match &err {
                        OrchestratorError::MergeConflict { files, .. } => files.clone(),
                        _ => Vec::new(),
                    };
                    report.failures.push(MergeFailure {
                        identifier: c.identifier.clone(),
                        kind: err.kind(),
                        reason: err.to_string(),
                        files,
                    });
                }
            }
        }
        Ok(report)
    }

    /// Push the integration branch and open or refresh its pull request.
    pub async fn publish(
        &self,
        tier: usize,
        integration: &Worktree,
        title: &str,
        body: &str,
    ) -> OrchestratorResult<PullRequestRef> {
        self.vcs.push(&integration.path, &integration.branch).await?;
        let base = self.names.pr_base(tier);

        if let Some(mut pr) = self.forge.find_pr_for_branch(&integration.branch).await? {
            if pr.base != base {
                self.forge.update_pr_base(pr.number, &base).await?;
                info!(number = pr.number, from = %pr.base, to = %base, "retargeted integration PR");
                pr.base = base;
            }
            return Ok(pr);
        }

        let pr = self
            .forge
            .create_pr(NewPullRequest {
                title: title.to_string(),
                body: body.to_string(),
                head: integration.branch.clone(),
                base,
            })
            .await?;
        info!(tier, number = pr.number, url = %pr.url, base = %pr.base, "opened integration PR");
        Ok(pr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tierstack_collab::fakes::{InjectedFailure, MemoryForge, MemoryVersionControl};

    fn engine() -> (Arc<MemoryVersionControl>, Arc<MemoryForge>, IntegrationEngine) {
        let vcs = Arc::new(MemoryVersionControl::new("main"));
        let forge = Arc::new(MemoryForge::new());
        let worktrees = Arc::new(WorktreeManager::new(vcs.clone()));
        let engine = IntegrationEngine::new(
            vcs.clone(),
            forge.clone(),
            worktrees,
            BranchNames::new("stack", "main"),
        );
        (vcs, forge, engine)
    }

    fn candidate(id: &str) -> MergeCandidate {
        MergeCandidate {
            identifier: id.to_string(),
            branch: format!("stack/{}", id.to_lowercase()),
        }
    }

    #[test]
    fn test_branch_names() {
        let names = BranchNames::new("stack", "main");
        assert_eq!(names.ticket_branch("ENG-12"), "stack/eng-12");
        assert_eq!(names.ticket_branch("Fix login/SSO"), "stack/fix-login-sso");
        assert_eq!(names.ticket_branch("TIER-1"), "stack/ticket-tier-1");
        assert_eq!(names.integration_branch(2), "stack/tier-2");
        assert_eq!(names.pr_base(0), "main");
        assert_eq!(names.pr_base(3), "stack/tier-2");
    }

    #[tokio::test]
    async fn test_merge_order_is_identifier_ascending() {
        let (vcs, _forge, engine) = engine();
        for id in ["ENG-10", "ENG-2", "ENG-1"] {
            let file = format!("{id}.txt");
            vcs.seed_branch(&format!("stack/{}", id.to_lowercase()), "main", &[file.as_str()]);
        }
        let wt = engine.prepare_branch(0).await.unwrap();
        let report = engine
            .merge_tickets(&wt, &[candidate("ENG-10"), candidate("ENG-2"), candidate("ENG-1")])
            .await
            .unwrap();
        assert_eq!(report.merged, vec!["ENG-1", "ENG-2", "ENG-10"]);
        let sources: Vec<String> = vcs.merges().into_iter().map(|(_, s)| s).collect();
        assert_eq!(sources, vec!["stack/eng-1", "stack/eng-2", "stack/eng-10"]);
    }

    #[tokio::test]
    async fn test_remerge_is_noop() {
        let (vcs, _forge, engine) = engine();
        vcs.seed_branch("stack/eng-1", "main", &["a.txt"]);
        let wt = engine.prepare_branch(0).await.unwrap();

        engine.merge_tickets(&wt, &[candidate("ENG-1")]).await.unwrap();
        let commits = vcs.commit_count("stack/tier-0");
        let again = engine.merge_tickets(&wt, &[candidate("ENG-1")]).await.unwrap();

        assert!(again.merged.is_empty());
        assert_eq!(again.already_merged, vec!["ENG-1"]);
        assert_eq!(vcs.commit_count("stack/tier-0"), commits);
    }

    #[tokio::test]
    async fn test_conflict_is_recorded_and_others_merge() {
        let (vcs, _forge, engine) = engine();
        vcs.seed_branch("stack/eng-1", "main", &["shared.rs"]);
        vcs.seed_branch("stack/eng-2", "main", &["shared.rs"]);
        vcs.seed_branch("stack/eng-3", "main", &["other.rs"]);
        let wt = engine.prepare_branch(0).await.unwrap();

        let report = engine
            .merge_tickets(&wt, &[candidate("ENG-1"), candidate("ENG-2"), candidate("ENG-3")])
            .await
            .unwrap();
        assert_eq!(report.merged, vec!["ENG-1", "ENG-3"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].identifier, "ENG-2");
        assert_eq!(report.failures[0].kind, FailureKind::MergeConflict);
        assert_eq!(report.failures[0].files, vec!["shared.rs"]);
    }

    #[tokio::test]
    async fn test_infrastructure_failure_aborts_merge() {
        let (vcs, _forge, engine) = engine();
        vcs.seed_branch("stack/eng-1", "main", &["a.txt"]);
        let wt = engine.prepare_branch(0).await.unwrap();
        vcs.set_unavailable(true);
        let err = engine.merge_tickets(&wt, &[candidate("ENG-1")]).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InfrastructureUnavailable(_)));
    }

    #[tokio::test]
    async fn test_publish_stacks_and_refreshes_base() {
        let (vcs, forge, engine) = engine();
        let t0 = engine.prepare_branch(0).await.unwrap();
        let pr0 = engine.publish(0, &t0, "Tier 0", "").await.unwrap();
        assert_eq!(pr0.base, "main");

        let t1 = engine.prepare_branch(1).await.unwrap();
        let pr1 = engine.publish(1, &t1, "Tier 1", "").await.unwrap();
        assert_eq!(pr1.base, "stack/tier-0");
        assert_eq!(vcs.pushes(), vec!["stack/tier-0", "stack/tier-1"]);

        // A stale base on an existing PR is corrected instead of duplicated.
        forge.update_pr_base(pr1.number, "main").await.unwrap();
        let again = engine.publish(1, &t1, "Tier 1", "").await.unwrap();
        assert_eq!(again.number, pr1.number);
        assert_eq!(again.base, "stack/tier-0");
        assert_eq!(forge.prs().len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_push_fails_publish() {
        let (vcs, forge, engine) = engine();
        vcs.inject_failure("stack/tier-0", InjectedFailure::PushRejected);
        let t0 = engine.prepare_branch(0).await.unwrap();
        assert!(engine.publish(0, &t0, "Tier 0", "").await.is_err());
        assert!(forge.prs().is_empty());
    }
}
