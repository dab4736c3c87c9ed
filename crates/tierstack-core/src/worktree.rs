//! Worktree lifecycle on top of a [`VersionControl`] collaborator.
//!
//! Creation is serialized per branch name; distinct branches proceed in
//! parallel. Every worktree is addressed by explicit path and branch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, info};

use tierstack_collab::{VersionControl, WorktreeInfo};

use crate::error::OrchestratorResult;

/// A checked-out branch owned by one ticket or tier integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Worktree {
    pub path: PathBuf,
    pub branch: String,
    /// Start point used when the branch was created here; `None` when an
    /// existing branch was attached.
    pub base: Option<String>,
    /// `true` when an existing branch or checkout was re-used.
    pub reused: bool,
}

/// Creates, re-attaches, and removes worktrees.
pub struct WorktreeManager {
    vcs: Arc<dyn VersionControl>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl WorktreeManager {
    pub fn new(vcs: Arc<dyn VersionControl>) -> Self {
        Self {
            vcs,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn branch_lock(&self, branch: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(branch.to_string()).or_default())
    }

    /// Forget the branch lock once no other caller holds or waits on it.
    fn release(&self, branch: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map, one here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(branch);
        }
    }

    #[cfg(test)]
    fn tracked_branches(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Create `branch` from `start_point` in a fresh worktree.
    pub async fn create(&self, branch: &str, start_point: &str) -> OrchestratorResult<Worktree> {
        let lock = self.branch_lock(branch);
        let result = {
            let _guard = lock.lock().await;
            self.create_locked(branch, start_point).await
        };
        self.release(branch, lock);
        result
    }

    async fn create_locked(&self, branch: &str, start_point: &str) -> OrchestratorResult<Worktree> {
        let path = self.vcs.create_worktree(branch, Some(start_point)).await?;
        info!(branch, base = start_point, path = %path.display(), "created worktree");
        Ok(Worktree {
            path,
            branch: branch.to_string(),
            base: Some(start_point.to_string()),
            reused: false,
        })
    }

    /// Attach a worktree to an existing branch, re-using a current checkout.
    pub async fn checkout_existing(&self, branch: &str) -> OrchestratorResult<Worktree> {
        let lock = self.branch_lock(branch);
        let result = {
            let _guard = lock.lock().await;
            self.checkout_locked(branch).await
        };
        self.release(branch, lock);
        result
    }

    async fn checkout_locked(&self, branch: &str) -> OrchestratorResult<Worktree> {
        let path = self.vcs.checkout_worktree(branch).await?;
        info!(branch, path = %path.display(), "attached existing branch");
        Ok(Worktree {
            path,
            branch: branch.to_string(),
            base: None,
            reused: true,
        })
    }

    /// Worktree for `branch`, re-using the branch when an earlier run left it
    /// behind and creating it from `start_point` otherwise.
    pub async fn ensure(&self, branch: &str, start_point: &str) -> OrchestratorResult<Worktree> {
        let lock = self.branch_lock(branch);
        let result = {
            let _guard = lock.lock().await;
            self.ensure_locked(branch, start_point).await
        };
        self.release(branch, lock);
        result
    }

    async fn ensure_locked(&self, branch: &str, start_point: &str) -> OrchestratorResult<Worktree> {
        if self.vcs.branch_exists(branch).await? {
            debug!(branch, "branch exists; re-using");
            return self.checkout_locked(branch).await;
        }
        self.create_locked(branch, start_point).await
    }

    /// Remove a worktree. Already-removed paths are a no-op.
    pub async fn remove(&self, path: &Path) -> OrchestratorResult<()> {
        self.vcs.remove_worktree(path).await?;
        debug!(path = %path.display(), "removed worktree");
        Ok(())
    }

    pub async fn list(&self) -> OrchestratorResult<Vec<WorktreeInfo>> {
        Ok(self.vcs.list_worktrees().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestratorError;
    use tierstack_collab::fakes::{InjectedFailure, MemoryVersionControl};

    fn manager() -> (Arc<MemoryVersionControl>, WorktreeManager) {
        let vcs = Arc::new(MemoryVersionControl::new("main"));
        let mgr = WorktreeManager::new(vcs.clone());
        (vcs, mgr)
    }

    #[tokio::test]
    async fn test_ensure_creates_then_reuses() {
        let (vcs, mgr) = manager();
        let first = mgr.ensure("stack/eng-1", "main").await.unwrap();
        assert!(!first.reused);
        vcs.write_file(&first.path, "wip.txt");

        let second = mgr.ensure("stack/eng-1", "main").await.unwrap();
        assert!(second.reused);
        assert_eq!(first.path, second.path);
        assert_eq!(vcs.created_branches(), vec!["stack/eng-1".to_string()]);
    }

    #[tokio::test]
    async fn test_create_existing_checkout_is_branch_exists() {
        let (_vcs, mgr) = manager();
        mgr.create("stack/eng-1", "main").await.unwrap();
        let err = mgr.create("stack/eng-1", "main").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::BranchExists { .. }));
    }

    #[tokio::test]
    async fn test_base_not_found_maps_through() {
        let (vcs, mgr) = manager();
        vcs.inject_failure("stack/eng-2", InjectedFailure::BaseNotFound);
        let err = mgr.ensure("stack/eng-2", "stack/tier-0").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::BaseNotFound { .. }));
    }

    #[tokio::test]
    async fn test_remove_twice_is_noop() {
        let (_vcs, mgr) = manager();
        let wt = mgr.create("stack/eng-3", "main").await.unwrap();
        mgr.remove(&wt.path).await.unwrap();
        mgr.remove(&wt.path).await.unwrap();
        assert!(mgr.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_ensure_same_branch_is_serialized() {
        let (vcs, mgr) = manager();
        let mgr = Arc::new(mgr);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let mgr = Arc::clone(&mgr);
                tokio::spawn(async move { mgr.ensure("stack/eng-4", "main").await })
            })
            .collect();
        let mut paths = Vec::new();
        for h in handles {
            paths.push(h.await.unwrap().unwrap().path);
        }
        paths.dedup();
        assert_eq!(paths.len(), 1);
        assert_eq!(vcs.created_branches().len(), 1);
        assert_eq!(mgr.tracked_branches(), 0);
    }

    #[tokio::test]
    async fn test_branch_locks_are_released() {
        let (_vcs, mgr) = manager();
        for i in 0..5 {
            let branch = format!("stack/eng-{i}");
            mgr.ensure(&branch, "main").await.unwrap();
            mgr.checkout_existing(&branch).await.unwrap();
        }
        assert!(mgr.create("stack/eng-0", "main").await.is_err());
        assert_eq!(mgr.tracked_branches(), 0);
    }
}
