//! `git` CLI adapter for the [`VersionControl`] contract.
//!
//! All branch work happens in worktrees under a dedicated root, never in the
//! user's main checkout. Worktree paths are derived from branch names so two
//! worktrees can never share a path.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{CollabError, CollabResult};
use crate::process::{join_args, run_command, CommandOutput};
use crate::traits::{MergeOutcome, VersionControl, WorktreeInfo};

/// Branches that must never be pushed to directly.
pub const PROTECTED_BRANCHES: &[&str] = &["main", "master", "develop", "production", "staging"];

/// Directory (sibling of the repository) that holds worktrees by default.
pub const WORKTREE_DIR: &str = ".worktrees";

/// Git adapter rooted at one repository.
///
/// Calls that write shared repository metadata (`.git/config`, the worktree
/// registry, remote-tracking refs) are serialized through one lock shared by
/// all clones; everything inside a worktree runs unlocked.
#[derive(Debug, Clone)]
pub struct GitCli {
    repo_root: PathBuf,
    worktree_root: PathBuf,
    remote: String,
    trunk: Option<String>,
    repo_lock: Arc<Mutex<()>>,
}

impl GitCli {
    /// Create an adapter for `repo_root` placing worktrees under `worktree_root`.
    pub fn new(repo_root: impl Into<PathBuf>, worktree_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            worktree_root: worktree_root.into(),
            remote: "origin".to_string(),
            trunk: None,
            repo_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Locate the repository containing `cwd` and use the default worktree root.
    pub async fn discover(cwd: &Path) -> CollabResult<Self> {
        let output = run_command("git", &["rev-parse", "--show-toplevel"], Some(cwd), &[]).await?;
        if !output.success {
            return Err(CollabError::CommandFailed {
                program: "git".to_string(),
                args: "rev-parse --show-toplevel".to_string(),
                stderr: output.stderr.trim().to_string(),
            });
        }
        let root = PathBuf::from(output.stdout_trimmed());
        let worktree_root = Self::default_worktree_root(&root);
        Ok(Self::new(root, worktree_root))
    }

    /// `<repo parent>/.worktrees/<repo name>`.
    pub fn default_worktree_root(repo_root: &Path) -> PathBuf {
        let name = repo_root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "repo".to_string());
        repo_root
            .parent()
            .unwrap_or(repo_root)
            .join(WORKTREE_DIR)
            .join(name)
    }

    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    /// Pin the trunk branch instead of auto-detecting `main`/`master`.
    pub fn with_trunk(mut self, trunk: impl Into<String>) -> Self {
        self.trunk = Some(trunk.into());
        self
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn worktree_root(&self) -> &Path {
        &self.worktree_root
    }

    /// Deterministic worktree path for a branch (`/` becomes `-`).
    pub fn worktree_path(&self, branch: &str) -> PathBuf {
        self.worktree_root.join(branch.replace('/', "-"))
    }

    /// `owner/repo` parsed from the remote URL, when it points at GitHub.
    pub async fn github_repo(&self) -> CollabResult<Option<String>> {
        let out = self
            .git(&["remote", "get-url", self.remote.as_str()], &self.repo_root)
            .await?;
        if !out.success {
            return Ok(None);
        }
        Ok(parse_github_repo(out.stdout_trimmed()))
    }

    async fn git(&self, args: &[&str], cwd: &Path) -> CollabResult<CommandOutput> {
        run_command("git", args, Some(cwd), &[]).await
    }

    async fn git_checked(&self, args: &[&str], cwd: &Path) -> CollabResult<String> {
        let out = self.git(args, cwd).await?;
        if !out.success {
            return Err(CollabError::CommandFailed {
                program: "git".to_string(),
                args: join_args(args),
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(out.stdout_trimmed().to_string())
    }

    /// Whether `rev` names a commit.
    async fn resolves(&self, rev: &str) -> CollabResult<bool> {
        let spec = format!("{rev}^{{commit}}");
        let out = self
            .git(&["rev-parse", "--verify", "--quiet", spec.as_str()], &self.repo_root)
            .await?;
        Ok(out.success)
    }

    async fn local_branch_exists(&self, branch: &str) -> CollabResult<bool> {
        self.resolves(&format!("refs/heads/{branch}")).await
    }

    /// Path of the worktree that currently has `branch` checked out.
    ///
    /// Registry entries whose directory was deleted do not count; they are
    /// pruned before the next `worktree add`.
    async fn checked_out_at(&self, branch: &str) -> CollabResult<Option<PathBuf>> {
        Ok(self
            .list_worktrees()
            .await?
            .into_iter()
            .find(|w| w.branch.as_deref() == Some(branch) && w.path.is_dir())
            .map(|w| w.path))
    }

    /// Best-effort fetch; offline repositories simply keep their local refs.
    async fn fetch(&self, refspec: &str) {
        match self
            .git(&["fetch", self.remote.as_str(), refspec], &self.repo_root)
            .await
        {
            Ok(out) if !out.success => {
                debug!(refspec, stderr = %out.stderr.trim(), "fetch skipped");
            }
            Err(e) => debug!(refspec, error = %e, "fetch skipped"),
            Ok(_) => {}
        }
    }

    /// Force-remove whatever occupies `path` so a fresh worktree can be added.
    async fn clear_stale_path(&self, path: &Path) -> CollabResult<()> {
        if path.exists() {
            warn!(path = %path.display(), "removing stale worktree directory");
            let path_str = path.to_string_lossy().to_string();
            self.git(
                &["worktree", "remove", "--force", path_str.as_str()],
                &self.repo_root,
            )
            .await?;
        }
        self.git(&["worktree", "prune"], &self.repo_root).await?;
        Ok(())
    }

    async fn current_branch(&self, worktree: &Path) -> CollabResult<String> {
        self.git_checked(&["rev-parse", "--abbrev-ref", "HEAD"], worktree)
            .await
    }

    fn is_protected(&self, branch: &str) -> bool {
        let lower = branch.to_lowercase();
        PROTECTED_BRANCHES.contains(&lower.as_str())
            || self
                .trunk
                .as_deref()
                .map(|t| t.eq_ignore_ascii_case(branch))
                .unwrap_or(false)
    }
}

#[async_trait]
impl VersionControl for GitCli {
    async fn trunk(&self) -> CollabResult<String> {
        if let Some(trunk) = &self.trunk {
            return Ok(trunk.clone());
        }
        if self.resolves("main").await? {
            Ok("main".to_string())
        } else {
            Ok("master".to_string())
        }
    }

    async fn branch_exists(&self, branch: &str) -> CollabResult<bool> {
        if self.local_branch_exists(branch).await? {
            return Ok(true);
        }
        self.resolves(&format!("refs/remotes/{}/{}", self.remote, branch))
            .await
    }

    async fn create_worktree(
        &self,
        branch: &str,
        start_point: Option<&str>,
    ) -> CollabResult<PathBuf> {
        let _repo = self.repo_lock.lock().await;
        if let Some(path) = self.checked_out_at(branch).await? {
            return Err(CollabError::BranchExists {
                branch: branch.to_string(),
                path: path.display().to_string(),
            });
        }

        let start = match start_point {
            Some(s) => s.to_string(),
            None => self.trunk().await?,
        };
        self.fetch(&start).await;

        let remote_ref = format!("{}/{}", self.remote, start);
        let base = if self.resolves(&remote_ref).await? {
            remote_ref
        } else if self.resolves(&start).await? {
            start.clone()
        } else {
            return Err(CollabError::BaseNotFound { start_point: start });
        };

        let path = self.worktree_path(branch);
        self.clear_stale_path(&path).await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let path_str = path.to_string_lossy().to_string();

        let out = if self.local_branch_exists(branch).await? {
            warn!(branch, "branch already exists, attaching instead of creating from {base}");
            self.git(&["worktree", "add", path_str.as_str(), branch], &self.repo_root)
                .await?
        } else {
            self.git(
                &[
                    "worktree",
                    "add",
                    "--no-track",
                    "-b",
                    branch,
                    path_str.as_str(),
                    base.as_str(),
                ],
                &self.repo_root,
            )
            .await?
        };
        if !out.success {
            return Err(CollabError::CommandFailed {
                program: "git".to_string(),
                args: format!("worktree add {path_str} {branch}"),
                stderr: out.stderr.trim().to_string(),
            });
        }

        info!(branch, base = %base, path = %path.display(), "created worktree");
        Ok(path)
    }

    async fn checkout_worktree(&self, branch: &str) -> CollabResult<PathBuf> {
        let _repo = self.repo_lock.lock().await;
        if let Some(path) = self.checked_out_at(branch).await? {
            debug!(branch, path = %path.display(), "re-using existing worktree");
            return Ok(path);
        }

        self.fetch(branch).await;

        let path = self.worktree_path(branch);
        self.clear_stale_path(&path).await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let path_str = path.to_string_lossy().to_string();
        let remote_ref = format!("{}/{}", self.remote, branch);

        let out = if self.local_branch_exists(branch).await? {
            self.git(&["worktree", "add", path_str.as_str(), branch], &self.repo_root)
                .await?
        } else if self.resolves(&remote_ref).await? {
            self.git(
                &[
                    "worktree",
                    "add",
                    "--track",
                    "-b",
                    branch,
                    path_str.as_str(),
                    remote_ref.as_str(),
                ],
                &self.repo_root,
            )
            .await?
        } else {
            return Err(CollabError::BranchNotFound {
                branch: branch.to_string(),
            });
        };
        if !out.success {
            return Err(CollabError::CommandFailed {
                program: "git".to_string(),
                args: format!("worktree add {path_str} {branch}"),
                stderr: out.stderr.trim().to_string(),
            });
        }

        info!(branch, path = %path.display(), "checked out existing branch");
        Ok(path)
    }

    async fn remove_worktree(&self, path: &Path) -> CollabResult<()> {
        let _repo = self.repo_lock.lock().await;
        if !path.exists() {
            self.git(&["worktree", "prune"], &self.repo_root).await?;
            return Ok(());
        }
        let path_str = path.to_string_lossy().to_string();
        self.git_checked(
            &["worktree", "remove", "--force", path_str.as_str()],
            &self.repo_root,
        )
        .await?;
        self.git(&["worktree", "prune"], &self.repo_root).await?;
        info!(path = %path.display(), "removed worktree");
        Ok(())
    }

    async fn list_worktrees(&self) -> CollabResult<Vec<WorktreeInfo>> {
        let out = self
            .git_checked(&["worktree", "list", "--porcelain"], &self.repo_root)
            .await?;
        Ok(parse_worktree_porcelain(&out))
    }

    async fn has_changes(&self, worktree: &Path) -> CollabResult<bool> {
        let status = self.git_checked(&["status", "--porcelain"], worktree).await?;
        Ok(!status.is_empty())
    }

    async fn commit(&self, worktree: &Path, message: &str) -> CollabResult<bool> {
        self.git_checked(&["add", "-A"], worktree).await?;
        if !self.has_changes(worktree).await? {
            debug!(worktree = %worktree.display(), "no changes to commit");
            return Ok(false);
        }
        self.git_checked(&["commit", "-m", message], worktree).await?;
        Ok(true)
    }

    async fn push(&self, worktree: &Path, branch: &str) -> CollabResult<()> {
        if self.is_protected(branch) {
            return Err(CollabError::ProtectedBranch {
                branch: branch.to_string(),
            });
        }
        // `-u` writes branch config in the shared `.git/config`.
        let _repo = self.repo_lock.lock().await;
        self.git_checked(&["push", "-u", self.remote.as_str(), branch], worktree)
            .await?;
        info!(branch, "pushed branch");
        Ok(())
    }

    async fn merge(
        &self,
        worktree: &Path,
        source_branch: &str,
        message: &str,
    ) -> CollabResult<MergeOutcome> {
        let ancestry = self
            .git(
                &["merge-base", "--is-ancestor", source_branch, "HEAD"],
                worktree,
            )
            .await?;
        match ancestry.exit_code {
            0 => return Ok(MergeOutcome::AlreadyUpToDate),
            1 => {}
            _ => {
                return Err(CollabError::BranchNotFound {
                    branch: source_branch.to_string(),
                })
            }
        }

        let out = self
            .git(&["merge", "--no-ff", "-m", message, source_branch], worktree)
            .await?;
        if out.success {
            let commit = self.git_checked(&["rev-parse", "HEAD"], worktree).await?;
            return Ok(MergeOutcome::Merged { commit });
        }

        let target = self.current_branch(worktree).await?;
        let unmerged = self
            .git(&["diff", "--name-only", "--diff-filter=U"], worktree)
            .await?;
        let files: Vec<String> = unmerged
            .stdout
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect();
        self.git(&["merge", "--abort"], worktree).await?;

        if files.is_empty() {
            return Err(CollabError::CommandFailed {
                program: "git".to_string(),
                args: format!("merge --no-ff {source_branch}"),
                stderr: out.stderr.trim().to_string(),
            });
        }
        Err(CollabError::MergeConflict {
            source_branch: source_branch.to_string(),
            target,
            files,
        })
    }

    async fn changed_files(&self, worktree: &Path, base: &str) -> CollabResult<Vec<String>> {
        let remote_range = format!("{}/{}...HEAD", self.remote, base);
        let mut out = self
            .git(&["diff", "--name-only", remote_range.as_str()], worktree)
            .await?;
        if !out.success {
            let local_range = format!("{base}...HEAD");
            out = self
                .git(&["diff", "--name-only", local_range.as_str()], worktree)
                .await?;
        }
        if !out.success {
            return Err(CollabError::BaseNotFound {
                start_point: base.to_string(),
            });
        }
        Ok(out
            .stdout
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// Parse `git worktree list --porcelain`.
pub fn parse_worktree_porcelain(output: &str) -> Vec<WorktreeInfo> {
    let mut worktrees = Vec::new();
    let mut current: Option<WorktreeInfo> = None;

    for line in output.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(done) = current.take() {
                worktrees.push(done);
            }
            current = Some(WorktreeInfo {
                path: PathBuf::from(path),
                branch: None,
            });
        } else if let Some(branch) = line.strip_prefix("branch ") {
            if let Some(entry) = current.as_mut() {
                entry.branch = Some(branch.trim_start_matches("refs/heads/").to_string());
            }
        }
    }
    if let Some(done) = current {
        worktrees.push(done);
    }
    worktrees
}

/// Extract `owner/repo` from a GitHub remote URL (https or ssh).
pub fn parse_github_repo(url: &str) -> Option<String> {
    let re = Regex::new(r"github\.com[:/]([^/]+/[^/]+?)(?:\.git)?/?$").ok()?;
    re.captures(url.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn run_git(repo_dir: &Path, args: &[&str]) -> String {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    /// A repository on `main` with one commit, plus a separate worktree root.
    fn make_git_repo() -> (tempfile::TempDir, GitCli) {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        run_git(&repo, &["init", "-q"]);
        run_git(&repo, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        run_git(&repo, &["config", "user.name", "test-user"]);
        run_git(&repo, &["config", "user.email", "test@example.com"]);
        std::fs::write(repo.join("shared.txt"), "base\n").unwrap();
        run_git(&repo, &["add", "-A"]);
        run_git(&repo, &["commit", "-q", "-m", "initial"]);
        let git = GitCli::new(&repo, dir.path().join("wt"));
        (dir, git)
    }

    async fn commit_file(git: &GitCli, worktree: &Path, file: &str, body: &str) {
        std::fs::write(worktree.join(file), body).unwrap();
        assert!(git.commit(worktree, &format!("edit {file}")).await.unwrap());
    }

    #[test]
    fn test_parse_worktree_porcelain() {
        let out = "worktree /repo\nHEAD abc\nbranch refs/heads/main\n\nworktree /wt/stack-tier-0\nHEAD def\nbranch refs/heads/stack/tier-0\n\nworktree /wt/detached\nHEAD 123\ndetached\n";
        let list = parse_worktree_porcelain(out);
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].branch.as_deref(), Some("main"));
        assert_eq!(list[1].path, PathBuf::from("/wt/stack-tier-0"));
        assert_eq!(list[1].branch.as_deref(), Some("stack/tier-0"));
        assert_eq!(list[2].branch, None);
    }

    #[test]
    fn test_parse_github_repo_variants() {
        assert_eq!(
            parse_github_repo("git@github.com:acme/widgets.git").as_deref(),
            Some("acme/widgets")
        );
        assert_eq!(
            parse_github_repo("https://github.com/acme/widgets").as_deref(),
            Some("acme/widgets")
        );
        assert_eq!(parse_github_repo("https://gitlab.com/acme/widgets"), None);
    }

    #[test]
    fn test_worktree_path_flattens_slashes() {
        let git = GitCli::new("/src/repo", "/src/.worktrees/repo");
        assert_eq!(
            git.worktree_path("stack/eng-1"),
            PathBuf::from("/src/.worktrees/repo/stack-eng-1")
        );
        assert_eq!(
            GitCli::default_worktree_root(Path::new("/src/repo")),
            PathBuf::from("/src/.worktrees/repo")
        );
    }

    #[tokio::test]
    async fn test_trunk_detects_main() {
        let (_dir, git) = make_git_repo();
        assert_eq!(git.trunk().await.unwrap(), "main");
    }

    #[tokio::test]
    async fn test_create_worktree_and_reject_second_checkout() {
        let (_dir, git) = make_git_repo();
        let path = git.create_worktree("stack/eng-1", Some("main")).await.unwrap();
        assert!(path.join("shared.txt").exists());
        assert_eq!(run_git(&path, &["rev-parse", "--abbrev-ref", "HEAD"]), "stack/eng-1");

        let err = git
            .create_worktree("stack/eng-1", Some("main"))
            .await
            .unwrap_err();
        assert!(matches!(err, CollabError::BranchExists { .. }));
    }

    #[tokio::test]
    async fn test_create_worktree_with_unknown_base_fails() {
        let (_dir, git) = make_git_repo();
        let err = git
            .create_worktree("stack/eng-2", Some("no-such-branch"))
            .await
            .unwrap_err();
        assert!(matches!(err, CollabError::BaseNotFound { .. }));
    }

    #[tokio::test]
    async fn test_checkout_worktree_reuses_existing_checkout() {
        let (_dir, git) = make_git_repo();
        let created = git.create_worktree("stack/eng-3", None).await.unwrap();
        let reused = git.checkout_worktree("stack/eng-3").await.unwrap();
        assert_eq!(created, reused);

        git.remove_worktree(&created).await.unwrap();
        let reattached = git.checkout_worktree("stack/eng-3").await.unwrap();
        assert!(reattached.exists());
    }

    #[tokio::test]
    async fn test_deleted_worktree_directory_is_recreated() {
        let (_dir, git) = make_git_repo();
        let created = git.create_worktree("stack/eng-7", None).await.unwrap();
        std::fs::remove_dir_all(&created).unwrap();

        let reattached = git.checkout_worktree("stack/eng-7").await.unwrap();
        assert!(reattached.join("shared.txt").exists());
        assert_eq!(
            run_git(&reattached, &["rev-parse", "--abbrev-ref", "HEAD"]),
            "stack/eng-7"
        );
    }

    #[tokio::test]
    async fn test_concurrent_creation_from_remote_base() {
        let (dir, git) = make_git_repo();
        let remote = dir.path().join("remote.git");
        std::fs::create_dir_all(&remote).unwrap();
        run_git(&remote, &["init", "-q", "--bare"]);
        run_git(git.repo_root(), &["remote", "add", "origin", remote.to_str().unwrap()]);
        run_git(git.repo_root(), &["push", "-q", "origin", "main"]);

        let handles: Vec<_> = (0..12)
            .map(|i| {
                let git = git.clone();
                tokio::spawn(async move {
                    git.create_worktree(&format!("stack/w-{i}"), Some("main")).await
                })
            })
            .collect();
        for handle in join_created(handles).await {
            let path = handle.unwrap();
            assert!(path.join("shared.txt").exists());
        }
        let config = std::fs::read_to_string(git.repo_root().join(".git/config")).unwrap();
        assert!(!config.contains("[branch \"stack/w-"), "{config}");
    }

    async fn join_created(
        handles: Vec<tokio::task::JoinHandle<CollabResult<PathBuf>>>,
    ) -> Vec<CollabResult<PathBuf>> {
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            out.push(handle.await.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_checkout_missing_branch_fails() {
        let (_dir, git) = make_git_repo();
        let err = git.checkout_worktree("never-created").await.unwrap_err();
        assert!(matches!(err, CollabError::BranchNotFound { .. }));
    }

    #[tokio::test]
    async fn test_remove_worktree_is_idempotent() {
        let (_dir, git) = make_git_repo();
        let path = git.create_worktree("stack/eng-4", None).await.unwrap();
        git.remove_worktree(&path).await.unwrap();
        assert!(!path.exists());
        git.remove_worktree(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_without_changes_is_noop() {
        let (_dir, git) = make_git_repo();
        let path = git.create_worktree("stack/eng-5", None).await.unwrap();
        assert!(!git.commit(&path, "nothing").await.unwrap());
        std::fs::write(path.join("new.txt"), "x").unwrap();
        assert!(git.has_changes(&path).await.unwrap());
        assert!(git.commit(&path, "add new").await.unwrap());
        assert!(!git.has_changes(&path).await.unwrap());
        assert_eq!(
            git.changed_files(&path, "main").await.unwrap(),
            vec!["new.txt".to_string()]
        );
    }

    #[tokio::test]
    async fn test_push_refuses_protected_branch() {
        let (_dir, git) = make_git_repo();
        let err = git.push(git.repo_root(), "main").await.unwrap_err();
        assert!(matches!(err, CollabError::ProtectedBranch { .. }));
    }

    #[tokio::test]
    async fn test_second_merge_is_noop() {
        let (_dir, git) = make_git_repo();
        let ticket = git.create_worktree("stack/eng-6", None).await.unwrap();
        commit_file(&git, &ticket, "feature.txt", "feature\n").await;

        let integration = git.create_worktree("stack/tier-0", None).await.unwrap();
        let first = git
            .merge(&integration, "stack/eng-6", "merge eng-6")
            .await
            .unwrap();
        assert!(matches!(first, MergeOutcome::Merged { .. }));
        let count_after_first = run_git(&integration, &["rev-list", "--count", "HEAD"]);

        let second = git
            .merge(&integration, "stack/eng-6", "merge eng-6")
            .await
            .unwrap();
        assert_eq!(second, MergeOutcome::AlreadyUpToDate);
        assert_eq!(
            run_git(&integration, &["rev-list", "--count", "HEAD"]),
            count_after_first
        );
    }

    #[tokio::test]
    async fn test_conflicting_merge_is_aborted_and_reported() {
        let (_dir, git) = make_git_repo();
        let a = git.create_worktree("stack/eng-a", None).await.unwrap();
        commit_file(&git, &a, "shared.txt", "from a\n").await;
        let b = git.create_worktree("stack/eng-b", None).await.unwrap();
        commit_file(&git, &b, "shared.txt", "from b\n").await;

        let integration = git.create_worktree("stack/tier-0", None).await.unwrap();
        git.merge(&integration, "stack/eng-a", "merge a").await.unwrap();
        let err = git
            .merge(&integration, "stack/eng-b", "merge b")
            .await
            .unwrap_err();
        match err {
            CollabError::MergeConflict { files, target, .. } => {
                assert_eq!(files, vec!["shared.txt".to_string()]);
                assert_eq!(target, "stack/tier-0");
            }
            other => panic!("expected merge conflict, got {other:?}"),
        }
        assert!(!git.has_changes(&integration).await.unwrap());
    }
}
