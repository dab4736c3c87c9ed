//! In-memory fakes for collaborator traits (testing only)
//!
//! Provides `MemoryTicketTracker`, `MemoryVersionControl`, and `MemoryForge`
//! that satisfy the trait contracts without git, `gh`, or network access.
//! Each fake records the calls made against it and supports injected
//! failures so orchestration paths can be exercised deterministically.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{CollabError, CollabResult};
use crate::git::PROTECTED_BRANCHES;
use crate::traits::*;

// ---------------------------------------------------------------------------
// MemoryTicketTracker
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct TrackerState {
    projects: BTreeMap<String, ProjectRecord>,
    /// Tickets in insertion order, per project.
    tickets: Vec<TicketRecord>,
    status_updates: Vec<(String, TicketStatus)>,
    comments: Vec<(String, String)>,
    fail_writes: bool,
    next_id: u64,
}

/// In-memory ticket tracker.
#[derive(Debug, Default)]
pub struct MemoryTicketTracker {
    state: Mutex<TrackerState>,
}

impl MemoryTicketTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a project and its tickets.
    pub fn with_project(self, project: ProjectRecord, tickets: Vec<TicketRecord>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            for mut t in tickets {
                t.project_id.get_or_insert_with(|| project.id.clone());
                state.tickets.push(t);
            }
            state.projects.insert(project.id.clone(), project);
        }
        self
    }

    /// Make every status update and comment fail as if the tracker were down.
    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_writes = fail;
    }

    /// Every `(ticket id, status)` update in call order.
    pub fn status_updates(&self) -> Vec<(String, TicketStatus)> {
        self.state.lock().unwrap().status_updates.clone()
    }

    /// Every `(ticket id, body)` comment in call order.
    pub fn comments(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().comments.clone()
    }

    fn check_writable(state: &TrackerState) -> CollabResult<()> {
        if state.fail_writes {
            return Err(CollabError::Unavailable("tracker is down".to_string()));
        }
        Ok(())
    }
}

fn find_ticket<'a>(tickets: &'a mut [TicketRecord], id: &str) -> Option<&'a mut TicketRecord> {
    tickets
        .iter_mut()
        .find(|t| t.id == id || t.identifier == id)
}

#[async_trait]
impl TicketTracker for MemoryTicketTracker {
    async fn get_project(&self, id: &str) -> CollabResult<ProjectRecord> {
        let state = self.state.lock().unwrap();
        state
            .projects
            .get(id)
            .cloned()
            .ok_or_else(|| CollabError::ProjectNotFound { id: id.to_string() })
    }

    async fn get_project_tickets(&self, id: &str) -> CollabResult<Vec<TicketRecord>> {
        let state = self.state.lock().unwrap();
        if !state.projects.contains_key(id) {
            return Err(CollabError::ProjectNotFound { id: id.to_string() });
        }
        Ok(state
            .tickets
            .iter()
            .filter(|t| t.project_id.as_deref() == Some(id))
            .cloned()
            .collect())
    }

    async fn get_ticket(&self, id: &str) -> CollabResult<TicketRecord> {
        let mut state = self.state.lock().unwrap();
        find_ticket(&mut state.tickets, id)
            .map(|t| t.clone())
            .ok_or_else(|| CollabError::TicketNotFound { id: id.to_string() })
    }

    async fn update_status(&self, id: &str, status: &TicketStatus) -> CollabResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_writable(&state)?;
        let ticket = find_ticket(&mut state.tickets, id)
            .ok_or_else(|| CollabError::TicketNotFound { id: id.to_string() })?;
        ticket.status = status.clone();
        state.status_updates.push((id.to_string(), status.clone()));
        Ok(())
    }

    async fn add_comment(&self, id: &str, body: &str) -> CollabResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_writable(&state)?;
        if find_ticket(&mut state.tickets, id).is_none() {
            return Err(CollabError::TicketNotFound { id: id.to_string() });
        }
        state.comments.push((id.to_string(), body.to_string()));
        Ok(())
    }

    async fn block_ticket(&self, id: &str, blocked_by: &str) -> CollabResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_writable(&state)?;
        let blocker_title = find_ticket(&mut state.tickets, blocked_by)
            .map(|t| t.title.clone())
            .ok_or_else(|| CollabError::TicketNotFound {
                id: blocked_by.to_string(),
            })?;
        let ticket = find_ticket(&mut state.tickets, id)
            .ok_or_else(|| CollabError::TicketNotFound { id: id.to_string() })?;
        if !ticket.blocked_by.contains(&blocker_title) {
            ticket.blocked_by.push(blocker_title);
        }
        Ok(())
    }

    async fn create_project(&self, project: NewProject) -> CollabResult<ProjectRecord> {
        let mut state = self.state.lock().unwrap();
        Self::check_writable(&state)?;
        state.next_id += 1;
        let record = ProjectRecord {
            id: format!("project-{}", state.next_id),
            name: project.name,
            url: String::new(),
            description: project.description,
        };
        state.projects.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn create_ticket(&self, ticket: NewTicket) -> CollabResult<TicketRecord> {
        let mut state = self.state.lock().unwrap();
        Self::check_writable(&state)?;
        state.next_id += 1;
        let record = TicketRecord {
            id: format!("ticket-{}", state.next_id),
            identifier: format!("{}-{}", ticket.team.to_uppercase(), state.next_id),
            title: ticket.title,
            url: String::new(),
            status: ticket.status.unwrap_or(TicketStatus::Backlog),
            description: ticket.description,
            blocked_by: Vec::new(),
            project_id: ticket.project_id,
        };
        state.tickets.push(record.clone());
        Ok(record)
    }
}

// ---------------------------------------------------------------------------
// MemoryVersionControl
// ---------------------------------------------------------------------------

/// Failure a [`MemoryVersionControl`] can be told to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    /// `create_worktree` reports the start point as missing.
    BaseNotFound,
    /// The operation fails as if git itself were unusable.
    Unavailable,
    /// `merge` of this source branch conflicts.
    Conflict,
    /// `push` of this branch is rejected by the remote.
    PushRejected,
}

#[derive(Debug, Default)]
struct VcsState {
    /// Branch name to the set of commit ids reachable from it.
    branches: BTreeMap<String, BTreeSet<String>>,
    /// Commit id to the files it touched.
    commits: HashMap<String, Vec<String>>,
    /// Worktree path to the branch checked out there.
    worktrees: BTreeMap<PathBuf, String>,
    /// Uncommitted files per worktree.
    pending: HashMap<PathBuf, BTreeSet<String>>,
    remote: HashSet<String>,
    failures: HashMap<String, InjectedFailure>,
    unavailable: bool,

    created: Vec<String>,
    removed: Vec<PathBuf>,
    merges: Vec<(String, String)>,
    pushes: Vec<String>,
    next_commit: u64,
}

impl VcsState {
    fn new_commit(&mut self, files: Vec<String>) -> String {
        self.next_commit += 1;
        let id = format!("c{:04}", self.next_commit);
        self.commits.insert(id.clone(), files);
        id
    }

    fn branch_of(&self, worktree: &Path) -> CollabResult<String> {
        self.worktrees
            .get(worktree)
            .cloned()
            .ok_or_else(|| CollabError::CommandFailed {
                program: "git".to_string(),
                args: "rev-parse --abbrev-ref HEAD".to_string(),
                stderr: format!("not a worktree: {}", worktree.display()),
            })
    }

    /// Files touched by commits on `branch` that are not on `base`.
    fn files_since(&self, branch: &str, base: &str) -> BTreeSet<String> {
        let empty = BTreeSet::new();
        let ours = self.branches.get(branch).unwrap_or(&empty);
        let theirs = self.branches.get(base).unwrap_or(&empty);
        ours.difference(theirs)
            .filter_map(|c| self.commits.get(c))
            .flatten()
            .cloned()
            .collect()
    }
}

/// In-memory version control.
///
/// Branches are sets of commit ids; a merge unions the sets and conflicts
/// when both sides touched the same file since they diverged.
#[derive(Debug)]
pub struct MemoryVersionControl {
    trunk: String,
    worktree_root: PathBuf,
    state: Mutex<VcsState>,
}

impl Default for MemoryVersionControl {
    fn default() -> Self {
        Self::new("main")
    }
}

impl MemoryVersionControl {
    /// A repository whose only branch is `trunk` with one root commit.
    pub fn new(trunk: &str) -> Self {
        let mut state = VcsState::default();
        let root = state.new_commit(vec!["README.md".to_string()]);
        state
            .branches
            .insert(trunk.to_string(), BTreeSet::from([root]));
        state.remote.insert(trunk.to_string());
        Self {
            trunk: trunk.to_string(),
            worktree_root: PathBuf::from("/virtual/.worktrees"),
            state: Mutex::new(state),
        }
    }

    pub fn worktree_path(&self, branch: &str) -> PathBuf {
        self.worktree_root.join(branch.replace('/', "-"))
    }

    /// Stage a modification of `file` in the worktree.
    pub fn write_file(&self, worktree: &Path, file: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .pending
            .entry(worktree.to_path_buf())
            .or_default()
            .insert(file.to_string());
    }

    /// Create a branch from `start` carrying one extra commit touching `files`.
    pub fn seed_branch(&self, branch: &str, start: &str, files: &[&str]) {
        let mut state = self.state.lock().unwrap();
        let mut commits = state.branches.get(start).cloned().unwrap_or_default();
        let id = state.new_commit(files.iter().map(|f| f.to_string()).collect());
        commits.insert(id);
        state.branches.insert(branch.to_string(), commits);
    }

    /// Make operations on `branch` fail with `failure`.
    pub fn inject_failure(&self, branch: &str, failure: InjectedFailure) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(branch.to_string(), failure);
    }

    /// Make every operation fail with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    /// Branches passed to `create_worktree`, in call order.
    pub fn created_branches(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn removed_worktrees(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().removed.clone()
    }

    /// `(target, source)` pairs of merges that produced a commit.
    pub fn merges(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().merges.clone()
    }

    pub fn pushes(&self) -> Vec<String> {
        self.state.lock().unwrap().pushes.clone()
    }

    /// Whether every commit of `source` is reachable from `target`.
    pub fn contains(&self, target: &str, source: &str) -> bool {
        let state = self.state.lock().unwrap();
        match (state.branches.get(target), state.branches.get(source)) {
            (Some(t), Some(s)) => s.is_subset(t),
            _ => false,
        }
    }

    /// Number of commits reachable from `branch`.
    pub fn commit_count(&self, branch: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .branches
            .get(branch)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    fn guard(state: &VcsState) -> CollabResult<()> {
        if state.unavailable {
            return Err(CollabError::Unavailable("git is not available".to_string()));
        }
        Ok(())
    }

    fn failure_for(state: &VcsState, branch: &str, kinds: &[InjectedFailure]) -> Option<InjectedFailure> {
        state
            .failures
            .get(branch)
            .copied()
            .filter(|f| kinds.contains(f))
    }
}

#[async_trait]
impl VersionControl for MemoryVersionControl {
    async fn trunk(&self) -> CollabResult<String> {
        Self::guard(&self.state.lock().unwrap())?;
        Ok(self.trunk.clone())
    }

    async fn branch_exists(&self, branch: &str) -> CollabResult<bool> {
        let state = self.state.lock().unwrap();
        Self::guard(&state)?;
        Ok(state.branches.contains_key(branch) || state.remote.contains(branch))
    }

    async fn create_worktree(
        &self,
        branch: &str,
        start_point: Option<&str>,
    ) -> CollabResult<PathBuf> {
        let mut state = self.state.lock().unwrap();
        Self::guard(&state)?;
        state.created.push(branch.to_string());

        match Self::failure_for(
            &state,
            branch,
            &[InjectedFailure::BaseNotFound, InjectedFailure::Unavailable],
        ) {
            Some(InjectedFailure::BaseNotFound) => {
                return Err(CollabError::BaseNotFound {
                    start_point: start_point.unwrap_or(&self.trunk).to_string(),
                })
            }
            Some(_) => return Err(CollabError::Unavailable(format!("cannot create {branch}"))),
            None => {}
        }

        if let Some((path, _)) = state.worktrees.iter().find(|(_, b)| b.as_str() == branch) {
            return Err(CollabError::BranchExists {
                branch: branch.to_string(),
                path: path.display().to_string(),
            });
        }

        if !state.branches.contains_key(branch) {
            let start = start_point.unwrap_or(&self.trunk);
            let commits = state
                .branches
                .get(start)
                .cloned()
                .ok_or_else(|| CollabError::BaseNotFound {
                    start_point: start.to_string(),
                })?;
            state.branches.insert(branch.to_string(), commits);
        }

        let path = self.worktree_path(branch);
        state.worktrees.insert(path.clone(), branch.to_string());
        Ok(path)
    }

    async fn checkout_worktree(&self, branch: &str) -> CollabResult<PathBuf> {
        let mut state = self.state.lock().unwrap();
        Self::guard(&state)?;
        if let Some((path, _)) = state.worktrees.iter().find(|(_, b)| b.as_str() == branch) {
            return Ok(path.clone());
        }
        if !state.branches.contains_key(branch) {
            return Err(CollabError::BranchNotFound {
                branch: branch.to_string(),
            });
        }
        let path = self.worktree_path(branch);
        state.worktrees.insert(path.clone(), branch.to_string());
        Ok(path)
    }

    async fn remove_worktree(&self, path: &Path) -> CollabResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::guard(&state)?;
        if state.worktrees.remove(path).is_some() {
            state.pending.remove(path);
            state.removed.push(path.to_path_buf());
        }
        Ok(())
    }

    async fn list_worktrees(&self) -> CollabResult<Vec<WorktreeInfo>> {
        let state = self.state.lock().unwrap();
        Self::guard(&state)?;
        Ok(state
            .worktrees
            .iter()
            .map(|(path, branch)| WorktreeInfo {
                path: path.clone(),
                branch: Some(branch.clone()),
            })
            .collect())
    }

    async fn has_changes(&self, worktree: &Path) -> CollabResult<bool> {
        let state = self.state.lock().unwrap();
        Self::guard(&state)?;
        state.branch_of(worktree)?;
        Ok(state.pending.get(worktree).is_some_and(|p| !p.is_empty()))
    }

    async fn commit(&self, worktree: &Path, _message: &str) -> CollabResult<bool> {
        let mut state = self.state.lock().unwrap();
        Self::guard(&state)?;
        let branch = state.branch_of(worktree)?;
        let files: Vec<String> = match state.pending.remove(worktree) {
            Some(files) if !files.is_empty() => files.into_iter().collect(),
            _ => return Ok(false),
        };
        let id = state.new_commit(files);
        state.branches.entry(branch).or_default().insert(id);
        Ok(true)
    }

    async fn push(&self, worktree: &Path, branch: &str) -> CollabResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::guard(&state)?;
        state.branch_of(worktree)?;
        if branch.eq_ignore_ascii_case(&self.trunk)
            || PROTECTED_BRANCHES.contains(&branch.to_lowercase().as_str())
        {
            return Err(CollabError::ProtectedBranch {
                branch: branch.to_string(),
            });
        }
        match Self::failure_for(
            &state,
            branch,
            &[InjectedFailure::PushRejected, InjectedFailure::Unavailable],
        ) {
            Some(InjectedFailure::PushRejected) => {
                return Err(CollabError::CommandFailed {
                    program: "git".to_string(),
                    args: format!("push -u origin {branch}"),
                    stderr: "! [rejected] (fetch first)".to_string(),
                })
            }
            Some(_) => return Err(CollabError::Unavailable("remote unreachable".to_string())),
            None => {}
        }
        state.remote.insert(branch.to_string());
        state.pushes.push(branch.to_string());
        Ok(())
    }

    async fn merge(
        &self,
        worktree: &Path,
        source_branch: &str,
        _message: &str,
    ) -> CollabResult<MergeOutcome> {
        let mut state = self.state.lock().unwrap();
        Self::guard(&state)?;
        let target = state.branch_of(worktree)?;
        let source = state
            .branches
            .get(source_branch)
            .cloned()
            .ok_or_else(|| CollabError::BranchNotFound {
                branch: source_branch.to_string(),
            })?;
        let current = state.branches.get(&target).cloned().unwrap_or_default();
        if source.is_subset(&current) {
            return Ok(MergeOutcome::AlreadyUpToDate);
        }

        let mut conflicted: Vec<String> = if Self::failure_for(
            &state,
            source_branch,
            &[InjectedFailure::Conflict],
        )
        .is_some()
        {
            vec!["<injected>".to_string()]
        } else {
            let theirs = state.files_since(source_branch, &target);
            let ours = state.files_since(&target, source_branch);
            theirs.intersection(&ours).cloned().collect()
        };
        if !conflicted.is_empty() {
            conflicted.sort();
            return Err(CollabError::MergeConflict {
                source_branch: source_branch.to_string(),
                target,
                files: conflicted,
            });
        }

        let merge_commit = state.new_commit(Vec::new());
        let entry = state.branches.entry(target.clone()).or_default();
        entry.extend(source);
        entry.insert(merge_commit.clone());
        state.merges.push((target, source_branch.to_string()));
        Ok(MergeOutcome::Merged {
            commit: merge_commit,
        })
    }

    async fn changed_files(&self, worktree: &Path, base: &str) -> CollabResult<Vec<String>> {
        let state = self.state.lock().unwrap();
        Self::guard(&state)?;
        let branch = state.branch_of(worktree)?;
        Ok(state.files_since(&branch, base).into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryForge
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ForgeState {
    prs: Vec<PullRequestRef>,
    titles: HashMap<u64, String>,
    checks: HashMap<u64, Vec<CiCheck>>,
    logs: HashMap<(u64, String), String>,
    base_updates: Vec<(u64, String)>,
    unavailable: bool,
}

/// In-memory pull request forge.
#[derive(Debug, Default)]
pub struct MemoryForge {
    state: Mutex<ForgeState>,
}

impl MemoryForge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prs(&self) -> Vec<PullRequestRef> {
        self.state.lock().unwrap().prs.clone()
    }

    /// `(number, new base)` retargets in call order.
    pub fn base_updates(&self) -> Vec<(u64, String)> {
        self.state.lock().unwrap().base_updates.clone()
    }

    pub fn set_checks(&self, number: u64, checks: Vec<CiCheck>) {
        self.state.lock().unwrap().checks.insert(number, checks);
    }

    pub fn set_log(&self, number: u64, check: &str, log: &str) {
        self.state
            .lock()
            .unwrap()
            .logs
            .insert((number, check.to_string()), log.to_string());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    fn guard(state: &ForgeState) -> CollabResult<()> {
        if state.unavailable {
            return Err(CollabError::Unavailable("forge is not reachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Forge for MemoryForge {
    async fn find_pr_for_branch(&self, head: &str) -> CollabResult<Option<PullRequestRef>> {
        let state = self.state.lock().unwrap();
        Self::guard(&state)?;
        Ok(state.prs.iter().find(|p| p.head == head).cloned())
    }

    async fn create_pr(&self, pr: NewPullRequest) -> CollabResult<PullRequestRef> {
        let mut state = self.state.lock().unwrap();
        Self::guard(&state)?;
        if state.prs.iter().any(|p| p.head == pr.head) {
            return Err(CollabError::CommandFailed {
                program: "gh".to_string(),
                args: "pr create".to_string(),
                stderr: format!("a pull request for branch {:?} already exists", pr.head),
            });
        }
        let number = state.prs.len() as u64 + 1;
        let created = PullRequestRef {
            number,
            url: format!("https://forge.test/pull/{number}"),
            head: pr.head,
            base: pr.base,
        };
        state.titles.insert(number, pr.title);
        state.prs.push(created.clone());
        Ok(created)
    }

    async fn update_pr_base(&self, number: u64, base: &str) -> CollabResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::guard(&state)?;
        let pr = state
            .prs
            .iter_mut()
            .find(|p| p.number == number)
            .ok_or(CollabError::PullRequestNotFound { number })?;
        pr.base = base.to_string();
        state.base_updates.push((number, base.to_string()));
        Ok(())
    }

    async fn all_prs_status(&self) -> CollabResult<Vec<PrStatus>> {
        let state = self.state.lock().unwrap();
        Self::guard(&state)?;
        Ok(state
            .prs
            .iter()
            .map(|pr| {
                let checks = state.checks.get(&pr.number).cloned().unwrap_or_default();
                PrStatus {
                    pr: pr.clone(),
                    title: state.titles.get(&pr.number).cloned().unwrap_or_default(),
                    repo: "forge/test".to_string(),
                    ci_status: CiStatus::from_checks(&checks),
                    checks,
                }
            })
            .collect())
    }

    async fn pr_checks(&self, number: u64) -> CollabResult<Vec<CiCheck>> {
        let state = self.state.lock().unwrap();
        Self::guard(&state)?;
        if !state.prs.iter().any(|p| p.number == number) {
            return Err(CollabError::PullRequestNotFound { number });
        }
        Ok(state.checks.get(&number).cloned().unwrap_or_default())
    }

    async fn ci_logs(&self, number: u64, check: Option<&str>) -> CollabResult<String> {
        let mut failed = self.failed_checks(number).await?;
        if let Some(name) = check {
            failed.retain(|c| c.name == name);
        }
        if failed.is_empty() {
            return Ok(match check {
                Some(name) => format!("Check '{name}' not found or not failing"),
                None => "No failed checks found".to_string(),
            });
        }
        let state = self.state.lock().unwrap();
        let logs: Vec<String> = failed
            .iter()
            .filter_map(|c| state.logs.get(&(number, c.name.clone())))
            .cloned()
            .collect();
        if logs.is_empty() {
            return Ok(
                "Could not retrieve failure logs. Check the GitHub Actions UI directly.".to_string(),
            );
        }
        Ok(logs.join("\n"))
    }

    async fn pr_branch(&self, number: u64) -> CollabResult<String> {
        let state = self.state.lock().unwrap();
        Self::guard(&state)?;
        state
            .prs
            .iter()
            .find(|p| p.number == number)
            .map(|p| p.head.clone())
            .ok_or(CollabError::PullRequestNotFound { number })
    }
}
