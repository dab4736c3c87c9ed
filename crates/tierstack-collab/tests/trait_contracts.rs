//! Trait contract tests for TicketTracker, VersionControl, and Forge.
//!
//! The version control contract runs against both the in-memory fake and a
//! real git repository so the fake cannot drift from `GitCli` semantics.

use std::path::{Path, PathBuf};
use std::process::Command as StdCommand;

use tierstack_collab::fakes::{MemoryForge, MemoryTicketTracker, MemoryVersionControl};
use tierstack_collab::traits::*;
use tierstack_collab::{CollabError, GitCli};

// ===========================================================================
// TicketTracker contract tests
// ===========================================================================

fn project() -> ProjectRecord {
    ProjectRecord {
        id: "proj-1".to_string(),
        name: "Checkout revamp".to_string(),
        url: "https://tracker.test/project/proj-1".to_string(),
        description: String::new(),
    }
}

fn ticket(identifier: &str, title: &str, blocked_by: &[&str]) -> TicketRecord {
    TicketRecord {
        id: format!("id-{identifier}"),
        identifier: identifier.to_string(),
        title: title.to_string(),
        url: String::new(),
        status: TicketStatus::Todo,
        description: String::new(),
        blocked_by: blocked_by.iter().map(|s| s.to_string()).collect(),
        project_id: None,
    }
}

fn seeded_tracker() -> MemoryTicketTracker {
    MemoryTicketTracker::new().with_project(
        project(),
        vec![
            ticket("ENG-1", "Schema", &[]),
            ticket("ENG-2", "API", &["Schema"]),
        ],
    )
}

#[tokio::test]
async fn tracker_lists_project_tickets_in_order() {
    let tracker = seeded_tracker();
    let tickets = tracker.get_project_tickets("proj-1").await.unwrap();
    let ids: Vec<&str> = tickets.iter().map(|t| t.identifier.as_str()).collect();

    assert_eq!(ids, vec!["ENG-1", "ENG-2"]);
    assert_eq!(tickets[1].blocked_by, vec!["Schema".to_string()]);
}

#[tokio::test]
async fn tracker_unknown_project_is_not_found() {
    let tracker = seeded_tracker();
    let err = tracker.get_project_tickets("nope").await.unwrap_err();

    assert!(matches!(err, CollabError::ProjectNotFound { .. }));
}

#[tokio::test]
async fn tracker_status_update_is_visible_on_read() {
    let tracker = seeded_tracker();
    tracker
        .update_status("ENG-1", &TicketStatus::InReview)
        .await
        .unwrap();

    let t = tracker.get_ticket("ENG-1").await.unwrap();
    assert_eq!(t.status, TicketStatus::InReview);
    assert_eq!(
        tracker.status_updates(),
        vec![("ENG-1".to_string(), TicketStatus::InReview)]
    );
}

#[tokio::test]
async fn tracker_write_failure_is_infrastructure() {
    let tracker = seeded_tracker();
    tracker.fail_writes(true);
    let err = tracker.add_comment("ENG-1", "hello").await.unwrap_err();

    assert!(err.is_infrastructure());
    assert!(tracker.comments().is_empty());
}

#[tokio::test]
async fn tracker_created_ticket_belongs_to_project() {
    let tracker = seeded_tracker();
    let created = tracker
        .create_ticket(NewTicket {
            team: "eng".to_string(),
            title: "Docs".to_string(),
            description: String::new(),
            project_id: Some("proj-1".to_string()),
            status: Some(TicketStatus::Todo),
        })
        .await
        .unwrap();

    let tickets = tracker.get_project_tickets("proj-1").await.unwrap();
    assert!(tickets.iter().any(|t| t.id == created.id));
}

// ===========================================================================
// VersionControl contract tests
// ===========================================================================

fn run_git(dir: &Path, args: &[&str]) {
    let output = StdCommand::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

fn git_repo() -> (tempfile::TempDir, GitCli) {
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("repo");
    std::fs::create_dir_all(&repo).unwrap();
    run_git(&repo, &["init", "-q"]);
    run_git(&repo, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    run_git(&repo, &["config", "user.name", "test-user"]);
    run_git(&repo, &["config", "user.email", "test@example.com"]);
    std::fs::write(repo.join("README.md"), "base\n").unwrap();
    run_git(&repo, &["add", "-A"]);
    run_git(&repo, &["commit", "-q", "-m", "initial"]);
    let git = GitCli::new(&repo, dir.path().join("wt"));
    (dir, git)
}

/// Implementation-specific "edit a file in this worktree".
trait Stage {
    fn stage(&self, worktree: &Path, file: &str);
}

impl Stage for GitCli {
    fn stage(&self, worktree: &Path, file: &str) {
        let path = worktree.join(file);
        let previous = std::fs::read_to_string(&path).unwrap_or_default();
        // Content differs per worktree so parallel edits of one file collide.
        std::fs::write(path, format!("{previous}{} edited {file}\n", worktree.display())).unwrap();
    }
}

impl Stage for MemoryVersionControl {
    fn stage(&self, worktree: &Path, file: &str) {
        self.write_file(worktree, file);
    }
}

async fn branch_with_commit<V: VersionControl + Stage>(
    vcs: &V,
    branch: &str,
    base: Option<&str>,
    file: &str,
) -> PathBuf {
    let wt = vcs.create_worktree(branch, base).await.unwrap();
    vcs.stage(&wt, file);
    assert!(vcs.commit(&wt, &format!("edit {file}")).await.unwrap());
    wt
}

async fn contract_second_checkout_is_rejected<V: VersionControl>(vcs: &V) {
    vcs.create_worktree("stack/eng-1", None).await.unwrap();
    let err = vcs.create_worktree("stack/eng-1", None).await.unwrap_err();
    assert!(matches!(err, CollabError::BranchExists { .. }));
}

async fn contract_checkout_reuses_existing<V: VersionControl>(vcs: &V) {
    let created = vcs.create_worktree("stack/eng-2", None).await.unwrap();
    let attached = vcs.checkout_worktree("stack/eng-2").await.unwrap();
    assert_eq!(created, attached);
}

async fn contract_unknown_base_fails<V: VersionControl>(vcs: &V) {
    let err = vcs
        .create_worktree("stack/eng-3", Some("stack/missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, CollabError::BaseNotFound { .. }));
}

async fn contract_remove_is_idempotent<V: VersionControl>(vcs: &V) {
    let wt = vcs.create_worktree("stack/eng-4", None).await.unwrap();
    vcs.remove_worktree(&wt).await.unwrap();
    vcs.remove_worktree(&wt).await.unwrap();
    let listed = vcs.list_worktrees().await.unwrap();
    assert!(listed.iter().all(|w| w.path != wt));
}

async fn contract_commit_without_changes_is_noop<V: VersionControl>(vcs: &V) {
    let wt = vcs.create_worktree("stack/eng-5", None).await.unwrap();
    assert!(!vcs.has_changes(&wt).await.unwrap());
    assert!(!vcs.commit(&wt, "nothing").await.unwrap());
}

async fn contract_merge_twice_is_noop<V: VersionControl + Stage>(vcs: &V) {
    branch_with_commit(vcs, "stack/eng-6", None, "six.txt").await;
    let tier = vcs.create_worktree("stack/tier-9", None).await.unwrap();

    let first = vcs.merge(&tier, "stack/eng-6", "merge").await.unwrap();
    assert!(matches!(first, MergeOutcome::Merged { .. }));
    let second = vcs.merge(&tier, "stack/eng-6", "merge").await.unwrap();
    assert_eq!(second, MergeOutcome::AlreadyUpToDate);

    let changed = vcs.changed_files(&tier, "main").await.unwrap();
    assert_eq!(changed, vec!["six.txt".to_string()]);
}

async fn contract_overlapping_edit_conflicts<V: VersionControl + Stage>(vcs: &V) {
    branch_with_commit(vcs, "stack/eng-7", None, "shared.txt").await;
    branch_with_commit(vcs, "stack/eng-8", None, "shared.txt").await;
    let tier = vcs.create_worktree("stack/tier-8", None).await.unwrap();

    vcs.merge(&tier, "stack/eng-7", "merge 7").await.unwrap();
    let err = vcs.merge(&tier, "stack/eng-8", "merge 8").await.unwrap_err();
    match err {
        CollabError::MergeConflict { files, target, .. } => {
            assert_eq!(files, vec!["shared.txt".to_string()]);
            assert_eq!(target, "stack/tier-8");
        }
        other => panic!("expected merge conflict, got {other:?}"),
    }
    // The aborted merge leaves the worktree clean.
    assert!(!vcs.has_changes(&tier).await.unwrap());
}

async fn contract_protected_push_is_refused<V: VersionControl>(vcs: &V) {
    let wt = vcs.create_worktree("stack/eng-10", None).await.unwrap();
    let err = vcs.push(&wt, "main").await.unwrap_err();
    assert!(matches!(err, CollabError::ProtectedBranch { .. }));
}

macro_rules! vcs_contract {
    ($name:ident, $contract:ident) => {
        mod $name {
            use super::*;

            #[tokio::test]
            async fn memory() {
                let vcs = MemoryVersionControl::new("main");
                $contract(&vcs).await;
            }

            #[tokio::test]
            async fn git() {
                let (_dir, vcs) = git_repo();
                $contract(&vcs).await;
            }
        }
    };
}

vcs_contract!(vcs_second_checkout_is_rejected, contract_second_checkout_is_rejected);
vcs_contract!(vcs_checkout_reuses_existing, contract_checkout_reuses_existing);
vcs_contract!(vcs_unknown_base_fails, contract_unknown_base_fails);
vcs_contract!(vcs_remove_is_idempotent, contract_remove_is_idempotent);
vcs_contract!(vcs_commit_without_changes_is_noop, contract_commit_without_changes_is_noop);
vcs_contract!(vcs_merge_twice_is_noop, contract_merge_twice_is_noop);
vcs_contract!(vcs_overlapping_edit_conflicts, contract_overlapping_edit_conflicts);
vcs_contract!(vcs_protected_push_is_refused, contract_protected_push_is_refused);

// ===========================================================================
// Forge contract tests
// ===========================================================================

fn new_pr(head: &str, base: &str) -> NewPullRequest {
    NewPullRequest {
        title: format!("Integrate {head}"),
        body: String::new(),
        head: head.to_string(),
        base: base.to_string(),
    }
}

#[tokio::test]
async fn forge_finds_created_pr_by_head() {
    let forge = MemoryForge::new();
    let created = forge.create_pr(new_pr("stack/tier-0", "main")).await.unwrap();
    let found = forge.find_pr_for_branch("stack/tier-0").await.unwrap();

    assert_eq!(found, Some(created));
    assert_eq!(forge.find_pr_for_branch("stack/tier-1").await.unwrap(), None);
}

#[tokio::test]
async fn forge_duplicate_pr_for_head_is_rejected() {
    let forge = MemoryForge::new();
    forge.create_pr(new_pr("stack/tier-0", "main")).await.unwrap();
    let err = forge.create_pr(new_pr("stack/tier-0", "main")).await.unwrap_err();

    assert!(matches!(err, CollabError::CommandFailed { .. }));
}

#[tokio::test]
async fn forge_failed_checks_and_logs() {
    let forge = MemoryForge::new();
    let pr = forge.create_pr(new_pr("stack/tier-0", "main")).await.unwrap();
    forge.set_checks(
        pr.number,
        vec![
            CiCheck {
                name: "build".to_string(),
                state: CheckState::Success,
                url: None,
            },
            CiCheck {
                name: "test".to_string(),
                state: CheckState::Failure,
                url: None,
            },
        ],
    );
    forge.set_log(pr.number, "test", "assertion failed");

    let failed = forge.failed_checks(pr.number).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].name, "test");
    assert_eq!(forge.ci_logs(pr.number, None).await.unwrap(), "assertion failed");
    assert_eq!(
        forge.ci_logs(pr.number, Some("build")).await.unwrap(),
        "Check 'build' not found or not failing"
    );

    let statuses = forge.all_prs_status().await.unwrap();
    assert_eq!(statuses[0].ci_status, CiStatus::Failing);
}

#[tokio::test]
async fn forge_pr_branch_unknown_number() {
    let forge = MemoryForge::new();
    let err = forge.pr_branch(42).await.unwrap_err();

    assert!(matches!(err, CollabError::PullRequestNotFound { number: 42 }));
}
