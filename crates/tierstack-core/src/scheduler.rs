//! Tier-by-tier execution.
//!
//! Tiers run strictly in sequence. Inside a tier every ticket gets its own
//! task and worktree; the tier barrier waits for all of them to reach a
//! terminal state before the integration branch is built. A failing ticket
//! never aborts its siblings; only infrastructure errors stop the run, and
//! tiers that were already published stay published.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, instrument, warn, Instrument};

use tierstack_collab::VersionControl;

use crate::config::OrchestratorConfig;
use crate::error::{FailureKind, OrchestratorError, OrchestratorResult};
use crate::executor::{TicketExecutor, WorkContext};
use crate::graph::{TicketId, TierPlan};
use crate::integration::{BranchNames, IntegrationEngine, MergeCandidate};
use crate::obs;
use crate::reporter::StatusReporter;
use crate::summary::{RunOutcome, RunSummary, TicketFailure, TierReport};
use crate::ticket::{Ticket, TicketState};
use crate::worktree::{Worktree, WorktreeManager};

/// Position of a run in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "phase", content = "tier")]
pub enum RunPhase {
    Pending,
    TierRunning(usize),
    TierIntegrating(usize),
    TierDone(usize),
    Complete,
    Failed,
}

/// Requests cancellation of a run.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Observed by the scheduler; cancellation stops new ticket tasks from
/// starting while in-flight ones finish.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// A token that is never cancelled.
    pub fn never() -> Self {
        cancellation().1
    }
}

/// Create a linked cancel handle and token.
pub fn cancellation() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelToken { rx })
}

/// Collaborators a ticket task needs; cheap to clone into each task.
#[derive(Clone)]
struct TicketRunner {
    vcs: Arc<dyn VersionControl>,
    worktrees: Arc<WorktreeManager>,
    executor: Arc<dyn TicketExecutor>,
    reporter: Arc<dyn StatusReporter>,
    names: BranchNames,
}

/// A ticket whose work is committed and pushed.
struct TicketSuccess {
    ticket: Ticket,
    worktree: Worktree,
}

enum TicketResult {
    Done(TicketSuccess),
    Failed(Ticket, OrchestratorError),
    /// Never started because the run was cancelled.
    NotStarted(Ticket),
}

impl TicketRunner {
    async fn run(&self, mut ticket: Ticket, tier: usize, base: String) -> TicketResult {
        match ticket.transition(TicketState::InProgress) {
            Ok(()) => self.reporter.report_ticket_started(&ticket).await,
            Err(e) => warn!(ticket = %ticket.identifier, error = %e, "not updating tracker status"),
        }
        match self.work(&ticket, tier, &base).await {
            Ok(worktree) => TicketResult::Done(TicketSuccess { ticket, worktree }),
            Err(e) => TicketResult::Failed(ticket, e),
        }
    }

    #[instrument(skip(self, ticket), fields(ticket = %ticket.identifier))]
    async fn work(&self, ticket: &Ticket, tier: usize, base: &str) -> OrchestratorResult<Worktree> {
        let started = Instant::now();
        let branch = self.names.ticket_branch(&ticket.identifier);
        let worktree = self.worktrees.ensure(&branch, base).await?;

        let ctx = WorkContext {
            ticket: ticket.clone(),
            tier,
            worktree: worktree.path.clone(),
            branch: branch.clone(),
            base: base.to_string(),
        };
        self.executor.execute(&ctx).await?;

        let message = format!("{}: {}", ticket.identifier, ticket.title);
        if !self.vcs.commit(&worktree.path, &message).await? {
            debug!("work produced no new changes");
        }
        self.vcs.push(&worktree.path, &branch).await?;

        obs::emit_ticket_finished(
            &ticket.identifier,
            tier,
            &branch,
            started.elapsed().as_millis() as u64,
        );
        Ok(worktree)
    }
}

/// Drives a [`TierPlan`] through the run state machine.
pub struct TierScheduler {
    runner: TicketRunner,
    integration: IntegrationEngine,
    config: OrchestratorConfig,
    phase: watch::Sender<RunPhase>,
}

impl TierScheduler {
    pub fn new(
        vcs: Arc<dyn VersionControl>,
        forge: Arc<dyn tierstack_collab::Forge>,
        executor: Arc<dyn TicketExecutor>,
        reporter: Arc<dyn StatusReporter>,
        names: BranchNames,
        config: OrchestratorConfig,
    ) -> Self {
        let worktrees = Arc::new(WorktreeManager::new(Arc::clone(&vcs)));
        let integration =
            IntegrationEngine::new(Arc::clone(&vcs), forge, Arc::clone(&worktrees), names.clone());
        let (phase, _) = watch::channel(RunPhase::Pending);
        Self {
            runner: TicketRunner {
                vcs,
                worktrees,
                executor,
                reporter,
                names,
            },
            integration,
            config,
            phase,
        }
    }

    /// Follow phase changes of the current run.
    pub fn subscribe_phase(&self) -> watch::Receiver<RunPhase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }

    fn set_phase(&self, next: RunPhase) {
        debug!(from = ?*self.phase.borrow(), to = ?next, "run phase");
        self.phase.send_replace(next);
    }

    /// Execute every tier of `plan`.
    ///
    /// Always returns a summary; failure is expressed by its outcome.
    pub async fn run(&self, plan: &TierPlan, run_id: &str, cancel: CancelToken) -> RunSummary {
        self.run_tiers(plan, run_id, cancel)
            .instrument(obs::run_span(run_id))
            .await
    }

    async fn run_tiers(&self, plan: &TierPlan, run_id: &str, cancel: CancelToken) -> RunSummary {
        let names = &self.runner.names;
        let mut summary = RunSummary::new(run_id, plan.digest(), names.trunk());
        obs::emit_run_started(run_id, &summary.plan_digest, plan.len(), plan.tier_count());
        self.set_phase(RunPhase::Pending);

        // Tickets whose work is not in their tier's integration branch.
        let mut dropped: HashSet<TicketId> = HashSet::new();
        let mut outcome: Option<RunOutcome> = None;

        for tier in 0..plan.tier_count() {
            if cancel.is_cancelled() {
                outcome = Some(RunOutcome::Cancelled);
                break;
            }
            match self.run_tier(plan, tier, &mut dropped, &cancel).await {
                Ok((report, cancelled)) => {
                    summary.tiers.push(report);
                    if cancelled {
                        outcome = Some(RunOutcome::Cancelled);
                        break;
                    }
                }
                Err((report, err)) => {
                    warn!(tier, error = %err, "run failed");
                    summary.tiers.push(report);
                    outcome = Some(RunOutcome::Failed {
                        reason: err.to_string(),
                    });
                    break;
                }
            }
        }

        let outcome = outcome.unwrap_or_else(|| {
            let partial = summary.partial_tiers();
            if partial.is_empty() {
                RunOutcome::Complete
            } else {
                RunOutcome::PartialTier { tiers: partial }
            }
        });
        self.set_phase(match outcome {
            RunOutcome::Failed { .. } => RunPhase::Failed,
            _ => RunPhase::Complete,
        });
        summary.finish(outcome);

        self.runner.reporter.report_run_complete(&summary.pr_urls()).await;
        obs::emit_run_finished(run_id, summary.outcome.label(), summary.duration_ms());
        summary
    }

    /// One tier: fan out, barrier, integrate, publish.
    ///
    /// `Ok((report, true))` means the tier stopped because of cancellation.
    async fn run_tier(
        &self,
        plan: &TierPlan,
        tier: usize,
        dropped: &mut HashSet<TicketId>,
        cancel: &CancelToken,
    ) -> Result<(TierReport, bool), (TierReport, OrchestratorError)> {
        let names = &self.runner.names;
        let base = names.tier_base(tier);
        let mut report = TierReport::new(tier, &base, names.integration_branch(tier));
        self.set_phase(RunPhase::TierRunning(tier));

        let members = plan.tier(tier);
        let tickets: Vec<Ticket> = members.iter().map(|id| plan.ticket(*id).ticket.clone()).collect();
        obs::emit_tier_started(tier, &base, tickets.len());
        self.runner.reporter.report_tier_start(tier, &tickets).await;

        // Dependents of dropped tickets cannot be built on this tier's base.
        let mut runnable: Vec<(TicketId, Ticket)> = Vec::new();
        for id in members {
            let planned = plan.ticket(*id);
            let missing: Vec<&str> = planned
                .dependencies
                .iter()
                .filter(|d| dropped.contains(d))
                .map(|d| plan.ticket(*d).ticket.identifier.as_str())
                .collect();
            if missing.is_empty() {
                runnable.push((*id, planned.ticket.clone()));
                continue;
            }
            let reason = format!("dependencies not integrated: {}", missing.join(", "));
            self.record_failure(
                &mut report,
                &planned.ticket,
                tier,
                FailureKind::DependencyFailed,
                reason,
                Vec::new(),
            )
            .await;
            dropped.insert(*id);
        }

        let results = self.fan_out(tier, &base, runnable, cancel).await;

        let mut successes: Vec<(TicketId, TicketSuccess)> = Vec::new();
        let mut fatal: Option<OrchestratorError> = None;
        for (id, result) in results {
            match result {
                TicketResult::Done(s) => successes.push((id, s)),
                TicketResult::Failed(ticket, err) => {
                    dropped.insert(id);
                    let kind = err.kind();
                    let reason = err.to_string();
                    if err.is_run_fatal() && fatal.is_none() {
                        fatal = Some(err);
                    }
                    self.record_failure(&mut report, &ticket, tier, kind, reason, Vec::new()).await;
                }
                TicketResult::NotStarted(ticket) => {
                    dropped.insert(id);
                    report.failed.push(TicketFailure {
                        identifier: ticket.identifier,
                        kind: FailureKind::Cancelled,
                        reason: "run cancelled before the ticket started".to_string(),
                        files: Vec::new(),
                    });
                }
            }
        }

        if let Some(err) = fatal {
            self.drop_unintegrated(
                &mut report,
                dropped,
                &successes,
                FailureKind::InfrastructureUnavailable,
                "run failed before integration",
            );
            return Err((report, err));
        }
        if cancel.is_cancelled() {
            self.drop_unintegrated(
                &mut report,
                dropped,
                &successes,
                FailureKind::Cancelled,
                "run cancelled before integration",
            );
            return Ok((report, true));
        }

        self.set_phase(RunPhase::TierIntegrating(tier));
        let integration = match self.integration.prepare_branch(tier).await {
            Ok(wt) => wt,
            Err(e) => {
                self.drop_unintegrated(
                    &mut report,
                    dropped,
                    &successes,
                    e.kind(),
                    "integration branch unavailable",
                );
                return Err((report, e));
            }
        };

        let candidates: Vec<MergeCandidate> = successes
            .iter()
            .map(|(_, s)| MergeCandidate {
                identifier: s.ticket.identifier.clone(),
                branch: s.worktree.branch.clone(),
            })
            .collect();
        let merge_report = match self.integration.merge_tickets(&integration, &candidates).await {
            Ok(r) => r,
            Err(e) => {
                self.drop_unintegrated(
                    &mut report,
                    dropped,
                    &successes,
                    e.kind(),
                    "integration merge aborted",
                );
                return Err((report, e));
            }
        };

        for f in &merge_report.failures {
            if let Some((id, s)) = successes.iter().find(|(_, s)| s.ticket.identifier == f.identifier) {
                dropped.insert(*id);
                self.record_failure(&mut report, &s.ticket, tier, f.kind, f.reason.clone(), f.files.clone())
                    .await;
            }
        }
        report.succeeded = merge_report.integrated().cloned().collect();

        if report.succeeded.is_empty() {
            // Keep the stack contiguous for later tiers even with nothing to review.
            warn!(tier, "no tickets integrated; pushing branch without a pull request");
            if let Err(e) = self
                .runner
                .vcs
                .push(&integration.path, &integration.branch)
                .await
            {
                return Err((report, e.into()));
            }
        } else {
            let title = self.config.pr_title(tier, &report.succeeded);
            let body = self.pr_body(plan, tier, &report);
            match self.integration.publish(tier, &integration, &title, &body).await {
                Ok(pr) => {
                    report.pr_number = Some(pr.number);
                    report.pr_url = Some(pr.url);
                }
                Err(e) => return Err((report, e)),
            }
        }
        self.set_phase(RunPhase::TierDone(tier));

        let pr_url = report.pr_url.clone().unwrap_or_default();
        for (_, s) in &successes {
            if !report.succeeded.contains(&s.ticket.identifier) {
                continue;
            }
            let mut ticket = s.ticket.clone();
            match ticket.transition(TicketState::InReview) {
                Ok(()) => self.runner.reporter.report_ticket_done(&ticket, &pr_url).await,
                Err(e) => warn!(ticket = %ticket.identifier, error = %e, "not updating tracker status"),
            }
        }

        if self.config.cleanup_worktrees {
            for (_, s) in &successes {
                if report.succeeded.contains(&s.ticket.identifier) {
                    self.remove_quietly(&s.worktree).await;
                }
            }
            self.remove_quietly(&integration).await;
        }

        obs::emit_tier_integrated(
            tier,
            &integration.branch,
            merge_report.merged.len(),
            report.conflicts().count(),
            report.pr_url.as_deref(),
        );
        Ok((report, false))
    }

    /// Spawn one task per ticket, bounded by `max_parallel`, and wait for all.
    async fn fan_out(
        &self,
        tier: usize,
        base: &str,
        runnable: Vec<(TicketId, Ticket)>,
        cancel: &CancelToken,
    ) -> Vec<(TicketId, TicketResult)> {
        let sem = Arc::new(Semaphore::new(self.config.max_parallel.max(1)));
        let mut handles = Vec::with_capacity(runnable.len());
        let mut ids = Vec::with_capacity(runnable.len());
        let mut fallback = Vec::with_capacity(runnable.len());

        for (id, ticket) in runnable {
            let runner = self.runner.clone();
            let sem = Arc::clone(&sem);
            let cancel = cancel.clone();
            let base = base.to_string();
            let task_ticket = ticket.clone();
            ids.push(id);
            fallback.push(ticket);
            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                if cancel.is_cancelled() {
                    return TicketResult::NotStarted(task_ticket);
                }
                runner.run(task_ticket, tier, base).await
            }
            .in_current_span()));
        }

        let joined = futures::future::join_all(handles).await;
        ids.into_iter()
            .zip(fallback)
            .zip(joined)
            .map(|((id, ticket), res)| {
                let result = res.unwrap_or_else(|e| {
                    TicketResult::Failed(
                        ticket.clone(),
                        OrchestratorError::TicketWork {
                            ticket: ticket.identifier.clone(),
                            reason: format!("task aborted: {e}"),
                        },
                    )
                });
                (id, result)
            })
            .collect()
    }

    async fn record_failure(
        &self,
        report: &mut TierReport,
        ticket: &Ticket,
        tier: usize,
        kind: FailureKind,
        reason: String,
        files: Vec<String>,
    ) {
        obs::emit_ticket_failed(&ticket.identifier, tier, &kind.to_string(), &reason);
        self.runner.reporter.report_ticket_failed(ticket, &reason).await;
        report.failed.push(TicketFailure {
            identifier: ticket.identifier.clone(),
            kind,
            reason,
            files,
        });
    }

    /// Record finished-but-unmerged tickets when a tier stops before merging.
    fn drop_unintegrated(
        &self,
        report: &mut TierReport,
        dropped: &mut HashSet<TicketId>,
        successes: &[(TicketId, TicketSuccess)],
        kind: FailureKind,
        reason: &str,
    ) {
        for (id, s) in successes {
            dropped.insert(*id);
            report.failed.push(TicketFailure {
                identifier: s.ticket.identifier.clone(),
                kind,
                reason: format!("{reason}; work kept on {}", s.worktree.branch),
                files: Vec::new(),
            });
        }
    }

    async fn remove_quietly(&self, wt: &Worktree) {
        if let Err(e) = self.runner.worktrees.remove(&wt.path).await {
            warn!(path = %wt.path.display(), error = %e, "failed to remove worktree");
        }
    }

    fn pr_body(&self, plan: &TierPlan, tier: usize, report: &TierReport) -> String {
        let mut body = String::new();
        body.push_str(&format!(
            "Integration branch for tier {tier}, stacked on `{}`.\n\n",
            report.base
        ));
        body.push_str("## Tickets\n");
        for id in &report.succeeded {
            let title_url = plan
                .find(id)
                .map(|tid| {
                    let t = &plan.ticket(tid).ticket;
                    (t.title.clone(), t.url.clone())
                })
                .unwrap_or_default();
            match title_url {
                (title, url) if !url.is_empty() => {
                    body.push_str(&format!("- [{id}]({url}) {title}\n"))
                }
                (title, _) => body.push_str(&format!("- {id} {title}\n")),
            }
        }
        if !report.failed.is_empty() {
            body.push_str("\n## Not included\n");
            for f in &report.failed {
                body.push_str(&format!("- {} ({})\n", f.identifier, f.kind));
            }
        }
        body
    }
}
