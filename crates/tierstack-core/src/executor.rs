//! Per-ticket work execution.
//!
//! The scheduler hands each ticket a [`WorkContext`] with its own worktree.
//! [`CommandExecutor`] runs a configured command there; tests inject an async
//! closure instead.

use std::future::Future;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, instrument};

use tierstack_collab::process::run_command;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::ticket::Ticket;

/// Everything a ticket task may touch.
#[derive(Debug, Clone)]
pub struct WorkContext {
    pub ticket: Ticket,
    pub tier: usize,
    /// Worktree exclusively owned by this task.
    pub worktree: PathBuf,
    pub branch: String,
    /// Branch the ticket branch was forked from.
    pub base: String,
}

/// Performs the work for one ticket inside its worktree.
#[async_trait]
pub trait TicketExecutor: Send + Sync {
    async fn execute(&self, ctx: &WorkContext) -> OrchestratorResult<()>;
}

#[async_trait]
impl<F, Fut> TicketExecutor for F
where
    F: Fn(WorkContext) -> Fut + Send + Sync,
    Fut: Future<Output = OrchestratorResult<()>> + Send,
{
    async fn execute(&self, ctx: &WorkContext) -> OrchestratorResult<()> {
        (self)(ctx.clone()).await
    }
}

/// Runs an external command in the ticket worktree.
///
/// The command sees `TIERSTACK_TICKET_ID`, `TIERSTACK_TICKET_TITLE`,
/// `TIERSTACK_TIER`, and `TIERSTACK_BRANCH`. A non-zero exit fails the ticket.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    argv: Vec<String>,
}

impl CommandExecutor {
    pub fn new(argv: Vec<String>) -> OrchestratorResult<Self> {
        if argv.is_empty() {
            return Err(OrchestratorError::Config(
                "work command is empty".to_string(),
            ));
        }
        Ok(Self { argv })
    }
}

#[async_trait]
impl TicketExecutor for CommandExecutor {
    #[instrument(skip(self, ctx), fields(ticket = %ctx.ticket.identifier, tier = ctx.tier))]
    async fn execute(&self, ctx: &WorkContext) -> OrchestratorResult<()> {
        let tier = ctx.tier.to_string();
        let envs = [
            ("TIERSTACK_TICKET_ID", ctx.ticket.identifier.as_str()),
            ("TIERSTACK_TICKET_TITLE", ctx.ticket.title.as_str()),
            ("TIERSTACK_TIER", tier.as_str()),
            ("TIERSTACK_BRANCH", ctx.branch.as_str()),
        ];
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| OrchestratorError::Config("work command is empty".to_string()))?;

        let out = run_command(program, args, Some(&ctx.worktree), &envs).await?;
        debug!(exit_code = out.exit_code, "work command finished");
        if !out.success {
            let tail: Vec<&str> = out.stderr.lines().rev().take(5).collect();
            let reason = if tail.is_empty() {
                format!("exit code {}", out.exit_code)
            } else {
                tail.into_iter().rev().collect::<Vec<_>>().join("\n")
            };
            return Err(OrchestratorError::TicketWork {
                ticket: ctx.ticket.identifier.clone(),
                reason,
            });
        }
        Ok(())
    }
}
