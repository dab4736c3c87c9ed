//! Structured observability hooks for orchestration run lifecycle events.
//!
//! This module provides:
//! - A run-scoped tracing span via [`run_span`]
//! - Emission functions for lifecycle events
//!
//! Events are emitted at `info!` level with an `event` field naming them.
//! Reporting failures use `warn!`.

use tracing::{info, warn, Span};

/// Span carrying `run_id` for every event of one run.
///
/// ```ignore
/// scheduler.run(&plan, &run_id, cancel).instrument(run_span(&run_id)).await;
/// ```
pub fn run_span(run_id: &str) -> Span {
    tracing::info_span!("tierstack.run", run_id = %run_id)
}

/// Emit event: run started.
pub fn emit_run_started(run_id: &str, plan_digest: &str, tickets: usize, tiers: usize) {
    info!(
        event = "run.started",
        run_id = %run_id,
        plan_digest = %plan_digest,
        tickets = tickets,
        tiers = tiers,
    );
}

/// Emit event: a tier began executing from `base`.
pub fn emit_tier_started(tier: usize, base: &str, tickets: usize) {
    info!(event = "tier.started", tier = tier, base = %base, tickets = tickets);
}

/// Emit event: a ticket's work finished and its branch was pushed.
pub fn emit_ticket_finished(ticket: &str, tier: usize, branch: &str, duration_ms: u64) {
    info!(
        event = "ticket.finished",
        ticket = %ticket,
        tier = tier,
        branch = %branch,
        duration_ms = duration_ms,
    );
}

/// Emit event: a ticket failed; `kind` is the failure class.
pub fn emit_ticket_failed(ticket: &str, tier: usize, kind: &str, reason: &str) {
    warn!(
        event = "ticket.failed",
        ticket = %ticket,
        tier = tier,
        kind = %kind,
        reason = %reason,
    );
}

/// Emit event: a tier's integration branch was built and published.
pub fn emit_tier_integrated(tier: usize, branch: &str, merged: usize, conflicts: usize, pr_url: Option<&str>) {
    info!(
        event = "tier.integrated",
        tier = tier,
        branch = %branch,
        merged = merged,
        conflicts = conflicts,
        pr_url = pr_url.unwrap_or(""),
    );
}

/// Emit event: run finished with its outcome label.
pub fn emit_run_finished(run_id: &str, outcome: &str, duration_ms: u64) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        outcome = %outcome,
        duration_ms = duration_ms,
    );
}

/// Emit event: an outbound status report failed (never fatal).
pub fn emit_report_failed(action: &str, ticket: Option<&str>, error: &dyn std::fmt::Display) {
    warn!(
        event = "report.failed",
        action = %action,
        ticket = ticket.unwrap_or(""),
        error = %error,
    );
}
