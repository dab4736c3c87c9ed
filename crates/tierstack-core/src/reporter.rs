//! Outbound progress reporting.
//!
//! Reporters are fire-and-forget: they return nothing, and an implementation
//! that talks to a collaborator logs its failures instead of surfacing them.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use tierstack_collab::{TicketStatus, TicketTracker};

use crate::obs;
use crate::ticket::Ticket;

/// Receives progress notifications from the scheduler.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report_tier_start(&self, tier: usize, tickets: &[Ticket]);

    /// Work on `ticket` is about to begin.
    async fn report_ticket_started(&self, ticket: &Ticket);

    /// `ticket` is integrated and under review in `pr_url`.
    async fn report_ticket_done(&self, ticket: &Ticket, pr_url: &str);

    async fn report_ticket_failed(&self, ticket: &Ticket, reason: &str);

    async fn report_run_complete(&self, pr_urls: &[String]);
}

/// Reporter that only logs.
#[derive(Debug, Default, Clone)]
pub struct LogReporter;

#[async_trait]
impl StatusReporter for LogReporter {
    async fn report_tier_start(&self, tier: usize, tickets: &[Ticket]) {
        let ids: Vec<&str> = tickets.iter().map(|t| t.identifier.as_str()).collect();
        info!(tier, tickets = ?ids, "tier starting");
    }

    async fn report_ticket_started(&self, ticket: &Ticket) {
        info!(ticket = %ticket.identifier, "ticket started");
    }

    async fn report_ticket_done(&self, ticket: &Ticket, pr_url: &str) {
        info!(ticket = %ticket.identifier, pr_url, "ticket in review");
    }

    async fn report_ticket_failed(&self, ticket: &Ticket, reason: &str) {
        info!(ticket = %ticket.identifier, reason, "ticket failed");
    }

    async fn report_run_complete(&self, pr_urls: &[String]) {
        info!(prs = ?pr_urls, "run complete");
    }
}

/// Mirrors progress into the ticket tracker: statuses and comments.
pub struct TrackerStatusReporter {
    tracker: Arc<dyn TicketTracker>,
}

impl TrackerStatusReporter {
    pub fn new(tracker: Arc<dyn TicketTracker>) -> Self {
        Self { tracker }
    }

    async fn set_status(&self, ticket: &Ticket, status: TicketStatus) {
        if let Err(e) = self.tracker.update_status(&ticket.id, &status).await {
            obs::emit_report_failed("update_status", Some(&ticket.identifier), &e);
        }
    }

    async fn comment(&self, ticket: &Ticket, body: &str) {
        if let Err(e) = self.tracker.add_comment(&ticket.id, body).await {
            obs::emit_report_failed("add_comment", Some(&ticket.identifier), &e);
        }
    }
}

#[async_trait]
impl StatusReporter for TrackerStatusReporter {
    async fn report_tier_start(&self, tier: usize, tickets: &[Ticket]) {
        info!(tier, tickets = tickets.len(), "reporting tier start");
    }

    async fn report_ticket_started(&self, ticket: &Ticket) {
        self.set_status(ticket, TicketStatus::InProgress).await;
    }

    async fn report_ticket_done(&self, ticket: &Ticket, pr_url: &str) {
        self.set_status(ticket, TicketStatus::InReview).await;
        self.comment(ticket, &format!("Integrated for review in {pr_url}"))
            .await;
    }

    async fn report_ticket_failed(&self, ticket: &Ticket, reason: &str) {
        self.comment(
            ticket,
            &format!("Automated implementation did not complete:\n\n```\n{reason}\n```"),
        )
        .await;
    }

    async fn report_run_complete(&self, pr_urls: &[String]) {
        info!(prs = ?pr_urls, "run complete; stacked PRs open");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tierstack_collab::fakes::MemoryTicketTracker;
    use tierstack_collab::{ProjectRecord, TicketRecord};

    fn tracker() -> Arc<MemoryTicketTracker> {
        let record = TicketRecord {
            id: "id-1".to_string(),
            identifier: "ENG-1".to_string(),
            title: "Schema".to_string(),
            url: String::new(),
            status: TicketStatus::Todo,
            description: String::new(),
            blocked_by: Vec::new(),
            project_id: None,
        };
        let project = ProjectRecord {
            id: "p".to_string(),
            name: "P".to_string(),
            url: String::new(),
            description: String::new(),
        };
        Arc::new(MemoryTicketTracker::new().with_project(project, vec![record]))
    }

    fn ticket() -> Ticket {
        let mut t = Ticket::new("ENG-1", "Schema");
        t.id = "id-1".to_string();
        t
    }

    #[tokio::test]
    async fn test_done_moves_to_review_and_comments_pr() {
        let tracker = tracker();
        let reporter = TrackerStatusReporter::new(tracker.clone());
        reporter.report_ticket_started(&ticket()).await;
        reporter
            .report_ticket_done(&ticket(), "https://forge.test/pull/1")
            .await;

        let statuses: Vec<TicketStatus> = tracker.status_updates().into_iter().map(|(_, s)| s).collect();
        assert_eq!(statuses, vec![TicketStatus::InProgress, TicketStatus::InReview]);
        assert!(tracker.comments()[0].1.contains("https://forge.test/pull/1"));
    }

    #[tokio::test]
    async fn test_tracker_failure_is_swallowed() {
        let tracker = tracker();
        tracker.fail_writes(true);
        let reporter = TrackerStatusReporter::new(tracker.clone());
        reporter.report_ticket_failed(&ticket(), "boom").await;
        reporter.report_ticket_started(&ticket()).await;
        assert!(tracker.status_updates().is_empty());
    }
}
