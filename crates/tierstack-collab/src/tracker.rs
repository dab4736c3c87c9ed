//! Ticket tracker adapter that shells out to a JSON-emitting tracker CLI.
//!
//! The command is configurable (e.g. `python3 linear.py`). Each operation maps
//! to a subcommand that prints a JSON record on stdout.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{CollabError, CollabResult};
use crate::process::{join_args, run_command, CommandOutput};
use crate::traits::{NewProject, NewTicket, ProjectRecord, TicketRecord, TicketStatus, TicketTracker};

/// Tracker collaborator invoked as `<program> <base args...> <subcommand> ...`.
#[derive(Debug, Clone)]
pub struct CliTicketTracker {
    program: String,
    base_args: Vec<String>,
}

impl CliTicketTracker {
    /// Build from a full argv prefix, e.g. `["python3", "linear.py"]`.
    pub fn new(command: &[String]) -> CollabResult<Self> {
        let (program, rest) = command
            .split_first()
            .ok_or_else(|| CollabError::Unavailable("tracker command is empty".to_string()))?;
        Ok(Self {
            program: program.clone(),
            base_args: rest.to_vec(),
        })
    }

    async fn invoke(&self, sub: &[&str]) -> CollabResult<CommandOutput> {
        let mut argv = self.base_args.clone();
        argv.extend(sub.iter().map(|s| s.to_string()));
        let out = run_command(&self.program, &argv, None, &[]).await?;
        if !out.success && out.stderr.contains("API_KEY") {
            return Err(CollabError::Unavailable(out.stderr.trim().to_string()));
        }
        Ok(out)
    }

    async fn invoke_checked(&self, sub: &[&str]) -> CollabResult<String> {
        let out = self.invoke(sub).await?;
        if !out.success {
            return Err(CollabError::CommandFailed {
                program: self.program.clone(),
                args: join_args(sub),
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(out.stdout_trimmed().to_string())
    }

    async fn invoke_json<T: DeserializeOwned>(&self, sub: &[&str]) -> CollabResult<T> {
        let stdout = self.invoke_checked(sub).await?;
        Ok(serde_json::from_str(&stdout)?)
    }
}

#[async_trait]
impl TicketTracker for CliTicketTracker {
    async fn get_project(&self, id: &str) -> CollabResult<ProjectRecord> {
        let out = self.invoke(&["get-project", id]).await?;
        if !out.success || out.stdout_trimmed().is_empty() {
            return Err(CollabError::ProjectNotFound { id: id.to_string() });
        }
        Ok(serde_json::from_str(out.stdout_trimmed())?)
    }

    async fn get_project_tickets(&self, id: &str) -> CollabResult<Vec<TicketRecord>> {
        let mut tickets: Vec<TicketRecord> = self.invoke_json(&["get-project-tickets", id]).await?;
        for t in &mut tickets {
            if t.project_id.is_none() {
                t.project_id = Some(id.to_string());
            }
        }
        debug!(project = id, count = tickets.len(), "fetched project tickets");
        Ok(tickets)
    }

    async fn get_ticket(&self, id: &str) -> CollabResult<TicketRecord> {
        let out = self.invoke(&["get-ticket", id]).await?;
        if !out.success || out.stdout_trimmed().is_empty() {
            return Err(CollabError::TicketNotFound { id: id.to_string() });
        }
        Ok(serde_json::from_str(out.stdout_trimmed())?)
    }

    async fn update_status(&self, id: &str, status: &TicketStatus) -> CollabResult<()> {
        self.invoke_checked(&["update-status", id, "--status", status.as_tracker_name()])
            .await?;
        Ok(())
    }

    async fn add_comment(&self, id: &str, body: &str) -> CollabResult<()> {
        self.invoke_checked(&["add-comment", id, "--body", body])
            .await?;
        Ok(())
    }

    async fn block_ticket(&self, id: &str, blocked_by: &str) -> CollabResult<()> {
        self.invoke_checked(&["block-ticket", id, "--blocked-by", blocked_by])
            .await?;
        Ok(())
    }

    async fn create_project(&self, project: NewProject) -> CollabResult<ProjectRecord> {
        self.invoke_json(&[
            "create-project",
            "--team",
            project.team.as_str(),
            "--name",
            project.name.as_str(),
            "--description",
            project.description.as_str(),
        ])
        .await
    }

    async fn create_ticket(&self, ticket: NewTicket) -> CollabResult<TicketRecord> {
        let mut sub: Vec<&str> = vec![
            "create-ticket",
            "--team",
            ticket.team.as_str(),
            "--title",
            ticket.title.as_str(),
            "--description",
            ticket.description.as_str(),
        ];
        if let Some(project) = ticket.project_id.as_deref() {
            sub.push("--project");
            sub.push(project);
        }
        if let Some(status) = ticket.status.as_ref() {
            sub.push("--state");
            sub.push(status.as_tracker_name());
        }
        self.invoke_json(&sub).await
    }
}
