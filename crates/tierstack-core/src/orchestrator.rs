//! Top-level entry point tying configuration and collaborators together.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use tierstack_collab::{Forge, TicketTracker, VersionControl};

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::executor::TicketExecutor;
use crate::graph::{plan_tiers, TierPlan};
use crate::integration::BranchNames;
use crate::reporter::{StatusReporter, TrackerStatusReporter};
use crate::scheduler::{CancelToken, TierScheduler};
use crate::summary::{write_summary_json, RunSummary};
use crate::ticket::Ticket;

/// One ticket in a [`PlanPreview`].
#[derive(Debug, Clone, Serialize)]
pub struct PreviewTicket {
    pub identifier: String,
    pub title: String,
    pub branch: String,
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewTier {
    pub tier: usize,
    pub base: String,
    pub integration_branch: String,
    pub tickets: Vec<PreviewTicket>,
}

/// What a run would do, without touching any collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct PlanPreview {
    pub plan_digest: String,
    pub trunk: String,
    pub tiers: Vec<PreviewTier>,
}

impl PlanPreview {
    pub fn new(plan: &TierPlan, names: &BranchNames) -> Self {
        let tiers = (0..plan.tier_count())
            .map(|tier| PreviewTier {
                tier,
                base: names.tier_base(tier),
                integration_branch: names.integration_branch(tier),
                tickets: plan
                    .tier(tier)
                    .iter()
                    .map(|id| {
                        let planned = plan.ticket(*id);
                        PreviewTicket {
                            identifier: planned.ticket.identifier.clone(),
                            title: planned.ticket.title.clone(),
                            branch: names.ticket_branch(&planned.ticket.identifier),
                            depends_on: planned
                                .dependencies
                                .iter()
                                .map(|d| plan.ticket(*d).ticket.identifier.clone())
                                .collect(),
                        }
                    })
                    .collect(),
            })
            .collect();
        Self {
            plan_digest: plan.digest(),
            trunk: names.trunk().to_string(),
            tiers,
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for t in &self.tiers {
            out.push_str(&format!(
                "Tier {} -> {} (base {})\n",
                t.tier, t.integration_branch, t.base
            ));
            for ticket in &t.tickets {
                out.push_str(&format!(
                    "  {:<12} {:<32} {}",
                    ticket.identifier, ticket.branch, ticket.title
                ));
                if !ticket.depends_on.is_empty() {
                    out.push_str(&format!(" [after {}]", ticket.depends_on.join(", ")));
                }
                out.push('\n');
            }
        }
        out
    }
}

/// Read a JSON array of tickets.
pub fn load_tickets_file(path: &Path) -> OrchestratorResult<Vec<Ticket>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        OrchestratorError::Config(format!("cannot read {}: {e}", path.display()))
    })?;
    Ok(serde_json::from_str(&content)?)
}

/// `run-<utc timestamp>-<random suffix>`.
pub fn new_run_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "run-{}-{}",
        Utc::now().format("%Y%m%dT%H%M%S"),
        &suffix[..8]
    )
}

/// Plans a project's tickets and runs the tiers against real or fake
/// collaborators.
pub struct Orchestrator {
    tracker: Arc<dyn TicketTracker>,
    vcs: Arc<dyn VersionControl>,
    forge: Arc<dyn Forge>,
    executor: Arc<dyn TicketExecutor>,
    reporter: Arc<dyn StatusReporter>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Progress is mirrored into `tracker` unless another reporter is set.
    pub fn new(
        tracker: Arc<dyn TicketTracker>,
        vcs: Arc<dyn VersionControl>,
        forge: Arc<dyn Forge>,
        executor: Arc<dyn TicketExecutor>,
        config: OrchestratorConfig,
    ) -> Self {
        let reporter = Arc::new(TrackerStatusReporter::new(Arc::clone(&tracker)));
        Self {
            tracker,
            vcs,
            forge,
            executor,
            reporter,
            config,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn StatusReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Tickets of a tracker project.
    pub async fn load_tickets(&self, project_id: &str) -> OrchestratorResult<Vec<Ticket>> {
        let records = self.tracker.get_project_tickets(project_id).await?;
        info!(project = project_id, tickets = records.len(), "loaded tickets");
        Ok(records.into_iter().map(Ticket::from).collect())
    }

    pub async fn plan_project(&self, project_id: &str) -> OrchestratorResult<TierPlan> {
        plan_tiers(self.load_tickets(project_id).await?)
    }

    /// Branch naming with the configured trunk, or the detected one.
    pub async fn branch_names(&self) -> OrchestratorResult<BranchNames> {
        let trunk = match &self.config.trunk {
            Some(t) => t.clone(),
            None => self.vcs.trunk().await?,
        };
        Ok(BranchNames::new(self.config.branch_prefix.clone(), trunk))
    }

    pub async fn preview(&self, plan: &TierPlan) -> OrchestratorResult<PlanPreview> {
        Ok(PlanPreview::new(plan, &self.branch_names().await?))
    }

    /// Plan and run a tracker project.
    ///
    /// Graph errors are returned before any worktree exists.
    pub async fn run_project(
        &self,
        project_id: &str,
        cancel: CancelToken,
    ) -> OrchestratorResult<RunSummary> {
        let plan = self.plan_project(project_id).await?;
        self.execute(&plan, cancel, Some(project_id)).await
    }

    pub async fn run_plan(&self, plan: &TierPlan, cancel: CancelToken) -> OrchestratorResult<RunSummary> {
        self.execute(plan, cancel, None).await
    }

    async fn execute(
        &self,
        plan: &TierPlan,
        cancel: CancelToken,
        project_id: Option<&str>,
    ) -> OrchestratorResult<RunSummary> {
        self.config.validate()?;
        let names = self.branch_names().await?;
        let scheduler = TierScheduler::new(
            Arc::clone(&self.vcs),
            Arc::clone(&self.forge),
            Arc::clone(&self.executor),
            Arc::clone(&self.reporter),
            names,
            self.config.clone(),
        );

        let run_id = new_run_id();
        let mut summary = scheduler.run(plan, &run_id, cancel).await;
        summary.project_id = project_id.map(str::to_string);

        if !self.config.summary_dir.as_os_str().is_empty() {
            match write_summary_json(&self.config.summary_dir, &summary) {
                Ok(path) => info!(path = %path.display(), "wrote run summary"),
                Err(e) => warn!(error = %e, "could not persist run summary"),
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::LogReporter;
    use tierstack_collab::fakes::{MemoryForge, MemoryTicketTracker, MemoryVersionControl};
    use tierstack_collab::{ProjectRecord, TicketRecord, TicketStatus};

    fn record(identifier: &str, title: &str, blocked_by: &[&str]) -> TicketRecord {
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

    fn tracker(records: Vec<TicketRecord>) -> Arc<MemoryTicketTracker> {
        let project = ProjectRecord {
            id: "proj".to_string(),
            name: "Project".to_string(),
            url: String::new(),
            description: String::new(),
        };
        Arc::new(MemoryTicketTracker::new().with_project(project, records))
    }

    fn orchestrator(tracker: Arc<MemoryTicketTracker>, summary_dir: &Path) -> Orchestrator {
        let vcs = Arc::new(MemoryVersionControl::new("main"));
        let writer = Arc::clone(&vcs);
        let config = OrchestratorConfig {
            summary_dir: summary_dir.to_path_buf(),
            ..Default::default()
        };
        Orchestrator::new(
            tracker,
            vcs,
            Arc::new(MemoryForge::new()),
            Arc::new(move |ctx: crate::executor::WorkContext| {
                let writer = Arc::clone(&writer);
                async move {
                    writer.write_file(&ctx.worktree, &format!("{}.txt", ctx.ticket.identifier));
                    Ok::<(), OrchestratorError>(())
                }
            }),
            config,
        )
    }

    #[tokio::test]
    async fn test_blocked_by_titles_become_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(
            tracker(vec![
                record("ENG-1", "Schema", &[]),
                record("ENG-2", "API", &["Schema"]),
            ]),
            dir.path(),
        );
        let plan = orch.plan_project("proj").await.unwrap();
        assert_eq!(plan.tier_of("ENG-2"), Some(1));

        let preview = orch.preview(&plan).await.unwrap();
        assert_eq!(preview.tiers[1].base, "stack/tier-0");
        assert_eq!(preview.tiers[1].tickets[0].branch, "stack/eng-2");
        assert!(preview.render_text().contains("[after ENG-1]"));
    }

    #[tokio::test]
    async fn test_run_project_updates_tracker_and_persists_summary() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(vec![record("ENG-1", "Schema", &[])]);
        let orch = orchestrator(tracker.clone(), dir.path());

        let summary = orch.run_project("proj", CancelToken::never()).await.unwrap();
        assert_eq!(summary.project_id.as_deref(), Some("proj"));

        let statuses: Vec<TicketStatus> =
            tracker.status_updates().into_iter().map(|(_, s)| s).collect();
        assert_eq!(statuses, vec![TicketStatus::InProgress, TicketStatus::InReview]);

        let written = dir.path().join(format!("{}.json", summary.run_id));
        assert!(written.exists());
    }

    #[tokio::test]
    async fn test_cycle_is_reported_before_any_work() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(
            tracker(vec![
                record("ENG-1", "Schema", &["API"]),
                record("ENG-2", "API", &["Schema"]),
            ]),
            dir.path(),
        )
        .with_reporter(Arc::new(LogReporter));
        let err = orch.run_project("proj", CancelToken::never()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::DependencyCycle { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_load_tickets_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tickets.json");
        std::fs::write(
            &path,
            r#"[{"id":"1","identifier":"A","title":"a"},
               {"identifier":"B","title":"b","depends_on":["A"]}]"#,
        )
        .unwrap();
        let tickets = load_tickets_file(&path).unwrap();
        assert_eq!(tickets[1].depends_on, vec!["A"]);
        assert_eq!(tickets[1].id, "B");
        assert!(load_tickets_file(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_run_ids_are_unique() {
        assert_ne!(new_run_id(), new_run_id());
        assert!(new_run_id().starts_with("run-"));
    }
}
