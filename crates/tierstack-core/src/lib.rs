//! Tierstack Core Library
//!
//! Plans tracker tickets into dependency tiers, works every tier in parallel
//! isolated worktrees, merges each tier into an integration branch, and
//! stacks one pull request per tier on top of the previous one.

pub mod ci;
pub mod config;
pub mod error;
pub mod executor;
pub mod graph;
pub mod integration;
pub mod obs;
pub mod orchestrator;
pub mod reporter;
pub mod scheduler;
pub mod summary;
pub mod telemetry;
pub mod ticket;
pub mod worktree;

pub use ci::{CiOverview, CiTriage, FailingPr, FixWorkspace};
pub use config::{OrchestratorConfig, CONFIG_FILE};
pub use error::{FailureKind, OrchestratorError, OrchestratorResult};
pub use executor::{CommandExecutor, TicketExecutor, WorkContext};
pub use graph::{plan_tiers, PlannedTicket, TicketGraph, TicketId, TierPlan};
pub use integration::{BranchNames, IntegrationEngine, MergeCandidate, MergeFailure, MergeReport};
pub use orchestrator::{
    load_tickets_file, new_run_id, Orchestrator, PlanPreview, PreviewTicket, PreviewTier,
};
pub use reporter::{LogReporter, StatusReporter, TrackerStatusReporter};
pub use scheduler::{cancellation, CancelHandle, CancelToken, RunPhase, TierScheduler};
pub use summary::{
    read_summary_json, write_summary_json, RunOutcome, RunSummary, TicketFailure, TierReport,
};
pub use telemetry::init_tracing;
pub use ticket::{compare_identifiers, Ticket, TicketState};
pub use worktree::{Worktree, WorktreeManager};
