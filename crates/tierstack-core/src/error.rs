//! Error types for planning and orchestration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tierstack_collab::CollabError;

/// Errors produced by the orchestration layer.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A dependency reference matched no ticket by identifier or title.
    #[error("ticket {ticket} depends on unknown ticket {reference:?}")]
    UnresolvedDependency { ticket: String, reference: String },

    /// A dependency reference matched more than one ticket title.
    #[error("ticket {ticket} dependency {reference:?} is ambiguous: {candidates:?}")]
    AmbiguousDependency {
        ticket: String,
        reference: String,
        candidates: Vec<String>,
    },

    /// The dependency relation contains a cycle.
    #[error("dependency cycle detected involving tickets: {tickets:?}")]
    DependencyCycle { tickets: Vec<String> },

    /// Two tickets share an identifier.
    #[error("duplicate ticket identifier: {identifier}")]
    DuplicateTicket { identifier: String },

    #[error("branch {branch} is already checked out elsewhere")]
    BranchExists { branch: String },

    #[error("base revision not found: {base}")]
    BaseNotFound { base: String },

    #[error("merging {branch} conflicted in {files:?}")]
    MergeConflict { branch: String, files: Vec<String> },

    /// A collaborator could not be reached; fatal to the whole run.
    #[error("infrastructure unavailable: {0}")]
    InfrastructureUnavailable(String),

    /// The per-ticket work itself failed.
    #[error("work for ticket {ticket} failed: {reason}")]
    TicketWork { ticket: String, reason: String },

    /// A ticket lifecycle transition that is not allowed.
    #[error("ticket {ticket} cannot move from {from} to {to}")]
    InvalidTransition {
        ticket: String,
        from: String,
        to: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    /// Collaborator failure that does not map to a more specific kind.
    #[error("collaborator error: {0}")]
    Collab(#[source] CollabError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<CollabError> for OrchestratorError {
    /// Map a collaborator failure onto the orchestration taxonomy.
    fn from(err: CollabError) -> Self {
        match err {
            CollabError::BranchExists { branch, .. } => OrchestratorError::BranchExists { branch },
            CollabError::BaseNotFound { start_point } => {
                OrchestratorError::BaseNotFound { base: start_point }
            }
            CollabError::MergeConflict {
                source_branch,
                files,
                ..
            } => OrchestratorError::MergeConflict {
                branch: source_branch,
                files,
            },
            e if e.is_infrastructure() => OrchestratorError::InfrastructureUnavailable(e.to_string()),
            e => OrchestratorError::Collab(e),
        }
    }
}

impl OrchestratorError {
    /// `true` for errors that abort the whole run rather than one ticket.
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            OrchestratorError::UnresolvedDependency { .. }
                | OrchestratorError::AmbiguousDependency { .. }
                | OrchestratorError::DependencyCycle { .. }
                | OrchestratorError::DuplicateTicket { .. }
                | OrchestratorError::InfrastructureUnavailable(_)
                | OrchestratorError::Config(_)
        )
    }

    /// Coarse classification recorded in run summaries.
    pub fn kind(&self) -> FailureKind {
        match self {
            OrchestratorError::BranchExists { .. } => FailureKind::BranchExists,
            OrchestratorError::BaseNotFound { .. } => FailureKind::BaseNotFound,
            OrchestratorError::MergeConflict { .. } => FailureKind::MergeConflict,
            OrchestratorError::InfrastructureUnavailable(_) => FailureKind::InfrastructureUnavailable,
            OrchestratorError::TicketWork { .. } => FailureKind::TicketWork,
            _ => FailureKind::Other,
        }
    }
}

/// Failure classes a single ticket can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    BranchExists,
    BaseNotFound,
    MergeConflict,
    InfrastructureUnavailable,
    TicketWork,
    /// Not attempted because a dependency did not make it into its tier.
    DependencyFailed,
    /// Not attempted because the run was cancelled first.
    Cancelled,
    Other,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::BranchExists => "branch exists",
            FailureKind::BaseNotFound => "base not found",
            FailureKind::MergeConflict => "merge conflict",
            FailureKind::InfrastructureUnavailable => "infrastructure unavailable",
            FailureKind::TicketWork => "work failed",
            FailureKind::DependencyFailed => "dependency failed",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Other => "error",
        };
        f.write_str(s)
    }
}

/// Convenience result alias.
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;
