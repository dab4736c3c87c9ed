//! Tierstack collaborators
//!
//! Contracts for the three external systems the orchestrator drives:
//! - [`TicketTracker`]: projects, tickets, statuses, and comments
//! - [`VersionControl`]: branches, worktrees, commits, merges, pushes
//! - [`Forge`]: pull requests and CI checks
//!
//! CLI-backed adapters ([`GitCli`], [`GhCli`], [`CliTicketTracker`]) talk to
//! the real tools; [`fakes`] holds in-memory versions for tests.

pub mod error;
pub mod fakes;
pub mod forge;
pub mod git;
pub mod process;
pub mod tracker;
pub mod traits;

pub use error::{CollabError, CollabResult};
pub use forge::GhCli;
pub use git::{GitCli, PROTECTED_BRANCHES};
pub use tracker::CliTicketTracker;
pub use traits::{
    CheckState, CiCheck, CiStatus, Forge, MergeOutcome, NewProject, NewPullRequest, NewTicket,
    PrStatus, ProjectRecord, PullRequestRef, TicketRecord, TicketStatus, TicketTracker,
    VersionControl, WorktreeInfo,
};
