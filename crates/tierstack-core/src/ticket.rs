//! Ticket model and lifecycle.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use tierstack_collab::{TicketRecord, TicketStatus};

use crate::error::{OrchestratorError, OrchestratorResult};

/// Lifecycle of a ticket as seen by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketState {
    Todo,
    InProgress,
    InReview,
    Done,
}

impl TicketState {
    /// Whether moving from `self` to `to` is allowed.
    ///
    /// Forward moves are `Todo → InProgress → InReview → Done`. Staying put is
    /// always allowed, and `InReview → InProgress` reopens a ticket when a
    /// later run reworks it.
    pub fn can_transition_to(self, to: TicketState) -> bool {
        use TicketState::*;
        self == to
            || matches!(
                (self, to),
                (Todo, InProgress) | (InProgress, InReview) | (InReview, Done) | (InReview, InProgress)
            )
    }

    pub fn as_status(self) -> TicketStatus {
        match self {
            TicketState::Todo => TicketStatus::Todo,
            TicketState::InProgress => TicketStatus::InProgress,
            TicketState::InReview => TicketStatus::InReview,
            TicketState::Done => TicketStatus::Done,
        }
    }
}

impl From<&TicketStatus> for TicketState {
    fn from(status: &TicketStatus) -> Self {
        match status {
            TicketStatus::InProgress => TicketState::InProgress,
            TicketStatus::InReview => TicketState::InReview,
            TicketStatus::Done | TicketStatus::Canceled => TicketState::Done,
            TicketStatus::Backlog | TicketStatus::Todo | TicketStatus::Other(_) => TicketState::Todo,
        }
    }
}

impl std::fmt::Display for TicketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TicketState::Todo => "todo",
            TicketState::InProgress => "in_progress",
            TicketState::InReview => "in_review",
            TicketState::Done => "done",
        };
        f.write_str(s)
    }
}

/// A unit of work pulled from the tracker.
///
/// When deserialized without an `id`, the identifier doubles as the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TicketDoc")]
pub struct Ticket {
    /// Tracker-internal id used for API calls.
    pub id: String,
    /// Human identifier such as `ENG-42`; unique within a plan.
    pub identifier: String,
    pub title: String,
    pub url: String,
    pub description: String,
    /// Identifiers or exact titles of tickets this one depends on.
    pub depends_on: Vec<String>,
    pub state: TicketState,
    pub project_id: Option<String>,
}

fn default_state() -> TicketState {
    TicketState::Todo
}

/// On-disk ticket shape; `id` is optional.
#[derive(Deserialize)]
struct TicketDoc {
    #[serde(default)]
    id: Option<String>,
    identifier: String,
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default = "default_state")]
    state: TicketState,
    #[serde(default)]
    project_id: Option<String>,
}

impl From<TicketDoc> for Ticket {
    fn from(doc: TicketDoc) -> Self {
        Self {
            id: doc.id.unwrap_or_else(|| doc.identifier.clone()),
            identifier: doc.identifier,
            title: doc.title,
            url: doc.url,
            description: doc.description,
            depends_on: doc.depends_on,
            state: doc.state,
            project_id: doc.project_id,
        }
    }
}

impl Ticket {
    pub fn new(identifier: impl Into<String>, title: impl Into<String>) -> Self {
        let identifier = identifier.into();
        Self {
            id: identifier.clone(),
            identifier,
            title: title.into(),
            url: String::new(),
            description: String::new(),
            depends_on: Vec::new(),
            state: TicketState::Todo,
            project_id: None,
        }
    }

    /// Builder-style dependency list.
    pub fn depends_on<I, S>(mut self, refs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = refs.into_iter().map(Into::into).collect();
        self
    }

    /// Apply a lifecycle transition, rejecting disallowed moves.
    pub fn transition(&mut self, to: TicketState) -> OrchestratorResult<()> {
        if !self.state.can_transition_to(to) {
            return Err(OrchestratorError::InvalidTransition {
                ticket: self.identifier.clone(),
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        self.state = to;
        Ok(())
    }
}

impl From<TicketRecord> for Ticket {
    fn from(record: TicketRecord) -> Self {
        let identifier = if record.identifier.is_empty() {
            record.id.clone()
        } else {
            record.identifier
        };
        Self {
            state: TicketState::from(&record.status),
            id: record.id,
            identifier,
            title: record.title,
            url: record.url,
            description: record.description,
            depends_on: record.blocked_by,
            project_id: record.project_id,
        }
    }
}

/// Ordering for identifiers that compares a trailing number numerically,
/// so `ENG-9` sorts before `ENG-10`.
pub fn compare_identifiers(a: &str, b: &str) -> Ordering {
    let (a_prefix, a_num) = split_numeric_suffix(a);
    let (b_prefix, b_num) = split_numeric_suffix(b);
    a_prefix
        .cmp(b_prefix)
        .then_with(|| match (a_num, b_num) {
            (Some(x), Some(y)) => x.cmp(&y),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.cmp(b))
}

fn split_numeric_suffix(s: &str) -> (&str, Option<u64>) {
    let digits = s.chars().rev().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return (s, None);
    }
    let (prefix, num) = s.split_at(s.len() - digits);
    (prefix, num.parse().ok())
}
