//! Run summaries: what each tier integrated, what failed and why, which PRs
//! were opened. Persisted as JSON and rendered as markdown.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FailureKind, OrchestratorResult};

/// Overall result of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunOutcome {
    /// Every ticket was integrated.
    Complete,
    /// All tiers ran but the listed tiers dropped at least one ticket.
    PartialTier { tiers: Vec<usize> },
    /// The run stopped early; finished tiers remain published.
    Failed { reason: String },
    Cancelled,
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Complete => "complete",
            RunOutcome::PartialTier { .. } => "partial_tier",
            RunOutcome::Failed { .. } => "failed",
            RunOutcome::Cancelled => "cancelled",
        }
    }
}

/// A ticket that did not make it into its tier's integration branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketFailure {
    pub identifier: String,
    pub kind: FailureKind,
    pub reason: String,
    /// Conflicting paths for merge conflicts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
}

/// Outcome of one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierReport {
    pub tier: usize,
    /// Branch the tier was forked from.
    pub base: String,
    pub integration_branch: String,
    /// Tickets integrated into the branch.
    pub succeeded: Vec<String>,
    pub failed: Vec<TicketFailure>,
    pub pr_number: Option<u64>,
    pub pr_url: Option<String>,
}

impl TierReport {
    pub fn new(tier: usize, base: impl Into<String>, integration_branch: impl Into<String>) -> Self {
        Self {
            tier,
            base: base.into(),
            integration_branch: integration_branch.into(),
            succeeded: Vec::new(),
            failed: Vec::new(),
            pr_number: None,
            pr_url: None,
        }
    }

    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Failures caused by merge conflicts.
    pub fn conflicts(&self) -> impl Iterator<Item = &TicketFailure> {
        self.failed
            .iter()
            .filter(|f| f.kind == FailureKind::MergeConflict)
    }
}

/// Record of one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    pub plan_digest: String,
    pub trunk: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: RunOutcome,
    pub tiers: Vec<TierReport>,
}

impl RunSummary {
    pub fn new(run_id: impl Into<String>, plan_digest: impl Into<String>, trunk: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            project_id: None,
            plan_digest: plan_digest.into(),
            trunk: trunk.into(),
            started_at: Utc::now(),
            finished_at: None,
            outcome: RunOutcome::Complete,
            tiers: Vec::new(),
        }
    }

    /// Stamp the finish time and outcome.
    pub fn finish(&mut self, outcome: RunOutcome) {
        self.finished_at = Some(Utc::now());
        self.outcome = outcome;
    }

    pub fn duration_ms(&self) -> u64 {
        self.finished_at
            .map(|f| (f - self.started_at).num_milliseconds().max(0) as u64)
            .unwrap_or(0)
    }

    /// URLs of every PR opened or refreshed, lowest tier first.
    pub fn pr_urls(&self) -> Vec<String> {
        self.tiers.iter().filter_map(|t| t.pr_url.clone()).collect()
    }

    /// Tiers that dropped at least one ticket.
    pub fn partial_tiers(&self) -> Vec<usize> {
        self.tiers
            .iter()
            .filter(|t| t.is_partial())
            .map(|t| t.tier)
            .collect()
    }

    pub fn tier(&self, tier: usize) -> Option<&TierReport> {
        self.tiers.iter().find(|t| t.tier == tier)
    }

    /// Markdown rendering for terminals and tracker comments.
    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# Run `{}`\n\n", self.run_id));
        out.push_str(&format!("- outcome: **{}**", self.outcome.label()));
        match &self.outcome {
            RunOutcome::Failed { reason } => out.push_str(&format!(" ({reason})")),
            RunOutcome::PartialTier { tiers } => {
                let list: Vec<String> = tiers.iter().map(|t| t.to_string()).collect();
                out.push_str(&format!(" (tiers {})", list.join(", ")));
            }
            _ => {}
        }
        out.push('\n');
        out.push_str(&format!("- trunk: `{}`\n", self.trunk));
        out.push_str(&format!("- plan digest: `{}`\n\n", short_digest(&self.plan_digest)));

        for t in &self.tiers {
            out.push_str(&format!(
                "## Tier {}: `{}` (base `{}`)\n",
                t.tier, t.integration_branch, t.base
            ));
            match (&t.pr_url, t.pr_number) {
                (Some(url), Some(n)) => out.push_str(&format!("- PR: #{n} {url}\n")),
                (Some(url), None) => out.push_str(&format!("- PR: {url}\n")),
                _ => out.push_str("- PR: none\n"),
            }
            if !t.succeeded.is_empty() {
                out.push_str(&format!("- integrated: {}\n", t.succeeded.join(", ")));
            }
            for f in &t.failed {
                out.push_str(&format!("- failed `{}` ({}): {}\n", f.identifier, f.kind, f.reason));
                for file in &f.files {
                    out.push_str(&format!("  - `{file}`\n"));
                }
            }
            out.push('\n');
        }
        out
    }
}

fn short_digest(d: &str) -> &str {
    d.get(..12).unwrap_or(d)
}

/// Persist `summary` as `<dir>/<run_id>.json`, creating `dir` if needed.
pub fn write_summary_json(dir: &Path, summary: &RunSummary) -> OrchestratorResult<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.json", summary.run_id));
    let content = serde_json::to_string_pretty(summary)?;
    std::fs::write(&path, content)?;
    Ok(path)
}

pub fn read_summary_json(path: &Path) -> OrchestratorResult<RunSummary> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
