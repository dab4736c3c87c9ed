//! Tierstack CLI
//!
//! The `tierstack` command plans tracker tickets into dependency tiers and
//! works them as stacked integration pull requests.
//!
//! ## Commands
//!
//! - `plan`: Show the tier plan for a project or a ticket file
//! - `run`: Execute every tier and open the stacked PRs
//! - `ci`: Inspect failing PRs and prepare fix worktrees
//! - `worktree`: List or remove worktrees

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, warn, Level};

use tierstack_collab::{CheckState, CliTicketTracker, GhCli, GitCli, TicketTracker, VersionControl};
use tierstack_core::{
    cancellation, load_tickets_file, plan_tiers, BranchNames, CiOverview, CiTriage,
    CommandExecutor, Orchestrator, OrchestratorConfig, PlanPreview, RunOutcome, Ticket, TierPlan,
    WorktreeManager, CONFIG_FILE,
};

#[derive(Parser)]
#[command(name = "tierstack")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Dependency-tiered parallel ticket orchestration", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Config file (default: tierstack.toml in the repository root)
    #[arg(long, global = true, env = "TIERSTACK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the dependency tiers of a ticket set
    Plan {
        /// Tracker project id
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        project: Option<String>,

        /// JSON file with an array of tickets
        #[arg(long)]
        file: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Work every tier of a project and open stacked PRs
    Run {
        /// Tracker project id
        #[arg(long)]
        project: String,

        /// Maximum tickets worked at once within a tier
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Print the plan with branch names and stop
        #[arg(long)]
        dry_run: bool,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// CI triage for open pull requests
    Ci {
        #[command(subcommand)]
        action: CiAction,
    },

    /// Manage orchestrator worktrees
    Worktree {
        #[command(subcommand)]
        action: WorktreeAction,
    },
}

#[derive(Subcommand)]
enum CiAction {
    /// CI status of your open PRs
    Status {
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Failure logs of a PR
    Logs {
        /// PR number
        pr: u64,

        /// Only this check
        #[arg(long)]
        check: Option<String>,
    },
    /// Check out a PR's branch in a worktree for fixing
    PrepareFix {
        /// PR number
        pr: u64,
    },
}

#[derive(Subcommand)]
enum WorktreeAction {
    /// List worktrees of the repository
    List,
    /// Remove a worktree
    Remove {
        /// Worktree path
        path: PathBuf,
    },
}

/// Repository, adapters, and resolved configuration shared by commands.
struct AppContext {
    config: OrchestratorConfig,
    git: Arc<GitCli>,
}

impl AppContext {
    async fn load(config_path: Option<&Path>) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        let discovered = GitCli::discover(&cwd)
            .await
            .context("Not inside a git repository")?;
        let root = discovered.repo_root().to_path_buf();

        let path = match config_path {
            Some(p) => Some(p.to_path_buf()),
            None => Some(root.join(CONFIG_FILE)).filter(|p| p.exists()),
        };
        let mut config = OrchestratorConfig::load(path.as_deref())
            .context("Failed to load configuration")?;
        if config.summary_dir.is_relative() {
            config.summary_dir = root.join(&config.summary_dir);
        }

        let worktree_root = match &config.worktree_root {
            Some(p) if p.is_relative() => root.join(p),
            Some(p) => p.clone(),
            None => discovered.worktree_root().to_path_buf(),
        };
        let mut git = GitCli::new(&root, worktree_root).with_remote(config.remote.clone());
        if let Some(trunk) = &config.trunk {
            git = git.with_trunk(trunk.clone());
        }
        Ok(Self {
            config,
            git: Arc::new(git),
        })
    }

    fn forge(&self) -> GhCli {
        GhCli::new().with_cwd(self.git.repo_root())
    }

    fn tracker(&self) -> Result<CliTicketTracker> {
        CliTicketTracker::new(&self.config.tracker_command)
            .context("Failed to set up the ticket tracker command")
    }

    fn orchestrator(&self) -> Result<Orchestrator> {
        let executor = CommandExecutor::new(self.config.work_command.clone())
            .context("work_command is not configured")?;
        Ok(Orchestrator::new(
            Arc::new(self.tracker()?),
            self.git.clone(),
            Arc::new(self.forge()),
            Arc::new(executor),
            self.config.clone(),
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tierstack_core::init_tracing(cli.json, level);

    let mut ctx = AppContext::load(cli.config.as_deref()).await?;
    ctx.config.validate().context("Invalid configuration")?;

    match cli.command {
        Commands::Plan {
            project,
            file,
            format,
        } => cmd_plan(&ctx, project.as_deref(), file.as_deref(), format).await,
        Commands::Run {
            project,
            max_parallel,
            dry_run,
            format,
        } => {
            if let Some(n) = max_parallel {
                ctx.config.max_parallel = n;
            }
            cmd_run(&ctx, &project, dry_run, format).await
        }
        Commands::Ci { action } => match action {
            CiAction::Status { format } => cmd_ci_status(&ctx, format).await,
            CiAction::Logs { pr, check } => cmd_ci_logs(&ctx, pr, check.as_deref()).await,
            CiAction::PrepareFix { pr } => cmd_ci_prepare_fix(&ctx, pr).await,
        },
        Commands::Worktree { action } => match action {
            WorktreeAction::List => cmd_worktree_list(&ctx).await,
            WorktreeAction::Remove { path } => cmd_worktree_remove(&ctx, &path).await,
        },
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn project_tickets(ctx: &AppContext, project: &str) -> Result<Vec<Ticket>> {
    let records = ctx
        .tracker()?
        .get_project_tickets(project)
        .await
        .with_context(|| format!("Failed to load tickets of project {project}"))?;
    Ok(records.into_iter().map(Ticket::from).collect())
}

async fn preview(ctx: &AppContext, plan: &TierPlan) -> Result<PlanPreview> {
    let trunk = ctx.git.trunk().await.context("Failed to detect trunk")?;
    let names = BranchNames::new(ctx.config.branch_prefix.clone(), trunk);
    Ok(PlanPreview::new(plan, &names))
}

/// Show tiers for a tracker project or a ticket file.
async fn cmd_plan(
    ctx: &AppContext,
    project: Option<&str>,
    file: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let tickets = match (project, file) {
        (_, Some(path)) => load_tickets_file(path)
            .with_context(|| format!("Failed to read tickets from {}", path.display()))?,
        (Some(project), None) => project_tickets(ctx, project).await?,
        (None, None) => anyhow::bail!("Either --project or --file is required"),
    };

    let plan = plan_tiers(tickets).context("Failed to plan tiers")?;
    render_preview(&preview(ctx, &plan).await?, format)
}

fn render_preview(preview: &PlanPreview, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(preview),
        OutputFormat::Text => {
            let count: usize = preview.tiers.iter().map(|t| t.tickets.len()).sum();
            println!(
                "{} tickets in {} tiers (plan {})",
                count,
                preview.tiers.len(),
                &preview.plan_digest[..12.min(preview.plan_digest.len())]
            );
            print!("{}", preview.render_text());
            Ok(())
        }
    }
}

/// Run every tier of a project.
async fn cmd_run(ctx: &AppContext, project: &str, dry_run: bool, format: OutputFormat) -> Result<()> {
    if dry_run {
        let plan = plan_tiers(project_tickets(ctx, project).await?).context("Failed to plan tiers")?;
        return render_preview(&preview(ctx, &plan).await?, format);
    }

    ctx.config
        .validate_for_run()
        .context("Configuration is incomplete for a run")?;
    let orchestrator = ctx.orchestrator()?;

    let (handle, token) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing in-flight tickets");
            handle.cancel();
        }
    });

    let summary = orchestrator
        .run_project(project, token)
        .await
        .with_context(|| format!("Failed to run project {project}"))?;

    match format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Text => print!("{}", summary.render_markdown()),
    }

    match &summary.outcome {
        RunOutcome::Complete => Ok(()),
        RunOutcome::PartialTier { tiers } => {
            warn!(tiers = ?tiers, "some tickets were not integrated");
            Ok(())
        }
        RunOutcome::Failed { reason } => anyhow::bail!("Run {} failed: {}", summary.run_id, reason),
        RunOutcome::Cancelled => anyhow::bail!("Run {} was cancelled", summary.run_id),
    }
}

fn triage(ctx: &AppContext) -> CiTriage {
    CiTriage::new(
        Arc::new(ctx.forge()),
        Arc::new(WorktreeManager::new(ctx.git.clone())),
    )
}

async fn cmd_ci_status(ctx: &AppContext, format: OutputFormat) -> Result<()> {
    let prs = triage(ctx)
        .status()
        .await
        .context("Failed to fetch PR status")?;

    if format == OutputFormat::Json {
        return print_json(&prs);
    }
    if prs.is_empty() {
        println!("No open pull requests");
        return Ok(());
    }
    for pr in &prs {
        println!(
            "{:<24} {:<8} {}",
            pr.display_name(),
            format!("{:?}", pr.ci_status).to_lowercase(),
            pr.title
        );
        for check in pr.checks.iter().filter(|c| c.state == CheckState::Failure) {
            println!("    ✗ {}", check.name);
        }
    }
    let overview = CiOverview::from_statuses(&prs);
    println!();
    println!(
        "passing: {}  failing: {}  pending: {}  unknown: {}",
        overview.passing, overview.failing, overview.pending, overview.unknown
    );
    Ok(())
}

async fn cmd_ci_logs(ctx: &AppContext, pr: u64, check: Option<&str>) -> Result<()> {
    let logs = triage(ctx)
        .logs(pr, check)
        .await
        .with_context(|| format!("Failed to fetch CI logs for PR #{pr}"))?;
    println!("{logs}");
    Ok(())
}

async fn cmd_ci_prepare_fix(ctx: &AppContext, pr: u64) -> Result<()> {
    let ws = triage(ctx)
        .prepare_fix(pr)
        .await
        .with_context(|| format!("Failed to prepare a fix worktree for PR #{pr}"))?;
    info!(pr, branch = %ws.worktree.branch, "fix worktree prepared");
    println!("Branch:   {}", ws.worktree.branch);
    println!("Worktree: {}", ws.worktree.path.display());
    for check in &ws.failed_checks {
        match &check.url {
            Some(url) => println!("Failing:  {} ({url})", check.name),
            None => println!("Failing:  {}", check.name),
        }
    }
    Ok(())
}

async fn cmd_worktree_list(ctx: &AppContext) -> Result<()> {
    let worktrees = ctx
        .git
        .list_worktrees()
        .await
        .context("Failed to list worktrees")?;
    for wt in worktrees {
        println!(
            "{:<60} {}",
            wt.path.display(),
            wt.branch.as_deref().unwrap_or("(detached)")
        );
    }
    Ok(())
}

async fn cmd_worktree_remove(ctx: &AppContext, path: &Path) -> Result<()> {
    let manager = WorktreeManager::new(ctx.git.clone());
    manager
        .remove(path)
        .await
        .with_context(|| format!("Failed to remove worktree {}", path.display()))?;
    println!("Removed {}", path.display());
    Ok(())
}
