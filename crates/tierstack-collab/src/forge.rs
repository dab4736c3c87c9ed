//! `gh` CLI adapter for the [`Forge`] contract.

use std::path::PathBuf;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{CollabError, CollabResult};
use crate::process::{join_args, run_command, CommandOutput};
use crate::traits::{CheckState, CiCheck, CiStatus, Forge, NewPullRequest, PrStatus, PullRequestRef};

/// GitHub adapter backed by the `gh` CLI.
#[derive(Debug, Clone, Default)]
pub struct GhCli {
    /// `owner/repo`; when `None`, `gh` infers it from `cwd`.
    repo: Option<String>,
    cwd: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhPr {
    number: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    head_ref_name: String,
    #[serde(default)]
    base_ref_name: String,
}

impl GhPr {
    fn into_ref(self) -> PullRequestRef {
        PullRequestRef {
            number: self.number,
            url: self.url,
            head: self.head_ref_name,
            base: self.base_ref_name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GhCheck {
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhJob {
    #[serde(default)]
    database_id: Option<u64>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    conclusion: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GhRunJobs {
    #[serde(default)]
    jobs: Vec<GhJob>,
}

impl GhCli {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = Some(repo.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    async fn gh(&self, args: Vec<String>) -> CollabResult<CommandOutput> {
        let mut args = args;
        if let Some(repo) = &self.repo {
            args.push("--repo".to_string());
            args.push(repo.clone());
        }
        let out = run_command("gh", &args, self.cwd.as_deref(), &[]).await?;
        if !out.success {
            let lower = out.stderr.to_lowercase();
            if lower.contains("gh auth login") || lower.contains("authentication") {
                return Err(CollabError::Unavailable(
                    "GitHub CLI not authenticated; run `gh auth login`".to_string(),
                ));
            }
        }
        Ok(out)
    }

    async fn gh_checked(&self, args: Vec<String>) -> CollabResult<String> {
        let display = join_args(&args);
        let out = self.gh(args).await?;
        if !out.success {
            return Err(CollabError::CommandFailed {
                program: "gh".to_string(),
                args: display,
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(out.stdout_trimmed().to_string())
    }

    async fn view_pr(&self, number: u64) -> CollabResult<GhPr> {
        let out = self
            .gh(args(&[
                "pr",
                "view",
                number.to_string().as_str(),
                "--json",
                "number,title,url,headRefName,baseRefName",
            ]))
            .await?;
        if !out.success {
            return Err(CollabError::PullRequestNotFound { number });
        }
        Ok(serde_json::from_str(out.stdout_trimmed())?)
    }

    /// Logs of the failed jobs of one Actions run.
    async fn failed_job_logs(&self, check_name: &str, run_id: &str) -> CollabResult<Vec<String>> {
        let jobs_json = self
            .gh_checked(args(&["run", "view", run_id, "--json", "jobs"]))
            .await?;
        let jobs: GhRunJobs = serde_json::from_str(&jobs_json)?;

        let mut logs = Vec::new();
        for job in jobs
            .jobs
            .into_iter()
            .filter(|j| j.conclusion.as_deref() == Some("failure"))
        {
            let Some(job_id) = job.database_id else {
                continue;
            };
            let out = self
                .gh(args(&["run", "view", "--job", job_id.to_string().as_str(), "--log-failed"]))
                .await?;
            if out.success && !out.stdout_trimmed().is_empty() {
                logs.push(format!("=== {check_name} - {} ===", job.name));
                logs.push(out.stdout_trimmed().to_string());
                logs.push(String::new());
            }
        }
        Ok(logs)
    }
}

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Parse `gh pr checks --json name,state,link` output.
pub fn parse_checks(json: &str) -> CollabResult<Vec<CiCheck>> {
    let raw: Vec<GhCheck> = serde_json::from_str(json)?;
    Ok(raw
        .into_iter()
        .map(|c| CiCheck {
            name: if c.name.is_empty() {
                "unknown".to_string()
            } else {
                c.name
            },
            state: CheckState::from_forge_state(&c.state),
            url: c.link,
        })
        .collect())
}

/// PR number from a pull request URL (`.../pull/42`).
pub fn parse_pr_number(url: &str) -> Option<u64> {
    let re = Regex::new(r"/pull/(\d+)").ok()?;
    re.captures(url)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Actions run id embedded in a check link (`.../actions/runs/123/job/4`).
pub fn parse_run_id(link: &str) -> Option<String> {
    let re = Regex::new(r"/actions/runs/(\d+)").ok()?;
    re.captures(link)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

#[async_trait]
impl Forge for GhCli {
    async fn find_pr_for_branch(&self, head: &str) -> CollabResult<Option<PullRequestRef>> {
        let json = self
            .gh_checked(args(&[
                "pr",
                "list",
                "--head",
                head,
                "--state",
                "open",
                "--json",
                "number,title,url,headRefName,baseRefName",
            ]))
            .await?;
        let prs: Vec<GhPr> = serde_json::from_str(&json)?;
        Ok(prs.into_iter().next().map(GhPr::into_ref))
    }

    async fn create_pr(&self, pr: NewPullRequest) -> CollabResult<PullRequestRef> {
        let url = self
            .gh_checked(args(&[
                "pr", "create", "--title", pr.title.as_str(), "--body", pr.body.as_str(), "--base", pr.base.as_str(),
                "--head", pr.head.as_str(),
            ]))
            .await?;
        let url = url.lines().last().unwrap_or_default().trim().to_string();
        let number = parse_pr_number(&url).ok_or_else(|| CollabError::CommandFailed {
            program: "gh".to_string(),
            args: "pr create".to_string(),
            stderr: format!("could not parse PR number from {url:?}"),
        })?;
        info!(number, url = %url, head = %pr.head, base = %pr.base, "created pull request");
        Ok(PullRequestRef {
            number,
            url,
            head: pr.head,
            base: pr.base,
        })
    }

    async fn update_pr_base(&self, number: u64, base: &str) -> CollabResult<()> {
        self.gh_checked(args(&["pr", "edit", number.to_string().as_str(), "--base", base]))
            .await?;
        debug!(number, base, "retargeted pull request");
        Ok(())
    }

    async fn all_prs_status(&self) -> CollabResult<Vec<PrStatus>> {
        let json = self
            .gh_checked(args(&[
                "pr",
                "list",
                "--author",
                "@me",
                "--state",
                "open",
                "--json",
                "number,title,url,headRefName,baseRefName",
            ]))
            .await?;
        let prs: Vec<GhPr> = serde_json::from_str(&json)?;

        let mut statuses = Vec::with_capacity(prs.len());
        for pr in prs {
            let checks = self.pr_checks(pr.number).await?;
            let ci_status = CiStatus::from_checks(&checks);
            let title = pr.title.clone();
            statuses.push(PrStatus {
                pr: pr.into_ref(),
                title,
                repo: self.repo.clone().unwrap_or_default(),
                checks,
                ci_status,
            });
        }
        Ok(statuses)
    }

    async fn pr_checks(&self, number: u64) -> CollabResult<Vec<CiCheck>> {
        // `gh pr checks` exits non-zero while checks fail or are pending, so
        // the exit code is ignored as long as stdout is valid JSON.
        let out = self
            .gh(args(&[
                "pr",
                "checks",
                number.to_string().as_str(),
                "--json",
                "name,state,link",
            ]))
            .await?;
        if out.stdout_trimmed().is_empty() {
            if out.stderr.to_lowercase().contains("no checks") {
                return Ok(Vec::new());
            }
            if !out.success {
                return Err(CollabError::PullRequestNotFound { number });
            }
            return Ok(Vec::new());
        }
        parse_checks(out.stdout_trimmed())
    }

    async fn ci_logs(&self, number: u64, check: Option<&str>) -> CollabResult<String> {
        let mut failed = self.failed_checks(number).await?;
        if let Some(name) = check {
            failed.retain(|c| c.name == name);
        }
        if failed.is_empty() {
            return Ok(match check {
                Some(name) => format!("Check '{name}' not found or not failing"),
                None => "No failed checks found".to_string(),
            });
        }

        let mut logs = Vec::new();
        for c in &failed {
            let Some(run_id) = c.url.as_deref().and_then(parse_run_id) else {
                continue;
            };
            logs.extend(self.failed_job_logs(&c.name, &run_id).await?);
        }

        if logs.is_empty() {
            return Ok(
                "Could not retrieve failure logs. Check the GitHub Actions UI directly.".to_string(),
            );
        }
        Ok(logs.join("\n"))
    }

    async fn pr_branch(&self, number: u64) -> CollabResult<String> {
        Ok(self.view_pr(number).await?.head_ref_name)
    }
}
