//! External command execution shared by the CLI-backed adapters.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::error::{CollabError, CollabResult};

/// Captured result of an external command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code (-1 when killed by a signal).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl CommandOutput {
    /// Trimmed stdout.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Run `program args...` in `cwd` and capture its output.
///
/// A missing executable is reported as [`CollabError::Unavailable`] and a
/// missing `cwd` as [`CollabError::WorkdirMissing`]; a non-zero exit is
/// *not* an error here, callers decide what it means.
pub async fn run_command<S: AsRef<str>>(
    program: &str,
    args: &[S],
    cwd: Option<&Path>,
    envs: &[(&str, &str)],
) -> CollabResult<CommandOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args.iter().map(|a| a.as_ref()))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    for (key, value) in envs {
        cmd.env(key, value);
    }

    debug!(program, args = %join_args(args), "running command");

    let output = cmd.output().await.map_err(|e| {
        if e.kind() != std::io::ErrorKind::NotFound {
            return CollabError::Io(e);
        }
        match cwd {
            Some(dir) if !dir.is_dir() => CollabError::WorkdirMissing {
                path: dir.display().to_string(),
            },
            _ => CollabError::Unavailable(format!("{program} is not installed or not on PATH")),
        }
    })?;

    Ok(CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        success: output.status.success(),
    })
}

/// Run a command and return its trimmed stdout, failing on non-zero exit.
pub async fn run_checked<S: AsRef<str>>(
    program: &str,
    args: &[S],
    cwd: Option<&Path>,
) -> CollabResult<String> {
    let output = run_command(program, args, cwd, &[]).await?;
    if !output.success {
        return Err(CollabError::CommandFailed {
            program: program.to_string(),
            args: join_args(args),
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output.stdout_trimmed().to_string())
}

pub(crate) fn join_args<S: AsRef<str>>(args: &[S]) -> String {
    args.iter().map(|a| a.as_ref()).collect::<Vec<_>>().join(" ")
}
