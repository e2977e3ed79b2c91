//! Local process execution: shell commands and git.

use std::path::Path;
use std::process::Stdio;
use std::time::Instant;

use tokio::process::Command;
use tracing::debug;

use repoflow_core::{CommandOutput, CommandSpec, VcsError};

/// Placeholder push URL that makes every push from a read-only tree fail.
pub const DISABLED_PUSH_URL: &str = "DISABLED";

#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        ProcessRunner
    }

    /// Run `spec.run` through `sh -c`.
    ///
    /// A non-zero exit is reported in the output, not as an error. The child
    /// is killed if the returned future is dropped, so an outer timeout stops
    /// it too.
    pub async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, VcsError> {
        let start = Instant::now();
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&spec.run)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let output = command.spawn()?.wait_with_output().await?;
        let exit_code = output.status.code().unwrap_or(-1);
        debug!(
            run = %spec.run,
            exit_code,
            duration_ms = start.elapsed().as_millis() as u64,
            "Command finished"
        );

        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    /// Run `git` with `args` in `dir`, returning trimmed stdout.
    pub async fn git(&self, dir: &Path, args: &[&str]) -> Result<String, VcsError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            // Never echo the arguments: fetch URLs may carry a token.
            return Err(VcsError::CommandFailed(format!(
                "git {} exited with {}: {}",
                args.first().copied().unwrap_or_default(),
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn spec(run: &str) -> CommandSpec {
        CommandSpec {
            run: run.to_string(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let out = ProcessRunner::new().run(&spec("echo hello")).await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_reports_exit_code() {
        let out = ProcessRunner::new()
            .run(&spec("echo oops >&2; exit 3"))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_run_passes_env_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();

        let mut command = spec("ls; echo \"pr=$PR_NUMBER\"");
        command.env.insert("PR_NUMBER".into(), "42".into());
        command.cwd = Some(dir.path().to_path_buf());

        let out = ProcessRunner::new().run(&command).await.unwrap();
        assert!(out.stdout.contains("marker.txt"));
        assert!(out.stdout.contains("pr=42"));
    }

    #[tokio::test]
    async fn test_env_values_are_not_shell_expanded() {
        let mut command = spec("printf '%s' \"$BODY\"");
        command.env.insert("BODY".into(), "$(echo injected)".into());
        let out = ProcessRunner::new().run(&command).await.unwrap();
        assert_eq!(out.stdout, "$(echo injected)");
    }

    #[tokio::test]
    async fn test_git_failure_is_command_failed() {
        let dir = tempfile::tempdir().unwrap();
        let err = ProcessRunner::new()
            .git(dir.path(), &["rev-parse", "HEAD"])
            .await
            .unwrap_err();
        assert!(matches!(err, VcsError::CommandFailed(msg) if msg.starts_with("git rev-parse")));
    }
}
