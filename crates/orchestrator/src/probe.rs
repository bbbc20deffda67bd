//! Tool presence checks.

use async_trait::async_trait;
use futures::future::join_all;
use launcher_core::{ToolCheck, ToolSpec};
use std::path::PathBuf;
use std::process::Stdio;
use tracing::debug;

use crate::runner::shell_command;

#[async_trait]
pub trait ToolProbe: Send + Sync {
    /// A tool is installed iff its check command exits 0.
    async fn check(&self, tool: &ToolSpec) -> ToolCheck;
}

/// Checks every tool concurrently; results keep the input order.
pub async fn check_all(probe: &dyn ToolProbe, tools: &[ToolSpec]) -> Vec<ToolCheck> {
    join_all(tools.iter().map(|tool| probe.check(tool))).await
}

/// Runs each check command through the platform shell.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    working_dir: PathBuf,
}

impl CommandProbe {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }
}

#[async_trait]
impl ToolProbe for CommandProbe {
    async fn check(&self, tool: &ToolSpec) -> ToolCheck {
        let output = shell_command(&tool.check)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let version = if stdout.trim().is_empty() {
                    String::from_utf8_lossy(&output.stderr).trim().to_string()
                } else {
                    stdout.trim().to_string()
                };
                debug!(tool = %tool.name, version = %version, "Tool found");
                ToolCheck::installed(&tool.name, version)
            }
            Ok(output) => {
                debug!(tool = %tool.name, status = ?output.status.code(), "Tool check failed");
                ToolCheck::missing(&tool.name)
            }
            Err(e) => {
                debug!(tool = %tool.name, error = %e, "Tool check could not run");
                ToolCheck::missing(&tool.name)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use launcher_core::ToolStatus;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_probe_reports_version() {
        let dir = tempfile::tempdir().unwrap();
        let probe = CommandProbe::new(dir.path());

        let check = probe
            .check(&ToolSpec::new("Echo", "echo v20.11.0"))
            .await;

        assert_eq!(check.status, ToolStatus::Installed);
        assert_eq!(check.version.as_deref(), Some("v20.11.0"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_probe_uses_stderr_when_stdout_empty() {
        let dir = tempfile::tempdir().unwrap();
        let probe = CommandProbe::new(dir.path());

        let check = probe
            .check(&ToolSpec::new("Java", "echo 'openjdk 21' >&2"))
            .await;

        assert!(check.is_installed());
        assert_eq!(check.version.as_deref(), Some("openjdk 21"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_probe_missing_tool() {
        let dir = tempfile::tempdir().unwrap();
        let probe = CommandProbe::new(dir.path());

        let checks = check_all(
            &probe,
            &[
                ToolSpec::new("Missing", "definitely-not-installed-xyz --version"),
                ToolSpec::new("Failing", "exit 1"),
                ToolSpec::new("Shell", "true"),
            ],
        )
        .await;

        assert_eq!(checks.len(), 3);
        assert_eq!(checks[0].status, ToolStatus::Missing);
        assert_eq!(checks[1].status, ToolStatus::Missing);
        assert!(checks[2].is_installed());
        assert_eq!(checks[2].version, None);
        assert_eq!(checks[2].name, "Shell");
    }
}
