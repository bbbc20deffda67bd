//! Detect missing tools, install them, verify again.

use events::{Event, EventBus};
use launcher_core::{ToolCheck, ToolSpec};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::completion::{wait_for, CompletionListener};
use crate::error::{OrchestratorError, Result};
use crate::probe::{check_all, ToolProbe};
use crate::runner::{CommandRunner, ExecutionHandle, ExecutionRequest};
use crate::session::OutputTail;

/// Outcome of a successful resolver cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Satisfied,
    /// Installs succeeded but these tools are still not detected, usually
    /// because the current session's PATH predates the install.
    SatisfiedWithWarning(Vec<String>),
}

/// Per-tool state carried through one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResolution {
    pub tool: String,
    pub missing_initially: bool,
    pub install_attempt_succeeded: bool,
}

pub struct DependencyResolver {
    runner: Arc<dyn CommandRunner>,
    probe: Arc<dyn ToolProbe>,
    bus: EventBus,
    working_dir: PathBuf,
    install_timeout: Option<Duration>,
}

impl DependencyResolver {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        probe: Arc<dyn ToolProbe>,
        bus: EventBus,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            probe,
            bus,
            working_dir: working_dir.into(),
            install_timeout: None,
        }
    }

    pub fn with_install_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.install_timeout = timeout;
        self
    }

    /// Run every tool's check command and publish the result.
    pub async fn verify(&self, tools: &[ToolSpec]) -> Vec<ToolCheck> {
        let checks = check_all(self.probe.as_ref(), tools).await;
        self.bus.emit(Event::DependencyCheck {
            checks: checks.clone(),
        });
        checks
    }

    pub fn install_timeout(&self) -> Option<Duration> {
        self.install_timeout
    }

    /// Dispatch `tool`'s installer without waiting for it.
    ///
    /// The listener is subscribed before dispatch, so the completion
    /// record cannot be missed.
    pub fn start_install(&self, tool: &ToolSpec) -> Result<(CompletionListener, ExecutionHandle)> {
        let Some(command) = tool.install.as_deref() else {
            warn!(tool = %tool.name, "No installer configured");
            return Err(OrchestratorError::DependencyInstallFailure(tool.name.clone()));
        };

        info!(tool = %tool.name, command, "Installing tool");
        self.bus.emit(Event::system(format!(
            "\n> Auto-Installing {}...\n> Command: {}\n",
            tool.name, command
        )));

        let request = ExecutionRequest::new(command, Vec::new(), &self.working_dir)
            .with_label(tool.install_label());
        let listener = CompletionListener::new(&self.bus);
        let handle = self.runner.execute(request)?;
        Ok((listener, handle))
    }

    /// Dispatch `tool`'s installer and wait for its exit code.
    pub async fn install(&self, tool: &ToolSpec, tail: &mut OutputTail) -> Result<i32> {
        let (listener, handle) = self.start_install(tool)?;
        wait_for(listener, &handle, self.install_timeout, |chunk| tail.push(chunk)).await
    }

    /// One check / install / re-check cycle over `tools`.
    pub async fn resolve(&self, tools: &[ToolSpec], tail: &mut OutputTail) -> Result<Resolution> {
        self.bus.emit(Event::system("\n> Checking dependencies...\n"));

        let checks = self.verify(tools).await;
        let mut states: Vec<ToolResolution> = checks
            .iter()
            .map(|c| ToolResolution {
                tool: c.name.clone(),
                missing_initially: !c.is_installed(),
                install_attempt_succeeded: false,
            })
            .collect();

        if states.iter().all(|s| !s.missing_initially) {
            return Ok(Resolution::Satisfied);
        }

        for (tool, state) in tools.iter().zip(states.iter_mut()) {
            if !state.missing_initially {
                continue;
            }

            let exit_code = self.install(tool, tail).await.map_err(|e| match e {
                OrchestratorError::DispatchFailure { .. } => {
                    OrchestratorError::DependencyInstallFailure(tool.name.clone())
                }
                other => other,
            })?;

            if exit_code != 0 {
                warn!(tool = %tool.name, exit_code, "Tool installation failed");
                return Err(OrchestratorError::DependencyInstallFailure(tool.name.clone()));
            }
            state.install_attempt_succeeded = true;
        }

        let rechecks = self.verify(tools).await;
        let still_missing: Vec<&ToolResolution> = rechecks
            .iter()
            .zip(states.iter())
            .filter(|(check, _)| !check.is_installed())
            .map(|(_, state)| state)
            .collect();

        if still_missing.is_empty() {
            info!("All dependencies verified");
            return Ok(Resolution::Satisfied);
        }

        let names: Vec<String> = still_missing.iter().map(|s| s.tool.clone()).collect();
        if still_missing.iter().all(|s| s.install_attempt_succeeded) {
            warn!(tools = ?names, "Installed tools not detected yet");
            self.bus.emit(Event::system(format!(
                "\n> Installation succeeded but {} not detected yet. A new shell session may be required.\n",
                names.join(", ")
            )));
            Ok(Resolution::SatisfiedWithWarning(names))
        } else {
            Err(OrchestratorError::DependencyVerificationFailure(names))
        }
    }
}
