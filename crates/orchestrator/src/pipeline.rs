//! Sequencing phases and classifying their outcomes.

use events::{Event, EventBus};
use launcher_core::{Phase, PhaseId, PhaseStatus, PipelineSection, ToolSpec};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::advisor::{Advice, Advisor};
use crate::completion::{wait_for, CompletionListener};
use crate::error::{OrchestratorError, Result};
use crate::readiness::{NotReady, ReadinessChecker};
use crate::resolver::{DependencyResolver, Resolution};
use crate::runner::{CommandRunner, ExecutionHandle, ExecutionRequest};
use crate::session::PipelineSession;
use crate::state_machine::PhaseStateMachine;

/// Bound on waiting for a stopped service to exit before starting it again.
const DETACHED_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of one `run_pipeline` call.
#[derive(Debug, Clone, serde::Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PipelineReport {
    pub success: bool,
    pub statuses: BTreeMap<PhaseId, PhaseStatus>,
    pub failed_phase: Option<PhaseId>,
    pub error: Option<String>,
    pub advice: Option<Advice>,
}

pub struct PhaseOrchestrator {
    runner: Arc<dyn CommandRunner>,
    resolver: DependencyResolver,
    advisor: Option<Arc<dyn Advisor>>,
    bus: EventBus,
    settings: PipelineSection,
    tools: Vec<ToolSpec>,
    working_dir: PathBuf,
    env: HashMap<String, String>,
}

impl PhaseOrchestrator {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        resolver: DependencyResolver,
        bus: EventBus,
        settings: PipelineSection,
        tools: Vec<ToolSpec>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            resolver,
            advisor: None,
            bus,
            settings,
            tools,
            working_dir: working_dir.into(),
            env: HashMap::new(),
        }
    }

    pub fn with_advisor(mut self, advisor: Option<Arc<dyn Advisor>>) -> Self {
        self.advisor = advisor;
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn has_advisor(&self) -> bool {
        self.advisor.is_some()
    }

    pub fn tool(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Run one phase to a settled status.
    ///
    /// The phase is `error` if its dependencies cannot be resolved, its
    /// command cannot be launched, it exits non-zero or it never becomes
    /// ready. The cause is returned as the error.
    pub async fn run_single_phase(&self, session: &mut PipelineSession, phase: &Phase) -> Result<()> {
        session.begin(phase)?;
        info!(phase_id = phase.id, phase = %phase.name, "Starting phase");

        let result = self.execute_phase(session, phase).await;
        let status = match &result {
            Ok(()) => PhaseStatus::Success,
            Err(e) => {
                error!(phase_id = phase.id, phase = %phase.name, error = %e, "Phase failed");
                self.bus.emit(Event::system(format!("\n> Phase failed: {}\n", e)));
                PhaseStatus::Error
            }
        };
        session.finish(phase.id, status)?;

        result
    }

    async fn execute_phase(&self, session: &mut PipelineSession, phase: &Phase) -> Result<()> {
        if !phase.requires.is_empty() {
            let tools = self.required_tools(phase)?;
            if let Resolution::SatisfiedWithWarning(missing) =
                self.resolver.resolve(&tools, session.tail_mut()).await?
            {
                warn!(phase_id = phase.id, tools = ?missing, "Continuing with undetected tools");
            }
        }

        if phase.is_detached() {
            self.stop_detached(session, Some(phase.id)).await;
        }

        let request = ExecutionRequest::for_phase(phase, &self.working_dir).with_env(&self.env);
        let listener = CompletionListener::new(&self.bus);
        let handle = self.runner.execute(request)?;
        session.set_in_flight(handle.clone());

        if phase.is_detached() {
            self.await_detached(session, phase, listener, handle).await
        } else {
            let timeout = phase.timeout().or(self.settings.correlation_timeout());
            let exit_code = {
                let tail = session.tail_mut();
                wait_for(listener, &handle, timeout, |chunk| tail.push(chunk)).await?
            };

            match PhaseStateMachine::outcome(exit_code) {
                PhaseStatus::Success => Ok(()),
                _ => Err(OrchestratorError::NonZeroExit {
                    label: handle.label.clone(),
                    exit_code,
                }),
            }
        }
    }

    async fn await_detached(
        &self,
        session: &mut PipelineSession,
        phase: &Phase,
        listener: CompletionListener,
        handle: ExecutionHandle,
    ) -> Result<()> {
        session.hold_detached(phase.id, handle.clone());

        let Some(probe) = phase.readiness.as_ref() else {
            // Success after the grace period whether or not the process is serving
            let grace = self.settings.grace_period();
            info!(phase_id = phase.id, ?grace, "Detached phase, waiting grace period");
            tokio::time::sleep(grace).await;
            return Ok(());
        };

        let checker = ReadinessChecker::new(
            self.settings.readiness_interval(),
            self.settings.readiness_timeout(),
        );
        let cancel = handle.cancellation_token();
        let tail = session.tail_mut();

        tokio::select! {
            ready = checker.wait_until_ready(probe, &cancel) => match ready {
                Ok(()) => Ok(()),
                Err(NotReady::TimedOut(waited)) => {
                    handle.cancel();
                    Err(OrchestratorError::ReadinessTimeout {
                        label: handle.label.clone(),
                        probe: probe.describe(),
                        waited,
                    })
                }
                Err(NotReady::Cancelled) => Err(OrchestratorError::Cancelled),
            },
            exited = listener.wait(handle.id, |chunk| tail.push(chunk)) => {
                let exit_code = exited?;
                Err(OrchestratorError::ExitedBeforeReady {
                    label: handle.label.clone(),
                    exit_code,
                })
            }
        }
    }

    /// Stop held detached processes and wait for each to exit, so a new
    /// copy of a service never starts next to the old one.
    async fn stop_detached(&self, session: &mut PipelineSession, phase_id: Option<PhaseId>) {
        for handle in session.take_detached(phase_id) {
            info!(execution_id = %handle.id, label = %handle.label, "Stopping previous service");
            handle.cancel();
            if tokio::time::timeout(DETACHED_STOP_TIMEOUT, handle.finished()).await.is_err() {
                warn!(
                    execution_id = %handle.id,
                    timeout = ?DETACHED_STOP_TIMEOUT,
                    "Previous service did not exit in time"
                );
            }
        }
    }

    fn required_tools(&self, phase: &Phase) -> Result<Vec<ToolSpec>> {
        phase
            .requires
            .iter()
            .map(|name| {
                self.tool(name)
                    .cloned()
                    .ok_or_else(|| OrchestratorError::UnknownTool(name.clone()))
            })
            .collect()
    }

    /// Run every configured phase in order, halting at the first failure.
    pub async fn run_pipeline(&self, session: &mut PipelineSession, ai_assisted: bool) -> Result<PipelineReport> {
        session.reset()?;
        self.stop_detached(session, None).await;
        let phases = session.phases().to_vec();

        info!(phases = phases.len(), ai_assisted, "Starting pipeline");
        self.bus.emit(Event::PipelineStarted {
            phase_count: phases.len(),
            ai_assisted,
        });

        let mut failure: Option<(PhaseId, OrchestratorError)> = None;
        for phase in &phases {
            if let Err(e) = self.run_single_phase(session, phase).await {
                failure = Some((phase.id, e));
                break;
            }
        }

        let mut report = PipelineReport {
            success: failure.is_none(),
            statuses: session.statuses().clone(),
            failed_phase: failure.as_ref().map(|(id, _)| *id),
            error: failure.as_ref().map(|(_, e)| e.to_string()),
            advice: None,
        };

        if let (Some((phase_id, _)), true) = (&failure, ai_assisted) {
            report.advice = self.troubleshoot(Some(*phase_id), session.tail().as_str()).await;
        }

        info!(success = report.success, failed_phase = ?report.failed_phase, "Pipeline finished");
        self.bus.emit(Event::PipelineFinished {
            success: report.success,
            failed_phase: report.failed_phase,
        });

        Ok(report)
    }

    /// Ask the advisor about `output` and publish its answer.
    ///
    /// Returns `None` when no advisor is configured or the request fails.
    pub async fn troubleshoot(&self, phase_id: Option<PhaseId>, output: &str) -> Option<Advice> {
        let advisor = self.advisor.as_ref()?;
        self.bus.emit(Event::system("\n> Analyzing logs...\n"));

        match advisor.advise(output).await {
            Ok(advice) => {
                self.bus.emit(Event::Advice {
                    phase_id,
                    analysis: advice.analysis.clone(),
                    suggested_command: advice.suggested_command.clone(),
                });
                Some(advice)
            }
            Err(e) => {
                warn!(error = %e, "Advisor request failed");
                self.bus.emit(Event::Error {
                    message: format!("Failed to analyze: {}", e),
                    context: Some("advisor".to_string()),
                });
                None
            }
        }
    }

    /// Run one tool's installer and report its exit code.
    pub async fn install_tool(&self, session: &mut PipelineSession, name: &str) -> Result<i32> {
        let tool = self
            .tool(name)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownTool(name.to_string()))?;

        session.begin_install(&tool.name)?;
        let result = self.await_install(session, &tool).await;
        session.finish_install();

        if let Err(e) = &result {
            error!(tool = %tool.name, error = %e, "Tool install failed");
        }
        result
    }

    async fn await_install(&self, session: &mut PipelineSession, tool: &ToolSpec) -> Result<i32> {
        let (listener, handle) = self.resolver.start_install(tool)?;
        session.set_in_flight(handle.clone());

        let timeout = self.resolver.install_timeout();
        let tail = session.tail_mut();
        wait_for(listener, &handle, timeout, |chunk| tail.push(chunk)).await
    }
}
