//! Single-flight ownership of the pipeline session.
//!
//! One controlling task owns the [`PipelineSession`]. Triggers submit
//! [`Intent`]s through an [`OrchestratorHandle`]; while an intent is being
//! worked on, every further intent is answered with `Busy`.

use launcher_core::{Phase, PhaseId};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{OrchestratorError, Result};
use crate::pipeline::{PhaseOrchestrator, PipelineReport};
use crate::session::{PipelineSession, SessionSnapshot};

const INTENT_QUEUE_CAPACITY: usize = 32;

/// Which phase a `RunPhase` intent refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseTarget {
    Id(PhaseId),
    AdHoc { command: String, args: Vec<String> },
}

/// Acknowledgement channel plus result channel of one intent.
pub struct Reply<T> {
    ack: oneshot::Sender<Result<()>>,
    done: oneshot::Sender<Result<T>>,
}

impl<T> Reply<T> {
    fn reject(self, err: OrchestratorError) {
        let _ = self.ack.send(Err(err));
    }

    fn accept(self) -> oneshot::Sender<Result<T>> {
        let _ = self.ack.send(Ok(()));
        self.done
    }
}

pub enum Intent {
    RunPipeline {
        ai_assisted: bool,
        reply: Reply<PipelineReport>,
    },
    RunPhase {
        target: PhaseTarget,
        reply: Reply<()>,
    },
    InstallTool {
        tool: String,
        reply: Reply<i32>,
    },
    Reset {
        reply: Reply<()>,
    },
}

impl Intent {
    pub fn name(&self) -> &'static str {
        match self {
            Intent::RunPipeline { .. } => "run_pipeline",
            Intent::RunPhase { .. } => "run_phase",
            Intent::InstallTool { .. } => "install_tool",
            Intent::Reset { .. } => "reset",
        }
    }

    fn reject(self, err: OrchestratorError) {
        match self {
            Intent::RunPipeline { reply, .. } => reply.reject(err),
            Intent::RunPhase { reply, .. } => reply.reject(err),
            Intent::InstallTool { reply, .. } => reply.reject(err),
            Intent::Reset { reply } => reply.reject(err),
        }
    }
}

/// Result of an accepted intent, available once the work settles.
pub struct Ticket<T> {
    done: oneshot::Receiver<Result<T>>,
}

impl<T> Ticket<T> {
    pub async fn wait(self) -> Result<T> {
        self.done.await.map_err(|_| OrchestratorError::ChannelClosed)?
    }
}

/// Cloneable front of the controlling task.
#[derive(Clone)]
pub struct OrchestratorHandle {
    intents: mpsc::Sender<Intent>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl OrchestratorHandle {
    async fn submit<T>(&self, build: impl FnOnce(Reply<T>) -> Intent) -> Result<Ticket<T>> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let intent = build(Reply {
            ack: ack_tx,
            done: done_tx,
        });

        self.intents
            .send(intent)
            .await
            .map_err(|_| OrchestratorError::ChannelClosed)?;
        ack_rx.await.map_err(|_| OrchestratorError::ChannelClosed)??;

        Ok(Ticket { done: done_rx })
    }

    pub async fn run_pipeline(&self, ai_assisted: bool) -> Result<Ticket<PipelineReport>> {
        self.submit(|reply| Intent::RunPipeline { ai_assisted, reply }).await
    }

    pub async fn run_phase(&self, target: PhaseTarget) -> Result<Ticket<()>> {
        self.submit(|reply| Intent::RunPhase { target, reply }).await
    }

    pub async fn install_tool(&self, tool: impl Into<String>) -> Result<Ticket<i32>> {
        let tool = tool.into();
        self.submit(|reply| Intent::InstallTool { tool, reply }).await
    }

    pub async fn reset(&self) -> Result<()> {
        self.submit(|reply| Intent::Reset { reply }).await?.wait().await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }
}

pub struct Controller {
    orchestrator: Arc<PhaseOrchestrator>,
    session: PipelineSession,
    intents: mpsc::Receiver<Intent>,
}

impl Controller {
    pub fn new(orchestrator: Arc<PhaseOrchestrator>, session: PipelineSession) -> (Self, OrchestratorHandle) {
        let (tx, rx) = mpsc::channel(INTENT_QUEUE_CAPACITY);
        let handle = OrchestratorHandle {
            intents: tx,
            snapshots: session.subscribe(),
        };
        let controller = Self {
            orchestrator,
            session,
            intents: rx,
        };
        (controller, handle)
    }

    /// Process intents until every handle is dropped.
    pub async fn run(mut self) {
        info!("Orchestrator controller started");
        while let Some(intent) = self.intents.recv().await {
            debug!(intent = intent.name(), "Intent received");
            self.handle(intent).await;
        }
        self.session.shutdown();
        info!("Orchestrator controller stopped");
    }

    async fn handle(&mut self, intent: Intent) {
        let Self {
            orchestrator,
            session,
            intents,
        } = self;

        match intent {
            Intent::RunPipeline { ai_assisted, reply } => {
                let done = reply.accept();
                let result = drive(orchestrator.run_pipeline(session, ai_assisted), intents).await;
                let _ = done.send(result);
            }
            Intent::RunPhase { target, reply } => {
                let phase = match target {
                    PhaseTarget::Id(id) => match session.phase(id).cloned() {
                        Some(phase) => phase,
                        None => return reply.reject(OrchestratorError::UnknownPhase(id)),
                    },
                    PhaseTarget::AdHoc { command, args } => Phase::ad_hoc(command, args),
                };
                let done = reply.accept();
                let result = drive(orchestrator.run_single_phase(session, &phase), intents).await;
                let _ = done.send(result);
            }
            Intent::InstallTool { tool, reply } => {
                if orchestrator.tool(&tool).is_none() {
                    return reply.reject(OrchestratorError::UnknownTool(tool));
                }
                let done = reply.accept();
                let result = drive(orchestrator.install_tool(session, &tool), intents).await;
                let _ = done.send(result);
            }
            Intent::Reset { reply } => {
                let done = reply.accept();
                let _ = done.send(session.reset());
            }
        }
    }
}

/// Await `work`, answering every intent that arrives meanwhile with `Busy`.
async fn drive<F, T>(work: F, intents: &mut mpsc::Receiver<Intent>) -> T
where
    F: Future<Output = T>,
{
    tokio::pin!(work);
    loop {
        tokio::select! {
            out = &mut work => return out,
            Some(intent) = intents.recv() => {
                debug!(intent = intent.name(), "Rejecting intent, busy");
                intent.reject(OrchestratorError::Busy);
            }
        }
    }
}

/// Start the controlling task.
pub fn spawn(orchestrator: PhaseOrchestrator, session: PipelineSession) -> (OrchestratorHandle, JoinHandle<()>) {
    let (controller, handle) = Controller::new(Arc::new(orchestrator), session);
    let task = tokio::spawn(controller.run());
    (handle, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::DependencyResolver;
    use crate::runner::CommandRunner;
    use crate::testing::{ScriptedProbe, ScriptedRunner};
    use events::EventBus;
    use launcher_core::{PhaseStatus, PipelineSection, ToolSpec};

    fn start(runner: &ScriptedRunner, bus: &EventBus, phases: Vec<Phase>) -> OrchestratorHandle {
        let shared: Arc<dyn CommandRunner> = Arc::new(runner.clone());
        let resolver = DependencyResolver::new(shared.clone(), Arc::new(ScriptedProbe::new()), bus.clone(), ".");
        let orchestrator = PhaseOrchestrator::new(
            shared,
            resolver,
            bus.clone(),
            PipelineSection::default(),
            vec![ToolSpec::new("NPM", "npm --version").with_install("npm install -g npm")],
            ".",
        );
        let session = PipelineSession::new(phases, 1000, bus.clone());
        let (handle, _task) = spawn(orchestrator, session);
        handle
    }

    async fn wait_until_held(runner: &ScriptedRunner, command_line: &str) {
        while !runner.dispatched().iter().any(|c| c == command_line) {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_run_phase_by_id() {
        let bus = EventBus::new();
        let runner = ScriptedRunner::new(bus.clone());
        let handle = start(&runner, &bus, vec![Phase::new(1, "Build", "npm run build", &[])]);

        handle.run_phase(PhaseTarget::Id(1)).await.unwrap().wait().await.unwrap();

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.status(1), Some(PhaseStatus::Success));
        assert_eq!(snapshot.current_phase, Some(1));
        assert!(!snapshot.is_busy());
    }

    #[tokio::test]
    async fn test_unknown_phase_rejected_at_submit() {
        let bus = EventBus::new();
        let runner = ScriptedRunner::new(bus.clone());
        let handle = start(&runner, &bus, vec![]);

        let result = handle.run_phase(PhaseTarget::Id(9)).await;
        assert!(matches!(result, Err(OrchestratorError::UnknownPhase(9))));
    }

    #[tokio::test]
    async fn test_unknown_tool_rejected_at_submit() {
        let bus = EventBus::new();
        let runner = ScriptedRunner::new(bus.clone());
        let handle = start(&runner, &bus, vec![]);

        let result = handle.install_tool("Rust").await;
        assert!(matches!(result, Err(OrchestratorError::UnknownTool(_))));
    }

    #[tokio::test]
    async fn test_intents_rejected_while_pipeline_runs() {
        let bus = EventBus::new();
        let runner = ScriptedRunner::new(bus.clone());
        runner.hang("npm install");
        let handle = start(
            &runner,
            &bus,
            vec![
                Phase::new(1, "Install", "npm install", &[]),
                Phase::new(2, "Build", "npm run build", &[]),
            ],
        );

        let ticket = handle.run_pipeline(false).await.unwrap();
        wait_until_held(&runner, "npm install").await;

        let ad_hoc = handle
            .run_phase(PhaseTarget::AdHoc {
                command: "docker".to_string(),
                args: vec!["ps".to_string()],
            })
            .await;
        assert!(matches!(ad_hoc, Err(OrchestratorError::Busy)));
        assert!(matches!(handle.reset().await, Err(OrchestratorError::Busy)));
        assert!(matches!(handle.install_tool("NPM").await, Err(OrchestratorError::Busy)));
        assert!(handle.snapshot().is_busy());

        assert!(runner.finish("npm install", 0));
        let report = ticket.wait().await.unwrap();
        assert!(report.success);
        assert_eq!(runner.dispatched(), vec!["npm install", "npm run build"]);
    }

    #[tokio::test]
    async fn test_ad_hoc_phase_runs_when_idle() {
        let bus = EventBus::new();
        let runner = ScriptedRunner::new(bus.clone());
        runner.script("docker ps", 1);
        let handle = start(&runner, &bus, vec![]);

        let result = handle
            .run_phase(PhaseTarget::AdHoc {
                command: "docker".to_string(),
                args: vec!["ps".to_string()],
            })
            .await
            .unwrap()
            .wait()
            .await;

        assert!(matches!(result, Err(OrchestratorError::NonZeroExit { exit_code: 1, .. })));
    }

    #[tokio::test]
    async fn test_install_tool_reports_exit_code() {
        let bus = EventBus::new();
        let runner = ScriptedRunner::new(bus.clone());
        runner.script("npm install -g npm", 0);
        let handle = start(&runner, &bus, vec![]);

        let exit_code = handle.install_tool("NPM").await.unwrap().wait().await.unwrap();
        assert_eq!(exit_code, 0);
        assert_eq!(runner.labels(), vec!["install-NPM"]);
    }

    #[tokio::test]
    async fn test_install_tool_reports_busy_while_running() {
        let bus = EventBus::new();
        let runner = ScriptedRunner::new(bus.clone());
        runner.hang("npm install -g npm");
        let handle = start(&runner, &bus, vec![Phase::new(1, "Build", "npm run build", &[])]);

        let ticket = handle.install_tool("NPM").await.unwrap();
        wait_until_held(&runner, "npm install -g npm").await;

        let snapshot = handle.snapshot();
        assert!(snapshot.is_busy());
        assert_eq!(snapshot.installing.as_deref(), Some("NPM"));
        assert!(matches!(
            handle.run_phase(PhaseTarget::Id(1)).await,
            Err(OrchestratorError::Busy)
        ));

        assert!(runner.finish("npm install -g npm", 0));
        assert_eq!(ticket.wait().await.unwrap(), 0);
        assert!(!handle.snapshot().is_busy());
    }

    #[tokio::test]
    async fn test_reset_after_run() {
        let bus = EventBus::new();
        let runner = ScriptedRunner::new(bus.clone());
        runner.script("npm run build", 1);
        let handle = start(&runner, &bus, vec![Phase::new(1, "Build", "npm run build", &[])]);

        let _ = handle.run_phase(PhaseTarget::Id(1)).await.unwrap().wait().await;
        assert_eq!(handle.snapshot().status(1), Some(PhaseStatus::Error));

        handle.reset().await.unwrap();
        assert_eq!(handle.snapshot().status(1), Some(PhaseStatus::Pending));
    }
}
