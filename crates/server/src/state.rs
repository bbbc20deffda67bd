use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use events::EventBus;
use launcher_core::{LauncherConfig, Phase, ToolSpec};
use orchestrator::{
    Advisor, ChatCompletionsAdvisor, CommandProbe, CommandRunner, Controller, DependencyResolver,
    LifecycleController, OrchestratorHandle, PhaseOrchestrator, PipelineSession, ShellRunner,
    ToolProbe,
};

use crate::routes::sse::{spawn_event_recorder, EventBuffer, SharedEventBuffer, DEFAULT_EVENT_BUFFER_SIZE};

/// Shared state of the HTTP surface.
///
/// Building one spawns the controlling task that owns the pipeline session,
/// so it must happen inside a tokio runtime.
#[derive(Clone)]
pub struct AppState {
    pub event_bus: EventBus,
    pub event_buffer: SharedEventBuffer,
    pub orchestrator: OrchestratorHandle,
    pub pipeline: Arc<PhaseOrchestrator>,
    pub lifecycle: Arc<LifecycleController>,
    pub probe: Arc<dyn ToolProbe>,
    pub config: Arc<LauncherConfig>,
    pub project_root: PathBuf,
}

impl AppState {
    /// State backed by real processes and, when configured, the advisor endpoint.
    pub fn new(config: LauncherConfig, project_root: impl AsRef<Path>) -> Self {
        let project_root = project_root.as_ref().to_path_buf();
        let event_bus = EventBus::new();
        let runner: Arc<dyn CommandRunner> = Arc::new(ShellRunner::new(event_bus.clone()));
        let probe: Arc<dyn ToolProbe> = Arc::new(CommandProbe::new(&project_root));
        let advisor = ChatCompletionsAdvisor::from_env(&config.advisor)
            .map(|advisor| Arc::new(advisor) as Arc<dyn Advisor>);

        Self::with_components(config, project_root, event_bus, runner, probe, advisor)
    }

    pub fn with_components(
        config: LauncherConfig,
        project_root: impl Into<PathBuf>,
        event_bus: EventBus,
        runner: Arc<dyn CommandRunner>,
        probe: Arc<dyn ToolProbe>,
        advisor: Option<Arc<dyn Advisor>>,
    ) -> Self {
        let project_root = project_root.into();

        let resolver = DependencyResolver::new(
            runner.clone(),
            probe.clone(),
            event_bus.clone(),
            &project_root,
        );
        let pipeline = Arc::new(
            PhaseOrchestrator::new(
                runner.clone(),
                resolver,
                event_bus.clone(),
                config.pipeline.clone(),
                config.tools.clone(),
                &project_root,
            )
            .with_advisor(advisor),
        );
        let lifecycle = Arc::new(LifecycleController::new(
            runner,
            event_bus.clone(),
            &project_root,
            config.lifecycle.clone(),
        ));

        let session = PipelineSession::new(
            config.phases.clone(),
            config.pipeline.output_tail_chars,
            event_bus.clone(),
        );
        let (controller, orchestrator) = Controller::new(pipeline.clone(), session);
        tokio::spawn(controller.run());

        let event_buffer = Arc::new(RwLock::new(EventBuffer::new(DEFAULT_EVENT_BUFFER_SIZE)));
        spawn_event_recorder(&event_bus, event_buffer.clone());

        Self {
            event_bus,
            event_buffer,
            orchestrator,
            pipeline,
            lifecycle,
            probe,
            config: Arc::new(config),
            project_root,
        }
    }

    pub fn phases(&self) -> &[Phase] {
        &self.config.phases
    }

    pub fn tools(&self) -> &[ToolSpec] {
        &self.config.tools
    }
}
