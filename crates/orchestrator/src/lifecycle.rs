//! Stop, update and uninstall chains.

use events::{Event, EventBus};
use launcher_core::{CommandSpec, LifecycleSection};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::completion::dispatch_and_wait;
use crate::error::OrchestratorError;
use crate::runner::{CommandRunner, ExecutionRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum LifecycleFlow {
    Stop,
    Update,
    Uninstall,
}

impl LifecycleFlow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Update => "update",
            Self::Uninstall => "uninstall",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stop" => Some(Self::Stop),
            "update" => Some(Self::Update),
            "uninstall" => Some(Self::Uninstall),
            _ => None,
        }
    }
}

/// One command of a chain. `exit_code` is `None` when it could not be launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StepOutcome {
    pub label: String,
    pub exit_code: Option<i32>,
}

impl StepOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct LifecycleOutcome {
    pub flow: LifecycleFlow,
    pub success: bool,
    pub steps: Vec<StepOutcome>,
    /// Why the chain stopped early, if it did
    pub abort: Option<String>,
}

pub struct LifecycleController {
    runner: Arc<dyn CommandRunner>,
    bus: EventBus,
    working_dir: PathBuf,
    config: LifecycleSection,
}

impl LifecycleController {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        bus: EventBus,
        working_dir: impl Into<PathBuf>,
        config: LifecycleSection,
    ) -> Self {
        Self {
            runner,
            bus,
            working_dir: working_dir.into(),
            config,
        }
    }

    pub async fn run(&self, flow: LifecycleFlow) -> LifecycleOutcome {
        info!(flow = flow.as_str(), "Starting lifecycle flow");
        let outcome = match flow {
            LifecycleFlow::Stop => self.stop().await,
            LifecycleFlow::Update => self.update().await,
            LifecycleFlow::Uninstall => self.uninstall().await,
        };

        info!(flow = flow.as_str(), success = outcome.success, "Lifecycle flow finished");
        self.bus.emit(Event::LifecycleFinished {
            flow: flow.as_str().to_string(),
            success: outcome.success,
        });
        outcome
    }

    pub async fn stop(&self) -> LifecycleOutcome {
        self.say("\n> Stopping Services (Docker Compose Down)...\n");
        let step = self.step(&self.config.stop).await;
        self.say(&format!(
            "\n> Services stopped with code {}\n",
            display_code(step.exit_code)
        ));

        LifecycleOutcome {
            flow: LifecycleFlow::Stop,
            success: step.succeeded(),
            steps: vec![step],
            abort: None,
        }
    }

    /// Stop then clean. The result is the clean step's.
    pub async fn uninstall(&self) -> LifecycleOutcome {
        self.say("\n> Starting full uninstall...\n");

        let stop = self.step(&self.config.stop).await;
        if !stop.succeeded() && self.config.abort_uninstall_on_stop_failure {
            let reason = chain_abort(LifecycleFlow::Uninstall, &stop);
            self.say(&format!("\n> {}\n", reason));
            return LifecycleOutcome {
                flow: LifecycleFlow::Uninstall,
                success: false,
                steps: vec![stop],
                abort: Some(reason),
            };
        }

        self.say("\n> Services stopped. Cleaning files...\n");
        let clean = self.step(&self.config.clean).await;
        self.say(&format!(
            "\n> Clean complete with code {}. System reset.\n",
            display_code(clean.exit_code)
        ));

        LifecycleOutcome {
            flow: LifecycleFlow::Uninstall,
            success: clean.succeeded(),
            steps: vec![stop, clean],
            abort: None,
        }
    }

    /// Pull then reinstall; the reinstall only runs after a successful pull.
    pub async fn update(&self) -> LifecycleOutcome {
        self.say("\n> Checking for updates (Git Pull)...\n");

        let pull = self.step(&self.config.pull).await;
        if !pull.succeeded() {
            self.say(&format!(
                "\n> Git Pull Failed with code {}\n",
                display_code(pull.exit_code)
            ));
            let reason = chain_abort(LifecycleFlow::Update, &pull);
            return LifecycleOutcome {
                flow: LifecycleFlow::Update,
                success: false,
                steps: vec![pull],
                abort: Some(reason),
            };
        }

        self.say("\n> Git Pull Successful. Installing dependencies...\n");
        let reinstall = self.step(&self.config.reinstall).await;
        self.say(&format!(
            "\n> Update finished with code {}\n",
            display_code(reinstall.exit_code)
        ));

        LifecycleOutcome {
            flow: LifecycleFlow::Update,
            success: reinstall.succeeded(),
            steps: vec![pull, reinstall],
            abort: None,
        }
    }

    async fn step(&self, spec: &CommandSpec) -> StepOutcome {
        let request = ExecutionRequest::new(spec.command.clone(), spec.args.clone(), &self.working_dir);
        let label = request.label.clone();

        match dispatch_and_wait(self.runner.as_ref(), &self.bus, request, None, |_| {}).await {
            Ok((_, exit_code)) => StepOutcome {
                label,
                exit_code: Some(exit_code),
            },
            Err(e) => {
                warn!(step = %label, error = %e, "Lifecycle step failed to run");
                self.bus.emit(Event::Error {
                    message: e.to_string(),
                    context: Some(label.clone()),
                });
                StepOutcome {
                    label,
                    exit_code: None,
                }
            }
        }
    }

    fn say(&self, line: &str) {
        self.bus.emit(Event::system(line));
    }
}

fn display_code(exit_code: Option<i32>) -> String {
    exit_code.map_or_else(|| "none".to_string(), |c| c.to_string())
}

fn chain_abort(flow: LifecycleFlow, step: &StepOutcome) -> String {
    match step.exit_code {
        Some(exit_code) => OrchestratorError::ChainAbort {
            flow: flow.as_str().to_string(),
            step: step.label.clone(),
            exit_code,
        }
        .to_string(),
        None => format!("{} aborted: '{}' could not be launched", flow.as_str(), step.label),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;

    fn controller(runner: &ScriptedRunner, bus: &EventBus, config: LifecycleSection) -> LifecycleController {
        LifecycleController::new(Arc::new(runner.clone()), bus.clone(), ".", config)
    }

    #[tokio::test]
    async fn test_stop_reports_exit() {
        let bus = EventBus::new();
        let runner = ScriptedRunner::new(bus.clone());
        runner.script("npm run stop:services", 0);

        let outcome = controller(&runner, &bus, LifecycleSection::default())
            .run(LifecycleFlow::Stop)
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.steps.len(), 1);
    }

    #[tokio::test]
    async fn test_update_skips_reinstall_after_failed_pull() {
        let bus = EventBus::new();
        let runner = ScriptedRunner::new(bus.clone());
        runner.script("git pull", 1);

        let outcome = controller(&runner, &bus, LifecycleSection::default())
            .run(LifecycleFlow::Update)
            .await;

        assert!(!outcome.success);
        assert_eq!(runner.dispatched(), vec!["git pull"]);
        assert!(outcome.abort.unwrap().contains("git pull"));
    }

    #[tokio::test]
    async fn test_update_reports_reinstall_exit() {
        let bus = EventBus::new();
        let runner = ScriptedRunner::new(bus.clone());
        runner.script("git pull", 0);
        runner.script("npm install", 1);

        let outcome = controller(&runner, &bus, LifecycleSection::default())
            .run(LifecycleFlow::Update)
            .await;

        assert!(!outcome.success);
        assert_eq!(runner.dispatched(), vec!["git pull", "npm install"]);
        assert_eq!(outcome.steps[1].exit_code, Some(1));
    }

    #[tokio::test]
    async fn test_uninstall_cleans_after_failed_stop() {
        let bus = EventBus::new();
        let runner = ScriptedRunner::new(bus.clone());
        runner.script("npm run stop:services", 1);
        runner.script("npm run clean", 0);

        let outcome = controller(&runner, &bus, LifecycleSection::default())
            .run(LifecycleFlow::Uninstall)
            .await;

        assert!(outcome.success);
        assert_eq!(runner.dispatched(), vec!["npm run stop:services", "npm run clean"]);
    }

    #[tokio::test]
    async fn test_uninstall_can_abort_on_failed_stop() {
        let bus = EventBus::new();
        let runner = ScriptedRunner::new(bus.clone());
        runner.script("npm run stop:services", 1);

        let config = LifecycleSection {
            abort_uninstall_on_stop_failure: true,
            ..Default::default()
        };
        let outcome = controller(&runner, &bus, config).run(LifecycleFlow::Uninstall).await;

        assert!(!outcome.success);
        assert!(outcome.abort.is_some());
        assert_eq!(runner.dispatched(), vec!["npm run stop:services"]);
    }

    #[tokio::test]
    async fn test_dispatch_failure_counts_as_failed_step() {
        let bus = EventBus::new();
        let runner = ScriptedRunner::new(bus.clone());
        runner.fail_dispatch("git pull");

        let outcome = controller(&runner, &bus, LifecycleSection::default())
            .run(LifecycleFlow::Update)
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.steps[0].exit_code, None);
        assert!(outcome.abort.unwrap().contains("could not be launched"));
    }

    #[tokio::test]
    async fn test_lifecycle_finished_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let runner = ScriptedRunner::new(bus.clone());

        controller(&runner, &bus, LifecycleSection::default())
            .run(LifecycleFlow::Stop)
            .await;

        let mut finished = None;
        while let Ok(envelope) = rx.try_recv() {
            if let Event::LifecycleFinished { flow, success } = envelope.event {
                finished = Some((flow, success));
            }
        }
        assert_eq!(finished, Some(("stop".to_string(), true)));
    }

    #[test]
    fn test_flow_parse() {
        assert_eq!(LifecycleFlow::parse("update"), Some(LifecycleFlow::Update));
        assert_eq!(LifecycleFlow::parse("restart"), None);
        assert_eq!(LifecycleFlow::Uninstall.as_str(), "uninstall");
    }
}
