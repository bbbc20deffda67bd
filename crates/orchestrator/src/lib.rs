pub mod advisor;
pub mod completion;
pub mod controller;
pub mod error;
pub mod lifecycle;
pub mod pipeline;
pub mod probe;
pub mod readiness;
pub mod resolver;
pub mod runner;
pub mod session;
pub mod state_machine;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use advisor::{extract_execute_block, Advice, Advisor, ChatCompletionsAdvisor};
pub use completion::{dispatch_and_wait, CompletionListener};
pub use controller::{spawn, Controller, Intent, OrchestratorHandle, PhaseTarget, Ticket};
pub use error::{OrchestratorError, Result};
pub use lifecycle::{LifecycleController, LifecycleFlow, LifecycleOutcome, StepOutcome};
pub use pipeline::{PhaseOrchestrator, PipelineReport};
pub use probe::{check_all, CommandProbe, ToolProbe};
pub use readiness::{NotReady, ReadinessChecker};
pub use resolver::{DependencyResolver, Resolution, ToolResolution};
pub use runner::{CommandRunner, ExecutionHandle, ExecutionRequest, ShellRunner};
pub use session::{OutputTail, PipelineSession, SessionSnapshot};
pub use state_machine::PhaseStateMachine;
