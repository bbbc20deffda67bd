//! Scripted collaborators for driving the orchestrator without real processes.

use async_trait::async_trait;
use events::{Event, EventBus, OutputStream};
use launcher_core::{ExecutionId, ToolCheck, ToolSpec};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{OrchestratorError, Result};
use crate::probe::ToolProbe;
use crate::runner::{CommandRunner, ExecutionHandle, ExecutionRequest, EXIT_CODE_UNKNOWN};

#[derive(Debug, Clone)]
enum Outcome {
    Exit { code: i32, output: Option<String> },
    Hang,
    DispatchFail,
}

#[derive(Default)]
struct RunnerState {
    scripts: HashMap<String, VecDeque<Outcome>>,
    dispatched: Vec<String>,
    labels: Vec<String>,
    tokens: Vec<(String, CancellationToken)>,
    held: Vec<(String, oneshot::Sender<i32>)>,
}

/// [`CommandRunner`] whose outcomes are keyed by command line.
///
/// Each key holds a queue of outcomes; the last one repeats. Unscripted
/// commands exit 0 with no output.
#[derive(Clone)]
pub struct ScriptedRunner {
    bus: EventBus,
    state: Arc<Mutex<RunnerState>>,
}

impl ScriptedRunner {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            state: Arc::new(Mutex::new(RunnerState::default())),
        }
    }

    fn push(&self, command_line: &str, outcome: Outcome) {
        let mut state = self.state.lock().unwrap();
        state
            .scripts
            .entry(command_line.to_string())
            .or_default()
            .push_back(outcome);
    }

    pub fn script(&self, command_line: &str, exit_code: i32) {
        self.push(
            command_line,
            Outcome::Exit {
                code: exit_code,
                output: None,
            },
        );
    }

    pub fn script_output(&self, command_line: &str, exit_code: i32, output: &str) {
        self.push(
            command_line,
            Outcome::Exit {
                code: exit_code,
                output: Some(output.to_string()),
            },
        );
    }

    /// The execution stays running until [`ScriptedRunner::finish`] or cancellation.
    pub fn hang(&self, command_line: &str) {
        self.push(command_line, Outcome::Hang);
    }

    pub fn fail_dispatch(&self, command_line: &str) {
        self.push(command_line, Outcome::DispatchFail);
    }

    /// Complete the oldest held execution of `command_line`.
    pub fn finish(&self, command_line: &str, exit_code: i32) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.held.iter().position(|(k, _)| k == command_line) {
            Some(index) => {
                let (_, tx) = state.held.remove(index);
                tx.send(exit_code).is_ok()
            }
            None => false,
        }
    }

    /// Command lines in dispatch order.
    pub fn dispatched(&self) -> Vec<String> {
        self.state.lock().unwrap().dispatched.clone()
    }

    /// Execution labels in dispatch order.
    pub fn labels(&self) -> Vec<String> {
        self.state.lock().unwrap().labels.clone()
    }

    /// Command lines whose executions were cancelled.
    pub fn cancelled(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .tokens
            .iter()
            .filter(|(_, token)| token.is_cancelled())
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn next_outcome(&self, command_line: &str) -> Outcome {
        let mut state = self.state.lock().unwrap();
        match state.scripts.get_mut(command_line) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(Outcome::Exit {
                code: 0,
                output: None,
            }),
            Some(queue) => queue.front().cloned().unwrap_or(Outcome::Exit {
                code: 0,
                output: None,
            }),
            None => Outcome::Exit {
                code: 0,
                output: None,
            },
        }
    }
}

impl CommandRunner for ScriptedRunner {
    fn execute(&self, request: ExecutionRequest) -> Result<ExecutionHandle> {
        let command_line = request.command_line();
        let outcome = self.next_outcome(&command_line);

        if let Outcome::DispatchFail = outcome {
            return Err(OrchestratorError::dispatch_failed(
                &command_line,
                "No such file or directory",
            ));
        }

        let id = ExecutionId::new();
        let cancel = CancellationToken::new();
        let handle = ExecutionHandle::new(id, request.label.clone(), cancel.clone());

        let held = {
            let mut state = self.state.lock().unwrap();
            state.dispatched.push(command_line.clone());
            state.labels.push(request.label.clone());
            state.tokens.push((command_line.clone(), cancel.clone()));
            if let Outcome::Hang = outcome {
                let (tx, rx) = oneshot::channel();
                state.held.push((command_line.clone(), tx));
                Some(rx)
            } else {
                None
            }
        };

        let bus = self.bus.clone();
        let label = request.label;
        let finished = handle.clone();
        tokio::spawn(async move {
            let exit_code = match (outcome, held) {
                (Outcome::Exit { code, output }, _) => {
                    if let Some(chunk) = output {
                        bus.emit(Event::Log {
                            execution_id: Some(id),
                            stream: OutputStream::Stdout,
                            chunk,
                        });
                    }
                    code
                }
                (_, Some(rx)) => tokio::select! {
                    code = rx => code.unwrap_or(EXIT_CODE_UNKNOWN),
                    _ = cancel.cancelled() => EXIT_CODE_UNKNOWN,
                },
                _ => EXIT_CODE_UNKNOWN,
            };
            bus.emit(Event::PhaseComplete {
                execution_id: id,
                label,
                exit_code,
            });
            finished.mark_finished();
        });

        Ok(handle)
    }
}

/// [`ToolProbe`] answering from per-tool queues of presence flags; the
/// last flag repeats. Unscripted tools are installed.
#[derive(Clone, Default)]
pub struct ScriptedProbe {
    answers: Arc<Mutex<HashMap<String, VecDeque<bool>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(&self, tool: &str, installed: &[bool]) {
        self.answers
            .lock()
            .unwrap()
            .insert(tool.to_string(), installed.iter().copied().collect());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolProbe for ScriptedProbe {
    async fn check(&self, tool: &ToolSpec) -> ToolCheck {
        self.calls.lock().unwrap().push(tool.name.clone());
        let installed = {
            let mut answers = self.answers.lock().unwrap();
            match answers.get_mut(&tool.name) {
                Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(true),
                Some(queue) => queue.front().copied().unwrap_or(true),
                None => true,
            }
        };
        if installed {
            ToolCheck::installed(&tool.name, "1.0.0")
        } else {
            ToolCheck::missing(&tool.name)
        }
    }
}
