//! Correlating a dispatched execution with its completion record.

use events::{Event, EventBus, EventEnvelope, OutputStream};
use launcher_core::ExecutionId;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};
use crate::runner::{CommandRunner, ExecutionHandle, ExecutionRequest};

/// A bus subscription taken before dispatch.
///
/// Subscribing first means a process that exits immediately cannot publish
/// its completion before anyone is listening. [`CompletionListener::wait`]
/// consumes the listener, so the subscription is released on every exit
/// path including cancellation of the enclosing future.
pub struct CompletionListener {
    rx: broadcast::Receiver<EventEnvelope>,
}

impl CompletionListener {
    pub fn new(bus: &EventBus) -> Self {
        Self { rx: bus.subscribe() }
    }

    /// Wait for the completion record of `id` and return its exit code.
    ///
    /// `on_output` sees every output chunk of that execution in order.
    /// Records of other executions are ignored.
    pub async fn wait<F>(mut self, id: ExecutionId, mut on_output: F) -> Result<i32>
    where
        F: FnMut(&str),
    {
        loop {
            match self.rx.recv().await {
                Ok(envelope) => match envelope.event {
                    Event::Log {
                        execution_id: Some(eid),
                        stream,
                        ref chunk,
                    } if eid == id && stream != OutputStream::System => on_output(chunk),
                    ref event => {
                        if let Some(exit_code) = event.completion_for(id) {
                            debug!(execution_id = %id, exit_code, "Completion correlated");
                            return Ok(exit_code);
                        }
                    }
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(execution_id = %id, skipped, "Completion listener lagged");
                }
                Err(RecvError::Closed) => return Err(OrchestratorError::ChannelClosed),
            }
        }
    }
}

/// Subscribe, dispatch and wait for the exit code of one execution.
///
/// On `timeout` the execution is cancelled and a `CorrelationFailure` is
/// returned.
pub async fn dispatch_and_wait<F>(
    runner: &dyn CommandRunner,
    bus: &EventBus,
    request: ExecutionRequest,
    timeout: Option<Duration>,
    on_output: F,
) -> Result<(ExecutionHandle, i32)>
where
    F: FnMut(&str),
{
    let listener = CompletionListener::new(bus);
    let handle = runner.execute(request)?;
    let exit_code = wait_for(listener, &handle, timeout, on_output).await?;
    Ok((handle, exit_code))
}

pub async fn wait_for<F>(
    listener: CompletionListener,
    handle: &ExecutionHandle,
    timeout: Option<Duration>,
    on_output: F,
) -> Result<i32>
where
    F: FnMut(&str),
{
    let wait = listener.wait(handle.id, on_output);
    match timeout {
        None => wait.await,
        Some(limit) => match tokio::time::timeout(limit, wait).await {
            Ok(result) => result,
            Err(_) => {
                warn!(execution_id = %handle.id, label = %handle.label, ?limit, "Execution timed out");
                handle.cancel();
                Err(OrchestratorError::CorrelationFailure {
                    label: handle.label.clone(),
                    waited: limit,
                })
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;

    #[tokio::test]
    async fn test_wait_ignores_other_executions() {
        let bus = EventBus::new();
        let listener = CompletionListener::new(&bus);
        let mine = ExecutionId::new();

        bus.emit(Event::PhaseComplete {
            execution_id: ExecutionId::new(),
            label: "npm run build".to_string(),
            exit_code: 1,
        });
        bus.emit(Event::Log {
            execution_id: Some(mine),
            stream: OutputStream::Stdout,
            chunk: "done".to_string(),
        });
        bus.emit(Event::PhaseComplete {
            execution_id: mine,
            label: "npm run build".to_string(),
            exit_code: 0,
        });

        let mut seen = String::new();
        let code = listener.wait(mine, |c| seen.push_str(c)).await.unwrap();
        assert_eq!(code, 0);
        assert_eq!(seen, "done");
    }

    #[tokio::test]
    async fn test_subscription_released_after_wait() {
        let bus = EventBus::new();
        let runner = ScriptedRunner::new(bus.clone());
        runner.script("npm install", 0);

        let before = bus.subscriber_count();
        let (_, code) = dispatch_and_wait(
            &runner,
            &bus,
            ExecutionRequest::new("npm install", vec![], "."),
            None,
            |_| {},
        )
        .await
        .unwrap();

        assert_eq!(code, 0);
        assert_eq!(bus.subscriber_count(), before);
    }

    #[tokio::test]
    async fn test_immediate_exit_is_not_missed() {
        let bus = EventBus::new();
        let runner = ScriptedRunner::new(bus.clone());
        runner.script("true", 0);

        let (handle, code) = dispatch_and_wait(
            &runner,
            &bus,
            ExecutionRequest::new("true", vec![], "."),
            Some(Duration::from_secs(1)),
            |_| {},
        )
        .await
        .unwrap();

        assert_eq!(code, 0);
        assert_eq!(runner.dispatched(), vec![handle.label]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_and_reports_correlation_failure() {
        let bus = EventBus::new();
        let runner = ScriptedRunner::new(bus.clone());
        runner.hang("npm run migrate");

        let result = dispatch_and_wait(
            &runner,
            &bus,
            ExecutionRequest::new("npm run migrate", vec![], "."),
            Some(Duration::from_secs(30)),
            |_| {},
        )
        .await;

        match result {
            Err(OrchestratorError::CorrelationFailure { label, waited }) => {
                assert_eq!(label, "npm run migrate");
                assert_eq!(waited, Duration::from_secs(30));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(runner.cancelled(), vec!["npm run migrate".to_string()]);
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_returned_synchronously() {
        let bus = EventBus::new();
        let runner = ScriptedRunner::new(bus.clone());
        runner.fail_dispatch("missing-binary");

        let result = dispatch_and_wait(
            &runner,
            &bus,
            ExecutionRequest::new("missing-binary", vec![], "."),
            None,
            |_| {},
        )
        .await;

        assert!(matches!(
            result,
            Err(OrchestratorError::DispatchFailure { .. })
        ));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
