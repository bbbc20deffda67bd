//! Out-of-process command execution.
//!
//! [`CommandRunner::execute`] launches one process and returns at once.
//! A supervisor task streams the process output onto the event bus and
//! publishes exactly one completion record once both output streams are
//! drained and the process has exited.

use events::{Event, EventBus, OutputStream};
use launcher_core::{ExecutionId, ExecutionMode, Phase};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, Result};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Exit code reported when the process ended without one (signal, kill).
pub const EXIT_CODE_UNKNOWN: i32 = -1;

/// Everything needed to launch one process.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: HashMap<String, String>,
    /// Display label carried on the completion record
    pub label: String,
    pub mode: ExecutionMode,
}

impl ExecutionRequest {
    pub fn new(command: impl Into<String>, args: Vec<String>, working_dir: impl AsRef<Path>) -> Self {
        let command = command.into();
        let label = if args.is_empty() {
            command.clone()
        } else {
            format!("{} {}", command, args.join(" "))
        };
        Self {
            command,
            args,
            working_dir: working_dir.as_ref().to_path_buf(),
            env: HashMap::new(),
            label,
            mode: ExecutionMode::Shell,
        }
    }

    pub fn for_phase(phase: &Phase, working_dir: impl AsRef<Path>) -> Self {
        Self::new(phase.command.clone(), phase.args.clone(), working_dir).with_mode(phase.mode)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_env(mut self, env: &HashMap<String, String>) -> Self {
        self.env.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

/// Returned on dispatch. Dropping it does not stop the process.
#[derive(Debug, Clone)]
pub struct ExecutionHandle {
    pub id: ExecutionId,
    pub label: String,
    cancel: CancellationToken,
    finished: CancellationToken,
}

impl ExecutionHandle {
    pub fn new(id: ExecutionId, label: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            id,
            label: label.into(),
            cancel,
            finished: CancellationToken::new(),
        }
    }

    /// Called by the runner once the completion record is published.
    pub fn mark_finished(&self) {
        self.finished.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }

    /// Resolves once the completion record has been published.
    pub async fn finished(&self) {
        self.finished.cancelled().await;
    }

    /// Ask the supervisor to kill the process. The completion record is
    /// still published.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Launches external processes.
///
/// Implementations must not block and must not serialize concurrent
/// calls; single-flight is the orchestrator's job.
pub trait CommandRunner: Send + Sync {
    fn execute(&self, request: ExecutionRequest) -> Result<ExecutionHandle>;
}

/// Build the OS command for a request.
///
/// In shell mode the command and arguments are joined with spaces and
/// handed to the platform shell unescaped, so shell syntax inside either
/// one is interpreted.
pub fn build_command(command: &str, args: &[String], mode: ExecutionMode) -> Command {
    match mode {
        ExecutionMode::Shell => {
            let line = if args.is_empty() {
                command.to_string()
            } else {
                format!("{} {}", command, args.join(" "))
            };
            shell_command(&line)
        }
        ExecutionMode::Direct => {
            let mut cmd = Command::new(command);
            cmd.args(args);
            cmd
        }
    }
}

pub fn shell_command(line: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", line]);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", line]);
        cmd
    }
}

/// [`CommandRunner`] backed by `tokio::process`.
#[derive(Clone)]
pub struct ShellRunner {
    bus: EventBus,
    base_env: HashMap<String, String>,
}

impl ShellRunner {
    pub fn new(bus: EventBus) -> Self {
        let mut base_env = HashMap::new();
        base_env.insert("FORCE_COLOR".to_string(), "true".to_string());
        Self { bus, base_env }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.base_env.insert(key.into(), value.into());
        self
    }
}

impl CommandRunner for ShellRunner {
    fn execute(&self, request: ExecutionRequest) -> Result<ExecutionHandle> {
        let id = ExecutionId::new();
        let command_line = request.command_line();

        info!(
            execution_id = %id,
            command = %command_line,
            mode = request.mode.as_str(),
            cwd = %request.working_dir.display(),
            "Dispatching execution"
        );

        let mut cmd = build_command(&request.command, &request.args, request.mode);
        cmd.current_dir(&request.working_dir)
            .envs(&self.base_env)
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| OrchestratorError::dispatch_failed(&command_line, e))?;

        self.bus.emit(Event::Log {
            execution_id: Some(id),
            stream: OutputStream::System,
            chunk: format!("\n> Executing: {}\n", command_line),
        });

        let cancel = CancellationToken::new();
        let handle = ExecutionHandle::new(id, request.label.clone(), cancel.clone());

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        tokio::spawn(supervise(
            self.bus.clone(),
            handle.clone(),
            child,
            stdout,
            stderr,
            cancel,
        ));

        Ok(handle)
    }
}

async fn supervise(
    bus: EventBus,
    handle: ExecutionHandle,
    mut child: Child,
    stdout: Option<tokio::process::ChildStdout>,
    stderr: Option<tokio::process::ChildStderr>,
    cancel: CancellationToken,
) {
    let id = handle.id;
    let wait = async {
        tokio::select! {
            status = child.wait() => status,
            _ = cancel.cancelled() => {
                debug!(execution_id = %id, "Cancelling execution");
                if let Err(e) = child.start_kill() {
                    warn!(execution_id = %id, error = %e, "Failed to kill process");
                }
                child.wait().await
            }
        }
    };

    let (status, _, _) = tokio::join!(
        wait,
        pump(&bus, id, OutputStream::Stdout, stdout, &cancel),
        pump(&bus, id, OutputStream::Stderr, stderr, &cancel),
    );

    let exit_code = match status {
        Ok(status) => status.code().unwrap_or(EXIT_CODE_UNKNOWN),
        Err(e) => {
            warn!(execution_id = %id, error = %e, "Failed to wait for process");
            EXIT_CODE_UNKNOWN
        }
    };

    info!(execution_id = %id, label = %handle.label, exit_code, "Execution finished");

    bus.emit(Event::Log {
        execution_id: Some(id),
        stream: OutputStream::System,
        chunk: format!("\n> Process exited with code {}\n", exit_code),
    });
    bus.emit(Event::PhaseComplete {
        execution_id: id,
        label: handle.label.clone(),
        exit_code,
    });
    handle.mark_finished();
}

/// Turns raw pipe reads into text without splitting multi-byte
/// characters that straddle two reads.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Decode `bytes` after whatever was held back from the previous read.
    /// An incomplete trailing sequence is kept for the next call; invalid
    /// bytes become U+FFFD.
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut text = String::with_capacity(self.pending.len());
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        let consumed = self.pending.len() - rest.len();
        self.pending.drain(..consumed);
        text
    }

    /// Whatever is still held back, decoded lossily.
    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

async fn pump<R>(
    bus: &EventBus,
    id: ExecutionId,
    stream: OutputStream,
    reader: Option<R>,
    cancel: &CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return;
    };
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    let mut decoder = Utf8Decoder::default();
    let emit = |chunk: String| {
        bus.emit(Event::Log {
            execution_id: Some(id),
            stream,
            chunk,
        });
    };

    loop {
        let read = tokio::select! {
            read = reader.read(&mut buf) => read,
            // Grandchildren may keep the pipe open after a kill
            _ = cancel.cancelled() => break,
        };

        match read {
            Ok(0) => break,
            Ok(n) => {
                let chunk = decoder.decode(&buf[..n]);
                if !chunk.is_empty() {
                    emit(chunk);
                }
            }
            Err(e) => {
                warn!(execution_id = %id, error = %e, "Failed to read process output");
                break;
            }
        }
    }

    if let Some(rest) = decoder.finish() {
        emit(rest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::CompletionListener;
    use events::EventEnvelope;
    use tokio::sync::broadcast;

    async fn collect_until_complete(
        rx: &mut broadcast::Receiver<EventEnvelope>,
        id: ExecutionId,
    ) -> (String, i32) {
        let mut output = String::new();
        loop {
            let envelope = rx.recv().await.unwrap();
            match envelope.event {
                Event::Log {
                    execution_id: Some(eid),
                    stream,
                    chunk,
                } if eid == id && stream != OutputStream::System => output.push_str(&chunk),
                Event::PhaseComplete {
                    execution_id,
                    exit_code,
                    ..
                } if execution_id == id => return (output, exit_code),
                _ => {}
            }
        }
    }

    #[test]
    fn test_request_label_defaults_to_command_line() {
        let request = ExecutionRequest::new("npm", vec!["run".into(), "build".into()], "/tmp");
        assert_eq!(request.label, "npm run build");
        assert_eq!(request.mode, ExecutionMode::Shell);

        let labelled = request.with_label("install-Docker");
        assert_eq!(labelled.label, "install-Docker");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_precedes_completion() {
        let bus = EventBus::new();
        let runner = ShellRunner::new(bus.clone());
        let mut rx = bus.subscribe();
        let dir = tempfile::tempdir().unwrap();

        let handle = runner
            .execute(ExecutionRequest::new(
                "echo",
                vec!["hello".into(), "&&".into(), "echo".into(), "oops".into(), ">&2".into()],
                dir.path(),
            ))
            .unwrap();

        let (output, exit_code) = collect_until_complete(&mut rx, handle.id).await;
        assert_eq!(exit_code, 0);
        assert!(output.contains("hello"));
        assert!(output.contains("oops"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_not_a_dispatch_error() {
        let bus = EventBus::new();
        let runner = ShellRunner::new(bus.clone());
        let listener = CompletionListener::new(&bus);
        let dir = tempfile::tempdir().unwrap();

        let handle = runner
            .execute(ExecutionRequest::new("exit", vec!["3".into()], dir.path()))
            .unwrap();

        let exit_code = listener.wait(handle.id, |_| {}).await.unwrap();
        assert_eq!(exit_code, 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_direct_mode_missing_binary_fails_synchronously() {
        let bus = EventBus::new();
        let runner = ShellRunner::new(bus.clone());
        let dir = tempfile::tempdir().unwrap();

        let result = runner.execute(
            ExecutionRequest::new("definitely-not-a-real-binary-xyz", vec![], dir.path())
                .with_mode(ExecutionMode::Direct),
        );

        assert!(matches!(
            result,
            Err(OrchestratorError::DispatchFailure { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_direct_mode_does_not_interpret_shell_operators() {
        let bus = EventBus::new();
        let runner = ShellRunner::new(bus.clone());
        let mut rx = bus.subscribe();
        let dir = tempfile::tempdir().unwrap();

        let handle = runner
            .execute(
                ExecutionRequest::new("echo", vec!["a".into(), "&&".into(), "b".into()], dir.path())
                    .with_mode(ExecutionMode::Direct),
            )
            .unwrap();

        let (output, exit_code) = collect_until_complete(&mut rx, handle.id).await;
        assert_eq!(exit_code, 0);
        assert_eq!(output.trim(), "a && b");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_kills_process_and_still_completes() {
        let bus = EventBus::new();
        let runner = ShellRunner::new(bus.clone());
        let listener = CompletionListener::new(&bus);
        let dir = tempfile::tempdir().unwrap();

        let handle = runner
            .execute(ExecutionRequest::new("sleep", vec!["30".into()], dir.path()))
            .unwrap();
        handle.cancel();

        let exit_code = listener.wait(handle.id, |_| {}).await.unwrap();
        assert_ne!(exit_code, 0);
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_decoder_holds_back_split_character() {
        let mut decoder = Utf8Decoder::default();
        let bytes = "añé".as_bytes();

        assert_eq!(decoder.decode(&bytes[..2]), "a");
        assert_eq!(decoder.decode(&bytes[2..4]), "ñ");
        assert_eq!(decoder.decode(&bytes[4..]), "é");
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes_and_flushes_remainder() {
        let mut decoder = Utf8Decoder::default();

        assert_eq!(decoder.decode(b"ok\xffgo\xc3"), "ok\u{FFFD}go");
        assert_eq!(decoder.finish().as_deref(), Some("\u{FFFD}"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_character_across_read_boundary_survives() {
        let bus = EventBus::new();
        let runner = ShellRunner::new(bus.clone());
        let mut rx = bus.subscribe();
        let dir = tempfile::tempdir().unwrap();

        let handle = runner
            .execute(ExecutionRequest::new(
                "head -c 8191 /dev/zero | tr '\\0' a; printf '\\303\\251'",
                vec![],
                dir.path(),
            ))
            .unwrap();

        let (output, exit_code) = collect_until_complete(&mut rx, handle.id).await;
        assert_eq!(exit_code, 0);
        assert!(!output.contains(char::REPLACEMENT_CHARACTER));
        assert_eq!(output, format!("{}é", "a".repeat(8191)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_handle_marked_finished_after_completion() {
        let bus = EventBus::new();
        let runner = ShellRunner::new(bus.clone());
        let listener = CompletionListener::new(&bus);
        let dir = tempfile::tempdir().unwrap();

        let handle = runner
            .execute(ExecutionRequest::new("true", vec![], dir.path()))
            .unwrap();
        listener.wait(handle.id, |_| {}).await.unwrap();
        handle.finished().await;
        assert!(handle.is_finished());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_env_overrides_reach_process() {
        let bus = EventBus::new();
        let runner = ShellRunner::new(bus.clone());
        let mut rx = bus.subscribe();
        let dir = tempfile::tempdir().unwrap();

        let mut env = HashMap::new();
        env.insert("LAUNCHER_TEST_VALUE".to_string(), "42".to_string());
        let handle = runner
            .execute(
                ExecutionRequest::new("echo", vec!["$LAUNCHER_TEST_VALUE".into()], dir.path())
                    .with_env(&env),
            )
            .unwrap();

        let (output, _) = collect_until_complete(&mut rx, handle.id).await;
        assert_eq!(output.trim(), "42");
    }
}
