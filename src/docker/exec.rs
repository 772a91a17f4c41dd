//! Running commands inside a container.
//!
//! [`AttachedExecutor`] streams the command's output and waits for the exit
//! code once the stream ends. [`DetachedExecutor`] starts the command without
//! attaching and polls the exec's state until it stops running.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::Docker;
use futures::StreamExt;
use serde::Serialize;

use crate::config::ExecConfig;
use crate::durations::format_duration;
use crate::error::{ConfigError, ContainmentError, DockerError};
use crate::poll::{
    PollAnswer, PollCheck, PollRepetition, Poller, Sleeper, StopReason, SystemSleeper,
};

const DISPLAY_ABBREVIATION: usize = 64;

const SETTLE_INTERVAL: Duration = Duration::from_millis(100);
const SETTLE_POLLS: u32 = 50;

/// Result of executing a command in a container.
///
/// Output is absent when the command ran detached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecResult {
    /// Exit code of the command.
    pub exit_code: i64,
    /// Standard output.
    pub stdout: Option<String>,
    /// Standard error.
    pub stderr: Option<String>,
}

impl ExecResult {
    pub fn new(exit_code: i64, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: Some(stdout.into()),
            stderr: Some(stderr.into()),
        }
    }

    pub fn without_output(exit_code: i64) -> Self {
        Self {
            exit_code,
            stdout: None,
            stderr: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

fn abbreviate(text: &str) -> String {
    if text.chars().count() <= DISPLAY_ABBREVIATION {
        return text.to_string();
    }
    let head: String = text.chars().take(DISPLAY_ABBREVIATION - 3).collect();
    format!("{head}...")
}

impl fmt::Display for ExecResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExecResult{{exit_code={}", self.exit_code)?;
        if let Some(stdout) = &self.stdout {
            write!(f, ", stdout={:?}", abbreviate(stdout))?;
        }
        if let Some(stderr) = &self.stderr {
            write!(f, ", stderr={:?}", abbreviate(stderr))?;
        }
        f.write_str("}")
    }
}

/// Runs a program with arguments inside a container.
#[async_trait]
pub trait DockerExecutor: Send + Sync {
    async fn execute(&self, executable: &str, args: &[String]) -> Result<ExecResult, ContainmentError>;
}

/// Exec state as reported by the daemon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecState {
    pub running: Option<bool>,
    pub exit_code: Option<i64>,
}

/// Source of exec state.
#[async_trait]
pub trait ExecInspector: Send + Sync {
    async fn exec_state(&self, exec_id: &str) -> Result<ExecState, DockerError>;
}

#[async_trait]
impl ExecInspector for Docker {
    async fn exec_state(&self, exec_id: &str) -> Result<ExecState, DockerError> {
        let inspected = self.inspect_exec(exec_id).await?;
        Ok(ExecState {
            running: inspected.running,
            exit_code: inspected.exit_code,
        })
    }
}

/// Poll check that resolves with the exit code once an exec has stopped.
///
/// Keeps polling while the exec is running or its state is unknown. Aborts
/// with the reason as content if the exec stopped without an exit code or
/// its state can't be read.
pub struct ExecCompletionCheck<'a, I: ?Sized> {
    inspector: &'a I,
    exec_id: String,
}

impl<'a, I: ?Sized> ExecCompletionCheck<'a, I> {
    pub fn new(inspector: &'a I, exec_id: impl Into<String>) -> Self {
        Self {
            inspector,
            exec_id: exec_id.into(),
        }
    }
}

#[async_trait]
impl<'a, I> PollCheck<Result<i64, String>> for ExecCompletionCheck<'a, I>
where
    I: ExecInspector + ?Sized,
{
    async fn check(&mut self, attempts_so_far: u32) -> PollAnswer<Result<i64, String>> {
        match self.inspector.exec_state(&self.exec_id).await {
            Ok(ExecState {
                running: Some(false),
                exit_code: Some(code),
            }) => PollAnswer::resolve(Ok(code)),
            Ok(ExecState {
                running: Some(false),
                exit_code: None,
            }) => {
                tracing::warn!(exec_id = %self.exec_id, "Exec stopped without an exit code");
                PollAnswer::abort(Err(format!(
                    "exec {} stopped without an exit code",
                    self.exec_id
                )))
            }
            Ok(state) => {
                tracing::trace!(
                    exec_id = %self.exec_id,
                    attempts = attempts_so_far,
                    running = ?state.running,
                    "Exec still running"
                );
                PollAnswer::Continue
            }
            Err(e) => {
                tracing::warn!(exec_id = %self.exec_id, error = %e, "Failed to inspect exec");
                PollAnswer::abort(Err(format!("failed to inspect exec {}: {e}", self.exec_id)))
            }
        }
    }
}

/// Polls an exec every `interval`, at most `max_polls` times, until it stops
/// and returns its exit code.
pub async fn await_exit_code<I, S>(
    inspector: &I,
    exec_id: &str,
    sleeper: S,
    interval: Duration,
    max_polls: u32,
) -> Result<i64, ContainmentError>
where
    I: ExecInspector + ?Sized,
    S: Sleeper,
{
    if interval.is_zero() {
        return Err(ConfigError::InvalidDuration {
            input: format_duration(interval),
            reason: "poll interval must be positive".to_string(),
        }
        .into());
    }
    let budget = interval.saturating_mul(max_polls);
    let outcome = Poller::with_sleeper(ExecCompletionCheck::new(inspector, exec_id), sleeper)
        .poll(PollRepetition::fixed(interval, max_polls))
        .await
        .map_err(|_| ContainmentError::Interrupted("exec"))?;
    if outcome.reason == StopReason::Timeout {
        return Err(ContainmentError::Timeout {
            operation: "exec",
            timeout: budget,
        });
    }
    let summary = outcome.to_string();
    match outcome.content {
        Some(Ok(code)) => Ok(code),
        Some(Err(reason)) => Err(ContainmentError::OperationFailed {
            operation: "exec",
            summary: reason,
        }),
        None => Err(ContainmentError::OperationFailed {
            operation: "exec",
            summary,
        }),
    }
}

/// Reads the exit code of an exec whose output stream has closed.
///
/// The daemon can report the exec as running for a moment after the stream
/// ends, so the state is polled briefly instead of read once.
async fn settle_exit_code<I, S>(
    inspector: &I,
    exec_id: &str,
    sleeper: S,
) -> Result<i64, ContainmentError>
where
    I: ExecInspector + ?Sized,
    S: Sleeper,
{
    await_exit_code(inspector, exec_id, sleeper, SETTLE_INTERVAL, SETTLE_POLLS).await
}

fn exec_options(config: &ExecConfig, cmd: Vec<String>, attach: bool) -> CreateExecOptions<String> {
    CreateExecOptions {
        cmd: Some(cmd),
        env: (!config.env.is_empty()).then(|| config.env.clone()),
        working_dir: config.working_dir.clone(),
        attach_stdout: Some(attach),
        attach_stderr: Some(attach),
        tty: Some(false),
        ..Default::default()
    }
}

fn command_line(executable: &str, args: &[String]) -> Vec<String> {
    std::iter::once(executable.to_string())
        .chain(args.iter().cloned())
        .collect()
}

/// Executor that attaches to the command's output.
#[derive(Debug, Clone)]
pub struct AttachedExecutor {
    docker: Docker,
    container_id: String,
    config: ExecConfig,
}

impl AttachedExecutor {
    pub fn new(docker: Docker, container_id: impl Into<String>) -> Self {
        Self {
            docker,
            container_id: container_id.into(),
            config: ExecConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ExecConfig) -> Self {
        self.config = config;
        self
    }
}

#[async_trait]
impl DockerExecutor for AttachedExecutor {
    async fn execute(&self, executable: &str, args: &[String]) -> Result<ExecResult, ContainmentError> {
        let cmd = command_line(executable, args);
        let exec = self
            .docker
            .create_exec(&self.container_id, exec_options(&self.config, cmd, true))
            .await
            .map_err(|e| DockerError::ExecFailed(format!("Failed to create exec: {e}")))?;

        let start_result = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| DockerError::ExecFailed(format!("Failed to start exec: {e}")))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, .. } = start_result {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(DockerError::ExecFailed(format!("Error reading output: {e}")).into());
                    }
                }
            }
        }

        let exit_code = settle_exit_code(&self.docker, &exec.id, SystemSleeper).await?;
        tracing::debug!(
            container = %self.container_id,
            executable = %executable,
            exit_code,
            "Exec finished"
        );

        Ok(ExecResult::new(exit_code, stdout, stderr))
    }
}

/// Executor that starts the command detached and polls for its exit code.
#[derive(Debug, Clone)]
pub struct DetachedExecutor {
    docker: Docker,
    container_id: String,
    config: ExecConfig,
}

impl DetachedExecutor {
    pub fn new(docker: Docker, container_id: impl Into<String>) -> Self {
        Self {
            docker,
            container_id: container_id.into(),
            config: ExecConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ExecConfig) -> Self {
        self.config = config;
        self
    }
}

#[async_trait]
impl DockerExecutor for DetachedExecutor {
    async fn execute(&self, executable: &str, args: &[String]) -> Result<ExecResult, ContainmentError> {
        let cmd = command_line(executable, args);
        let exec = self
            .docker
            .create_exec(&self.container_id, exec_options(&self.config, cmd, false))
            .await
            .map_err(|e| DockerError::ExecFailed(format!("Failed to create exec: {e}")))?;

        let options = StartExecOptions {
            detach: true,
            ..Default::default()
        };
        self.docker
            .start_exec(&exec.id, Some(options))
            .await
            .map_err(|e| DockerError::ExecFailed(format!("Failed to start exec: {e}")))?;

        tracing::debug!(
            container = %self.container_id,
            exec_id = %exec.id,
            interval = %format_duration(self.config.poll_interval),
            max_polls = self.config.max_polls,
            "Waiting for detached exec"
        );
        let exit_code = await_exit_code(
            &self.docker,
            &exec.id,
            SystemSleeper,
            self.config.poll_interval,
            self.config.max_polls,
        )
        .await?;

        Ok(ExecResult::without_output(exit_code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::{NoopSleeper, RecordingSleeper};
    use std::sync::Mutex;

    struct ScriptedInspector {
        states: Mutex<Vec<Result<ExecState, DockerError>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedInspector {
        fn new(mut states: Vec<Result<ExecState, DockerError>>) -> Self {
            states.reverse();
            Self {
                states: Mutex::new(states),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ExecInspector for ScriptedInspector {
        async fn exec_state(&self, exec_id: &str) -> Result<ExecState, DockerError> {
            self.calls.lock().unwrap().push(exec_id.to_string());
            self.states
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Ok(ExecState::default()))
        }
    }

    fn running() -> Result<ExecState, DockerError> {
        Ok(ExecState {
            running: Some(true),
            exit_code: None,
        })
    }

    fn exited(code: i64) -> Result<ExecState, DockerError> {
        Ok(ExecState {
            running: Some(false),
            exit_code: Some(code),
        })
    }

    #[tokio::test]
    async fn test_resolves_with_exit_code_after_running() {
        let inspector = ScriptedInspector::new(vec![running(), running(), exited(3)]);
        let sleeper = RecordingSleeper::new();

        let code = await_exit_code(
            &inspector,
            "exec-1",
            sleeper.clone(),
            Duration::from_millis(5),
            10,
        )
        .await
        .unwrap();

        assert_eq!(code, 3);
        assert_eq!(inspector.call_count(), 3);
        assert_eq!(sleeper.count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_state_keeps_polling() {
        let inspector = ScriptedInspector::new(vec![Ok(ExecState::default()), exited(0)]);

        let code = await_exit_code(
            &inspector,
            "exec-1",
            NoopSleeper,
            Duration::from_millis(5),
            5,
        )
        .await
        .unwrap();

        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn test_times_out_while_running() {
        let inspector = ScriptedInspector::new(vec![running(), running(), running()]);

        let result = await_exit_code(
            &inspector,
            "exec-1",
            NoopSleeper,
            Duration::from_millis(10),
            3,
        )
        .await;

        match result {
            Err(ContainmentError::Timeout { operation, timeout }) => {
                assert_eq!(operation, "exec");
                assert_eq!(timeout, Duration::from_millis(30));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(inspector.call_count(), 3);
    }

    #[tokio::test]
    async fn test_inspect_error_aborts() {
        let inspector = ScriptedInspector::new(vec![
            running(),
            Err(DockerError::ExecFailed("gone".to_string())),
            exited(0),
        ]);

        let result = await_exit_code(
            &inspector,
            "exec-1",
            NoopSleeper,
            Duration::from_millis(5),
            10,
        )
        .await;

        match result {
            Err(ContainmentError::OperationFailed { operation, summary }) => {
                assert_eq!(operation, "exec");
                assert!(summary.contains("gone"), "summary: {summary}");
                assert!(summary.contains("exec-1"), "summary: {summary}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(inspector.call_count(), 2);
    }

    #[tokio::test]
    async fn test_stopped_without_exit_code_aborts() {
        let inspector = ScriptedInspector::new(vec![Ok(ExecState {
            running: Some(false),
            exit_code: None,
        })]);

        let result = await_exit_code(
            &inspector,
            "exec-1",
            NoopSleeper,
            Duration::from_millis(5),
            10,
        )
        .await;

        match result {
            Err(ContainmentError::OperationFailed { summary, .. }) => {
                assert!(summary.contains("without an exit code"), "summary: {summary}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_settle_waits_for_exec_to_stop() {
        let inspector = ScriptedInspector::new(vec![running(), exited(0)]);
        let sleeper = RecordingSleeper::new();

        let code = settle_exit_code(&inspector, "exec-1", sleeper.clone())
            .await
            .unwrap();

        assert_eq!(code, 0);
        assert_eq!(sleeper.durations(), vec![SETTLE_INTERVAL]);
    }

    #[tokio::test]
    async fn test_settle_never_reports_made_up_code_while_running() {
        let inspector = ScriptedInspector::new((0..SETTLE_POLLS).map(|_| running()).collect());

        let result = settle_exit_code(&inspector, "exec-1", NoopSleeper).await;

        assert!(matches!(
            result,
            Err(ContainmentError::Timeout { operation: "exec", .. })
        ));
        assert_eq!(inspector.call_count(), SETTLE_POLLS as usize);
    }

    #[tokio::test]
    async fn test_settle_fails_on_null_exit_code() {
        let inspector = ScriptedInspector::new(vec![Ok(ExecState {
            running: Some(false),
            exit_code: None,
        })]);

        let result = settle_exit_code(&inspector, "exec-1", NoopSleeper).await;

        assert!(matches!(
            result,
            Err(ContainmentError::OperationFailed { operation: "exec", .. })
        ));
    }

    #[test]
    fn test_exec_result_display() {
        let result = ExecResult::new(0, "hello\n", "");
        assert!(result.is_success());
        assert_eq!(
            result.to_string(),
            "ExecResult{exit_code=0, stdout=\"hello\\n\", stderr=\"\"}"
        );

        let detached = ExecResult::without_output(2);
        assert!(!detached.is_success());
        assert_eq!(detached.to_string(), "ExecResult{exit_code=2}");
    }

    #[test]
    fn test_exec_result_display_abbreviates_output() {
        let long = "x".repeat(200);
        let shown = ExecResult::new(0, long, "").to_string();
        assert!(shown.contains(&format!("{}...", "x".repeat(61))));
        assert!(!shown.contains(&"x".repeat(62)));
    }

    #[test]
    fn test_exec_result_json() {
        let json = serde_json::to_value(ExecResult::without_output(1)).unwrap();
        assert_eq!(json["exit_code"], 1);
        assert!(json["stdout"].is_null());
    }

    #[test]
    fn test_command_line() {
        let args = vec!["-c".to_string(), "echo hi".to_string()];
        assert_eq!(command_line("sh", &args), vec!["sh", "-c", "echo hi"]);
    }

    #[test]
    fn test_exec_options_skip_empty_env() {
        let options = exec_options(&ExecConfig::default(), vec!["true".to_string()], false);
        assert!(options.env.is_none());
        assert_eq!(options.attach_stdout, Some(false));

        let config = ExecConfig::default().with_env("A", "1").with_working_dir("/srv");
        let options = exec_options(&config, vec!["true".to_string()], true);
        assert_eq!(options.env, Some(vec!["A=1".to_string()]));
        assert_eq!(options.working_dir.as_deref(), Some("/srv"));
    }
}
