//! Container backend: runs a code string in a throwaway, network-less
//! container with a bind-mounted session workspace.
//!
//! Every execution goes `Idle -> Launched -> (Completed | TimedOut | Failed) -> Removed`.
//! Removal is tied to a guard, so it happens on every exit path once a
//! container exists.

mod error;
mod logs;
mod runtime;
mod workspace;

pub use error::ExecError;
pub use logs::merge_timestamped;
pub use runtime::{
    container_user, ContainerRuntime, DockerCli, LaunchSpec, ResourceLimits, WaitOutcome,
};
pub use workspace::SessionWorkspaces;

use outcome::{ExecutionResult, CONTAINER_DEFAULT_TIMEOUT};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

pub const DEFAULT_IMAGE: &str = "python:3.11-slim";
pub const DEFAULT_MOUNT_PATH: &str = "/workspace";

#[derive(Debug, Clone)]
pub struct ContainerExecConfig {
    /// Runtime binary, e.g. `docker` or `podman`.
    pub runtime: String,
    pub image: String,
    pub limits: ResourceLimits,
    pub mount_path: String,
    /// `uid:gid` inside the container; host ids when unset.
    pub user: Option<String>,
    pub default_timeout: Duration,
}

impl Default for ContainerExecConfig {
    fn default() -> Self {
        Self {
            runtime: "docker".to_string(),
            image: DEFAULT_IMAGE.to_string(),
            limits: ResourceLimits::default(),
            mount_path: DEFAULT_MOUNT_PATH.to_string(),
            user: None,
            default_timeout: CONTAINER_DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Idle,
    Launched,
    Completed,
    TimedOut,
    Failed,
    Removed,
}

/// Owns a launched container until it is force-removed on drop.
struct LaunchedContainer<'a, R: ContainerRuntime> {
    runtime: &'a R,
    id: String,
    state: ContainerState,
}

impl<'a, R: ContainerRuntime> LaunchedContainer<'a, R> {
    fn new(runtime: &'a R, id: String) -> Self {
        debug!(container_id = %id, from = ?ContainerState::Idle, to = ?ContainerState::Launched, "container state");
        Self {
            runtime,
            id,
            state: ContainerState::Launched,
        }
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn transition(&mut self, next: ContainerState) {
        debug!(container_id = %self.id, from = ?self.state, to = ?next, "container state");
        self.state = next;
    }
}

impl<R: ContainerRuntime> Drop for LaunchedContainer<'_, R> {
    fn drop(&mut self) {
        if self.state == ContainerState::Launched {
            self.transition(ContainerState::Failed);
        }
        match self.runtime.remove(&self.id) {
            Ok(()) => self.transition(ContainerState::Removed),
            Err(err) => warn!(container_id = %self.id, "Failed to remove container: {}", err),
        }
    }
}

/// Runs code in containers through a [`ContainerRuntime`].
pub struct ContainerExecutor<R: ContainerRuntime = DockerCli> {
    runtime: R,
    config: ContainerExecConfig,
    closed: bool,
}

impl ContainerExecutor<DockerCli> {
    /// Opens the runtime named in `config.runtime`.
    pub fn connect(config: ContainerExecConfig) -> Result<Self, ExecError> {
        let runtime = DockerCli::connect(config.runtime.clone())?;
        Ok(Self::with_runtime(runtime, config))
    }
}

impl<R: ContainerRuntime> ContainerExecutor<R> {
    pub fn with_runtime(runtime: R, config: ContainerExecConfig) -> Self {
        Self {
            runtime,
            config,
            closed: false,
        }
    }

    pub fn config(&self) -> &ContainerExecConfig {
        &self.config
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// True when the image is in the local store. Errors other than
    /// "not found" are returned.
    #[instrument(skip(self))]
    pub fn image_exists(&self, image: &str) -> Result<bool, ExecError> {
        self.runtime.image_exists(image)
    }

    /// Best-effort pull; any failure is logged and reported as `false`.
    #[instrument(skip(self))]
    pub fn pull_image(&self, image: &str) -> bool {
        match self.runtime.pull_image(image) {
            Ok(()) => {
                info!(image, "pulled image");
                true
            }
            Err(err) => {
                warn!(image, "Error pulling image: {}", err);
                false
            }
        }
    }

    /// Makes sure the image is available locally, pulling it when absent.
    pub fn ensure_image(&self, image: &str) -> Result<(), ExecError> {
        if self.image_exists(image)? {
            return Ok(());
        }
        info!(image, "image not present locally, pulling");
        if self.pull_image(image) {
            Ok(())
        } else {
            Err(ExecError::ImageNotFound {
                image: image.to_string(),
            })
        }
    }

    /// Runs `code` with `workspace` mounted read/write. Every failure is
    /// folded into the returned result.
    #[instrument(skip(self, code), fields(workspace = %workspace.display()))]
    pub fn execute(
        &self,
        code: &str,
        workspace: &Path,
        timeout: Option<Duration>,
        image: Option<&str>,
    ) -> ExecutionResult {
        let timeout = timeout.unwrap_or(self.config.default_timeout);
        let image = image.unwrap_or(&self.config.image);

        match self.run(code, workspace, timeout, image) {
            Ok(result) => result,
            Err(err) => {
                error!(code = err.code(), image, "Container execution failed: {}", err);
                ExecutionResult::failure(err.to_string(), err.exit_code())
            }
        }
    }

    fn run(
        &self,
        code: &str,
        workspace: &Path,
        timeout: Duration,
        image: &str,
    ) -> Result<ExecutionResult, ExecError> {
        if timeout.is_zero() {
            return Err(ExecError::InvalidRequest {
                message: "timeout must be positive".to_string(),
            });
        }
        if self.closed {
            return Err(ExecError::runtime("run", "executor is closed"));
        }
        self.config.limits.check()?;

        let workspace = fs::canonicalize(workspace).map_err(|err| ExecError::Workspace {
            message: format!("Workspace {} is not usable: {}", workspace.display(), err),
        })?;
        if !workspace.is_dir() {
            return Err(ExecError::Workspace {
                message: format!("Workspace {} is not a directory", workspace.display()),
            });
        }

        let spec = LaunchSpec {
            image: image.to_string(),
            code: code.to_string(),
            workspace,
            mount_path: self.config.mount_path.clone(),
            user: self.config.user.clone().unwrap_or_else(container_user),
            limits: self.config.limits.clone(),
        };

        let id = self.runtime.launch(&spec)?;
        let mut container = LaunchedContainer::new(&self.runtime, id);

        match self.runtime.wait(container.id(), timeout)? {
            WaitOutcome::Exited(exit_code) => {
                container.transition(ContainerState::Completed);
                let logs = self.runtime.logs(container.id())?;
                info!(container_id = container.id(), exit_code, "container finished");
                Ok(ExecutionResult::from_logs(logs, exit_code))
            }
            WaitOutcome::TimedOut => {
                container.transition(ContainerState::TimedOut);
                warn!(container_id = container.id(), ?timeout, "container timed out");
                let partial = self.runtime.logs(container.id()).unwrap_or_else(|err| {
                    warn!(container_id = container.id(), "Failed to fetch partial logs: {}", err);
                    String::new()
                });
                Ok(ExecutionResult::timed_out(partial, timeout))
            }
        }
    }

    /// Releases the runtime handle. Idempotent; failures are logged.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(err) = self.runtime.close() {
            warn!("Error closing container runtime: {}", err);
        }
    }
}

impl<R: ContainerRuntime> Drop for ContainerExecutor<R> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    enum Wait {
        Exit(i64),
        Timeout,
        Fail,
    }

    struct FakeRuntime {
        images: Vec<String>,
        pull_ok: bool,
        launch_image_missing: bool,
        wait: Wait,
        logs: Option<String>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl FakeRuntime {
        fn new(wait: Wait, logs: Option<&str>) -> Self {
            Self {
                images: vec![DEFAULT_IMAGE.to_string()],
                pull_ok: true,
                launch_image_missing: false,
                wait,
                logs: logs.map(str::to_string),
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    impl ContainerRuntime for FakeRuntime {
        fn image_exists(&self, image: &str) -> Result<bool, ExecError> {
            self.record(format!("inspect {}", image));
            Ok(self.images.iter().any(|i| i == image))
        }

        fn pull_image(&self, image: &str) -> Result<(), ExecError> {
            self.record(format!("pull {}", image));
            if self.pull_ok {
                Ok(())
            } else {
                Err(ExecError::runtime("pull", "manifest unknown"))
            }
        }

        fn launch(&self, spec: &LaunchSpec) -> Result<String, ExecError> {
            self.record(format!("launch {}", spec.image));
            if self.launch_image_missing {
                return Err(ExecError::ImageNotFound {
                    image: spec.image.clone(),
                });
            }
            Ok("c0ffee".to_string())
        }

        fn wait(&self, id: &str, _timeout: Duration) -> Result<WaitOutcome, ExecError> {
            self.record(format!("wait {}", id));
            match self.wait {
                Wait::Exit(code) => Ok(WaitOutcome::Exited(code)),
                Wait::Timeout => Ok(WaitOutcome::TimedOut),
                Wait::Fail => Err(ExecError::Runtime {
                    op: "wait",
                    message: "daemon went away".to_string(),
                    exit_status: Some(137),
                }),
            }
        }

        fn logs(&self, id: &str) -> Result<String, ExecError> {
            self.record(format!("logs {}", id));
            self.logs
                .clone()
                .ok_or_else(|| ExecError::runtime("logs", "log driver unavailable"))
        }

        fn remove(&self, id: &str) -> Result<(), ExecError> {
            self.record(format!("remove {}", id));
            Ok(())
        }

        fn close(&mut self) -> Result<(), ExecError> {
            self.record("close");
            Ok(())
        }
    }

    fn executor(runtime: FakeRuntime) -> (ContainerExecutor<FakeRuntime>, Arc<Mutex<Vec<String>>>) {
        let calls = runtime.calls.clone();
        let config = ContainerExecConfig {
            user: Some("1000:1000".to_string()),
            ..ContainerExecConfig::default()
        };
        (ContainerExecutor::with_runtime(runtime, config), calls)
    }

    fn calls(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[test]
    fn successful_run_keeps_error_empty_and_removes_container() {
        let workspace = tempfile::tempdir().unwrap();
        let (exec, log) = executor(FakeRuntime::new(Wait::Exit(0), Some("ok\n")));

        let result = exec.execute("print('ok')", workspace.path(), None, None);

        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output, "ok\n");
        assert_eq!(result.error, "");
        assert_eq!(
            calls(&log),
            vec![
                "launch python:3.11-slim",
                "wait c0ffee",
                "logs c0ffee",
                "remove c0ffee"
            ]
        );
    }

    #[test]
    fn non_zero_exit_mirrors_log_into_error() {
        let workspace = tempfile::tempdir().unwrap();
        let logs = "Traceback (most recent call last):\nValueError: boom\n";
        let (exec, log) = executor(FakeRuntime::new(Wait::Exit(1), Some(logs)));

        let result = exec.execute("raise ValueError('boom')", workspace.path(), None, None);

        assert!(!result.success);
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.output, logs);
        assert_eq!(result.error, logs);
        assert!(calls(&log).contains(&"remove c0ffee".to_string()));
    }

    #[test]
    fn timeout_keeps_partial_logs_and_still_removes() {
        let workspace = tempfile::tempdir().unwrap();
        let (exec, log) = executor(FakeRuntime::new(Wait::Timeout, Some("tick\n")));

        let result = exec.execute(
            "while True: pass",
            workspace.path(),
            Some(Duration::from_secs(2)),
            None,
        );

        assert!(!result.success);
        assert_eq!(result.exit_code, -1);
        assert!(result.error.starts_with("tick"));
        assert!(result.error.contains("timed out"));
        assert_eq!(calls(&log).last().unwrap(), "remove c0ffee");
    }

    #[test]
    fn wait_failure_reports_unknown_exit_and_removes() {
        let workspace = tempfile::tempdir().unwrap();
        let (exec, log) = executor(FakeRuntime::new(Wait::Fail, Some("")));

        let result = exec.execute("print(1)", workspace.path(), None, None);

        assert!(!result.success);
        assert_eq!(result.exit_code, -1);
        assert!(result.error.contains("daemon went away"));
        assert_eq!(calls(&log).last().unwrap(), "remove c0ffee");
    }

    #[test]
    fn log_fetch_failure_still_removes_container() {
        let workspace = tempfile::tempdir().unwrap();
        let (exec, log) = executor(FakeRuntime::new(Wait::Exit(0), None));

        let result = exec.execute("print(1)", workspace.path(), None, None);

        assert!(!result.success);
        assert_eq!(result.exit_code, -1);
        assert!(result.error.contains("log driver unavailable"));
        assert_eq!(calls(&log).last().unwrap(), "remove c0ffee");
    }

    #[test]
    fn missing_image_is_a_setup_failure_without_container() {
        let workspace = tempfile::tempdir().unwrap();
        let mut runtime = FakeRuntime::new(Wait::Exit(0), Some(""));
        runtime.launch_image_missing = true;
        let (exec, log) = executor(runtime);

        let result = exec.execute("print(1)", workspace.path(), None, Some("ghost:1"));

        assert!(!result.success);
        assert_eq!(result.exit_code, -1);
        assert_eq!(result.error, "Docker image 'ghost:1' not found");
        assert_eq!(calls(&log), vec!["launch ghost:1"]);
    }

    #[test]
    fn zero_timeout_is_rejected_before_launch() {
        let workspace = tempfile::tempdir().unwrap();
        let (exec, log) = executor(FakeRuntime::new(Wait::Exit(0), Some("")));

        let result = exec.execute("print(1)", workspace.path(), Some(Duration::ZERO), None);

        assert!(!result.success);
        assert!(result.error.contains("timeout must be positive"));
        assert!(calls(&log).is_empty());
    }

    #[test]
    fn limits_above_ceiling_are_rejected_before_launch() {
        let workspace = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::new(Wait::Exit(0), Some(""));
        let log = runtime.calls.clone();
        let config = ContainerExecConfig {
            user: Some("1000:1000".to_string()),
            limits: ResourceLimits {
                memory: "4g".to_string(),
                ..ResourceLimits::default()
            },
            ..ContainerExecConfig::default()
        };
        let exec = ContainerExecutor::with_runtime(runtime, config);

        let result = exec.execute("print(1)", workspace.path(), None, None);

        assert!(!result.success);
        assert_eq!(result.exit_code, -1);
        assert!(result.error.contains("exceeds 512m"));
        assert!(calls(&log).is_empty());
    }

    #[test]
    fn missing_workspace_is_reported() {
        let (exec, _log) = executor(FakeRuntime::new(Wait::Exit(0), Some("")));

        let result = exec.execute("print(1)", Path::new("/definitely/not/here"), None, None);

        assert!(!result.success);
        assert!(result.error.starts_with("Workspace error"));
    }

    #[test]
    fn ensure_image_pulls_when_absent() {
        let (exec, log) = executor(FakeRuntime::new(Wait::Exit(0), Some("")));

        exec.ensure_image("python:3.12-slim").unwrap();
        exec.ensure_image(DEFAULT_IMAGE).unwrap();

        assert_eq!(
            calls(&log),
            vec![
                "inspect python:3.12-slim",
                "pull python:3.12-slim",
                "inspect python:3.11-slim"
            ]
        );
    }

    #[test]
    fn failed_pull_is_false_and_ensure_reports_missing_image() {
        let mut runtime = FakeRuntime::new(Wait::Exit(0), Some(""));
        runtime.pull_ok = false;
        let (exec, _log) = executor(runtime);

        assert!(!exec.pull_image("ghost:1"));
        assert!(matches!(
            exec.ensure_image("ghost:1"),
            Err(ExecError::ImageNotFound { .. })
        ));
    }

    #[test]
    fn close_is_idempotent_and_runs_on_drop() {
        let (mut exec, log) = executor(FakeRuntime::new(Wait::Exit(0), Some("")));
        exec.close();
        exec.close();
        drop(exec);
        assert_eq!(calls(&log), vec!["close"]);

        let (exec, log) = executor(FakeRuntime::new(Wait::Exit(0), Some("")));
        drop(exec);
        assert_eq!(calls(&log), vec!["close"]);
    }

    #[test]
    fn closed_executor_refuses_to_run() {
        let workspace = tempfile::tempdir().unwrap();
        let (mut exec, log) = executor(FakeRuntime::new(Wait::Exit(0), Some("")));
        exec.close();

        let result = exec.execute("print(1)", workspace.path(), None, None);

        assert!(!result.success);
        assert_eq!(calls(&log), vec!["close"]);
    }
}
