#![cfg(unix)]

use capsules_container_exec::{ContainerExecConfig, ContainerExecutor, ExecError};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;

const FAKE_RUNTIME: &str = r#"#!/bin/sh
STATE="__STATE__"
echo "$*" >> "$STATE/calls.log"
for last; do :; done
case "$1" in
  version)
    echo "24.0.7"
    ;;
  image)
    case "$last" in
      python:3.11-slim) echo "sha256:1111" ;;
      *) echo "Error: No such image: $last" >&2; exit 1 ;;
    esac
    ;;
  pull)
    echo "pull access denied for $2" >&2
    exit 1
    ;;
  run)
    case " $* " in
      *" ghost:1 "*) echo "Unable to find image 'ghost:1' locally" >&2; exit 125 ;;
    esac
    case "$last" in
      *daemon_refuses*) echo "docker: Error response from daemon: failed to create task" >&2; exit 125 ;;
    esac
    printf '%s' "$last" > "$STATE/code"
    echo "cid-123"
    ;;
  wait)
    case "$(cat "$STATE/code")" in
      *sleep*) exec sleep 5 ;;
      *raise*) echo 1 ;;
      *) echo 0 ;;
    esac
    ;;
  logs)
    case "$(cat "$STATE/code")" in
      *raise*)
        echo "2024-05-01T10:00:00.000000001Z before"
        echo "2024-05-01T10:00:00.000000002Z Traceback (most recent call last):" >&2
        echo "2024-05-01T10:00:00.000000003Z ValueError: boom" >&2
        ;;
      *sleep*) echo "2024-05-01T10:00:00.000000001Z started" ;;
      *no_logs*) echo "Error response from daemon: configured logging driver does not support reading" >&2; exit 1 ;;
      *) echo "2024-05-01T10:00:00.000000001Z ok" ;;
    esac
    ;;
  rm)
    echo "$last"
    ;;
esac
"#;

struct Harness {
    _temp: TempDir,
    state: PathBuf,
    workspace: PathBuf,
    runtime: PathBuf,
}

impl Harness {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let state = temp.path().join("state");
        let workspace = temp.path().join("workspace");
        fs::create_dir_all(&state).unwrap();
        fs::create_dir_all(&workspace).unwrap();

        let runtime = temp.path().join("fake-docker.sh");
        fs::write(
            &runtime,
            FAKE_RUNTIME.replace("__STATE__", &state.to_string_lossy()),
        )
        .unwrap();
        fs::set_permissions(&runtime, fs::Permissions::from_mode(0o755)).unwrap();

        Self {
            _temp: temp,
            state,
            workspace,
            runtime,
        }
    }

    fn executor(&self) -> ContainerExecutor {
        ContainerExecutor::connect(ContainerExecConfig {
            runtime: self.runtime.to_string_lossy().to_string(),
            user: Some("1000:1000".to_string()),
            ..ContainerExecConfig::default()
        })
        .unwrap()
    }

    fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.state.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn workspace(&self) -> &Path {
        &self.workspace
    }
}

#[test]
fn given_print_code_when_execute_then_success_with_isolated_launch() {
    let harness = Harness::new();
    let executor = harness.executor();

    let result = executor.execute("print('ok')", harness.workspace(), None, None);

    assert!(result.success, "{:?}", result);
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.output, "ok\n");
    assert_eq!(result.error, "");

    let calls = harness.calls();
    let run = calls
        .iter()
        .find(|c| c.starts_with("run "))
        .expect("run call");
    let source = fs::canonicalize(harness.workspace()).unwrap();
    assert!(run.contains("--network none"));
    assert!(run.contains("--memory 512m"));
    assert!(run.contains("--cpu-quota 50000 --cpu-period 100000"));
    assert!(run.contains("--pull never"));
    assert!(run.contains(&format!(
        "--mount type=bind,source={},target=/workspace,readonly=false",
        source.display()
    )));
    assert!(run.contains("--workdir /workspace"));
    assert!(!run.contains("--rm"));
    assert!(run.ends_with("python:3.11-slim python -c print('ok')"));
    assert!(calls.contains(&"logs --timestamps cid-123".to_string()));
    assert_eq!(calls.last().unwrap(), "rm -f cid-123");
}

#[test]
fn given_raising_code_when_execute_then_combined_log_in_output_and_error() {
    let harness = Harness::new();
    let executor = harness.executor();

    let result = executor.execute("raise ValueError('boom')", harness.workspace(), None, None);

    let expected = "before\nTraceback (most recent call last):\nValueError: boom\n";
    assert!(!result.success);
    assert_eq!(result.exit_code, 1);
    assert_eq!(result.output, expected);
    assert_eq!(result.error, expected);
    assert_eq!(harness.calls().last().unwrap(), "rm -f cid-123");
}

#[test]
fn given_hanging_code_when_timeout_elapses_then_partial_log_and_container_removed() {
    let harness = Harness::new();
    let executor = harness.executor();

    let started = Instant::now();
    let result = executor.execute(
        "import time; time.sleep(60)",
        harness.workspace(),
        Some(Duration::from_secs(1)),
        None,
    );

    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(!result.success);
    assert_eq!(result.exit_code, -1);
    assert!(result.error.starts_with("started"));
    assert!(result.error.contains("Execution timed out after 1s"));
    assert_eq!(harness.calls().last().unwrap(), "rm -f cid-123");
}

#[test]
fn given_unknown_image_when_execute_then_setup_failure_without_removal() {
    let harness = Harness::new();
    let executor = harness.executor();

    let result = executor.execute("print(1)", harness.workspace(), None, Some("ghost:1"));

    assert!(!result.success);
    assert_eq!(result.exit_code, -1);
    assert_eq!(result.error, "Docker image 'ghost:1' not found");
    assert!(!harness.calls().iter().any(|c| c.starts_with("rm ")));
}

#[test]
fn given_local_images_when_checked_then_presence_and_pull_are_reported() {
    let harness = Harness::new();
    let executor = harness.executor();

    assert!(executor.image_exists("python:3.11-slim").unwrap());
    assert!(!executor.image_exists("ghost:1").unwrap());
    assert!(!executor.pull_image("ghost:1"));
    assert!(matches!(
        executor.ensure_image("ghost:1"),
        Err(ExecError::ImageNotFound { .. })
    ));
    assert!(executor.ensure_image("python:3.11-slim").is_ok());
}

#[test]
fn given_missing_runtime_binary_when_connect_then_spawn_error() {
    let result = ContainerExecutor::connect(ContainerExecConfig {
        runtime: "/nonexistent/docker".to_string(),
        ..ContainerExecConfig::default()
    });

    match result {
        Err(err) => assert_eq!(err.code(), "CONTAINER_EXEC_SPAWN_ERROR"),
        Ok(_) => panic!("connect should fail without a runtime binary"),
    }
}

#[test]
fn given_clean_exit_when_log_fetch_fails_then_exit_code_is_unknown_not_cli_status() {
    let harness = Harness::new();
    let executor = harness.executor();

    let result = executor.execute("no_logs = 1", harness.workspace(), None, None);

    assert!(!result.success);
    assert_eq!(result.exit_code, -1);
    assert!(result.error.contains("does not support reading"));
    assert!(harness.calls().iter().any(|c| c == "rm -f cid-123"));
}

#[test]
fn given_daemon_refusing_launch_when_execute_then_run_status_is_reported() {
    let harness = Harness::new();
    let executor = harness.executor();

    let result = executor.execute("daemon_refuses = 1", harness.workspace(), None, None);

    assert!(!result.success);
    assert_eq!(result.exit_code, 125);
    assert!(result.error.contains("failed to create task"));
    assert!(!harness.calls().iter().any(|c| c.starts_with("rm ")));
}
