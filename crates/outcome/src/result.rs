use crate::files::FileArtifact;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exit code reported when the container never ran or its status is unknown.
pub const UNKNOWN_EXIT_CODE: i64 = -1;

/// Outcome of a one-shot container run.
///
/// `output` always carries the full combined log; `error` repeats it only
/// when the run failed. Container results never carry recovered files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    pub error: String,
    pub exit_code: i64,
}

impl ExecutionResult {
    pub fn from_logs(logs: String, exit_code: i64) -> Self {
        let success = exit_code == 0;
        let error = if success { String::new() } else { logs.clone() };
        Self {
            success,
            output: logs,
            error,
            exit_code,
        }
    }

    /// A run that failed before or outside the interpreter.
    pub fn failure(message: impl Into<String>, exit_code: Option<i64>) -> Self {
        let exit_code = match exit_code {
            Some(0) | None => UNKNOWN_EXIT_CODE,
            Some(code) => code,
        };
        Self {
            success: false,
            output: String::new(),
            error: message.into(),
            exit_code,
        }
    }

    pub fn timed_out(partial_logs: String, timeout: Duration) -> Self {
        let notice = format!("Execution timed out after {:?}", timeout);
        let error = if partial_logs.trim().is_empty() {
            notice
        } else {
            format!("{}\n{}", partial_logs.trim_end(), notice)
        };
        Self {
            success: false,
            output: partial_logs,
            error,
            exit_code: UNKNOWN_EXIT_CODE,
        }
    }
}

/// Outcome of one code run on a persistent kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelResult {
    /// False once an error event or a fatal protocol failure was recorded.
    #[serde(default = "default_success")]
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    /// Last expression value or inline image data URIs, newline joined.
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<FileArtifact>>,
}

fn default_success() -> bool {
    true
}

impl Default for KernelResult {
    fn default() -> Self {
        Self {
            success: true,
            stdout: String::new(),
            stderr: String::new(),
            result: String::new(),
            files: None,
        }
    }
}

impl KernelResult {
    pub fn failure(details: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            stderr: format!("Error: {}", details),
            ..Self::default()
        }
    }
}
