use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Docker image '{image}' not found")]
    ImageNotFound { image: String },
    #[error("Docker API error during {op}: {message}")]
    Runtime {
        op: &'static str,
        message: String,
        exit_status: Option<i64>,
    },
    #[error("Failed to spawn container runtime '{runtime}': {source}")]
    RuntimeSpawn {
        runtime: String,
        source: std::io::Error,
    },
    #[error("Workspace error: {message}")]
    Workspace { message: String },
    #[error("Execution error: {message}")]
    InvalidRequest { message: String },
}

impl ExecError {
    pub(crate) fn runtime(op: &'static str, message: impl Into<String>) -> Self {
        ExecError::Runtime {
            op,
            message: message.into(),
            exit_status: None,
        }
    }

    /// Exit status to report for the container. Only a failed `run` carries
    /// one (125 daemon refused, 126/127 command not runnable); statuses of
    /// other CLI calls describe the CLI, not the container.
    pub fn exit_code(&self) -> Option<i64> {
        match self {
            ExecError::Runtime {
                op: "run",
                exit_status,
                ..
            } => *exit_status,
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ExecError::ImageNotFound { .. } => "CONTAINER_EXEC_IMAGE_NOT_FOUND",
            ExecError::Runtime { .. } => "CONTAINER_EXEC_RUNTIME_ERROR",
            ExecError::RuntimeSpawn { .. } => "CONTAINER_EXEC_SPAWN_ERROR",
            ExecError::Workspace { .. } => "CONTAINER_EXEC_WORKSPACE_ERROR",
            ExecError::InvalidRequest { .. } => "CONTAINER_EXEC_INVALID_REQUEST",
        }
    }
}
