use thiserror::Error;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("{message}")]
    Http { message: String },
    #[error("Authentication failed: {message}")]
    Auth { message: String },
    #[error("Kernel creation failed: {message}")]
    KernelCreate { message: String },
    #[error("Channel error: {message}")]
    Channel { message: String },
    #[error("Protocol error: {message}")]
    Protocol { message: String },
    #[error("Invalid URL: {message}")]
    Url { message: String },
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },
}

impl KernelError {
    pub fn code(&self) -> &'static str {
        match self {
            KernelError::Http { .. } => "KERNEL_EXEC_HTTP_ERROR",
            KernelError::Auth { .. } => "KERNEL_EXEC_AUTH_FAILED",
            KernelError::KernelCreate { .. } => "KERNEL_EXEC_KERNEL_CREATE_FAILED",
            KernelError::Channel { .. } => "KERNEL_EXEC_CHANNEL_ERROR",
            KernelError::Protocol { .. } => "KERNEL_EXEC_PROTOCOL_ERROR",
            KernelError::Url { .. } => "KERNEL_EXEC_INVALID_URL",
            KernelError::InvalidRequest { .. } => "KERNEL_EXEC_INVALID_REQUEST",
        }
    }
}

impl From<reqwest::Error> for KernelError {
    fn from(err: reqwest::Error) -> Self {
        KernelError::Http {
            message: err.to_string(),
        }
    }
}
