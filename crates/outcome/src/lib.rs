//! # Outcome
//!
//! Value types shared by the execution backends: the request a caller hands
//! in, the result each backend hands back, and the files recovered from a
//! kernel's scratch directory.
//!
//! ```rust
//! use outcome::{ExecutionRequest, ExecutionResult, CONTAINER_DEFAULT_TIMEOUT};
//!
//! let request = ExecutionRequest::new("print('ok')", None, CONTAINER_DEFAULT_TIMEOUT).unwrap();
//! assert_eq!(request.timeout, CONTAINER_DEFAULT_TIMEOUT);
//!
//! let result = ExecutionResult::from_logs("ok\n".to_string(), 0);
//! assert!(result.success);
//! assert_eq!(result.error, "");
//! ```
//!
//! None of these values are shared between executions; each invocation builds
//! its own.

pub mod files;
pub mod limits;
pub mod request;
pub mod result;

pub use files::{is_plain_file_name, FileArtifact, MAX_FILE_SIZE};
pub use request::{
    ExecutionRequest, RequestError, CONTAINER_DEFAULT_TIMEOUT, KERNEL_DEFAULT_TIMEOUT,
};
pub use result::{ExecutionResult, KernelResult, UNKNOWN_EXIT_CODE};
