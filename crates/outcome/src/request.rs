use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Default bound for one container run.
pub const CONTAINER_DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound for each message receive on a kernel channel.
pub const KERNEL_DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Timeout must be a positive number of seconds, got {value}")]
    NonPositiveTimeout { value: i64 },
}

/// Code text plus the bound the backend must enforce while running it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub code: String,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl ExecutionRequest {
    /// Builds a request from the inbound `{code, timeout?}` shape.
    ///
    /// An absent timeout takes `backend_default`; zero or negative values are
    /// rejected rather than silently clamped.
    pub fn new(
        code: impl Into<String>,
        timeout_secs: Option<i64>,
        backend_default: Duration,
    ) -> Result<Self, RequestError> {
        let timeout = match timeout_secs {
            None => backend_default,
            Some(value) if value <= 0 => return Err(RequestError::NonPositiveTimeout { value }),
            Some(value) => Duration::from_secs(value as u64),
        };

        Ok(Self {
            code: code.into(),
            timeout,
        })
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        if secs == 0 {
            return Err(serde::de::Error::custom("timeout must be positive"));
        }
        Ok(Duration::from_secs(secs))
    }
}
