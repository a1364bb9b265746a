use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Container,
    Kernel,
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "container" => Ok(Backend::Container),
            "kernel" => Ok(Backend::Kernel),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxConfig {
    pub backend: Backend,
    pub container: ContainerSettings,
    pub kernel: KernelSettings,
    pub artifacts: ArtifactSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSettings {
    pub runtime: String,
    pub image: String,
    pub timeout_secs: u64,
    pub memory: String,
    pub cpu_quota: i64,
    pub cpu_period: i64,
    pub workspace_root: PathBuf,
    pub mount_path: String,
    #[serde(default)]
    pub user: Option<String>,
}

impl ContainerSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelSettings {
    pub base_url: String,
    pub token: String,
    pub password: String,
    pub timeout_secs: u64,
}

impl KernelSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn token(&self) -> Option<&str> {
        Some(self.token.as_str()).filter(|t| !t.is_empty())
    }

    pub fn password(&self) -> Option<&str> {
        Some(self.password.as_str()).filter(|p| !p.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactSettings {
    pub root: PathBuf,
    pub public_base_url: String,
}
