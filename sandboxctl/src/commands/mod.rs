pub mod config;
pub mod image;
pub mod run;

use anyhow::{anyhow, Result};
use capsules_container_exec::{ContainerExecConfig, ResourceLimits};
use config_loader::{ConfigError, ConfigManager, ContainerSettings, SandboxConfig};

/// Loads the effective configuration, spelling out each schema violation.
pub fn load_config() -> Result<SandboxConfig> {
    ConfigManager::new().load().map_err(describe_config_error)
}

pub fn describe_config_error(err: ConfigError) -> anyhow::Error {
    match err {
        ConfigError::ValidationFailed { errors } => {
            let details: Vec<String> = errors
                .iter()
                .map(|e| format!("  {}: {}", e.json_pointer, e.message))
                .collect();
            anyhow!("Config validation failed:\n{}", details.join("\n"))
        }
        other => anyhow!(other),
    }
}

pub fn container_exec_config(settings: &ContainerSettings) -> ContainerExecConfig {
    ContainerExecConfig {
        runtime: settings.runtime.clone(),
        image: settings.image.clone(),
        limits: ResourceLimits {
            memory: settings.memory.clone(),
            cpu_quota: settings.cpu_quota,
            cpu_period: settings.cpu_period,
        },
        mount_path: settings.mount_path.clone(),
        user: settings.user.clone(),
        default_timeout: settings.timeout(),
    }
}
