use jsonschema::{Draft, JSONSchema};
use outcome::limits;
use once_cell::sync::Lazy;
use serde_json::{Map, Value};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, instrument};

pub mod secrets;
pub mod settings;

pub use secrets::{redact_secrets_in_config, EnvFileSecretProvider, SecretError, SecretProvider};
pub use settings::{ArtifactSettings, Backend, ContainerSettings, KernelSettings, SandboxConfig};

const CONFIG_FILE_NAME: &str = "sandbox.json";

static SCHEMA_SOURCE: &str = include_str!("../schema/sandbox-config.v1.json");

static SCHEMA: Lazy<Value> = Lazy::new(|| {
    serde_json::from_str(SCHEMA_SOURCE).unwrap_or_else(|_| Value::Object(Map::new()))
});

/// Environment variables that override individual config values after the
/// file has been loaded, keyed to the JSON pointer they replace.
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("SANDBOX_BACKEND", "/backend"),
    ("SANDBOX_CONTAINER_RUNTIME", "/container/runtime"),
    ("SANDBOX_IMAGE", "/container/image"),
    ("SANDBOX_WORKSPACE_ROOT", "/container/workspaceRoot"),
    ("SANDBOX_KERNEL_URL", "/kernel/baseUrl"),
    ("SANDBOX_KERNEL_TOKEN", "/kernel/token"),
    ("SANDBOX_KERNEL_PASSWORD", "/kernel/password"),
    ("SANDBOX_ARTIFACTS_DIR", "/artifacts/root"),
    ("SANDBOX_PUBLIC_URL", "/artifacts/publicBaseUrl"),
];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    ConfigFileNotFound { path: String },

    #[error("Schema compilation failed: {message}")]
    SchemaCompilationFailed { message: String },

    #[error("Config validation failed")]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("JSON parsing failed: {message}")]
    JsonParsingFailed { message: String },

    #[error("IO error: {message}")]
    IoError { message: String },

    #[error("Secret resolution failed: {error}")]
    SecretResolutionFailed { error: SecretError },
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub json_pointer: String,
    pub message: String,
    pub schema_path: String,
}

pub struct ConfigManager {
    config_dir: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            config_dir: Self::find_config_dir(),
        }
    }

    pub fn with_dir(config_dir: PathBuf) -> Self {
        Self { config_dir }
    }

    pub fn config_dir(&self) -> &PathBuf {
        &self.config_dir
    }

    fn find_config_dir() -> PathBuf {
        if let Ok(config_dir) = env::var("SANDBOX_CONFIG_DIR") {
            PathBuf::from(config_dir)
        } else {
            PathBuf::from(".sandbox/config")
        }
    }

    #[instrument(skip(self))]
    pub fn load(&self) -> Result<SandboxConfig, ConfigError> {
        self.load_with_secrets(&EnvFileSecretProvider::new())
    }

    #[instrument(skip(self, provider))]
    pub fn load_with_secrets<P: SecretProvider + ?Sized>(
        &self,
        provider: &P,
    ) -> Result<SandboxConfig, ConfigError> {
        let config_value = self.load_value_with_secrets(provider)?;

        serde_json::from_value(config_value).map_err(|e| ConfigError::JsonParsingFailed {
            message: e.to_string(),
        })
    }

    /// Effective configuration as JSON: schema defaults, overlaid by the
    /// config file, with secrets resolved and environment overrides applied.
    pub fn load_value_with_secrets<P: SecretProvider + ?Sized>(
        &self,
        provider: &P,
    ) -> Result<Value, ConfigError> {
        let mut config_value = default_config();
        if let Some(file_value) = self.load_config_file()? {
            merge_values(&mut config_value, file_value);
        }

        secrets::resolve_secrets_in_config(&mut config_value, provider)
            .map_err(|e| ConfigError::SecretResolutionFailed { error: e })?;

        apply_env_overrides(&mut config_value);

        validate_config(&config_value)?;
        debug!("Loaded sandbox config from {:?}", self.config_dir);
        Ok(config_value)
    }

    #[instrument(skip(self))]
    pub fn validate_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::ConfigFileNotFound {
                path: config_path.to_string_lossy().to_string(),
            });
        }

        let config_value = read_json(config_path)?;
        let mut merged = default_config();
        merge_values(&mut merged, config_value);
        validate_config(&merged)
    }

    fn load_config_file(&self) -> Result<Option<Value>, ConfigError> {
        let config_path = self.config_dir.join(CONFIG_FILE_NAME);

        debug!("Loading config from: {:?}", config_path);

        if !config_path.exists() {
            debug!("Config file not found, using schema defaults");
            return Ok(None);
        }

        read_json(&config_path).map(Some)
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

fn read_json(path: &Path) -> Result<Value, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        message: format!("Failed to read config file: {}", e),
    })?;

    serde_json::from_str(&content).map_err(|e| ConfigError::JsonParsingFailed {
        message: e.to_string(),
    })
}

/// Defaults declared in the schema, nested objects included.
pub fn default_config() -> Value {
    defaults_for(&SCHEMA)
}

fn defaults_for(schema: &Value) -> Value {
    let mut defaults = Map::new();

    if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
        for (key, property) in properties {
            if property.get("properties").is_some() {
                defaults.insert(key.clone(), defaults_for(property));
            } else if let Some(default_value) = property.get("default") {
                defaults.insert(key.clone(), default_value.clone());
            }
        }
    }

    Value::Object(defaults)
}

/// Deep-merges `overlay` into `base`; objects merge key by key, anything
/// else replaces.
pub fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn apply_env_overrides(config: &mut Value) {
    for (var, pointer) in ENV_OVERRIDES {
        let Ok(value) = env::var(var) else {
            continue;
        };
        if value.trim().is_empty() {
            continue;
        }
        if let Some(slot) = config.pointer_mut(pointer) {
            debug!("Config value {} overridden by {}", pointer, var);
            *slot = Value::String(value);
        }
    }
}

pub fn validate_config(config: &Value) -> Result<(), ConfigError> {
    let schema = compiled_schema()?;
    let validation_result = schema.validate(config);

    if let Err(errors) = validation_result {
        let validation_errors: Vec<ValidationError> = errors
            .map(|error| ValidationError {
                json_pointer: error.instance_path.to_string(),
                message: error.to_string(),
                schema_path: error.schema_path.to_string(),
            })
            .collect();

        return Err(ConfigError::ValidationFailed {
            errors: validation_errors,
        });
    }

    let cap_errors = resource_cap_errors(config);
    if !cap_errors.is_empty() {
        return Err(ConfigError::ValidationFailed { errors: cap_errors });
    }

    Ok(())
}

/// Container limits may be tightened but not raised above the run ceilings.
fn resource_cap_errors(config: &Value) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(memory) = config.pointer("/container/memory").and_then(Value::as_str) {
        if !limits::memory_within_cap(memory) {
            errors.push(ValidationError {
                json_pointer: "/container/memory".to_string(),
                message: format!(
                    "\"{}\" exceeds the {} byte memory ceiling",
                    memory,
                    limits::MAX_MEMORY_BYTES
                ),
                schema_path: "resourceCaps/memory".to_string(),
            });
        }
    }

    let quota = config.pointer("/container/cpuQuota").and_then(Value::as_i64);
    let period = config.pointer("/container/cpuPeriod").and_then(Value::as_i64);
    if let (Some(quota), Some(period)) = (quota, period) {
        if !limits::cpu_within_cap(quota, period) {
            errors.push(ValidationError {
                json_pointer: "/container/cpuQuota".to_string(),
                message: format!(
                    "cpuQuota {} over cpuPeriod {} exceeds half of one core",
                    quota, period
                ),
                schema_path: "resourceCaps/cpu".to_string(),
            });
        }
    }

    errors
}

fn compiled_schema() -> Result<JSONSchema, ConfigError> {
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&SCHEMA)
        .map_err(|e| ConfigError::SchemaCompilationFailed {
            message: e.to_string(),
        })
}
