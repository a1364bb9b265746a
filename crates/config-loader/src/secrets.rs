use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};

static SECRET_URI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^secret://([^/]+)/(.+)$").expect("secret uri pattern"));

const SENSITIVE_KEYS: &[&str] = &["password", "secret", "token"];

#[derive(Error, Debug)]
pub enum SecretError {
    #[error("Secret not found: {scope}/{key}")]
    SecretNotFound { scope: String, key: String },

    #[error("Failed to read secrets file: {path} - {message}")]
    SecretsFileError { path: String, message: String },

    #[error("Failed to parse secrets file: {message}")]
    SecretsParseError { message: String },
}

pub trait SecretProvider: Send + Sync {
    fn resolve(&self, scope: &str, key: &str) -> Result<String, SecretError>;
}

/// Resolves `secret://scope/key` from `SECRET_<SCOPE>_<KEY>` first, then
/// from a JSON secrets file shaped `{ "<scope>": { "<key>": "<value>" } }`.
pub struct EnvFileSecretProvider {
    secrets_file: Option<PathBuf>,
    file_secrets: OnceCell<HashMap<String, HashMap<String, String>>>,
}

impl EnvFileSecretProvider {
    pub fn new() -> Self {
        let secrets_file = env::var("SANDBOX_SECRETS_FILE")
            .map(PathBuf::from)
            .or_else(|_| {
                let default_path = PathBuf::from(".sandbox/secrets.json");
                if default_path.exists() {
                    Ok(default_path)
                } else {
                    Err(())
                }
            })
            .ok();

        Self {
            secrets_file,
            file_secrets: OnceCell::new(),
        }
    }

    pub fn with_secrets_file<P: Into<PathBuf>>(secrets_file: P) -> Self {
        Self {
            secrets_file: Some(secrets_file.into()),
            file_secrets: OnceCell::new(),
        }
    }

    fn read_secrets_file(
        &self,
    ) -> Result<HashMap<String, HashMap<String, String>>, SecretError> {
        let Some(ref path) = self.secrets_file else {
            return Ok(HashMap::new());
        };

        if !path.exists() {
            debug!(path = %path.display(), "no secrets file");
            return Ok(HashMap::new());
        }

        let content = fs::read_to_string(path).map_err(|e| SecretError::SecretsFileError {
            path: path.to_string_lossy().to_string(),
            message: e.to_string(),
        })?;

        let parsed: HashMap<String, HashMap<String, Value>> = serde_json::from_str(&content)
            .map_err(|e| SecretError::SecretsParseError {
                message: e.to_string(),
            })?;

        let secrets = parsed
            .into_iter()
            .map(|(scope, entries)| {
                let strings = entries
                    .into_iter()
                    .filter_map(|(key, value)| match value {
                        Value::String(s) => Some((key, s)),
                        other => {
                            warn!(scope = %scope, key = %key, "ignoring non-string secret value {}", other);
                            None
                        }
                    })
                    .collect::<HashMap<_, _>>();
                (scope, strings)
            })
            .collect::<HashMap<_, _>>();

        Ok(secrets)
    }

    fn scoped_file_secrets(&self) -> &HashMap<String, HashMap<String, String>> {
        self.file_secrets.get_or_init(|| {
            self.read_secrets_file().unwrap_or_else(|e| {
                warn!(error = %e, "secrets file unusable, falling back to environment only");
                HashMap::new()
            })
        })
    }
}

impl SecretProvider for EnvFileSecretProvider {
    fn resolve(&self, scope: &str, key: &str) -> Result<String, SecretError> {
        let var = override_var(scope, key);
        if let Ok(value) = env::var(&var) {
            debug!(scope, key, var = %var, "secret taken from environment");
            return Ok(value);
        }

        if let Some(value) = self
            .scoped_file_secrets()
            .get(scope)
            .and_then(|scope_secrets| scope_secrets.get(key))
        {
            debug!(scope, key, "secret taken from secrets file");
            return Ok(value.clone());
        }

        Err(SecretError::SecretNotFound {
            scope: scope.to_string(),
            key: key.to_string(),
        })
    }
}

fn override_var(scope: &str, key: &str) -> String {
    let upper = |part: &str| part.to_uppercase().replace('-', "_");
    format!("SECRET_{}_{}", upper(scope), upper(key))
}

impl Default for EnvFileSecretProvider {
    fn default() -> Self {
        Self::new()
    }
}

pub fn resolve_secrets_in_config<P: SecretProvider + ?Sized>(
    config: &mut Value,
    provider: &P,
) -> Result<(), SecretError> {
    match config {
        Value::String(s) => {
            let reference = SECRET_URI
                .captures(s)
                .and_then(|captures| Some((captures.get(1)?, captures.get(2)?)))
                .map(|(scope, key)| (scope.as_str().to_string(), key.as_str().to_string()));

            if let Some((scope, key)) = reference {
                *s = provider.resolve(&scope, &key)?;
            }
        }
        Value::Object(obj) => {
            for (_, v) in obj.iter_mut() {
                resolve_secrets_in_config(v, provider)?;
            }
        }
        Value::Array(arr) => {
            for item in arr.iter_mut() {
                resolve_secrets_in_config(item, provider)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Masks credentials so a config can be printed.
pub fn redact_secrets_in_config(config: &mut Value) {
    match config {
        Value::String(s) if s.starts_with("secret://") => {
            *s = "***".to_string();
        }
        Value::Object(obj) => {
            for (key, v) in obj.iter_mut() {
                let key = key.to_lowercase();
                let sensitive = SENSITIVE_KEYS.iter().any(|needle| key.contains(needle));
                match v {
                    Value::String(s) if sensitive && !s.is_empty() => *s = "***".to_string(),
                    _ => redact_secrets_in_config(v),
                }
            }
        }
        Value::Array(arr) => {
            for item in arr.iter_mut() {
                redact_secrets_in_config(item);
            }
        }
        _ => {}
    }
}
