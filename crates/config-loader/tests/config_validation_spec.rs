use config_loader::{
    redact_secrets_in_config, Backend, ConfigError, ConfigManager, EnvFileSecretProvider,
};
use serial_test::serial;
use std::env;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

fn setup_test_environment() -> (TempDir, ConfigManager, EnvFileSecretProvider) {
    let temp_dir = TempDir::new().unwrap();
    let config_dir = temp_dir.path().join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let secrets_file = temp_dir.path().join("secrets.json");
    fs::write(
        &secrets_file,
        r#"{ "jupyter": { "token": "tok-from-file", "password": "pw-from-file" } }"#,
    )
    .unwrap();

    let manager = ConfigManager::with_dir(config_dir);
    let provider = EnvFileSecretProvider::with_secrets_file(secrets_file);
    (temp_dir, manager, provider)
}

fn clear_overrides() {
    for var in [
        "SANDBOX_BACKEND",
        "SANDBOX_CONTAINER_RUNTIME",
        "SANDBOX_IMAGE",
        "SANDBOX_WORKSPACE_ROOT",
        "SANDBOX_KERNEL_URL",
        "SANDBOX_KERNEL_TOKEN",
        "SANDBOX_KERNEL_PASSWORD",
        "SANDBOX_ARTIFACTS_DIR",
        "SANDBOX_PUBLIC_URL",
    ] {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn given_no_config_file_when_load_then_schema_defaults_apply() {
    clear_overrides();
    let (_temp_dir, manager, provider) = setup_test_environment();

    let config = manager.load_with_secrets(&provider).unwrap();

    assert_eq!(config.backend, Backend::Container);
    assert_eq!(config.container.image, "python:3.11-slim");
    assert_eq!(config.container.timeout(), Duration::from_secs(30));
    assert_eq!(config.container.memory, "512m");
    assert_eq!(config.container.cpu_quota, 50_000);
    assert_eq!(config.container.mount_path, "/workspace");
    assert!(config.container.user.is_none());
    assert_eq!(config.kernel.timeout(), Duration::from_secs(60));
    assert!(config.kernel.token().is_none());
    assert_eq!(config.artifacts.public_base_url, "http://localhost:3000");
}

#[test]
#[serial]
fn given_secret_references_when_load_then_credentials_resolve() {
    clear_overrides();
    let (_temp_dir, manager, provider) = setup_test_environment();

    fs::write(
        manager.config_dir().join("sandbox.json"),
        r#"{
            "backend": "kernel",
            "kernel": {
                "baseUrl": "http://jupyter:8888",
                "token": "secret://jupyter/token",
                "password": "secret://jupyter/password"
            }
        }"#,
    )
    .unwrap();

    let config = manager.load_with_secrets(&provider).unwrap();

    assert_eq!(config.backend, Backend::Kernel);
    assert_eq!(config.kernel.token(), Some("tok-from-file"));
    assert_eq!(config.kernel.password(), Some("pw-from-file"));
}

#[test]
#[serial]
fn given_missing_secret_when_load_then_secret_resolution_error() {
    clear_overrides();
    let (_temp_dir, manager, provider) = setup_test_environment();

    fs::write(
        manager.config_dir().join("sandbox.json"),
        r#"{ "kernel": { "token": "secret://jupyter/absent" } }"#,
    )
    .unwrap();

    let result = manager.load_with_secrets(&provider);
    assert!(matches!(
        result,
        Err(ConfigError::SecretResolutionFailed { .. })
    ));
}

#[test]
#[serial]
fn given_invalid_values_when_load_then_validation_errors_point_at_fields() {
    clear_overrides();
    let (_temp_dir, manager, provider) = setup_test_environment();

    fs::write(
        manager.config_dir().join("sandbox.json"),
        r#"{
            "container": { "timeoutSecs": 0, "memory": "lots", "mountPath": "workspace" },
            "kernel": { "baseUrl": "ftp://nowhere" }
        }"#,
    )
    .unwrap();

    let result = manager.load_with_secrets(&provider);
    match result {
        Err(ConfigError::ValidationFailed { errors }) => {
            assert!(errors.len() >= 4);
            assert!(errors
                .iter()
                .any(|e| e.json_pointer.contains("timeoutSecs")));
            assert!(errors.iter().any(|e| e.json_pointer.contains("baseUrl")));
        }
        other => panic!("expected validation failure, got {:?}", other.map(|_| ())),
    }
}

#[test]
#[serial]
fn given_env_overrides_when_load_then_they_win_over_file() {
    clear_overrides();
    let (_temp_dir, manager, provider) = setup_test_environment();

    fs::write(
        manager.config_dir().join("sandbox.json"),
        r#"{ "backend": "container", "container": { "image": "python:3.12-slim" } }"#,
    )
    .unwrap();

    env::set_var("SANDBOX_BACKEND", "kernel");
    env::set_var("SANDBOX_KERNEL_URL", "https://kernels.internal/");
    let config = manager.load_with_secrets(&provider).unwrap();
    clear_overrides();

    assert_eq!(config.backend, Backend::Kernel);
    assert_eq!(config.kernel.base_url, "https://kernels.internal/");
    assert_eq!(config.container.image, "python:3.12-slim");
}

#[test]
#[serial]
fn given_loaded_config_when_redacted_then_credentials_are_masked() {
    clear_overrides();
    let (_temp_dir, manager, provider) = setup_test_environment();

    fs::write(
        manager.config_dir().join("sandbox.json"),
        r#"{ "kernel": { "password": "secret://jupyter/password" } }"#,
    )
    .unwrap();

    let mut value = manager.load_value_with_secrets(&provider).unwrap();
    redact_secrets_in_config(&mut value);

    assert_eq!(value["kernel"]["password"], "***");
    assert_eq!(value["kernel"]["baseUrl"], "http://localhost:8888");
}

#[test]
fn given_malformed_json_when_validate_config_file_then_parse_error() {
    let (_temp_dir, manager, _provider) = setup_test_environment();
    let path = manager.config_dir().join("broken.json");
    fs::write(&path, "{ not json").unwrap();

    let result = manager.validate_config_file(&path);
    assert!(matches!(result, Err(ConfigError::JsonParsingFailed { .. })));
}
