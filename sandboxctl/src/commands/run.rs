//! Run command - execute one code string on the selected backend

use super::{container_exec_config, load_config};
use anyhow::{bail, Context, Result};
use artifacts::{rewrite_sandbox_references, ArtifactBridge, BridgeContext, LocalArtifactStore};
use capsules_container_exec::{ContainerExecutor, SessionWorkspaces};
use capsules_kernel_exec::{KernelConfig, KernelExecutor};
use clap::Args;
use config_loader::{Backend, SandboxConfig};
use outcome::{ExecutionRequest, ExecutionResult, KernelResult};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::info;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Backend to use instead of the configured one (container or kernel)
    #[arg(long)]
    pub backend: Option<Backend>,

    /// Code to execute
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    pub code: Option<String>,

    /// Read the code from a file
    #[arg(long, value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// Timeout in seconds (backend default when omitted)
    #[arg(long, allow_hyphen_values = true)]
    pub timeout: Option<i64>,

    /// Image for container runs
    #[arg(long)]
    pub image: Option<String>,

    /// Owner of the session workspace and of persisted files
    #[arg(long, env = "SANDBOX_OWNER", default_value = "local")]
    pub owner: String,

    /// Session whose workspace is mounted for container runs
    #[arg(long, default_value = "default")]
    pub session: String,

    /// Store recovered kernel files and rewrite sandbox links to them
    #[arg(long)]
    pub persist: bool,

    /// Chat id recorded with persisted files
    #[arg(long)]
    pub chat_id: Option<String>,
}

pub async fn run(args: RunArgs) -> Result<bool> {
    let config = load_config()?;
    let code = match (&args.code, &args.file) {
        (Some(code), _) => code.clone(),
        (None, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read code from {}", path.display()))?,
        (None, None) => bail!("either --code or --file is required"),
    };

    match args.backend.unwrap_or(config.backend) {
        Backend::Container => run_container(&args, &config, code).await,
        Backend::Kernel => run_kernel(&args, &config, code).await,
    }
}

async fn run_container(args: &RunArgs, config: &SandboxConfig, code: String) -> Result<bool> {
    let request = match ExecutionRequest::new(code, args.timeout, config.container.timeout()) {
        Ok(request) => request,
        Err(err) => {
            let result = ExecutionResult::failure(err.to_string(), None);
            print_json(serde_json::to_value(&result)?)?;
            return Ok(false);
        }
    };

    let workspace = SessionWorkspaces::new(&config.container.workspace_root)
        .and_then(|workspaces| workspaces.create(&args.owner, &args.session))
        .context("Failed to prepare session workspace")?;

    let exec_config = container_exec_config(&config.container);
    let image = args
        .image
        .clone()
        .unwrap_or_else(|| config.container.image.clone());

    let result = tokio::task::spawn_blocking(move || {
        let executor = match ContainerExecutor::connect(exec_config) {
            Ok(executor) => executor,
            Err(err) => return ExecutionResult::failure(err.to_string(), err.exit_code()),
        };
        if let Err(err) = executor.ensure_image(&image) {
            return ExecutionResult::failure(err.to_string(), None);
        }
        executor.execute(
            &request.code,
            &workspace,
            Some(request.timeout),
            Some(&image),
        )
    })
    .await
    .context("Container worker failed")?;

    print_json(serde_json::to_value(&result)?)?;
    Ok(result.success)
}

async fn run_kernel(args: &RunArgs, config: &SandboxConfig, code: String) -> Result<bool> {
    let request = match ExecutionRequest::new(code, args.timeout, config.kernel.timeout()) {
        Ok(request) => request,
        Err(err) => {
            print_json(serde_json::to_value(KernelResult::failure(err))?)?;
            return Ok(false);
        }
    };

    let mut kernel = KernelConfig::new(&config.kernel.base_url).with_timeout(request.timeout);
    if let Some(token) = config.kernel.token() {
        kernel = kernel.with_token(token);
    }
    if let Some(password) = config.kernel.password() {
        kernel = kernel.with_password(password);
    }

    let mut result = KernelExecutor::new(kernel, request.code).run().await;

    let mut links = HashMap::new();
    if args.persist {
        if let Some(files) = result.files.as_deref() {
            let store = LocalArtifactStore::new(&config.artifacts.root)
                .context("Failed to open artifact store")?;
            let bridge = ArtifactBridge::new(store, &config.artifacts.public_base_url);
            let context = BridgeContext {
                chat_id: args.chat_id.clone(),
            };
            links = bridge.persist_recovered_files(files, &context, &args.owner);
            info!(count = links.len(), "persisted recovered files");

            result.stdout = rewrite_sandbox_references(&result.stdout, &links);
            result.result = rewrite_sandbox_references(&result.result, &links);
        }
    }

    let mut output = serde_json::to_value(&result)?;
    if !links.is_empty() {
        output["links"] = serde_json::to_value(&links)?;
    }
    print_json(output)?;
    Ok(result.success)
}

fn print_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
