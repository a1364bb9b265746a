use super::{container_exec_config, load_config};
use anyhow::{Context, Result};
use capsules_container_exec::ContainerExecutor;
use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum ImageCommand {
    /// Report whether the image is present in the local store
    Check {
        /// Image reference (configured image when omitted)
        #[arg(long)]
        image: Option<String>,
    },
    /// Pull the image
    Pull {
        /// Image reference (configured image when omitted)
        #[arg(long)]
        image: Option<String>,
    },
}

pub async fn run(cmd: ImageCommand) -> Result<bool> {
    let config = load_config()?;
    let exec_config = container_exec_config(&config.container);

    tokio::task::spawn_blocking(move || -> Result<bool> {
        let executor = ContainerExecutor::connect(exec_config)
            .context("Failed to connect to container runtime")?;
        match cmd {
            ImageCommand::Check { image } => {
                let image = image.unwrap_or_else(|| executor.config().image.clone());
                let present = executor
                    .image_exists(&image)
                    .with_context(|| format!("Failed to inspect image {}", image))?;
                println!("{}: {}", image, if present { "present" } else { "absent" });
                Ok(present)
            }
            ImageCommand::Pull { image } => {
                let image = image.unwrap_or_else(|| executor.config().image.clone());
                let pulled = executor.pull_image(&image);
                println!("{}: {}", image, if pulled { "pulled" } else { "pull failed" });
                Ok(pulled)
            }
        }
    })
    .await
    .context("Container worker failed")?
}
