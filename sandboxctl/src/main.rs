use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "sandboxctl", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute code on the configured backend and print the result JSON
    Run(commands::run::RunArgs),
    /// Check or pull the container image
    Image {
        #[command(subcommand)]
        cmd: commands::image::ImageCommand,
    },
    /// Inspect the effective configuration
    Config {
        #[command(subcommand)]
        cmd: commands::config::ConfigCommand,
    },
    /// Print version and exit
    Version,
}

fn init_tracing() {
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let succeeded = match cli.cmd {
        Commands::Run(args) => commands::run::run(args).await?,
        Commands::Image { cmd } => commands::image::run(cmd).await?,
        Commands::Config { cmd } => commands::config::run(cmd)?,
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            true
        }
    };

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}
