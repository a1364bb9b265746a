use super::describe_config_error;
use anyhow::Result;
use clap::Subcommand;
use config_loader::{redact_secrets_in_config, ConfigManager, EnvFileSecretProvider};

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration with credentials masked
    Show,
}

pub fn run(cmd: ConfigCommand) -> Result<bool> {
    match cmd {
        ConfigCommand::Show => {
            let manager = ConfigManager::new();
            let mut value = manager
                .load_value_with_secrets(&EnvFileSecretProvider::new())
                .map_err(describe_config_error)?;
            redact_secrets_in_config(&mut value);
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(true)
        }
    }
}
