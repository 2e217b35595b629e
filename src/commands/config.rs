use std::path::Path;

use tianji_gateway::config::{config_file_path, init_config_toml, load_config};

use crate::{CliError, CliResult, ConfigCommand};

pub async fn handle_config_cmd(cmd: ConfigCommand, config_path: Option<&Path>) -> CliResult<()> {
    match cmd {
        ConfigCommand::Init { force } => {
            let path = init_config_toml(force)
                .await
                .map_err(|e| CliError::Config(e.to_string()))?;
            println!("Wrote TOML config template to {:?}", path);
        }
        ConfigCommand::Show => {
            let cfg = load_config(config_path)
                .await
                .map_err(|e| CliError::Config(format!("{e:#}")))?;
            let source = config_path
                .map(Path::to_path_buf)
                .unwrap_or_else(config_file_path);
            let text = toml::to_string_pretty(&cfg.redacted())
                .map_err(|e| CliError::Config(e.to_string()))?;
            if source.exists() {
                println!("# effective config (from {:?})", source);
            } else {
                println!("# effective config (built-in defaults; {:?} not found)", source);
            }
            print!("{text}");
        }
    }
    Ok(())
}
