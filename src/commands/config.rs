use clap::{Args, Subcommand};
use serde::Serialize;

use skydock::config::{self, PanelConfig};

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommand,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Display the effective configuration (secrets redacted)
    Show {
        /// Show only built-in defaults (ignore skydock.toml)
        #[arg(long)]
        builtin: bool,
    },
    /// Show the path to skydock.toml
    Path,
}

#[derive(Debug, Serialize)]
pub struct ConfigOutput {
    command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<PanelConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exists: Option<bool>,
}

pub fn run(args: ConfigArgs, global: &GlobalArgs) -> CmdResult<ConfigOutput> {
    match args.command {
        ConfigCommand::Show { builtin } => show(global, builtin),
        ConfigCommand::Path => path(global),
    }
}

fn show(global: &GlobalArgs, builtin: bool) -> CmdResult<ConfigOutput> {
    let (config, path) = if builtin {
        (PanelConfig::default(), None)
    } else {
        let path = global.config_path()?;
        (config::load(&path)?, Some(path))
    };

    Ok((
        ConfigOutput {
            command: "config.show".to_string(),
            config: Some(config.redacted()),
            exists: path.as_ref().map(|p| p.exists()),
            path: path.map(|p| p.display().to_string()),
        },
        0,
    ))
}

fn path(global: &GlobalArgs) -> CmdResult<ConfigOutput> {
    let path = global.config_path()?;
    Ok((
        ConfigOutput {
            command: "config.path".to_string(),
            config: None,
            exists: Some(path.exists()),
            path: Some(path.display().to_string()),
        },
        0,
    ))
}
