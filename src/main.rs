use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;
mod tty;

use commands::{auth, config, host, profile, service, site, GlobalArgs};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "skydock")]
#[command(version = VERSION)]
#[command(about = "Server control panel: services, SSH targets and site provisioning")]
struct Cli {
    /// Path to skydock.toml
    #[arg(long, global = true, env = skydock::paths::CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Run commands on the SSH target stored for this account
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Record commands instead of running them; store writes are discarded
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, toggle and destroy sites
    Site(site::SiteArgs),
    /// Query and control system services
    Service(service::ServiceArgs),
    /// Host facts
    Host(host::HostArgs),
    /// Stored SSH targets
    Profile(profile::ProfileArgs),
    /// System account password checks
    Auth(auth::AuthArgs),
    /// Inspect configuration
    Config(config::ConfigArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let global = GlobalArgs {
        config: cli.config,
        profile: cli.profile,
        dry_run: cli.dry_run,
    };

    let (json_result, exit_code) = commands::run_json(cli.command, &global);
    if let Err(err) = output::print_json_result(json_result) {
        eprintln!("{}", err);
        return std::process::ExitCode::from(1);
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
