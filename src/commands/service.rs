use clap::{Args, Subcommand};
use serde::Serialize;

use skydock::service::{
    ControlOutcome, ServiceController, ServiceEntry, ServiceStatus, DEFAULT_LOG_LINES,
};

use super::{CmdResult, Session};

#[derive(Args)]
pub struct ServiceArgs {
    #[command(subcommand)]
    command: ServiceCommand,
}

#[derive(Subcommand)]
enum ServiceCommand {
    /// Installed/running state of one service
    Status { name: String },
    /// State of every service in the configured catalogue
    List,
    /// start, stop, restart or reload a service
    Control { name: String, action: String },
    /// Recent journal lines for a service
    Logs {
        name: String,
        #[arg(long, short = 'n', default_value_t = DEFAULT_LOG_LINES)]
        lines: u32,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceOutput {
    command: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<ServiceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    services: Option<Vec<ServiceEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    control: Option<ControlOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    logs: Option<String>,
}

impl ServiceOutput {
    fn new(command: &'static str) -> Self {
        Self {
            command,
            service: None,
            status: None,
            services: None,
            control: None,
            logs: None,
        }
    }
}

pub fn run(args: ServiceArgs, session: &Session) -> CmdResult<ServiceOutput> {
    let executor = session.executor()?;
    let controller = ServiceController::new(executor.get());

    let output = match args.command {
        ServiceCommand::Status { name } => ServiceOutput {
            status: Some(controller.status(&name)?),
            service: Some(name),
            ..ServiceOutput::new("service.status")
        },
        ServiceCommand::List => ServiceOutput {
            services: Some(controller.overview(&session.config.services.catalogue)?),
            ..ServiceOutput::new("service.list")
        },
        ServiceCommand::Control { name, action } => ServiceOutput {
            control: Some(controller.control(&name, &action)?),
            service: Some(name),
            ..ServiceOutput::new("service.control")
        },
        ServiceCommand::Logs { name, lines } => ServiceOutput {
            logs: Some(controller.logs(&name, lines)?),
            service: Some(name),
            ..ServiceOutput::new("service.logs")
        },
    };

    Ok((output, 0))
}
