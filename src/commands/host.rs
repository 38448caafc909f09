use clap::{Args, Subcommand};
use serde::Serialize;

use skydock::host::{self, HostFacts, ServerRecord};

use super::{CmdResult, Session};

#[derive(Args)]
pub struct HostArgs {
    #[command(subcommand)]
    command: HostCommand,
}

#[derive(Subcommand)]
enum HostCommand {
    /// Hostname, OS, CPU, memory, disk, uptime and load
    Info {
        /// Record the facts in the server table
        #[arg(long)]
        save: bool,
    },
    /// Servers recorded with `host info --save`
    List,
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum HostOutput {
    Info {
        #[serde(flatten)]
        facts: HostFacts,
        #[serde(skip_serializing_if = "Option::is_none")]
        saved: Option<ServerRecord>,
    },
    List { servers: Vec<ServerRecord> },
}

pub fn run(args: HostArgs, session: &Session) -> CmdResult<HostOutput> {
    match args.command {
        HostCommand::Info { save } => {
            let executor = session.executor()?;
            let facts = host::collect(executor.get());
            let saved = if save {
                let is_local = session.profile().is_none();
                Some(session.store()?.save_server(&facts, is_local)?)
            } else {
                None
            };
            Ok((HostOutput::Info { facts, saved }, 0))
        }
        HostCommand::List => {
            let servers = session.store()?.list_servers()?;
            Ok((HostOutput::List { servers }, 0))
        }
    }
}
