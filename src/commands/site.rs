use clap::{Args, Subcommand};
use serde::Serialize;

use skydock::lifecycle::{CreateSite, CreatedSite, DestroyedSite, SiteDetails, SiteLifecycleManager};
use skydock::site::{SiteKind, SiteSpec};
use skydock::webserver::WebServerKind;

use super::{CmdResult, Session};

#[derive(Args)]
pub struct SiteArgs {
    /// Account that owns the sites
    #[arg(long, env = "SKYDOCK_OWNER")]
    owner: String,

    #[command(subcommand)]
    command: SiteCommand,
}

#[derive(Subcommand)]
enum SiteCommand {
    /// Create and provision a site
    Create {
        /// Domain name (e.g. example.com)
        domain: String,
        /// Site kind: plain or cms
        #[arg(long, default_value = "plain")]
        kind: SiteKind,
        /// Public-facing server: nginx or apache
        #[arg(long)]
        front: Option<WebServerKind>,
        /// PHP runtime version (e.g. 8.1)
        #[arg(long)]
        runtime: Option<String>,
        /// CMS admin user name
        #[arg(long)]
        admin_user: Option<String>,
        /// CMS admin email
        #[arg(long)]
        admin_email: Option<String>,
        /// Read the CMS admin password from stdin
        #[arg(long)]
        admin_password_stdin: bool,
    },
    /// List sites
    List,
    /// Show one site with its database credential (password redacted)
    Show { id: i64 },
    /// Enable a site on both servers
    Enable { id: i64 },
    /// Disable a site on both servers
    Disable { id: i64 },
    /// Flip a site between active and disabled
    Toggle { id: i64 },
    /// Disable and delete a site record. Files stay on disk.
    Destroy { id: i64 },
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum SiteOutput {
    Created(Box<CreatedSite>),
    List { sites: Vec<SiteSpec> },
    Details(Box<SiteDetails>),
    Site(Box<SiteSpec>),
    Destroyed(DestroyedSite),
}

pub fn run(args: SiteArgs, session: &Session) -> CmdResult<SiteOutput> {
    let store = session.store()?;
    let executor = session.executor()?;
    let manager = SiteLifecycleManager::new(executor.get(), &session.config, &store);
    let owner = args.owner.as_str();

    let output = match args.command {
        SiteCommand::Create {
            domain,
            kind,
            front,
            runtime,
            admin_user,
            admin_email,
            admin_password_stdin,
        } => {
            let admin_password = if admin_password_stdin {
                Some(crate::tty::read_secret("Admin password: ", "admin_password")?)
            } else {
                None
            };
            let request = CreateSite {
                domain,
                kind,
                front_server: front,
                runtime_version: runtime,
                admin_user,
                admin_email,
                admin_password,
            };
            SiteOutput::Created(Box::new(manager.create(owner, &request)?))
        }
        SiteCommand::List => SiteOutput::List {
            sites: manager.list(owner)?,
        },
        SiteCommand::Show { id } => SiteOutput::Details(Box::new(manager.show(owner, id)?)),
        SiteCommand::Enable { id } => SiteOutput::Site(Box::new(manager.enable(owner, id)?)),
        SiteCommand::Disable { id } => SiteOutput::Site(Box::new(manager.disable(owner, id)?)),
        SiteCommand::Toggle { id } => SiteOutput::Site(Box::new(manager.toggle(owner, id)?)),
        SiteCommand::Destroy { id } => SiteOutput::Destroyed(manager.destroy(owner, id)?),
    };

    Ok((output, 0))
}
