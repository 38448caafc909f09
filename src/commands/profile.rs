use clap::{Args, Subcommand};
use serde::Serialize;

use skydock::profile::{self, ProfileInput, ProfileSummary};

use super::{CmdResult, Session};

#[derive(Args)]
pub struct ProfileArgs {
    #[command(subcommand)]
    command: ProfileCommand,
}

#[derive(Subcommand)]
enum ProfileCommand {
    /// Store the SSH target for an account
    Set {
        account: String,
        /// SSH host (default: localhost)
        #[arg(long)]
        host: Option<String>,
        /// SSH username (default: root)
        #[arg(long)]
        user: Option<String>,
        /// SSH port (default: 22)
        #[arg(long)]
        port: Option<u16>,
        /// Read the SSH password from stdin
        #[arg(long, conflicts_with = "key")]
        password_stdin: bool,
        /// Private key file path
        #[arg(long)]
        key: Option<String>,
        /// Read private key material from stdin
        #[arg(long, conflicts_with_all = ["key", "password_stdin"])]
        key_stdin: bool,
    },
    /// Show a stored profile (secret redacted)
    Show { account: String },
    /// Remove a stored profile
    Delete { account: String },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileOutput {
    command: &'static str,
    account: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    profile: Option<ProfileSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deleted: Option<bool>,
}

pub fn run(args: ProfileArgs, session: &Session) -> CmdResult<ProfileOutput> {
    let store = session.store()?;

    let output = match args.command {
        ProfileCommand::Set {
            account,
            host,
            user,
            port,
            password_stdin,
            key,
            key_stdin,
        } => {
            let password = if password_stdin {
                Some(crate::tty::read_secret("SSH password: ", "password")?)
            } else {
                None
            };
            let private_key = if key_stdin {
                Some(read_key_material()?)
            } else {
                key
            };

            let stored = profile::set(
                &store,
                &account,
                ProfileInput {
                    ssh_username: user,
                    host,
                    port,
                    password,
                    private_key,
                },
            )?;
            ProfileOutput {
                command: "profile.set",
                account,
                profile: Some(stored.summary()),
                deleted: None,
            }
        }
        ProfileCommand::Show { account } => ProfileOutput {
            command: "profile.show",
            profile: Some(profile::show(&store, &account)?),
            account,
            deleted: None,
        },
        ProfileCommand::Delete { account } => {
            profile::delete(&store, &account)?;
            ProfileOutput {
                command: "profile.delete",
                account,
                profile: None,
                deleted: Some(true),
            }
        }
    };

    Ok((output, 0))
}

/// Whole of stdin; key material spans several lines.
fn read_key_material() -> skydock::Result<String> {
    use std::io::Read;

    let mut material = String::new();
    std::io::stdin()
        .read_to_string(&mut material)
        .map_err(|e| skydock::Error::internal_io(e.to_string(), Some("read private key".to_string())))?;
    Ok(material)
}
