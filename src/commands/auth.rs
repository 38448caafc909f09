use clap::{Args, Subcommand};
use serde::Serialize;

use skydock::auth::{self, CredentialVerifier, PasswordChange, SystemVerifier, Verification};

use super::{CmdResult, Session};

#[derive(Args)]
pub struct AuthArgs {
    #[command(subcommand)]
    command: AuthCommand,
}

#[derive(Subcommand)]
enum AuthCommand {
    /// Check a system account's password (read from stdin)
    Verify { username: String },
    /// Change a system account's password. Reads the current password,
    /// then the new one, one per line from stdin
    ChangePassword { username: String },
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum AuthOutput {
    Verify {
        username: String,
        strategy: &'static str,
        #[serde(flatten)]
        verification: Verification,
    },
    ChangePassword(PasswordChange),
}

pub fn run(args: AuthArgs, session: &Session) -> CmdResult<AuthOutput> {
    let config = &session.config;
    let verifier = SystemVerifier::detect(&config.auth, config.exec.auth_timeout())?;

    match args.command {
        AuthCommand::Verify { username } => {
            let password = crate::tty::read_secret("Password: ", "password")?;

            let verification = verifier.verify(&username, &password)?;
            let exit_code = if verification.is_accepted() { 0 } else { 3 };
            Ok((
                AuthOutput::Verify {
                    username,
                    strategy: verifier.strategy().as_str(),
                    verification,
                },
                exit_code,
            ))
        }
        AuthCommand::ChangePassword { username } => {
            // Verification reads this host's accounts, so the change must
            // land on this host too.
            if session.profile().is_some() {
                return Err(skydock::Error::validation_invalid_argument(
                    "profile",
                    "Password changes apply to the local host; drop --profile",
                    session.profile().map(str::to_string),
                    None,
                ));
            }

            let current = crate::tty::read_secret("Current password: ", "current_password")?;
            let new = crate::tty::read_secret("New password: ", "new_password")?;

            let executor = session.executor()?;
            let changed = auth::change_password(
                &verifier,
                executor.get(),
                config.auth.min_password_length,
                &username,
                &current,
                &new,
            )?;
            Ok((AuthOutput::ChangePassword(changed), 0))
        }
    }
}
