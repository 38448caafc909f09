//! Checking a system account's password.
//!
//! One strategy is chosen when the verifier is built and used for every
//! call: compare against the shadow hash when this process can read the
//! shadow file, otherwise hand the password to a single helper process.
//! Outcomes are values, not errors.
//!
//! Changing a password verifies the current one first, then hands
//! `user:password` to a single elevated `chpasswd` on stdin.

pub mod shacrypt;

use serde::Serialize;
use std::fs;
use std::io::Read;
use std::process::Command;
use std::time::Duration;

use crate::config::AuthConfig;
use crate::error::{Error, Result, TargetDetails};
use crate::exec::{process, run_checked, CommandExecutor, Invocation};
use crate::utils::template::{self, TemplateVars};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "scheme", rename_all = "snake_case")]
pub enum Verification {
    Accepted,
    Rejected,
    UnknownUser,
    /// The stored hash uses a scheme this verifier cannot compute.
    UnsupportedScheme(String),
}

impl Verification {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verification::Accepted)
    }
}

pub trait CredentialVerifier {
    fn verify(&self, username: &str, password: &str) -> Result<Verification>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    Shadow { path: String },
    Delegated { helper: Vec<String> },
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Shadow { .. } => "shadow",
            Strategy::Delegated { .. } => "delegated",
        }
    }
}

pub struct SystemVerifier {
    strategy: Strategy,
    min_password_length: usize,
    timeout: Duration,
}

impl SystemVerifier {
    /// Pick the strategy once, based on what this process may read.
    pub fn detect(config: &AuthConfig, timeout: Duration) -> Result<Self> {
        let strategy = if fs::File::open(&config.shadow_path).is_ok() {
            Strategy::Shadow {
                path: config.shadow_path.clone(),
            }
        } else {
            if config.helper.is_empty() {
                return Err(Error::config_invalid_value(
                    "auth.helper",
                    None,
                    "shadow file is not readable and no helper is configured",
                ));
            }
            Strategy::Delegated {
                helper: config.helper.clone(),
            }
        };

        tracing::debug!(strategy = ?strategy, "credential verifier ready");
        Ok(Self::with_strategy(strategy, config.min_password_length, timeout))
    }

    pub fn with_strategy(strategy: Strategy, min_password_length: usize, timeout: Duration) -> Self {
        Self {
            strategy,
            min_password_length,
            timeout,
        }
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    fn verify_shadow(&self, path: &str, username: &str, password: &str) -> Result<Verification> {
        let mut content = String::new();
        fs::File::open(path)
            .and_then(|mut file| file.read_to_string(&mut content))
            .map_err(|e| Error::internal_io(e.to_string(), Some(format!("read {}", path))))?;

        let Some(stored) = shadow_hash(&content, username) else {
            return Ok(Verification::UnknownUser);
        };

        if stored.is_empty() || stored.starts_with('!') || stored.starts_with('*') {
            return Ok(Verification::Rejected);
        }

        Ok(match shacrypt::verify(password, stored) {
            Some(true) => Verification::Accepted,
            Some(false) => Verification::Rejected,
            None => Verification::UnsupportedScheme(scheme_of(stored)),
        })
    }

    fn verify_delegated(
        &self,
        helper: &[String],
        username: &str,
        password: &str,
    ) -> Result<Verification> {
        let argv: Vec<String> = helper
            .iter()
            .map(|arg| template::render(arg, &[(TemplateVars::USERNAME, username)]))
            .collect();

        let Some((program, args)) = argv.split_first() else {
            return Err(Error::config_invalid_value("auth.helper", None, "helper argv is empty"));
        };
        let mut cmd = Command::new(program);
        cmd.args(args);

        let target = TargetDetails {
            mode: "local".to_string(),
            host: None,
            user: None,
        };
        let result = process::run_captured(
            cmd,
            Some(password.as_bytes()),
            self.timeout,
            &argv.join(" "),
            &target,
        )?;

        Ok(if result.success() {
            Verification::Accepted
        } else {
            tracing::debug!(exit_code = result.exit_code, "credential helper rejected");
            Verification::Rejected
        })
    }
}

impl CredentialVerifier for SystemVerifier {
    fn verify(&self, username: &str, password: &str) -> Result<Verification> {
        if username.is_empty() || username.contains([':', '\n', '/']) {
            return Err(Error::validation_invalid_argument(
                "username",
                "Invalid account name",
                Some(username.to_string()),
                None,
            ));
        }
        if password.chars().count() < self.min_password_length {
            return Err(Error::validation_invalid_argument(
                "password",
                format!(
                    "Password must be at least {} characters",
                    self.min_password_length
                ),
                None,
                None,
            ));
        }

        match &self.strategy {
            Strategy::Shadow { path } => self.verify_shadow(path, username, password),
            Strategy::Delegated { helper } => self.verify_delegated(helper, username, password),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordChange {
    pub username: String,
    pub changed: bool,
}

/// Both passwords are required, the new one must meet the length rule,
/// and the current one must verify before anything runs on the host.
pub fn change_password(
    verifier: &dyn CredentialVerifier,
    executor: &dyn CommandExecutor,
    min_password_length: usize,
    username: &str,
    current: &str,
    new: &str,
) -> Result<PasswordChange> {
    let missing: Vec<String> = [("current_password", current), ("new_password", new)]
        .into_iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(field, _)| field.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(Error::validation_missing_argument(missing));
    }

    if new.chars().count() < min_password_length {
        return Err(Error::validation_invalid_argument(
            "new_password",
            format!(
                "New password must be at least {} characters",
                min_password_length
            ),
            None,
            None,
        ));
    }
    // chpasswd reads `user:password` lines.
    if new.contains(['\n', '\r']) {
        return Err(Error::validation_invalid_argument(
            "new_password",
            "New password must be a single line",
            None,
            None,
        ));
    }

    match verifier.verify(username, current)? {
        Verification::Accepted => {}
        other => {
            tracing::info!(username, outcome = ?other, "current password not accepted");
            return Err(Error::validation_invalid_argument(
                "current_password",
                "Current password is incorrect",
                None,
                None,
            ));
        }
    }

    run_checked(
        executor,
        &Invocation::new(["chpasswd"])
            .elevated()
            .with_stdin(format!("{}:{}\n", username, new)),
        &format!("Failed to change password for {}", username),
    )?;

    crate::log_status!("auth", "Password changed for {}", username);
    Ok(PasswordChange {
        username: username.to_string(),
        changed: true,
    })
}

fn shadow_hash<'a>(content: &'a str, username: &str) -> Option<&'a str> {
    content.lines().find_map(|line| {
        let mut fields = line.splitn(3, ':');
        match (fields.next(), fields.next()) {
            (Some(name), Some(hash)) if name == username => Some(hash),
            _ => None,
        }
    })
}

/// `$y$...` -> `y`; anything without an id is reported whole as `des`.
fn scheme_of(hash: &str) -> String {
    hash.strip_prefix('$')
        .and_then(|rest| rest.split('$').next())
        .map(str::to_string)
        .unwrap_or_else(|| "des".to_string())
}
