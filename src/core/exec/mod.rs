//! Uniform command execution against the local host or an SSH target.
//!
//! A non-zero exit is never an `Err` here: it comes back in
//! [`CommandResult::exit_code`]. `Err` is reserved for transport failures
//! (spawn, connect, timeout). Callers that need the exit code to gate a
//! step use [`run_checked`], which turns a non-zero exit into
//! `command.failed` carrying the raw stderr.

pub mod local;
pub mod process;
pub mod scripted;
pub mod ssh;

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::ExecConfig;
use crate::error::{CommandFailedDetails, Error, Result, TargetDetails};
use crate::utils::shell;

pub use local::LocalExecutor;
pub use scripted::ScriptedExecutor;
pub use ssh::SshExecutor;

/// One command to run: argv plus how to run it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub argv: Vec<String>,
    pub elevate: bool,
    pub workdir: Option<PathBuf>,
    /// `None` uses the executor's configured default.
    pub timeout: Option<Duration>,
    /// Values masked wherever the command line is displayed or logged.
    pub secrets: Vec<String>,
    /// Fed to the process and never displayed.
    pub stdin: Option<String>,
}

impl Invocation {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            elevate: false,
            workdir: None,
            timeout: None,
            secrets: Vec::new(),
            stdin: None,
        }
    }

    pub fn elevated(mut self) -> Self {
        self.elevate = true;
        self
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn redacting(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if !secret.is_empty() {
            self.secrets.push(secret);
        }
        self
    }

    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn stdin_bytes(&self) -> Option<&[u8]> {
        self.stdin.as_deref().map(str::as_bytes)
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    /// Argv with the elevation wrapper prepended when requested.
    pub fn command_line(&self, elevation: &[String]) -> Result<Vec<String>> {
        if self.program().trim().is_empty() {
            return Err(Error::validation_invalid_argument(
                "argv",
                "Command must name a program",
                None,
                None,
            ));
        }

        let mut line = Vec::with_capacity(self.argv.len() + elevation.len());
        if self.elevate {
            line.extend(elevation.iter().cloned());
        }
        line.extend(self.argv.iter().cloned());
        Ok(line)
    }

    pub fn display(&self) -> String {
        let argv: Vec<String> = self
            .argv
            .iter()
            .map(|arg| {
                self.secrets
                    .iter()
                    .fold(arg.clone(), |acc, secret| acc.replace(secret.as_str(), "<redacted>"))
            })
            .collect();
        let rendered = shell::quote_args(&argv);
        if self.elevate {
            format!("[elevated] {}", rendered)
        } else {
            rendered
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Best diagnostic text: stderr, falling back to stdout.
    pub fn diagnostic(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// Where commands run.
#[derive(Debug, Clone)]
pub enum ExecutionTarget {
    Local,
    Remote(RemoteCredentials),
}

#[derive(Clone)]
pub struct RemoteCredentials {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: SshAuth,
}

/// Exactly one auth mode per credential set.
#[derive(Clone, PartialEq, Eq)]
pub enum SshAuth {
    Password(String),
    /// A key file path, or the key material itself.
    PrivateKey(String),
}

impl SshAuth {
    pub fn kind(&self) -> &'static str {
        match self {
            SshAuth::Password(_) => "password",
            SshAuth::PrivateKey(_) => "private_key",
        }
    }
}

impl fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SshAuth::{}(<redacted>)", self.kind())
    }
}

impl fmt::Debug for RemoteCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("auth", &self.auth)
            .finish()
    }
}

pub trait CommandExecutor {
    fn run(&self, invocation: &Invocation) -> Result<CommandResult>;

    /// Description of the target for diagnostics.
    fn target(&self) -> TargetDetails;
}

/// Open an executor for `target`. Remote targets connect eagerly so a bad
/// host or credential fails here rather than on the first command.
pub fn open(target: &ExecutionTarget, config: &ExecConfig) -> Result<Box<dyn CommandExecutor>> {
    match target {
        ExecutionTarget::Local => Ok(Box::new(LocalExecutor::new(config))),
        ExecutionTarget::Remote(credentials) => {
            Ok(Box::new(SshExecutor::connect(credentials.clone(), config)?))
        }
    }
}

/// Run and require exit 0. `context` prefixes the raw diagnostic in the
/// error message.
pub fn run_checked(
    executor: &dyn CommandExecutor,
    invocation: &Invocation,
    context: &str,
) -> Result<CommandResult> {
    let result = executor.run(invocation)?;
    if result.success() {
        return Ok(result);
    }
    Err(command_failed(executor, invocation, &result, context))
}

pub fn command_failed(
    executor: &dyn CommandExecutor,
    invocation: &Invocation,
    result: &CommandResult,
    context: &str,
) -> Error {
    let message = if result.diagnostic().is_empty() {
        format!("{} (exit code {})", context, result.exit_code)
    } else {
        format!("{}: {}", context, result.diagnostic())
    };

    Error::command_failed(
        message,
        CommandFailedDetails {
            command: invocation.display(),
            exit_code: result.exit_code,
            stdout: result.stdout.clone(),
            stderr: result.stderr.clone(),
            target: executor.target(),
        },
    )
}
