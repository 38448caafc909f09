use serde::Serialize;
use std::path::PathBuf;

use skydock::config::PanelConfig;
use skydock::exec::{self, CommandExecutor, ExecutionTarget, ScriptedExecutor};
use skydock::store::SqliteStore;
use skydock::vault::CredentialCipher;
use skydock::{logging, paths};

pub type CmdResult<T> = skydock::Result<(T, i32)>;

pub mod auth;
pub mod config;
pub mod host;
pub mod profile;
pub mod service;
pub mod site;

/// Flags shared by every command.
pub(crate) struct GlobalArgs {
    pub config: Option<PathBuf>,
    pub profile: Option<String>,
    pub dry_run: bool,
}

impl GlobalArgs {
    pub fn config_path(&self) -> skydock::Result<PathBuf> {
        skydock::config::resolve_path(self.config.as_deref())
    }
}

/// Loaded configuration plus the executor and store a command runs with.
pub(crate) struct Session {
    pub config: PanelConfig,
    profile: Option<String>,
    recorder: Option<ScriptedExecutor>,
}

/// An executor for the duration of one command. Live executors release
/// their transport when dropped.
pub(crate) enum ExecutorHandle<'a> {
    Live(Box<dyn CommandExecutor>),
    DryRun(&'a ScriptedExecutor),
}

impl ExecutorHandle<'_> {
    pub fn get(&self) -> &dyn CommandExecutor {
        match self {
            ExecutorHandle::Live(executor) => executor.as_ref(),
            ExecutorHandle::DryRun(recorder) => *recorder,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct DryRunReport {
    pub commands: Vec<String>,
    pub files: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DryRunOutput {
    dry_run: bool,
    result: serde_json::Value,
    recorded: DryRunReport,
}

impl Session {
    pub fn open(global: &GlobalArgs) -> skydock::Result<Self> {
        let path = global.config_path()?;
        let config = skydock::config::load(&path)?;
        logging::init(&config.logging)?;
        tracing::debug!(path = %path.display(), dry_run = global.dry_run, "configuration loaded");

        Ok(Self {
            config,
            profile: global.profile.clone(),
            recorder: global.dry_run.then(ScriptedExecutor::new),
        })
    }

    /// The record store. Opening it needs the credential key; a missing
    /// key is fatal. Under `--dry-run` writes are discarded.
    pub fn store(&self) -> skydock::Result<SqliteStore> {
        let cipher = CredentialCipher::from_config(&self.config.secrets)?;
        let path = paths::expand(&self.config.paths.database)?;
        let store = SqliteStore::open(&path, cipher)?;
        if self.recorder.is_some() {
            store.discard_writes()?;
        }
        Ok(store)
    }

    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    /// Local, SSH via `--profile`, or the recorder under `--dry-run`.
    pub fn executor(&self) -> skydock::Result<ExecutorHandle<'_>> {
        if let Some(recorder) = &self.recorder {
            return Ok(ExecutorHandle::DryRun(recorder));
        }

        let target = match &self.profile {
            Some(account) => skydock::profile::load(&self.store()?, account)?.target(),
            None => ExecutionTarget::Local,
        };
        Ok(ExecutorHandle::Live(exec::open(&target, &self.config.exec)?))
    }

    fn recorded(&self) -> Option<DryRunReport> {
        self.recorder.as_ref().map(|recorder| DryRunReport {
            commands: recorder.commands(),
            files: recorder.files().into_keys().collect(),
        })
    }
}

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $target:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $target))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (skydock::Result<serde_json::Value>, i32) {
    crate::tty::status("skydock is working...");

    match command {
        crate::Commands::Config(args) => dispatch!(args, global, config),
        other => run_with_session(other, global),
    }
}

fn run_with_session(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (skydock::Result<serde_json::Value>, i32) {
    let session = match Session::open(global) {
        Ok(session) => session,
        Err(err) => return crate::output::map_cmd_result_to_json::<()>(Err(err)),
    };

    let (result, exit_code) = match command {
        crate::Commands::Site(args) => dispatch!(args, &session, site),
        crate::Commands::Service(args) => dispatch!(args, &session, service),
        crate::Commands::Host(args) => dispatch!(args, &session, host),
        crate::Commands::Profile(args) => dispatch!(args, &session, profile),
        crate::Commands::Auth(args) => dispatch!(args, &session, auth),
        crate::Commands::Config(args) => dispatch!(args, global, config),
    };

    match session.recorded() {
        None => (result, exit_code),
        Some(recorded) => match result {
            Ok(value) => crate::output::map_cmd_result_to_json(Ok((
                DryRunOutput {
                    dry_run: true,
                    result: value,
                    recorded,
                },
                exit_code,
            ))),
            Err(err) => {
                let recorded = serde_json::to_value(&recorded).unwrap_or_default();
                (Err(err.with_details("dryRun", recorded)), exit_code)
            }
        },
    }
}
