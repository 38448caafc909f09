//! Writing generated files onto the target through an executor.
//!
//! Contents go to a staging path first as the executing user, then an
//! elevated `cp` installs them, then ownership and mode are normalized.
//! The same commands work locally and over SSH because the payload travels
//! in argv (base64), not through a local file handle.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use uuid::Uuid;

use crate::error::Result;
use crate::exec::{run_checked, CommandExecutor, Invocation};

/// `$1` is the base64 payload, `$2` the staging path.
pub const STAGED_WRITE_SCRIPT: &str =
    "umask 077 && mkdir -p \"$(dirname \"$2\")\" && printf '%s' \"$1\" | base64 -d > \"$2\"";

const SCRIPT_NAME: &str = "skydock-stage";

/// Where and how an installed file should end up.
#[derive(Debug, Clone)]
pub struct FileTarget {
    pub path: String,
    pub owner: String,
    pub group: String,
    pub mode: String,
}

impl FileTarget {
    pub fn new(path: impl Into<String>, owner: &str, group: &str, mode: &str) -> Self {
        Self {
            path: path.into(),
            owner: owner.to_string(),
            group: group.to_string(),
            mode: mode.to_string(),
        }
    }
}

/// The payload is masked in the rendered command line; config files carry
/// credentials.
pub fn staged_write(content: &str, staging_path: &str) -> Invocation {
    let payload = STANDARD.encode(content.as_bytes());
    Invocation::new([
        "sh".to_string(),
        "-c".to_string(),
        STAGED_WRITE_SCRIPT.to_string(),
        SCRIPT_NAME.to_string(),
        payload.clone(),
        staging_path.to_string(),
    ])
    .redacting(payload)
}

/// Inverse of [`staged_write`]: `(staging_path, content)`.
pub fn parse_staged_write(argv: &[String]) -> Option<(String, String)> {
    match argv {
        [sh, flag, script, name, payload, path]
            if sh == "sh" && flag == "-c" && script == STAGED_WRITE_SCRIPT && name == SCRIPT_NAME =>
        {
            let bytes = STANDARD.decode(payload).ok()?;
            let content = String::from_utf8(bytes).ok()?;
            Some((path.clone(), content))
        }
        _ => None,
    }
}

/// Stage, install and normalize one file. The staging copy is removed on
/// every path once it was written.
pub fn install(
    executor: &dyn CommandExecutor,
    staging_dir: &str,
    content: &str,
    target: &FileTarget,
) -> Result<()> {
    let staging = format!(
        "{}/{}",
        staging_dir.trim_end_matches('/'),
        Uuid::new_v4()
    );

    run_checked(
        executor,
        &staged_write(content, &staging),
        &format!("Failed to stage {}", target.path),
    )?;

    let installed = copy_into_place(executor, &staging, target);

    let cleanup = Invocation::new(["rm", "-f", staging.as_str()]);
    match executor.run(&cleanup) {
        Ok(result) if !result.success() => {
            tracing::warn!(path = %staging, stderr = %result.diagnostic(), "staging file left behind");
        }
        Err(err) => {
            tracing::warn!(path = %staging, error = %err, "staging file left behind");
        }
        Ok(_) => {}
    }

    installed
}

fn copy_into_place(executor: &dyn CommandExecutor, staging: &str, target: &FileTarget) -> Result<()> {
    run_checked(
        executor,
        &Invocation::new(["cp", staging, target.path.as_str()]).elevated(),
        &format!("Failed to install {}", target.path),
    )?;

    run_checked(
        executor,
        &Invocation::new([
            "chown".to_string(),
            format!("{}:{}", target.owner, target.group),
            target.path.clone(),
        ])
        .elevated(),
        &format!("Failed to set ownership of {}", target.path),
    )?;

    run_checked(
        executor,
        &Invocation::new(["chmod", target.mode.as_str(), target.path.as_str()]).elevated(),
        &format!("Failed to set mode of {}", target.path),
    )?;

    tracing::debug!(path = %target.path, mode = %target.mode, "installed file");
    Ok(())
}
