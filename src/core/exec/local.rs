use std::process::Command;
use std::time::Duration;

use crate::config::ExecConfig;
use crate::error::{Result, TargetDetails};
use crate::exec::{process, CommandExecutor, CommandResult, Invocation};

/// Runs commands as child processes of this one.
pub struct LocalExecutor {
    elevation: Vec<String>,
    default_timeout: Duration,
}

impl LocalExecutor {
    pub fn new(config: &ExecConfig) -> Self {
        Self {
            elevation: config.elevation.clone(),
            default_timeout: config.command_timeout(),
        }
    }
}

impl CommandExecutor for LocalExecutor {
    fn run(&self, invocation: &Invocation) -> Result<CommandResult> {
        let line = invocation.command_line(&self.elevation)?;
        let timeout = invocation.timeout.unwrap_or(self.default_timeout);

        let mut cmd = Command::new(&line[0]);
        cmd.args(&line[1..]);
        if let Some(dir) = &invocation.workdir {
            cmd.current_dir(dir);
        }

        tracing::debug!(command = %invocation, timeout_secs = timeout.as_secs(), "local exec");
        let result = process::run_captured(
            cmd,
            invocation.stdin_bytes(),
            timeout,
            &invocation.display(),
            &self.target(),
        )?;
        tracing::debug!(exit_code = result.exit_code, "local exec finished");

        Ok(result)
    }

    fn target(&self) -> TargetDetails {
        TargetDetails {
            mode: "local".to_string(),
            host: None,
            user: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> LocalExecutor {
        LocalExecutor::new(&ExecConfig::default())
    }

    #[test]
    fn non_zero_exit_is_a_result_not_an_error() {
        let result = executor()
            .run(&Invocation::new(["sh", "-c", "echo nope >&2; exit 4"]))
            .unwrap();

        assert_eq!(result.exit_code, 4);
        assert_eq!(result.stderr, "nope\n");
        assert!(!result.success());
    }

    #[test]
    fn stdin_payload_reaches_the_process() {
        let result = executor()
            .run(&Invocation::new(["cat"]).with_stdin("alice:n3w-pass\n"))
            .unwrap();

        assert_eq!(result.stdout, "alice:n3w-pass\n");
    }

    #[test]
    fn workdir_is_honored() {
        let dir = tempfile::tempdir().unwrap();
        let result = executor()
            .run(&Invocation::new(["pwd"]).in_dir(dir.path()))
            .unwrap();

        let reported = std::fs::canonicalize(result.stdout.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn invocation_timeout_overrides_default() {
        let err = executor()
            .run(&Invocation::new(["sleep", "3"]).with_timeout(Duration::from_millis(100)))
            .unwrap_err();
        assert_eq!(err.code.as_str(), "command.timeout");
    }

    #[test]
    fn elevation_prefix_comes_from_config() {
        let config = ExecConfig {
            elevation: vec!["env".to_string(), "SKYDOCK_ELEVATED=1".to_string()],
            ..ExecConfig::default()
        };
        let result = LocalExecutor::new(&config)
            .run(&Invocation::new(["sh", "-c", "echo $SKYDOCK_ELEVATED"]).elevated())
            .unwrap();

        assert_eq!(result.stdout, "1\n");
    }
}
