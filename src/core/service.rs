//! OS service state through `systemctl`.
//!
//! Status is recomputed on every query and never cached.

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::{Error, Result};
use crate::exec::{run_checked, CommandExecutor, Invocation};
use crate::utils::validation;

static SERVICE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9@._-]+$").expect("service name pattern is valid"));

pub const DEFAULT_LOG_LINES: u32 = 50;
pub const MAX_LOG_LINES: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub installed: bool,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
}

impl ServiceStatus {
    pub fn not_installed() -> Self {
        Self {
            installed: false,
            running: false,
            status_text: None,
        }
    }

    pub fn state(&self) -> &'static str {
        match (self.installed, self.running) {
            (false, _) => "not_installed",
            (true, true) => "running",
            (true, false) => "stopped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
    Reload,
}

impl ServiceAction {
    pub const ALL: [ServiceAction; 4] = [
        ServiceAction::Start,
        ServiceAction::Stop,
        ServiceAction::Restart,
        ServiceAction::Reload,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
            ServiceAction::Reload => "reload",
        }
    }

    fn past_tense(&self) -> &'static str {
        match self {
            ServiceAction::Start => "started",
            ServiceAction::Stop => "stopped",
            ServiceAction::Restart => "restarted",
            ServiceAction::Reload => "reloaded",
        }
    }
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ServiceAction::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| {
                Error::validation_invalid_argument(
                    "action",
                    format!(
                        "Invalid action. Must be one of: {}",
                        ServiceAction::ALL.map(|a| a.as_str()).join(", ")
                    ),
                    Some(s.to_string()),
                    None,
                )
            })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlOutcome {
    pub service: String,
    pub action: ServiceAction,
    pub message: String,
    pub status: ServiceStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEntry {
    pub name: String,
    pub state: &'static str,
    #[serde(flatten)]
    pub status: ServiceStatus,
}

pub fn validate_name(name: &str) -> Result<&str> {
    validation::require_match(
        name,
        &SERVICE_NAME,
        "service",
        "Service name may only contain letters, digits and @._-",
    )
}

pub struct ServiceController<'a> {
    executor: &'a dyn CommandExecutor,
}

impl<'a> ServiceController<'a> {
    pub fn new(executor: &'a dyn CommandExecutor) -> Self {
        Self { executor }
    }

    /// Existence, active state, then detail text. Only a transport failure
    /// on the existence check is an error; later lookups degrade.
    pub fn status(&self, name: &str) -> Result<ServiceStatus> {
        validate_name(name)?;

        let which = self.executor.run(&Invocation::new(["which", name]))?;
        if !which.success() {
            return Ok(ServiceStatus::not_installed());
        }

        let running = match self
            .executor
            .run(&Invocation::new(["systemctl", "is-active", name]))
        {
            Ok(result) => result.success(),
            Err(err) => {
                tracing::warn!(service = name, error = %err, "active-state check failed");
                false
            }
        };

        let status_text = match self
            .executor
            .run(&Invocation::new(["systemctl", "status", name, "--no-pager"]))
        {
            Ok(result) if result.success() => Some(result.stdout),
            Ok(result) if !result.stdout.trim().is_empty() => Some(result.stdout),
            Ok(result) => Some(result.stderr),
            Err(err) => {
                tracing::warn!(service = name, error = %err, "status detail fetch failed");
                None
            }
        };

        Ok(ServiceStatus {
            installed: true,
            running,
            status_text,
        })
    }

    /// Validates before dispatching anything; a bad action or name never
    /// reaches the executor.
    pub fn control(&self, name: &str, action: &str) -> Result<ControlOutcome> {
        let action: ServiceAction = action.parse()?;
        validate_name(name)?;
        self.dispatch(name, action)
    }

    fn dispatch(&self, name: &str, action: ServiceAction) -> Result<ControlOutcome> {
        run_checked(
            self.executor,
            &Invocation::new(["systemctl", action.as_str(), name]).elevated(),
            &format!("Failed to {} service", action),
        )?;

        crate::log_status!("service", "{} {}", name, action.past_tense());

        Ok(ControlOutcome {
            service: name.to_string(),
            action,
            message: format!("Service {} {} successfully", name, action.past_tense()),
            status: self.status(name)?,
        })
    }

    /// Status of every service in `catalogue`, in order.
    pub fn overview(&self, catalogue: &[String]) -> Result<Vec<ServiceEntry>> {
        catalogue
            .iter()
            .map(|name| {
                let status = self.status(name)?;
                Ok(ServiceEntry {
                    name: name.clone(),
                    state: status.state(),
                    status,
                })
            })
            .collect()
    }

    pub fn logs(&self, name: &str, lines: u32) -> Result<String> {
        validate_name(name)?;
        let lines = validation::require_in_range(lines, 1, MAX_LOG_LINES, "lines")?;

        let result = run_checked(
            self.executor,
            &Invocation::new([
                "journalctl".to_string(),
                "-u".to_string(),
                name.to_string(),
                "-n".to_string(),
                lines.to_string(),
                "--no-pager".to_string(),
            ])
            .elevated(),
            &format!("Failed to read logs for {}", name),
        )?;
        Ok(result.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{CommandResult, ScriptedExecutor};

    #[test]
    fn missing_binary_short_circuits() {
        let exec = ScriptedExecutor::new().fail(&["which"], 1, "");
        let status = ServiceController::new(&exec).status("nginx").unwrap();

        assert_eq!(status, ServiceStatus::not_installed());
        assert_eq!(exec.call_count(), 1);
    }

    #[test]
    fn inactive_service_still_reports_detail() {
        let exec = ScriptedExecutor::new()
            .respond(&["which"], CommandResult::ok("/usr/sbin/nginx\n"))
            .fail(&["systemctl", "is-active"], 3, "")
            .respond(
                &["systemctl", "status"],
                CommandResult {
                    exit_code: 3,
                    stdout: "Active: inactive (dead)\n".to_string(),
                    stderr: String::new(),
                },
            );

        let status = ServiceController::new(&exec).status("nginx").unwrap();
        assert!(status.installed);
        assert!(!status.running);
        assert_eq!(status.state(), "stopped");
        assert_eq!(status.status_text.as_deref(), Some("Active: inactive (dead)\n"));
        assert_eq!(exec.call_count(), 3);
    }

    #[test]
    fn failed_detail_fetch_keeps_active_state() {
        let exec = ScriptedExecutor::new()
            .respond(&["which"], CommandResult::ok("/usr/sbin/mysqld\n"))
            .unreachable(&["systemctl", "status"]);

        let status = ServiceController::new(&exec).status("mysql").unwrap();
        assert!(status.running);
        assert_eq!(status.status_text, None);
    }

    #[test]
    fn unknown_action_dispatches_nothing() {
        let exec = ScriptedExecutor::new();
        let err = ServiceController::new(&exec)
            .control("nginx", "explode")
            .unwrap_err();

        assert_eq!(err.code.as_str(), "validation.invalid_argument");
        assert!(err.message.contains("start, stop, restart, reload"));
        assert_eq!(exec.call_count(), 0);
    }

    #[test]
    fn bad_service_name_dispatches_nothing() {
        let exec = ScriptedExecutor::new();
        let err = ServiceController::new(&exec)
            .control("nginx; reboot", "restart")
            .unwrap_err();

        assert_eq!(err.code.as_str(), "validation.invalid_argument");
        assert_eq!(exec.call_count(), 0);
    }

    #[test]
    fn control_is_elevated_and_requeries_status() {
        let exec = ScriptedExecutor::new();
        let outcome = ServiceController::new(&exec)
            .control("apache2", "restart")
            .unwrap();

        let commands = exec.commands();
        assert_eq!(commands[0], "[elevated] systemctl restart apache2");
        assert_eq!(commands[1], "which apache2");
        assert!(outcome.status.running);
        assert_eq!(outcome.message, "Service apache2 restarted successfully");
    }

    #[test]
    fn control_failure_carries_stderr_verbatim() {
        let exec = ScriptedExecutor::new().fail(
            &["systemctl", "start"],
            5,
            "Failed to start mysql.service: Unit mysql.service not found.\n",
        );

        let err = ServiceController::new(&exec)
            .control("mysql", "start")
            .unwrap_err();

        assert_eq!(err.code.as_str(), "command.failed");
        assert_eq!(
            err.stderr(),
            Some("Failed to start mysql.service: Unit mysql.service not found.\n")
        );
        assert_eq!(exec.call_count(), 1);
    }

    #[test]
    fn logs_bounds_and_command() {
        let exec = ScriptedExecutor::new().respond(&["journalctl"], CommandResult::ok("line\n"));
        let controller = ServiceController::new(&exec);

        assert!(controller.logs("nginx", 0).is_err());
        assert!(controller.logs("nginx", 1001).is_err());
        assert_eq!(exec.call_count(), 0);

        assert_eq!(controller.logs("nginx", 20).unwrap(), "line\n");
        assert_eq!(
            exec.commands()[0],
            "[elevated] journalctl -u nginx -n 20 --no-pager"
        );
    }

    #[test]
    fn overview_walks_the_catalogue() {
        let exec = ScriptedExecutor::new().fail(&["which", "apache2"], 1, "");
        let catalogue = vec!["nginx".to_string(), "apache2".to_string()];

        let entries = ServiceController::new(&exec).overview(&catalogue).unwrap();
        assert_eq!(entries[0].state, "running");
        assert_eq!(entries[1].state, "not_installed");
    }
}
