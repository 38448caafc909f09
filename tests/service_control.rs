use skydock::exec::{CommandResult, ScriptedExecutor};
use skydock::service::ServiceController;
use skydock::ErrorKind;

#[test]
fn invalid_action_never_reaches_the_executor() {
    let exec = ScriptedExecutor::new();
    let err = ServiceController::new(&exec)
        .control("nginx", "explode")
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.message.contains("start, stop, restart, reload"));
    assert_eq!(exec.call_count(), 0);
}

#[test]
fn shell_metacharacters_in_names_are_rejected() {
    let exec = ScriptedExecutor::new();
    let controller = ServiceController::new(&exec);

    assert!(controller.status("nginx; rm -rf /").is_err());
    assert!(controller.control("$(reboot)", "restart").is_err());
    assert_eq!(exec.call_count(), 0);
}

#[test]
fn restart_reports_fresh_status() {
    let exec = ScriptedExecutor::new()
        .respond(&["systemctl", "status"], CommandResult::ok("active (running)\n"));

    let outcome = ServiceController::new(&exec)
        .control("nginx", "restart")
        .unwrap();

    assert_eq!(outcome.message, "Service nginx restarted successfully");
    assert!(outcome.status.installed);
    assert!(outcome.status.running);
    assert_eq!(exec.commands()[0], "[elevated] systemctl restart nginx");
}

#[test]
fn failed_control_carries_stderr() {
    let exec = ScriptedExecutor::new().fail(
        &["systemctl", "start"],
        1,
        "Job for nginx.service failed",
    );

    let err = ServiceController::new(&exec)
        .control("nginx", "start")
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CommandFailed);
    assert_eq!(err.stderr(), Some("Job for nginx.service failed"));
}

#[test]
fn unreachable_target_is_a_transport_error() {
    let exec = ScriptedExecutor::new().unreachable(&[]);
    let err = ServiceController::new(&exec).status("nginx").unwrap_err();

    assert!(err.is_transport());
}
