//! DirectoryReady: the document root exists, is owned by the site owner
//! and is readable by the web servers.

use crate::error::{Error, Result};
use crate::exec::{command_failed, run_checked, CommandExecutor, Invocation};

use super::StageContext;

pub const DIRECTORY_MODE: &str = "755";

pub fn prepare(ctx: &StageContext<'_>) -> Result<()> {
    let web_root = ctx.config.paths.web_root.as_str();
    let root = ctx.site.root_path.as_str();

    let exists = ctx.executor.run(&Invocation::new(["test", "-d", web_root]))?;
    if !exists.success() {
        tracing::info!(path = web_root, "creating shared web root");
        run_checked(
            ctx.executor,
            &Invocation::new(["mkdir", "-p", web_root]).elevated(),
            &format!("Failed to create {}", web_root),
        )?;
        run_checked(
            ctx.executor,
            &Invocation::new(["chmod", DIRECTORY_MODE, web_root]).elevated(),
            &format!("Failed to set mode of {}", web_root),
        )?;
    }

    run_checked(
        ctx.executor,
        &Invocation::new(["mkdir", "-p", root]).elevated(),
        &format!("Failed to create document root {}", root),
    )?;

    normalize_ownership(
        ctx.executor,
        root,
        &ctx.site.owner,
        &ctx.config.web.shared_group,
    )?;

    run_checked(
        ctx.executor,
        &Invocation::new(["chmod", DIRECTORY_MODE, root]).elevated(),
        &format!("Failed to set mode of {}", root),
    )?;

    Ok(())
}

/// `chown -R` through owner:group, owner:owner, group:group; the first one
/// that succeeds wins. Returns the ownership that was applied.
pub fn normalize_ownership(
    executor: &dyn CommandExecutor,
    path: &str,
    owner: &str,
    group: &str,
) -> Result<String> {
    let candidates = [
        format!("{}:{}", owner, group),
        format!("{}:{}", owner, owner),
        format!("{}:{}", group, group),
    ];

    let mut failure = None;
    for ownership in candidates {
        let invocation =
            Invocation::new(["chown", "-R", ownership.as_str(), path]).elevated();
        let result = executor.run(&invocation)?;
        if result.success() {
            tracing::debug!(path, ownership = %ownership, "ownership applied");
            return Ok(ownership);
        }
        tracing::warn!(
            path,
            ownership = %ownership,
            stderr = %result.diagnostic(),
            "chown failed, trying next ownership"
        );
        failure = Some(command_failed(
            executor,
            &invocation,
            &result,
            &format!("Failed to set ownership of {}", path),
        ));
    }

    Err(failure.unwrap_or_else(|| Error::internal_unexpected("no ownership candidates")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PanelConfig;
    use crate::exec::{CommandResult, ScriptedExecutor};
    use crate::provision::tests::site;
    use crate::site::SiteKind;

    #[test]
    fn creates_missing_web_root_first() {
        let exec = ScriptedExecutor::new().fail(&["test", "-d"], 1, "");
        let config = PanelConfig::default();
        let site = site("example.com", SiteKind::PlainApp);

        prepare(&StageContext::new(&exec, &config, &site)).unwrap();

        assert_eq!(
            exec.commands(),
            vec![
                "test -d /var/www",
                "[elevated] mkdir -p /var/www",
                "[elevated] chmod 755 /var/www",
                "[elevated] mkdir -p /var/www/alice/example.com",
                "[elevated] chown -R alice:www-data /var/www/alice/example.com",
                "[elevated] chmod 755 /var/www/alice/example.com",
            ]
        );
    }

    #[test]
    fn chown_falls_back_through_candidates() {
        let exec = ScriptedExecutor::new()
            .fail(&["chown", "-R", "alice:www-data"], 1, "chown: invalid group: 'alice:www-data'")
            .fail(&["chown", "-R", "alice:alice"], 1, "chown: invalid group: 'alice:alice'");

        let applied = normalize_ownership(&exec, "/srv/x", "alice", "www-data").unwrap();
        assert_eq!(applied, "www-data:www-data");
        assert_eq!(exec.call_count(), 3);
    }

    #[test]
    fn all_chown_candidates_failing_aborts_with_last_stderr() {
        let exec = ScriptedExecutor::new().fail(&["chown"], 1, "chown: invalid user: 'www-data:www-data'");

        let err = normalize_ownership(&exec, "/srv/x", "alice", "www-data").unwrap_err();
        assert_eq!(err.code.as_str(), "command.failed");
        assert!(err.message.contains("invalid user: 'www-data:www-data'"));
    }

    #[test]
    fn running_twice_reaches_same_end_state() {
        let exec = ScriptedExecutor::new()
            .respond(&["test", "-d"], CommandResult::ok(""));
        let config = PanelConfig::default();
        let site = site("example.com", SiteKind::PlainApp);
        let ctx = StageContext::new(&exec, &config, &site);

        prepare(&ctx).unwrap();
        let first = exec.commands();
        prepare(&ctx).unwrap();
        let all = exec.commands();

        assert_eq!(&all[first.len()..], first.as_slice());
        assert!(!first.contains(&"[elevated] mkdir -p /var/www".to_string()));
    }
}
