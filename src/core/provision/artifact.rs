//! ArtifactFetched: download the CMS archive and unpack it into the
//! document root.

use uuid::Uuid;

use crate::error::Result;
use crate::exec::{run_checked, CommandExecutor, Invocation};

use super::directory::normalize_ownership;
use super::StageContext;

pub fn fetch(ctx: &StageContext<'_>) -> Result<()> {
    let scratch = format!(
        "{}/skydock-artifact-{}.tar.gz",
        ctx.config.paths.scratch_dir.trim_end_matches('/'),
        Uuid::new_v4()
    );
    let root = ctx.site.root_path.as_str();

    let unpacked = download_and_extract(ctx, &scratch, root);
    remove_scratch(ctx.executor, &scratch);
    unpacked?;

    normalize_ownership(
        ctx.executor,
        root,
        &ctx.site.owner,
        &ctx.config.web.shared_group,
    )?;

    crate::log_status!("provision", "Unpacked {} into {}", ctx.config.artifact.url, root);
    Ok(())
}

fn download_and_extract(ctx: &StageContext<'_>, scratch: &str, root: &str) -> Result<()> {
    run_checked(
        ctx.executor,
        &Invocation::new(["wget", "-q", "-O", scratch, ctx.config.artifact.url.as_str()])
            .with_timeout(ctx.config.exec.transfer_timeout()),
        "Failed to download archive",
    )?;

    run_checked(
        ctx.executor,
        &Invocation::new([
            "tar",
            "-xzf",
            scratch,
            "-C",
            root,
            "--strip-components=1",
        ])
        .elevated()
        .with_timeout(ctx.config.exec.transfer_timeout()),
        "Failed to extract archive",
    )?;
    Ok(())
}

fn remove_scratch(executor: &dyn CommandExecutor, scratch: &str) {
    match executor.run(&Invocation::new(["rm", "-f", scratch])) {
        Ok(result) if result.success() => {}
        Ok(result) => {
            tracing::warn!(path = scratch, stderr = %result.diagnostic(), "scratch archive left behind")
        }
        Err(err) => tracing::warn!(path = scratch, error = %err, "scratch archive left behind"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PanelConfig;
    use crate::exec::ScriptedExecutor;
    use crate::provision::tests::site;
    use crate::site::SiteKind;

    #[test]
    fn download_extract_cleanup_then_chown() {
        let exec = ScriptedExecutor::new();
        let config = PanelConfig::default();
        let site = site("my-shop.test", SiteKind::ManagedCms);

        fetch(&StageContext::new(&exec, &config, &site)).unwrap();

        let invocations = exec.invocations();
        let programs: Vec<&str> = invocations.iter().map(|i| i.program()).collect();
        assert_eq!(programs, vec!["wget", "tar", "rm", "chown"]);

        assert_eq!(
            invocations[0].timeout,
            Some(config.exec.transfer_timeout())
        );
        assert!(!invocations[0].elevate);
        assert!(invocations[1].elevate);
        assert!(invocations[1]
            .argv
            .ends_with(&["-C".to_string(), "/var/www/alice/my-shop.test".to_string(), "--strip-components=1".to_string()]));
        assert_eq!(invocations[0].argv[3], invocations[2].argv[2]);
    }

    #[test]
    fn failed_download_reports_stderr_and_still_cleans_up() {
        let exec = ScriptedExecutor::new().fail(
            &["wget"],
            4,
            "wget: unable to resolve host address 'wordpress.org'",
        );
        let config = PanelConfig::default();
        let site = site("my-shop.test", SiteKind::ManagedCms);

        let err = fetch(&StageContext::new(&exec, &config, &site)).unwrap_err();

        assert!(err.message.contains("unable to resolve host address"));
        let programs: Vec<String> = exec
            .invocations()
            .iter()
            .map(|i| i.program().to_string())
            .collect();
        assert_eq!(programs, vec!["wget", "rm"]);
    }
}
