//! CmsInstalled: run the CMS installer against the freshly configured site.
//! The installer CLI is fetched first when the host does not have one.

use crate::error::Result;
use crate::exec::{run_checked, Invocation};

use super::StageContext;

pub struct CmsAdmin<'a> {
    pub user: &'a str,
    pub email: &'a str,
    pub password: &'a str,
}

/// Path or name of a usable installer binary.
fn ensure_installer(ctx: &StageContext<'_>) -> Result<String> {
    let which = ctx.executor.run(&Invocation::new(["which", "wp"]))?;
    if which.success() {
        return Ok("wp".to_string());
    }

    let artifact = &ctx.config.artifact;
    tracing::info!(path = %artifact.installer_path, "installing CMS installer CLI");
    run_checked(
        ctx.executor,
        &Invocation::new([
            "wget",
            "-q",
            "-O",
            artifact.installer_path.as_str(),
            artifact.installer_url.as_str(),
        ])
        .elevated()
        .with_timeout(ctx.config.exec.transfer_timeout()),
        "Failed to download installer CLI",
    )?;
    run_checked(
        ctx.executor,
        &Invocation::new(["chmod", "755", artifact.installer_path.as_str()]).elevated(),
        "Failed to make installer CLI executable",
    )?;
    Ok(artifact.installer_path.clone())
}

pub fn install(ctx: &StageContext<'_>, admin: &CmsAdmin<'_>) -> Result<()> {
    let installer = ensure_installer(ctx)?;
    let site = ctx.site;

    run_checked(
        ctx.executor,
        &Invocation::new([
            installer,
            "core".to_string(),
            "install".to_string(),
            format!("--path={}", site.root_path),
            format!("--url=http://{}", site.domain),
            format!("--title={}", site.domain),
            format!("--admin_user={}", admin.user),
            format!("--admin_password={}", admin.password),
            format!("--admin_email={}", admin.email),
            "--skip-email".to_string(),
            "--allow-root".to_string(),
        ])
        .elevated()
        .with_timeout(ctx.config.exec.transfer_timeout())
        .redacting(admin.password),
        "CMS installation failed",
    )?;

    crate::log_status!("provision", "CMS installed for {}", site.domain);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PanelConfig;
    use crate::exec::ScriptedExecutor;
    use crate::provision::tests::site;
    use crate::site::SiteKind;

    const ADMIN: CmsAdmin<'static> = CmsAdmin {
        user: "admin",
        email: "admin@my-shop.test",
        password: "correct horse",
    };

    #[test]
    fn uses_existing_cli() {
        let exec = ScriptedExecutor::new();
        let config = PanelConfig::default();
        let site = site("my-shop.test", SiteKind::ManagedCms);

        install(&StageContext::new(&exec, &config, &site), &ADMIN).unwrap();

        let invocations = exec.invocations();
        assert_eq!(invocations.len(), 2);
        assert_eq!(invocations[1].argv[0], "wp");
        assert!(invocations[1].argv.contains(&"--url=http://my-shop.test".to_string()));
        assert!(invocations[1].argv.contains(&"--skip-email".to_string()));
    }

    #[test]
    fn fetches_cli_when_missing() {
        let exec = ScriptedExecutor::new().fail(&["which", "wp"], 1, "");
        let config = PanelConfig::default();
        let site = site("my-shop.test", SiteKind::ManagedCms);

        install(&StageContext::new(&exec, &config, &site), &ADMIN).unwrap();

        let commands = exec.commands();
        assert!(commands[1].starts_with("[elevated] wget -q -O /usr/local/bin/wp"));
        assert_eq!(commands[2], "[elevated] chmod 755 /usr/local/bin/wp");
        assert!(commands[3].starts_with("[elevated] /usr/local/bin/wp core install"));
    }

    #[test]
    fn admin_password_never_shows_in_command_display() {
        let exec = ScriptedExecutor::new();
        let config = PanelConfig::default();
        let site = site("my-shop.test", SiteKind::ManagedCms);

        install(&StageContext::new(&exec, &config, &site), &ADMIN).unwrap();

        let shown = &exec.commands()[1];
        assert!(!shown.contains("correct horse"));
        assert!(shown.contains("<redacted>"));
        assert!(exec.invocations()[1]
            .argv
            .contains(&"--admin_password=correct horse".to_string()));
    }
}
