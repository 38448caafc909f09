//! Site provisioning as an ordered, recorded sequence of stages.
//!
//! Stages run strictly in order and each one is gated on the previous one
//! succeeding. The first failure stops the run; stages already completed
//! are not undone. The returned [`ProvisionRun`] records how far the run
//! got so a caller can report or later compensate.

pub mod artifact;
pub mod database;
pub mod directory;
pub mod files;
pub mod installer;
pub mod templates;

use serde::Serialize;
use std::fmt;

use crate::config::PanelConfig;
use crate::error::{Error, Result};
use crate::exec::{run_checked, CommandExecutor};
use crate::lifecycle;
use crate::site::{DatabaseCredential, SiteKind, SiteSpec};
use crate::store::SiteRepository;
use crate::webserver::{self, ServerPair};

use files::FileTarget;
use templates::{CmsSecrets, VhostContext};

pub const ENTRY_FILE: &str = "index.php";
pub const ENTRY_MODE: &str = "644";
pub const CMS_CONFIG_FILE: &str = "wp-config.php";
pub const CMS_CONFIG_MODE: &str = "640";
pub const VHOST_MODE: &str = "644";

/// What every stage gets to work with.
pub struct StageContext<'a> {
    pub executor: &'a dyn CommandExecutor,
    pub config: &'a PanelConfig,
    pub site: &'a SiteSpec,
}

impl<'a> StageContext<'a> {
    pub fn new(
        executor: &'a dyn CommandExecutor,
        config: &'a PanelConfig,
        site: &'a SiteSpec,
    ) -> Self {
        Self {
            executor,
            config,
            site,
        }
    }

    fn servers(&self) -> ServerPair {
        ServerPair::fronted_by(self.site.front_server)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    DirectoryReady,
    DatabaseReady,
    ArtifactFetched,
    AppConfigWritten,
    ProxyConfigWritten,
    Enabled,
    CmsInstalled,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::DirectoryReady => "directory_ready",
            Stage::DatabaseReady => "database_ready",
            Stage::ArtifactFetched => "artifact_fetched",
            Stage::AppConfigWritten => "app_config_written",
            Stage::ProxyConfigWritten => "proxy_config_written",
            Stage::Enabled => "enabled",
            Stage::CmsInstalled => "cms_installed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered stages for a site kind. PlainApp goes straight from the
/// directory to configuration.
pub fn plan(kind: SiteKind, install_cms: bool) -> Vec<Stage> {
    let mut stages = vec![Stage::DirectoryReady];
    if kind == SiteKind::ManagedCms {
        stages.push(Stage::DatabaseReady);
        stages.push(Stage::ArtifactFetched);
    }
    stages.extend([
        Stage::AppConfigWritten,
        Stage::ProxyConfigWritten,
        Stage::Enabled,
    ]);
    if kind == SiteKind::ManagedCms && install_cms {
        stages.push(Stage::CmsInstalled);
    }
    stages
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of one provisioning run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionRun {
    pub site_id: i64,
    pub domain: String,
    pub stages: Vec<StageRecord>,
    pub last_completed: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Password already redacted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseCredential>,
    #[serde(skip)]
    pub failure: Option<Error>,
}

impl ProvisionRun {
    fn planned(site: &SiteSpec, stages: &[Stage]) -> Self {
        Self {
            site_id: site.id,
            domain: site.domain.clone(),
            stages: stages
                .iter()
                .map(|stage| StageRecord {
                    stage: *stage,
                    status: StageStatus::Skipped,
                    error: None,
                })
                .collect(),
            last_completed: None,
            failed_stage: None,
            error: None,
            database: None,
            failure: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failed_stage.is_none()
    }

    pub fn status_of(&self, stage: Stage) -> Option<StageStatus> {
        self.stages
            .iter()
            .find(|record| record.stage == stage)
            .map(|record| record.status)
    }

    fn complete(&mut self, index: usize) {
        self.stages[index].status = StageStatus::Completed;
        self.last_completed = Some(self.stages[index].stage);
    }

    fn fail(&mut self, index: usize, err: Error) {
        let record = &mut self.stages[index];
        record.status = StageStatus::Failed;
        record.error = Some(err.message.clone());
        self.failed_stage = Some(record.stage);
        self.error = Some(err.message.clone());
        self.failure = Some(err);
    }

    /// The failing stage's error with this run attached, or the run itself.
    pub fn into_result(mut self) -> Result<Self> {
        match self.failure.take() {
            None => Ok(self),
            Some(err) => {
                let run = serde_json::to_value(&self).unwrap_or_default();
                Err(err.with_details("provision", run))
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProvisionOptions {
    /// Admin password for the CMS installer; never persisted.
    pub admin_password: Option<String>,
}

pub struct ProvisioningPipeline<'a> {
    executor: &'a dyn CommandExecutor,
    config: &'a PanelConfig,
    repo: &'a dyn SiteRepository,
}

impl<'a> ProvisioningPipeline<'a> {
    pub fn new(
        executor: &'a dyn CommandExecutor,
        config: &'a PanelConfig,
        repo: &'a dyn SiteRepository,
    ) -> Self {
        Self {
            executor,
            config,
            repo,
        }
    }

    pub fn run(&self, site: &SiteSpec, options: &ProvisionOptions) -> ProvisionRun {
        let admin = cms_admin(site, options);
        let stages = plan(site.kind, admin.is_some());
        let ctx = StageContext::new(self.executor, self.config, site);
        let mut run = ProvisionRun::planned(site, &stages);
        let mut credential = None;

        for (index, stage) in stages.iter().enumerate() {
            crate::log_status!("provision", "{}: {}", site.domain, stage);
            match self.execute(&ctx, *stage, admin.as_ref(), &mut credential) {
                Ok(()) => run.complete(index),
                Err(err) => {
                    tracing::warn!(
                        domain = %site.domain,
                        stage = %stage,
                        code = err.code.as_str(),
                        "provisioning stopped"
                    );
                    run.fail(index, err);
                    break;
                }
            }
        }

        run.database = credential.as_ref().map(DatabaseCredential::redacted);
        if run.succeeded() {
            crate::log_status!("provision", "{} provisioned", site.domain);
        }
        run
    }

    fn execute(
        &self,
        ctx: &StageContext<'_>,
        stage: Stage,
        admin: Option<&installer::CmsAdmin<'_>>,
        credential: &mut Option<DatabaseCredential>,
    ) -> Result<()> {
        match stage {
            Stage::DirectoryReady => directory::prepare(ctx),
            Stage::DatabaseReady => {
                *credential = Some(database::provision(ctx, self.repo)?);
                Ok(())
            }
            Stage::ArtifactFetched => artifact::fetch(ctx),
            Stage::AppConfigWritten => write_app_config(ctx, credential.as_ref()),
            Stage::ProxyConfigWritten => write_proxy_config(ctx),
            Stage::Enabled => lifecycle::activate(ctx.executor, ctx.config, ctx.site),
            Stage::CmsInstalled => match admin {
                Some(admin) => installer::install(ctx, admin),
                None => Err(Error::validation_missing_argument(vec![
                    "admin_user".to_string(),
                    "admin_email".to_string(),
                    "admin_password".to_string(),
                ])),
            },
        }
    }
}

/// Installer input, present only when every admin field was supplied.
fn cms_admin<'s>(site: &'s SiteSpec, options: &'s ProvisionOptions) -> Option<installer::CmsAdmin<'s>> {
    if site.kind != SiteKind::ManagedCms {
        return None;
    }
    Some(installer::CmsAdmin {
        user: site.admin_user.as_deref()?,
        email: site.admin_email.as_deref()?,
        password: options.admin_password.as_deref()?,
    })
}

fn vhost_target(ctx: &StageContext<'_>, kind: webserver::WebServerKind) -> FileTarget {
    FileTarget::new(
        webserver::available_path(ctx.config, kind, &ctx.site.domain),
        "root",
        "root",
        VHOST_MODE,
    )
}

fn write_vhost(ctx: &StageContext<'_>, kind: webserver::WebServerKind, proxy: bool) -> Result<()> {
    let web = &ctx.config.web;
    let socket = templates::php_socket(&web.php_fpm_socket, &ctx.site.runtime_version);
    let vhost = VhostContext {
        domain: &ctx.site.domain,
        root: &ctx.site.root_path,
        public_port: web.public_port,
        app_port: web.app_port,
        php_socket: &socket,
        ipv6: web.ipv6,
    };
    let content = if proxy {
        templates::proxy_vhost(kind, &vhost)
    } else {
        templates::app_vhost(kind, &vhost)
    };

    let target = vhost_target(ctx, kind);
    files::install(ctx.executor, &ctx.config.paths.staging_dir, &content, &target)?;
    crate::log_status!("provision", "Wrote {} vhost {}", kind, target.path);
    Ok(())
}

/// Application content file, then the app server vhost.
fn write_app_config(ctx: &StageContext<'_>, credential: Option<&DatabaseCredential>) -> Result<()> {
    let site = ctx.site;
    let (name, mode, content) = match site.kind {
        SiteKind::PlainApp => (ENTRY_FILE, ENTRY_MODE, templates::entry_stub(&site.domain)),
        SiteKind::ManagedCms => {
            let credential = credential.ok_or_else(|| {
                Error::internal_unexpected(format!(
                    "No database credential for {} when writing {}",
                    site.domain, CMS_CONFIG_FILE
                ))
            })?;
            let content = templates::cms_config(&CmsSecrets {
                domain: &site.domain,
                db_name: &credential.name,
                db_user: &credential.user,
                db_password: &credential.password,
                db_host: &credential.host,
            });
            (CMS_CONFIG_FILE, CMS_CONFIG_MODE, content)
        }
    };

    let target = FileTarget::new(
        format!("{}/{}", site.root_path.trim_end_matches('/'), name),
        &site.owner,
        &ctx.config.web.shared_group,
        mode,
    );
    files::install(ctx.executor, &ctx.config.paths.staging_dir, &content, &target)?;

    let app = ctx.servers().app;
    if app == webserver::WebServerKind::Apache {
        open_apache_app_port(ctx)?;
    }
    write_vhost(ctx, app, false)
}

/// Apache only binds ports named by a `Listen` directive. The snippet is
/// shared by every site, so rewriting it with the same port is a no-op.
fn open_apache_app_port(ctx: &StageContext<'_>) -> Result<()> {
    let kind = webserver::WebServerKind::Apache;
    let Some(path) = ctx.config.server(kind).ports_conf.as_deref() else {
        return Ok(());
    };

    let content = templates::apache_ports(ctx.config.web.app_port);
    let target = FileTarget::new(path, "root", "root", VHOST_MODE);
    files::install(ctx.executor, &ctx.config.paths.staging_dir, &content, &target)?;
    run_checked(ctx.executor, &webserver::enable_conf(path), "Enable apache ports conf")?;
    crate::log_status!("provision", "Apache listens on 127.0.0.1:{}", ctx.config.web.app_port);
    Ok(())
}

fn write_proxy_config(ctx: &StageContext<'_>) -> Result<()> {
    write_vhost(ctx, ctx.servers().proxy, true)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::exec::ScriptedExecutor;
    use crate::site::{NewSite, SiteStatus};
    use crate::store::SqliteStore;
    use crate::vault::CredentialCipher;
    use crate::webserver::WebServerKind;

    /// Unpersisted site owned by `alice` under the default web root.
    pub fn site(domain: &str, kind: SiteKind) -> SiteSpec {
        SiteSpec {
            id: 1,
            owner: "alice".to_string(),
            domain: domain.to_string(),
            root_path: format!("/var/www/alice/{}", domain),
            kind,
            front_server: WebServerKind::Nginx,
            runtime_version: "8.1".to_string(),
            status: SiteStatus::Active,
            admin_user: None,
            admin_email: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory(CredentialCipher::from_key(&[3u8; 32]).unwrap()).unwrap()
    }

    fn persisted(store: &SqliteStore, domain: &str, kind: SiteKind) -> SiteSpec {
        let template = site(domain, kind);
        store
            .insert_site(&NewSite {
                owner: template.owner,
                domain: template.domain,
                root_path: template.root_path,
                kind,
                front_server: WebServerKind::Nginx,
                runtime_version: template.runtime_version,
                status: SiteStatus::Active,
                admin_user: Some("admin".to_string()),
                admin_email: Some("admin@example.net".to_string()),
            })
            .unwrap()
    }

    #[test]
    fn plain_app_skips_database_and_artifact() {
        assert_eq!(
            plan(SiteKind::PlainApp, true),
            vec![
                Stage::DirectoryReady,
                Stage::AppConfigWritten,
                Stage::ProxyConfigWritten,
                Stage::Enabled
            ]
        );
        assert_eq!(plan(SiteKind::ManagedCms, false).len(), 6);
        assert_eq!(plan(SiteKind::ManagedCms, true).last(), Some(&Stage::CmsInstalled));
    }

    #[test]
    fn plain_app_writes_entry_stub_and_both_vhosts() {
        let store = store();
        let exec = ScriptedExecutor::new();
        let config = PanelConfig::default();
        let site = persisted(&store, "example.com", SiteKind::PlainApp);

        let run = ProvisioningPipeline::new(&exec, &config, &store)
            .run(&site, &ProvisionOptions::default());

        assert!(run.succeeded(), "{:?}", run.error);
        assert_eq!(run.last_completed, Some(Stage::Enabled));
        assert!(run.database.is_none());

        let app = exec
            .file("/etc/apache2/sites-available/example.com.conf")
            .unwrap();
        assert!(app.contains("ServerName example.com"));
        let proxy = exec.file("/etc/nginx/sites-available/example.com").unwrap();
        assert!(proxy.contains("proxy_pass http://127.0.0.1:8080;"));
        assert!(exec
            .file("/var/www/alice/example.com/index.php")
            .unwrap()
            .contains("example.com"));

        assert!(store.find_credential(site.id).unwrap().is_none());
    }

    #[test]
    fn apache_app_server_listens_before_its_vhost_is_enabled() {
        let store = store();
        let exec = ScriptedExecutor::new();
        let config = PanelConfig::default();
        let site = persisted(&store, "example.com", SiteKind::PlainApp);

        let run = ProvisioningPipeline::new(&exec, &config, &store)
            .run(&site, &ProvisionOptions::default());
        assert!(run.succeeded(), "{:?}", run.error);

        let ports = exec
            .file("/etc/apache2/conf-available/skydock-ports.conf")
            .unwrap();
        assert!(ports.lines().any(|line| line == "Listen 127.0.0.1:8080"));

        let commands = exec.commands();
        let position = |line: &str| commands.iter().position(|c| c == line).unwrap();
        assert!(
            position("[elevated] a2enconf skydock-ports")
                < position("[elevated] a2ensite example.com.conf")
        );
    }

    #[test]
    fn nginx_app_server_needs_no_ports_conf() {
        let store = store();
        let exec = ScriptedExecutor::new();
        let config = PanelConfig::default();
        let mut site = site("example.com", SiteKind::PlainApp);
        site.front_server = WebServerKind::Apache;

        let run = ProvisioningPipeline::new(&exec, &config, &store)
            .run(&site, &ProvisionOptions::default());
        assert!(run.succeeded(), "{:?}", run.error);

        assert!(exec
            .file("/etc/apache2/conf-available/skydock-ports.conf")
            .is_none());
        assert!(!exec.invocations().iter().any(|i| i.program() == "a2enconf"));
        let app = exec.file("/etc/nginx/sites-available/example.com").unwrap();
        assert!(app.contains("listen 127.0.0.1:8080;"));
    }

    #[test]
    fn public_vhost_follows_the_ipv6_toggle() {
        let store = store();
        let site = persisted(&store, "example.com", SiteKind::PlainApp);

        let exec = ScriptedExecutor::new();
        let config = PanelConfig::default();
        ProvisioningPipeline::new(&exec, &config, &store).run(&site, &ProvisionOptions::default());
        let proxy = exec.file("/etc/nginx/sites-available/example.com").unwrap();
        assert!(proxy.contains("listen [::]:80;"));

        let exec = ScriptedExecutor::new();
        let mut config = PanelConfig::default();
        config.web.ipv6 = false;
        ProvisioningPipeline::new(&exec, &config, &store).run(&site, &ProvisionOptions::default());
        let proxy = exec.file("/etc/nginx/sites-available/example.com").unwrap();
        assert!(proxy.contains("listen 80;"));
        assert!(!proxy.contains("[::]"));
    }

    #[test]
    fn entry_stub_gets_owner_and_shared_group() {
        let store = store();
        let exec = ScriptedExecutor::new();
        let config = PanelConfig::default();
        let site = persisted(&store, "example.com", SiteKind::PlainApp);

        ProvisioningPipeline::new(&exec, &config, &store).run(&site, &ProvisionOptions::default());

        let commands = exec.commands();
        assert!(commands.contains(
            &"[elevated] chown alice:www-data /var/www/alice/example.com/index.php".to_string()
        ));
        assert!(commands
            .contains(&"[elevated] chmod 644 /var/www/alice/example.com/index.php".to_string()));
    }

    #[test]
    fn database_failure_stops_before_any_fetch_or_write() {
        let store = store();
        let exec = ScriptedExecutor::new().fail(
            &["mysql"],
            1,
            "ERROR 1045 (28000): Access denied for user 'root'@'localhost'",
        );
        let config = PanelConfig::default();
        let site = persisted(&store, "my-shop.test", SiteKind::ManagedCms);

        let run = ProvisioningPipeline::new(&exec, &config, &store)
            .run(&site, &ProvisionOptions::default());

        assert_eq!(run.failed_stage, Some(Stage::DatabaseReady));
        assert_eq!(run.last_completed, Some(Stage::DirectoryReady));
        assert_eq!(run.status_of(Stage::ArtifactFetched), Some(StageStatus::Skipped));
        assert!(run.error.as_deref().unwrap().contains("Access denied"));

        let programs: Vec<String> = exec
            .invocations()
            .iter()
            .map(|i| i.program().to_string())
            .collect();
        assert!(!programs.iter().any(|p| p == "wget" || p == "sh" || p == "ln"));
        assert_eq!(programs.last().map(String::as_str), Some("mysql"));
        assert!(exec.files().is_empty());
        assert!(store.find_credential(site.id).unwrap().is_none());
    }

    #[test]
    fn cms_run_persists_credential_and_writes_matching_config() {
        let store = store();
        let exec = ScriptedExecutor::new();
        let config = PanelConfig::default();
        let site = persisted(&store, "my-shop.test", SiteKind::ManagedCms);

        let run = ProvisioningPipeline::new(&exec, &config, &store).run(
            &site,
            &ProvisionOptions {
                admin_password: Some("s3cret-admin".to_string()),
            },
        );

        assert!(run.succeeded(), "{:?}", run.error);
        assert_eq!(run.last_completed, Some(Stage::CmsInstalled));

        let credential = store.find_credential(site.id).unwrap().unwrap();
        assert_eq!(credential.name, "wp_my_shop_test");
        assert_eq!(credential.password.len(), 16);
        assert_eq!(run.database.as_ref().unwrap().password, "<redacted>");

        let wp_config = exec.file("/var/www/alice/my-shop.test/wp-config.php").unwrap();
        assert!(wp_config.contains(&format!("define('DB_PASSWORD', '{}');", credential.password)));
        assert!(exec
            .commands()
            .contains(&"[elevated] chmod 640 /var/www/alice/my-shop.test/wp-config.php".to_string()));

        for shown in exec.commands() {
            assert!(!shown.contains(&credential.password));
            assert!(!shown.contains("s3cret-admin"));
        }
    }

    #[test]
    fn cms_without_admin_password_skips_installer() {
        let store = store();
        let exec = ScriptedExecutor::new();
        let config = PanelConfig::default();
        let site = persisted(&store, "my-shop.test", SiteKind::ManagedCms);

        let run = ProvisioningPipeline::new(&exec, &config, &store)
            .run(&site, &ProvisionOptions::default());

        assert!(run.succeeded());
        assert_eq!(run.status_of(Stage::CmsInstalled), None);
        assert!(!exec.invocations().iter().any(|i| i.program() == "wp"));
    }

    #[test]
    fn stages_leave_side_effects_in_order() {
        let store = store();
        let exec = ScriptedExecutor::new();
        let config = PanelConfig::default();
        let site = persisted(&store, "my-shop.test", SiteKind::ManagedCms);

        ProvisioningPipeline::new(&exec, &config, &store).run(&site, &ProvisionOptions::default());

        let programs: Vec<String> = exec
            .invocations()
            .iter()
            .map(|i| i.program().to_string())
            .collect();
        let first = |name: &str| programs.iter().position(|p| p == name).unwrap();
        assert!(first("mkdir") < first("mysql"));
        assert!(first("mysql") < first("wget"));
        assert!(first("tar") < first("sh"));
        assert!(first("sh") < first("a2ensite"));
    }

    #[test]
    fn failure_result_carries_the_run() {
        let store = store();
        let exec = ScriptedExecutor::new().fail(&["nginx", "-t"], 1, "nginx: [emerg] unexpected \"}\"");
        let config = PanelConfig::default();
        let site = persisted(&store, "example.com", SiteKind::PlainApp);

        let run = ProvisioningPipeline::new(&exec, &config, &store)
            .run(&site, &ProvisionOptions::default());
        assert_eq!(run.failed_stage, Some(Stage::Enabled));

        let err = run.into_result().unwrap_err();
        assert_eq!(err.code.as_str(), "command.failed");
        assert_eq!(err.details["provision"]["failedStage"], "enabled");
        assert_eq!(err.details["provision"]["lastCompleted"], "proxy_config_written");
    }
}
