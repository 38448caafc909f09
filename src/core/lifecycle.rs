//! Site enable/disable across the server pair, and the record lifecycle
//! (create, toggle, destroy) built on it.
//!
//! Enabling registers the app server first and the proxy second; each
//! server is validated before it is reloaded so a broken config never
//! reaches a running server. There is no two-phase commit across the pair:
//! a proxy failure after the app server reloaded leaves the app server
//! reloaded.

use serde::Serialize;

use crate::config::PanelConfig;
use crate::error::{Error, Result};
use crate::exec::{run_checked, CommandExecutor, Invocation};
use crate::provision::{ProvisionOptions, ProvisionRun, ProvisioningPipeline};
use crate::site::{self, DatabaseCredential, NewSite, SiteKind, SiteSpec, SiteStatus};
use crate::store::SiteRepository;
use crate::webserver::{self, ServerPair, WebServerKind};

/// Enable, validate, reload: app server, then proxy.
pub fn activate(executor: &dyn CommandExecutor, config: &PanelConfig, site: &SiteSpec) -> Result<()> {
    let pair = ServerPair::fronted_by(site.front_server);
    for kind in [pair.app, pair.proxy] {
        run_checked(
            executor,
            &webserver::enable_site(config, kind, &site.domain),
            &format!("Failed to enable {} on {}", site.domain, kind),
        )?;
        run_checked(
            executor,
            &webserver::validate_config(config, kind),
            &format!("{} configuration test failed, not reloading", kind),
        )?;
        reload(executor, config, kind)?;
    }
    crate::log_status!("site", "{} enabled", site.domain);
    Ok(())
}

/// Disable and reload: proxy, then app server. Both servers are attempted;
/// the first error is returned.
pub fn deactivate(executor: &dyn CommandExecutor, config: &PanelConfig, site: &SiteSpec) -> Result<()> {
    let pair = ServerPair::fronted_by(site.front_server);
    let mut first_error = None;

    for kind in [pair.proxy, pair.app] {
        let removed = run_checked(
            executor,
            &webserver::disable_site(config, kind, &site.domain),
            &format!("Failed to disable {} on {}", site.domain, kind),
        )
        .and_then(|_| reload(executor, config, kind));

        if let Err(err) = removed {
            tracing::warn!(domain = %site.domain, server = %kind, error = %err, "disable step failed");
            first_error.get_or_insert(err);
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => {
            crate::log_status!("site", "{} disabled", site.domain);
            Ok(())
        }
    }
}

fn reload(executor: &dyn CommandExecutor, config: &PanelConfig, kind: WebServerKind) -> Result<()> {
    let service = webserver::service_name(config, kind);
    run_checked(
        executor,
        &Invocation::new(["systemctl", "reload", service]).elevated(),
        &format!("Failed to reload {}", service),
    )?;
    Ok(())
}

/// Input for [`SiteLifecycleManager::create`].
#[derive(Debug, Clone)]
pub struct CreateSite {
    pub domain: String,
    pub kind: SiteKind,
    pub front_server: Option<WebServerKind>,
    pub runtime_version: Option<String>,
    pub admin_user: Option<String>,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

impl CreateSite {
    pub fn new(domain: impl Into<String>, kind: SiteKind) -> Self {
        Self {
            domain: domain.into(),
            kind,
            front_server: None,
            runtime_version: None,
            admin_user: None,
            admin_email: None,
            admin_password: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedSite {
    pub site: SiteSpec,
    pub provision: ProvisionRun,
}

#[derive(Debug, Clone, Serialize)]
pub struct SiteDetails {
    #[serde(flatten)]
    pub site: SiteSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseCredential>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DestroyedSite {
    pub id: i64,
    pub domain: String,
    /// Document root and vhost files stay on disk.
    pub left_on_disk: Vec<String>,
}

pub struct SiteLifecycleManager<'a> {
    executor: &'a dyn CommandExecutor,
    config: &'a PanelConfig,
    repo: &'a dyn SiteRepository,
}

impl<'a> SiteLifecycleManager<'a> {
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

    /// Persist the site as active, then provision it. A failed run deletes
    /// the record again and returns the failing stage's error with the run
    /// attached.
    pub fn create(&self, owner: &str, request: &CreateSite) -> Result<CreatedSite> {
        let new_site = self.validate(owner, request)?;

        if self
            .repo
            .find_by_domain(&new_site.owner, &new_site.domain)?
            .is_some()
        {
            return Err(Error::site_conflict(&new_site.owner, &new_site.domain));
        }

        let site = self.repo.insert_site(&new_site)?;
        crate::log_status!("site", "Creating {} for {}", site.domain, site.owner);

        let options = ProvisionOptions {
            admin_password: request.admin_password.clone(),
        };
        let run = ProvisioningPipeline::new(self.executor, self.config, self.repo).run(&site, &options);

        match run.into_result() {
            Ok(provision) => Ok(CreatedSite { site, provision }),
            Err(err) => {
                if let Err(cleanup) = self.repo.delete_site(site.id) {
                    tracing::warn!(site_id = site.id, error = %cleanup, "failed to remove site record");
                }
                Err(err)
            }
        }
    }

    fn validate(&self, owner: &str, request: &CreateSite) -> Result<NewSite> {
        let owner = site::validate_owner(owner)?;
        let domain = site::normalize_domain(&request.domain)?;
        let runtime_version = site::validate_runtime(
            request
                .runtime_version
                .as_deref()
                .unwrap_or(&self.config.web.default_runtime),
        )?
        .to_string();

        let (admin_user, admin_email) = match request.kind {
            SiteKind::PlainApp => (None, None),
            SiteKind::ManagedCms => admin_fields(request)?,
        };

        Ok(NewSite {
            owner: owner.to_string(),
            root_path: site::root_path(&self.config.paths.web_root, owner, &domain),
            domain,
            kind: request.kind,
            front_server: request.front_server.unwrap_or(self.config.web.front_server),
            runtime_version,
            status: SiteStatus::Active,
            admin_user,
            admin_email,
        })
    }

    pub fn list(&self, owner: &str) -> Result<Vec<SiteSpec>> {
        self.repo.list_sites(owner)
    }

    pub fn show(&self, owner: &str, id: i64) -> Result<SiteDetails> {
        let site = self.repo.find_site(owner, id)?;
        let database = self
            .repo
            .find_credential(site.id)?
            .map(|credential| credential.redacted());
        Ok(SiteDetails { site, database })
    }

    /// Status changes only after both servers accepted the change.
    pub fn enable(&self, owner: &str, id: i64) -> Result<SiteSpec> {
        let site = self.repo.find_site(owner, id)?;
        activate(self.executor, self.config, &site)?;
        self.repo.set_status(site.id, SiteStatus::Active)
    }

    pub fn disable(&self, owner: &str, id: i64) -> Result<SiteSpec> {
        let site = self.repo.find_site(owner, id)?;
        deactivate(self.executor, self.config, &site)?;
        self.repo.set_status(site.id, SiteStatus::Disabled)
    }

    pub fn toggle(&self, owner: &str, id: i64) -> Result<SiteSpec> {
        let site = self.repo.find_site(owner, id)?;
        match site.status {
            SiteStatus::Active => self.disable(owner, id),
            SiteStatus::Disabled => self.enable(owner, id),
        }
    }

    /// Best-effort disable, then delete the record and its credential.
    /// Files on the target are left alone.
    pub fn destroy(&self, owner: &str, id: i64) -> Result<DestroyedSite> {
        let site = self.repo.find_site(owner, id)?;

        if let Err(err) = deactivate(self.executor, self.config, &site) {
            tracing::warn!(domain = %site.domain, error = %err, "disable before destroy failed, continuing");
        }
        self.repo.delete_site(site.id)?;

        let pair = ServerPair::fronted_by(site.front_server);
        crate::log_status!("site", "Destroyed {}", site.domain);
        Ok(DestroyedSite {
            id: site.id,
            left_on_disk: vec![
                site.root_path.clone(),
                webserver::available_path(self.config, pair.app, &site.domain),
                webserver::available_path(self.config, pair.proxy, &site.domain),
            ],
            domain: site.domain,
        })
    }
}

/// CMS admin user and email travel together; the password is only needed
/// when both are set.
fn admin_fields(request: &CreateSite) -> Result<(Option<String>, Option<String>)> {
    let provided = [
        ("admin_user", request.admin_user.as_deref()),
        ("admin_email", request.admin_email.as_deref()),
        ("admin_password", request.admin_password.as_deref()),
    ];
    let present = provided
        .iter()
        .filter(|(_, value)| value.is_some_and(|v| !v.trim().is_empty()))
        .count();

    if present == 0 {
        return Ok((None, None));
    }
    if present < provided.len() {
        let missing = provided
            .iter()
            .filter(|(_, value)| !value.is_some_and(|v| !v.trim().is_empty()))
            .map(|(field, _)| field.to_string())
            .collect();
        return Err(Error::validation_missing_argument(missing));
    }

    let email = request.admin_email.as_deref().unwrap_or_default().trim();
    if !email.contains('@') {
        return Err(Error::validation_invalid_argument(
            "admin_email",
            "Admin email must be an email address",
            Some(email.to_string()),
            None,
        ));
    }

    Ok((
        request.admin_user.as_ref().map(|v| v.trim().to_string()),
        Some(email.to_string()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ScriptedExecutor;
    use crate::provision::tests::site;
    use crate::store::SqliteStore;
    use crate::vault::CredentialCipher;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory(CredentialCipher::from_key(&[9u8; 32]).unwrap()).unwrap()
    }

    #[test]
    fn activate_orders_app_before_proxy() {
        let exec = ScriptedExecutor::new();
        let config = PanelConfig::default();

        activate(&exec, &config, &site("example.com", SiteKind::PlainApp)).unwrap();

        assert_eq!(
            exec.commands(),
            vec![
                "[elevated] a2ensite example.com.conf",
                "[elevated] apache2ctl configtest",
                "[elevated] systemctl reload apache2",
                "[elevated] ln -sfn /etc/nginx/sites-available/example.com /etc/nginx/sites-enabled/example.com",
                "[elevated] nginx -t",
                "[elevated] systemctl reload nginx",
            ]
        );
    }

    #[test]
    fn failed_validation_never_reloads() {
        let exec = ScriptedExecutor::new().fail(
            &["nginx", "-t"],
            1,
            "nginx: [emerg] unknown directive \"proxy_pas\"",
        );
        let config = PanelConfig::default();

        let err = activate(&exec, &config, &site("example.com", SiteKind::PlainApp)).unwrap_err();

        assert!(err.message.contains("unknown directive"));
        let commands = exec.commands();
        assert_eq!(commands.last().unwrap(), "[elevated] nginx -t");
        assert!(!commands.contains(&"[elevated] systemctl reload nginx".to_string()));
        assert!(commands.contains(&"[elevated] systemctl reload apache2".to_string()));
    }

    #[test]
    fn deactivate_attempts_both_and_returns_first_error() {
        let exec = ScriptedExecutor::new()
            .fail(&["rm", "-f"], 1, "rm: cannot remove: Permission denied")
            .fail(&["a2dissite"], 1, "ERROR: Site example.com does not exist!");
        let config = PanelConfig::default();

        let err = deactivate(&exec, &config, &site("example.com", SiteKind::PlainApp)).unwrap_err();

        assert!(err.message.contains("Permission denied"));
        let programs: Vec<String> = exec
            .invocations()
            .iter()
            .map(|i| i.program().to_string())
            .collect();
        assert_eq!(programs, vec!["rm", "a2dissite"]);
    }

    #[test]
    fn deactivate_skips_validation() {
        let exec = ScriptedExecutor::new();
        let config = PanelConfig::default();

        deactivate(&exec, &config, &site("example.com", SiteKind::PlainApp)).unwrap();

        assert_eq!(
            exec.commands(),
            vec![
                "[elevated] rm -f /etc/nginx/sites-enabled/example.com",
                "[elevated] systemctl reload nginx",
                "[elevated] a2dissite example.com.conf",
                "[elevated] systemctl reload apache2",
            ]
        );
    }

    #[test]
    fn create_plain_app_ends_active() {
        let store = store();
        let exec = ScriptedExecutor::new();
        let config = PanelConfig::default();
        let manager = SiteLifecycleManager::new(&exec, &config, &store);

        let created = manager
            .create("alice", &CreateSite::new("Example.COM", SiteKind::PlainApp))
            .unwrap();

        assert_eq!(created.site.domain, "example.com");
        assert_eq!(created.site.status, SiteStatus::Active);
        assert_eq!(created.site.root_path, "/var/www/alice/example.com");
        assert_eq!(created.site.runtime_version, "8.1");
        assert!(created.provision.succeeded());
        assert_eq!(manager.list("alice").unwrap().len(), 1);
    }

    #[test]
    fn invalid_domain_is_rejected_before_any_command() {
        let store = store();
        let exec = ScriptedExecutor::new();
        let config = PanelConfig::default();
        let manager = SiteLifecycleManager::new(&exec, &config, &store);

        let err = manager
            .create("alice", &CreateSite::new("not a domain", SiteKind::PlainApp))
            .unwrap_err();

        assert_eq!(err.code.as_str(), "validation.invalid_argument");
        assert_eq!(exec.call_count(), 0);
    }

    #[test]
    fn duplicate_domain_is_a_conflict() {
        let store = store();
        let exec = ScriptedExecutor::new();
        let config = PanelConfig::default();
        let manager = SiteLifecycleManager::new(&exec, &config, &store);

        manager
            .create("alice", &CreateSite::new("example.com", SiteKind::PlainApp))
            .unwrap();
        let before = exec.call_count();

        let err = manager
            .create("alice", &CreateSite::new("example.com", SiteKind::PlainApp))
            .unwrap_err();

        assert_eq!(err.code.as_str(), "site.conflict");
        assert_eq!(exec.call_count(), before);

        manager
            .create("bob", &CreateSite::new("example.com", SiteKind::PlainApp))
            .unwrap();
    }

    #[test]
    fn failed_provisioning_removes_the_record() {
        let store = store();
        let exec = ScriptedExecutor::new().fail(&["wget"], 8, "ERROR 404: Not Found.");
        let config = PanelConfig::default();
        let manager = SiteLifecycleManager::new(&exec, &config, &store);

        let err = manager
            .create("alice", &CreateSite::new("my-shop.test", SiteKind::ManagedCms))
            .unwrap_err();

        assert_eq!(err.code.as_str(), "command.failed");
        assert_eq!(err.stderr(), Some("ERROR 404: Not Found."));
        assert_eq!(err.details["provision"]["failedStage"], "artifact_fetched");
        assert!(manager.list("alice").unwrap().is_empty());
    }

    #[test]
    fn partial_admin_fields_are_rejected() {
        let store = store();
        let exec = ScriptedExecutor::new();
        let config = PanelConfig::default();
        let manager = SiteLifecycleManager::new(&exec, &config, &store);

        let mut request = CreateSite::new("my-shop.test", SiteKind::ManagedCms);
        request.admin_user = Some("admin".to_string());

        let err = manager.create("alice", &request).unwrap_err();
        assert_eq!(err.code.as_str(), "validation.missing_argument");
        assert_eq!(exec.call_count(), 0);
    }

    #[test]
    fn disable_then_enable_keeps_site_and_credential() {
        let store = store();
        let exec = ScriptedExecutor::new();
        let config = PanelConfig::default();
        let manager = SiteLifecycleManager::new(&exec, &config, &store);

        let created = manager
            .create("alice", &CreateSite::new("my-shop.test", SiteKind::ManagedCms))
            .unwrap();
        let id = created.site.id;
        let credential = store.find_credential(id).unwrap().unwrap();

        let disabled = manager.disable("alice", id).unwrap();
        assert_eq!(disabled.status, SiteStatus::Disabled);

        let enabled = manager.toggle("alice", id).unwrap();
        assert_eq!(enabled.status, SiteStatus::Active);
        assert_eq!(enabled.domain, created.site.domain);
        assert_eq!(enabled.root_path, created.site.root_path);
        assert_eq!(store.find_credential(id).unwrap().unwrap(), credential);
    }

    #[test]
    fn failed_disable_leaves_status_alone() {
        let store = store();
        let config = PanelConfig::default();
        let created = SiteLifecycleManager::new(&ScriptedExecutor::new(), &config, &store)
            .create("alice", &CreateSite::new("example.com", SiteKind::PlainApp))
            .unwrap();

        let failing = ScriptedExecutor::new().fail(&["systemctl", "reload"], 1, "Job failed");
        let err = SiteLifecycleManager::new(&failing, &config, &store)
            .disable("alice", created.site.id)
            .unwrap_err();

        assert_eq!(err.code.as_str(), "command.failed");
        assert_eq!(
            store.find_site("alice", created.site.id).unwrap().status,
            SiteStatus::Active
        );
    }

    #[test]
    fn show_redacts_credential_and_hides_other_owners() {
        let store = store();
        let exec = ScriptedExecutor::new();
        let config = PanelConfig::default();
        let manager = SiteLifecycleManager::new(&exec, &config, &store);

        let created = manager
            .create("alice", &CreateSite::new("my-shop.test", SiteKind::ManagedCms))
            .unwrap();

        let details = manager.show("alice", created.site.id).unwrap();
        assert_eq!(details.database.unwrap().password, "<redacted>");

        let err = manager.show("bob", created.site.id).unwrap_err();
        assert_eq!(err.code.as_str(), "site.not_found");
    }

    #[test]
    fn destroy_survives_failed_disable_and_cascades() {
        let store = store();
        let config = PanelConfig::default();
        let created = SiteLifecycleManager::new(&ScriptedExecutor::new(), &config, &store)
            .create("alice", &CreateSite::new("my-shop.test", SiteKind::ManagedCms))
            .unwrap();
        let id = created.site.id;

        let unreachable = ScriptedExecutor::new().unreachable(&[]);
        let destroyed = SiteLifecycleManager::new(&unreachable, &config, &store)
            .destroy("alice", id)
            .unwrap();

        assert_eq!(destroyed.domain, "my-shop.test");
        assert!(destroyed
            .left_on_disk
            .contains(&"/var/www/alice/my-shop.test".to_string()));
        assert!(store.find_credential(id).unwrap().is_none());
        assert!(store.find_site("alice", id).is_err());
        assert_eq!(unreachable.call_count(), 2);
    }
}
