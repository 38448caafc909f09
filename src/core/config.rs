//! Panel configuration loaded once at process start.
//!
//! Every field has a built-in default so a missing `skydock.toml` yields a
//! working local configuration. Secrets are the exception: the credential
//! encryption key has no default and must be supplied explicitly.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::paths;
use crate::webserver::WebServerKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default = "default_nginx")]
    pub nginx: ServerConfig,
    #[serde(default = "default_apache")]
    pub apache: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub artifact: ArtifactConfig,
    #[serde(default)]
    pub exec: ExecConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_web_root")]
    pub web_root: String,
    #[serde(default = "default_staging_dir")]
    pub staging_dir: String,
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: String,
    #[serde(default = "default_database_path")]
    pub database: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Group shared by site owners and the web servers.
    #[serde(default = "default_shared_group")]
    pub shared_group: String,
    #[serde(default = "default_public_port")]
    pub public_port: u16,
    /// Internal port the app server listens on behind the proxy.
    #[serde(default = "default_app_port")]
    pub app_port: u16,
    #[serde(default = "default_runtime")]
    pub default_runtime: String,
    /// `{{version}}` is replaced with the site's runtime version.
    #[serde(default = "default_php_fpm_socket")]
    pub php_fpm_socket: String,
    #[serde(default = "default_front_server")]
    pub front_server: WebServerKind,
    /// Public nginx vhosts also listen on `[::]`. Turn off on hosts
    /// without IPv6 or `nginx -t` rejects the vhost.
    #[serde(default = "default_ipv6")]
    pub ipv6: bool,
}

/// Layout and tooling of one web server family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub sites_available: String,
    pub sites_enabled: String,
    pub service: String,
    pub config_test: Vec<String>,
    /// Conf snippet holding the app server's `Listen` line, enabled with
    /// `a2enconf`. Unset when the operator manages ports themselves.
    #[serde(default)]
    pub ports_conf: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_prefix")]
    pub name_prefix: String,
    #[serde(default = "default_db_name_limit")]
    pub name_limit: usize,
    #[serde(default = "default_db_user_limit")]
    pub user_limit: usize,
    #[serde(default = "default_password_length")]
    pub password_length: usize,
    #[serde(default = "default_db_client")]
    pub client: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    #[serde(default = "default_artifact_url")]
    pub url: String,
    #[serde(default = "default_installer_url")]
    pub installer_url: String,
    #[serde(default = "default_installer_path")]
    pub installer_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_transfer_timeout")]
    pub transfer_timeout_secs: u64,
    /// Prefix applied to elevated commands. Must not prompt.
    #[serde(default = "default_elevation")]
    pub elevation: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default = "default_catalogue")]
    pub catalogue: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecretsConfig {
    /// Base64-encoded 32-byte key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
    /// Read the key from the OS keychain instead.
    #[serde(default)]
    pub keychain: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_shadow_path")]
    pub shadow_path: String,
    /// `{{username}}` is replaced; the password is written to stdin.
    #[serde(default = "default_auth_helper")]
    pub helper: Vec<String>,
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            web: WebConfig::default(),
            nginx: default_nginx(),
            apache: default_apache(),
            database: DatabaseConfig::default(),
            artifact: ArtifactConfig::default(),
            exec: ExecConfig::default(),
            services: ServicesConfig::default(),
            secrets: SecretsConfig::default(),
            auth: AuthConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            web_root: default_web_root(),
            staging_dir: default_staging_dir(),
            scratch_dir: default_scratch_dir(),
            database: default_database_path(),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            shared_group: default_shared_group(),
            public_port: default_public_port(),
            app_port: default_app_port(),
            default_runtime: default_runtime(),
            php_fpm_socket: default_php_fpm_socket(),
            front_server: default_front_server(),
            ipv6: default_ipv6(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_db_host(),
            name_prefix: default_db_prefix(),
            name_limit: default_db_name_limit(),
            user_limit: default_db_user_limit(),
            password_length: default_password_length(),
            client: default_db_client(),
        }
    }
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            url: default_artifact_url(),
            installer_url: default_installer_url(),
            installer_path: default_installer_path(),
        }
    }
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout(),
            auth_timeout_secs: default_auth_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            transfer_timeout_secs: default_transfer_timeout(),
            elevation: default_elevation(),
        }
    }
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            catalogue: default_catalogue(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            shadow_path: default_shadow_path(),
            helper: default_auth_helper(),
            min_password_length: default_min_password_length(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl ExecConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }
}

impl PanelConfig {
    pub fn server(&self, kind: WebServerKind) -> &ServerConfig {
        match kind {
            WebServerKind::Nginx => &self.nginx,
            WebServerKind::Apache => &self.apache,
        }
    }

    /// Copy safe to print: secrets replaced by a marker.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.secrets.encryption_key.is_some() {
            copy.secrets.encryption_key = Some("<redacted>".to_string());
        }
        copy
    }

    fn validate(&self) -> Result<()> {
        if self.web.public_port == self.web.app_port {
            return Err(Error::config_invalid_value(
                "web.app_port",
                Some(self.web.app_port.to_string()),
                "must differ from web.public_port",
            ));
        }
        if self.exec.command_timeout_secs == 0 {
            return Err(Error::config_invalid_value(
                "exec.command_timeout_secs",
                Some("0".to_string()),
                "must be greater than zero",
            ));
        }
        for (key, limit) in [
            ("database.name_limit", self.database.name_limit),
            ("database.user_limit", self.database.user_limit),
        ] {
            if limit < 16 {
                return Err(Error::config_invalid_value(
                    key,
                    Some(limit.to_string()),
                    "identifier limits below 16 cannot hold a suffixed name",
                ));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Default value functions
// =============================================================================

fn default_web_root() -> String {
    "/var/www".to_string()
}

fn default_staging_dir() -> String {
    "/tmp/skydock-staging".to_string()
}

fn default_scratch_dir() -> String {
    "/tmp".to_string()
}

fn default_database_path() -> String {
    "~/.config/skydock/skydock.db".to_string()
}

fn default_shared_group() -> String {
    "www-data".to_string()
}

fn default_public_port() -> u16 {
    80
}

fn default_app_port() -> u16 {
    8080
}

fn default_runtime() -> String {
    "8.1".to_string()
}

fn default_php_fpm_socket() -> String {
    "/run/php/php{{version}}-fpm.sock".to_string()
}

fn default_front_server() -> WebServerKind {
    WebServerKind::Nginx
}

fn default_ipv6() -> bool {
    true
}

fn default_nginx() -> ServerConfig {
    ServerConfig {
        sites_available: "/etc/nginx/sites-available".to_string(),
        sites_enabled: "/etc/nginx/sites-enabled".to_string(),
        service: "nginx".to_string(),
        config_test: vec!["nginx".to_string(), "-t".to_string()],
        ports_conf: None,
    }
}

fn default_apache() -> ServerConfig {
    ServerConfig {
        sites_available: "/etc/apache2/sites-available".to_string(),
        sites_enabled: "/etc/apache2/sites-enabled".to_string(),
        service: "apache2".to_string(),
        config_test: vec!["apache2ctl".to_string(), "configtest".to_string()],
        ports_conf: Some("/etc/apache2/conf-available/skydock-ports.conf".to_string()),
    }
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_prefix() -> String {
    "wp_".to_string()
}

fn default_db_name_limit() -> usize {
    64
}

fn default_db_user_limit() -> usize {
    32
}

fn default_password_length() -> usize {
    16
}

fn default_db_client() -> Vec<String> {
    vec!["mysql".to_string()]
}

fn default_artifact_url() -> String {
    "https://wordpress.org/latest.tar.gz".to_string()
}

fn default_installer_url() -> String {
    "https://raw.githubusercontent.com/wp-cli/builds/gh-pages/phar/wp-cli.phar".to_string()
}

fn default_installer_path() -> String {
    "/usr/local/bin/wp".to_string()
}

fn default_command_timeout() -> u64 {
    30
}

fn default_auth_timeout() -> u64 {
    20
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_transfer_timeout() -> u64 {
    300
}

fn default_elevation() -> Vec<String> {
    vec!["sudo".to_string(), "-n".to_string()]
}

fn default_catalogue() -> Vec<String> {
    vec![
        "nginx".to_string(),
        "apache2".to_string(),
        "mysql".to_string(),
    ]
}

fn default_shadow_path() -> String {
    "/etc/shadow".to_string()
}

fn default_auth_helper() -> Vec<String> {
    vec![
        "/usr/sbin/unix_chkpwd".to_string(),
        "{{username}}".to_string(),
        "nullok".to_string(),
    ]
}

fn default_min_password_length() -> usize {
    6
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

// =============================================================================
// Loading functions
// =============================================================================

/// Resolve the config path: explicit flag/env value, else the default location.
pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => paths::config_file(),
    }
}

/// Load config from `path`. A missing file yields built-in defaults; a
/// present but malformed file is an error.
pub fn load(path: &Path) -> Result<PanelConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file absent, using defaults");
        return Ok(PanelConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
    })?;

    parse(&content, &path.display().to_string())
}

pub fn parse(content: &str, origin: &str) -> Result<PanelConfig> {
    let config: PanelConfig =
        toml::from_str(content).map_err(|e| Error::config_parse_failed(origin, e.to_string()))?;
    config.validate()?;
    Ok(config)
}
