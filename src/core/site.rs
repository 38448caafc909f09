//! Site records and the input rules that guard them.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::{Error, Result};
use crate::utils::validation;
use crate::webserver::WebServerKind;

static DOMAIN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z][a-z0-9-]{0,61}[a-z0-9]$")
        .expect("domain pattern is valid")
});

static RUNTIME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+$").expect("runtime pattern is valid"));

/// POSIX-style account names as accepted by `useradd`.
static OWNER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_-]{0,31}$").expect("owner pattern is valid"));

const DOMAIN_MIN: usize = 3;
const DOMAIN_MAX: usize = 253;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteKind {
    PlainApp,
    ManagedCms,
}

impl SiteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteKind::PlainApp => "plain_app",
            SiteKind::ManagedCms => "managed_cms",
        }
    }
}

impl fmt::Display for SiteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SiteKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain_app" | "plain" | "php" => Ok(SiteKind::PlainApp),
            "managed_cms" | "cms" | "wordpress" => Ok(SiteKind::ManagedCms),
            other => Err(Error::validation_invalid_argument(
                "kind",
                "Unknown site kind",
                Some(other.to_string()),
                Some(vec!["plain".to_string(), "cms".to_string()]),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteStatus {
    Active,
    Disabled,
}

impl SiteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteStatus::Active => "active",
            SiteStatus::Disabled => "disabled",
        }
    }
}

impl FromStr for SiteStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(SiteStatus::Active),
            "disabled" => Ok(SiteStatus::Disabled),
            other => Err(Error::validation_invalid_argument(
                "status",
                "Unknown site status",
                Some(other.to_string()),
                None,
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteSpec {
    pub id: i64,
    pub owner: String,
    pub domain: String,
    pub root_path: String,
    pub kind: SiteKind,
    pub front_server: WebServerKind,
    pub runtime_version: String,
    pub status: SiteStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_email: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A site about to be persisted; the store assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct NewSite {
    pub owner: String,
    pub domain: String,
    pub root_path: String,
    pub kind: SiteKind,
    pub front_server: WebServerKind,
    pub runtime_version: String,
    pub status: SiteStatus,
    pub admin_user: Option<String>,
    pub admin_email: Option<String>,
}

/// Produced by provisioning only. Never user-supplied.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseCredential {
    pub site_id: i64,
    pub name: String,
    pub user: String,
    pub password: String,
    pub host: String,
}

impl DatabaseCredential {
    pub fn redacted(&self) -> Self {
        Self {
            password: "<redacted>".to_string(),
            ..self.clone()
        }
    }
}

impl fmt::Debug for DatabaseCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseCredential")
            .field("site_id", &self.site_id)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .finish()
    }
}

/// Lowercase and check a domain against DNS label rules.
pub fn normalize_domain(domain: &str) -> Result<String> {
    let domain = validation::require_non_empty(domain, "domain", "Domain is required")?
        .trim_end_matches('.')
        .to_ascii_lowercase();

    if domain.len() < DOMAIN_MIN || domain.len() > DOMAIN_MAX {
        return Err(Error::validation_invalid_argument(
            "domain",
            format!(
                "Domain must be between {} and {} characters",
                DOMAIN_MIN, DOMAIN_MAX
            ),
            Some(domain),
            None,
        ));
    }

    validation::require_match(&domain, &DOMAIN_PATTERN, "domain", "Invalid domain name")?;
    Ok(domain)
}

pub fn validate_runtime(version: &str) -> Result<&str> {
    validation::require_match(
        version.trim(),
        &RUNTIME_PATTERN,
        "runtime_version",
        "Runtime version must look like 8.1",
    )
}

pub fn validate_owner(owner: &str) -> Result<&str> {
    validation::require_match(
        owner.trim(),
        &OWNER_PATTERN,
        "owner",
        "Owner must be a valid system account name",
    )
}

/// `<web_root>/<owner>/<domain>`
pub fn root_path(web_root: &str, owner: &str, domain: &str) -> String {
    format!("{}/{}/{}", web_root.trim_end_matches('/'), owner, domain)
}
