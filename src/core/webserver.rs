//! The two web server families and how a site is registered with each.
//!
//! Every site is served by a pair: a public-facing reverse proxy and an
//! application server on the internal port. `front_server` picks the proxy;
//! the other family serves the application.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::PanelConfig;
use crate::error::{Error, Result};
use crate::exec::Invocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebServerKind {
    Nginx,
    Apache,
}

impl WebServerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebServerKind::Nginx => "nginx",
            WebServerKind::Apache => "apache",
        }
    }

    pub fn other(&self) -> Self {
        match self {
            WebServerKind::Nginx => WebServerKind::Apache,
            WebServerKind::Apache => WebServerKind::Nginx,
        }
    }
}

impl fmt::Display for WebServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebServerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nginx" => Ok(WebServerKind::Nginx),
            "apache" | "apache2" => Ok(WebServerKind::Apache),
            other => Err(Error::validation_invalid_argument(
                "front_server",
                "must be nginx or apache",
                Some(other.to_string()),
                Some(vec!["nginx".to_string(), "apache".to_string()]),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServerPair {
    pub proxy: WebServerKind,
    pub app: WebServerKind,
}

impl ServerPair {
    pub fn fronted_by(front: WebServerKind) -> Self {
        Self {
            proxy: front,
            app: front.other(),
        }
    }
}

/// File name of a site's vhost in `sites-available`.
pub fn config_file_name(kind: WebServerKind, domain: &str) -> String {
    match kind {
        WebServerKind::Nginx => domain.to_string(),
        WebServerKind::Apache => format!("{}.conf", domain),
    }
}

pub fn available_path(config: &PanelConfig, kind: WebServerKind, domain: &str) -> String {
    format!(
        "{}/{}",
        config.server(kind).sites_available.trim_end_matches('/'),
        config_file_name(kind, domain)
    )
}

pub fn enabled_path(config: &PanelConfig, kind: WebServerKind, domain: &str) -> String {
    format!(
        "{}/{}",
        config.server(kind).sites_enabled.trim_end_matches('/'),
        config_file_name(kind, domain)
    )
}

/// Register the site in the server's enabled set.
pub fn enable_site(config: &PanelConfig, kind: WebServerKind, domain: &str) -> Invocation {
    let invocation = match kind {
        WebServerKind::Nginx => Invocation::new([
            "ln".to_string(),
            "-sfn".to_string(),
            available_path(config, kind, domain),
            enabled_path(config, kind, domain),
        ]),
        WebServerKind::Apache => {
            Invocation::new(["a2ensite".to_string(), config_file_name(kind, domain)])
        }
    };
    invocation.elevated()
}

pub fn disable_site(config: &PanelConfig, kind: WebServerKind, domain: &str) -> Invocation {
    let invocation = match kind {
        WebServerKind::Nginx => Invocation::new([
            "rm".to_string(),
            "-f".to_string(),
            enabled_path(config, kind, domain),
        ]),
        WebServerKind::Apache => {
            Invocation::new(["a2dissite".to_string(), config_file_name(kind, domain)])
        }
    };
    invocation.elevated()
}

/// `a2enconf` for a conf snippet, named by its file stem.
pub fn enable_conf(path: &str) -> Invocation {
    let name = path
        .rsplit('/')
        .next()
        .unwrap_or(path)
        .trim_end_matches(".conf");
    Invocation::new(["a2enconf".to_string(), name.to_string()]).elevated()
}

/// The server's own configuration checker.
pub fn validate_config(config: &PanelConfig, kind: WebServerKind) -> Invocation {
    Invocation::new(config.server(kind).config_test.clone()).elevated()
}

pub fn service_name(config: &PanelConfig, kind: WebServerKind) -> &str {
    &config.server(kind).service
}
