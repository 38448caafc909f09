//! Generated file contents.

use crate::utils::shell::escape_php_string;
use crate::utils::template::{self, TemplateVars};
use crate::utils::token;
use crate::webserver::WebServerKind;

/// Inputs shared by every vhost template.
pub struct VhostContext<'a> {
    pub domain: &'a str,
    pub root: &'a str,
    pub public_port: u16,
    pub app_port: u16,
    pub php_socket: &'a str,
    /// Adds the `[::]` listener to the public nginx entry point.
    pub ipv6: bool,
}

impl VhostContext<'_> {
    fn render(&self, template: &str) -> String {
        let public_port = self.public_port.to_string();
        let app_port = self.app_port.to_string();
        let ipv6_listen = if self.ipv6 {
            format!("\n    listen [::]:{};", self.public_port)
        } else {
            String::new()
        };
        template::render(
            template,
            &[
                (TemplateVars::DOMAIN, self.domain),
                (TemplateVars::ROOT, self.root),
                (TemplateVars::PUBLIC_PORT, &public_port),
                (TemplateVars::APP_PORT, &app_port),
                (TemplateVars::PHP_SOCKET, self.php_socket),
                (TemplateVars::IPV6_LISTEN, &ipv6_listen),
            ],
        )
    }
}

const NGINX_PROXY: &str = r#"# Managed by skydock. Public entry point for {{domain}}.
server {
    listen {{public_port}};{{ipv6_listen}}
    server_name {{domain}} www.{{domain}};

    access_log /var/log/nginx/{{domain}}-access.log;
    error_log /var/log/nginx/{{domain}}-error.log;

    client_max_body_size 64m;

    location / {
        proxy_pass http://127.0.0.1:{{app_port}};
        proxy_http_version 1.1;
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
    }
}
"#;

const NGINX_APP: &str = r#"# Managed by skydock. Application server for {{domain}}.
server {
    listen 127.0.0.1:{{app_port}};
    server_name {{domain}} www.{{domain}};
    root {{root}};
    index index.php index.html index.htm;

    access_log /var/log/nginx/{{domain}}-app-access.log;
    error_log /var/log/nginx/{{domain}}-app-error.log;

    location / {
        try_files $uri $uri/ /index.php?$args;
    }

    location ~ \.php$ {
        include fastcgi_params;
        fastcgi_pass unix:{{php_socket}};
        fastcgi_index index.php;
        fastcgi_param SCRIPT_FILENAME $document_root$fastcgi_script_name;
    }

    location ~ /\.ht {
        deny all;
    }
}
"#;

const APACHE_PROXY: &str = r#"# Managed by skydock. Public entry point for {{domain}}.
<VirtualHost *:{{public_port}}>
    ServerName {{domain}}
    ServerAlias www.{{domain}}

    ProxyPreserveHost On
    ProxyPass / http://127.0.0.1:{{app_port}}/
    ProxyPassReverse / http://127.0.0.1:{{app_port}}/
    RequestHeader set X-Forwarded-Proto "http"

    ErrorLog ${APACHE_LOG_DIR}/{{domain}}-error.log
    CustomLog ${APACHE_LOG_DIR}/{{domain}}-access.log combined
</VirtualHost>
"#;

const APACHE_APP: &str = r#"# Managed by skydock. Application server for {{domain}}.
<VirtualHost 127.0.0.1:{{app_port}}>
    ServerName {{domain}}
    ServerAlias www.{{domain}}
    DocumentRoot {{root}}

    <Directory {{root}}>
        Options -Indexes +FollowSymLinks
        AllowOverride All
        Require all granted
    </Directory>

    <FilesMatch \.php$>
        SetHandler "proxy:unix:{{php_socket}}|fcgi://localhost"
    </FilesMatch>

    ErrorLog ${APACHE_LOG_DIR}/{{domain}}-app-error.log
    CustomLog ${APACHE_LOG_DIR}/{{domain}}-app-access.log combined
</VirtualHost>
"#;

/// Application-server vhost: listens only on the internal port.
pub fn app_vhost(kind: WebServerKind, ctx: &VhostContext<'_>) -> String {
    match kind {
        WebServerKind::Nginx => ctx.render(NGINX_APP),
        WebServerKind::Apache => ctx.render(APACHE_APP),
    }
}

/// Reverse-proxy vhost: public port, forwarding to the internal one.
pub fn proxy_vhost(kind: WebServerKind, ctx: &VhostContext<'_>) -> String {
    match kind {
        WebServerKind::Nginx => ctx.render(NGINX_PROXY),
        WebServerKind::Apache => ctx.render(APACHE_PROXY),
    }
}

const APACHE_PORTS: &str = r#"# Managed by skydock. Internal port for application vhosts.
Listen 127.0.0.1:{{app_port}}
"#;

/// Apache conf snippet opening the internal port the app vhosts bind to.
pub fn apache_ports(app_port: u16) -> String {
    template::render(APACHE_PORTS, &[(TemplateVars::APP_PORT, &app_port.to_string())])
}

pub fn php_socket(pattern: &str, version: &str) -> String {
    template::render(pattern, &[(TemplateVars::VERSION, version)])
}

const ENTRY_STUB: &str = r#"<?php
// Managed by skydock: {{domain}}
echo "<h1>Welcome to {{domain}}</h1>";
echo "<p>This application is served by skydock.</p>";
"#;

/// PlainApp entry point.
pub fn entry_stub(domain: &str) -> String {
    template::render(ENTRY_STUB, &[(TemplateVars::DOMAIN, domain)])
}

pub const SALT_NAMES: [&str; 8] = [
    "AUTH_KEY",
    "SECURE_AUTH_KEY",
    "LOGGED_IN_KEY",
    "NONCE_KEY",
    "AUTH_SALT",
    "SECURE_AUTH_SALT",
    "LOGGED_IN_SALT",
    "NONCE_SALT",
];

pub const SALT_LENGTH: usize = 64;

const CMS_CONFIG: &str = r#"<?php
/**
 * Managed by skydock. Generated for {{domain}}.
 */

define('DB_NAME', '{{db_name}}');
define('DB_USER', '{{db_user}}');
define('DB_PASSWORD', '{{db_password}}');
define('DB_HOST', '{{db_host}}');
define('DB_CHARSET', 'utf8mb4');
define('DB_COLLATE', '');

{{salts}}

$table_prefix = 'wp_';

define('WP_DEBUG', false);

if ( isset( $_SERVER['HTTP_X_FORWARDED_PROTO'] ) && 'https' === $_SERVER['HTTP_X_FORWARDED_PROTO'] ) {
    $_SERVER['HTTPS'] = 'on';
}

if ( ! defined( 'ABSPATH' ) ) {
    define( 'ABSPATH', __DIR__ . '/' );
}

require_once ABSPATH . 'wp-settings.php';
"#;

pub struct CmsSecrets<'a> {
    pub domain: &'a str,
    pub db_name: &'a str,
    pub db_user: &'a str,
    pub db_password: &'a str,
    pub db_host: &'a str,
}

/// CMS configuration file with credentials and a fresh set of salts.
pub fn cms_config(secrets: &CmsSecrets<'_>) -> String {
    let salts = SALT_NAMES
        .iter()
        .map(|name| {
            format!(
                "define('{}', {}'{}');",
                name,
                " ".repeat(17 - name.len()),
                token::urlsafe(SALT_LENGTH)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let db_name = escape_php_string(secrets.db_name);
    let db_user = escape_php_string(secrets.db_user);
    let db_password = escape_php_string(secrets.db_password);
    let db_host = escape_php_string(secrets.db_host);

    template::render(
        CMS_CONFIG,
        &[
            (TemplateVars::DOMAIN, secrets.domain),
            (TemplateVars::DB_NAME, &db_name),
            (TemplateVars::DB_USER, &db_user),
            (TemplateVars::DB_PASSWORD, &db_password),
            (TemplateVars::DB_HOST, &db_host),
            (TemplateVars::SALTS, &salts),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    fn ctx() -> VhostContext<'static> {
        VhostContext {
            domain: "example.com",
            root: "/var/www/alice/example.com",
            public_port: 80,
            app_port: 8080,
            php_socket: "/run/php/php8.1-fpm.sock",
            ipv6: true,
        }
    }

    #[test]
    fn apache_app_names_the_site_and_binds_internal_port() {
        let out = app_vhost(WebServerKind::Apache, &ctx());
        assert!(out.contains("ServerName example.com"));
        assert!(out.contains("<VirtualHost 127.0.0.1:8080>"));
        assert!(out.contains("DocumentRoot /var/www/alice/example.com"));
        assert!(out.contains("proxy:unix:/run/php/php8.1-fpm.sock|fcgi://localhost"));
        assert!(!out.contains("{{"));
    }

    #[test]
    fn nginx_proxy_forwards_public_port_to_internal() {
        let out = proxy_vhost(WebServerKind::Nginx, &ctx());
        assert!(out.contains("listen 80;"));
        assert!(out.contains("proxy_pass http://127.0.0.1:8080;"));
        assert!(out.contains("server_name example.com www.example.com;"));
        assert!(out.contains("    listen 80;\n    listen [::]:80;\n"));
    }

    #[test]
    fn ipv6_listener_can_be_turned_off() {
        let vhost = VhostContext {
            ipv6: false,
            ..ctx()
        };
        let out = proxy_vhost(WebServerKind::Nginx, &vhost);
        assert!(out.contains("    listen 80;\n    server_name example.com"));
        assert!(!out.contains("[::]"));
        assert!(!out.contains("{{"));
    }

    #[test]
    fn apache_ports_opens_the_internal_port_on_loopback() {
        let out = apache_ports(8080);
        assert!(out.lines().any(|line| line == "Listen 127.0.0.1:8080"));
        assert!(!out.contains("{{"));
    }

    #[test]
    fn apache_front_variant_swaps_roles() {
        let proxy = proxy_vhost(WebServerKind::Apache, &ctx());
        assert!(proxy.contains("ProxyPass / http://127.0.0.1:8080/"));

        let app = app_vhost(WebServerKind::Nginx, &ctx());
        assert!(app.contains("listen 127.0.0.1:8080;"));
        assert!(app.contains("fastcgi_pass unix:/run/php/php8.1-fpm.sock;"));
    }

    #[test]
    fn socket_pattern_takes_the_runtime_version() {
        assert_eq!(
            php_socket("/run/php/php{{version}}-fpm.sock", "8.2"),
            "/run/php/php8.2-fpm.sock"
        );
    }

    #[test]
    fn cms_config_has_eight_distinct_salts() {
        let out = cms_config(&CmsSecrets {
            domain: "my-shop.test",
            db_name: "wp_my_shop_test",
            db_user: "wp_my_shop_test",
            db_password: "pw",
            db_host: "localhost",
        });

        let salt = Regex::new(r"define\('([A-Z_]+)',\s+'([A-Za-z0-9_-]{64})'\);").unwrap();
        let values: Vec<(String, String)> = salt
            .captures_iter(&out)
            .map(|c| (c[1].to_string(), c[2].to_string()))
            .collect();

        assert_eq!(values.len(), 8);
        let names: Vec<&str> = values.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, SALT_NAMES.to_vec());

        let mut distinct: Vec<&String> = values.iter().map(|(_, v)| v).collect();
        distinct.sort();
        distinct.dedup();
        assert_eq!(distinct.len(), 8);

        assert!(out.contains("define('DB_NAME', 'wp_my_shop_test');"));
    }
}
