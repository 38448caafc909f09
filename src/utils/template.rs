//! String template rendering utilities.

pub struct TemplateVars;

impl TemplateVars {
    pub const DOMAIN: &'static str = "domain";
    pub const ROOT: &'static str = "root";
    pub const PUBLIC_PORT: &'static str = "public_port";
    pub const APP_PORT: &'static str = "app_port";
    pub const PHP_SOCKET: &'static str = "php_socket";
    pub const IPV6_LISTEN: &'static str = "ipv6_listen";
    pub const VERSION: &'static str = "version";
    pub const USERNAME: &'static str = "username";
    pub const DB_NAME: &'static str = "db_name";
    pub const DB_USER: &'static str = "db_user";
    pub const DB_PASSWORD: &'static str = "db_password";
    pub const DB_HOST: &'static str = "db_host";
    pub const SALTS: &'static str = "salts";
}

pub fn render(template: &str, variables: &[(&str, &str)]) -> String {
    let mut result = template.to_string();

    for (key, value) in variables {
        let placeholder = format!("{{{{{}}}}}", key);
        result = result.replace(&placeholder, value);
    }

    result
}
