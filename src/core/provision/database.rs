//! DatabaseReady: a dedicated database and user for a managed CMS site.
//!
//! The credential record is written only after every SQL step succeeded.
//! A failed grant leaves the user behind; nothing is cleaned up.

use sha2::{Digest, Sha256};

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::exec::{run_checked, Invocation};
use crate::site::DatabaseCredential;
use crate::store::SiteRepository;
use crate::utils::shell::escape_sql_string;
use crate::utils::token;

use super::StageContext;

const HASH_SUFFIX_LEN: usize = 8;

/// Deterministic `(name, user)` for a domain: prefix plus the domain with
/// every non-alphanumeric character replaced by `_`, shortened with a hash
/// suffix when over the engine's identifier limit.
pub fn derive_names(config: &DatabaseConfig, domain: &str) -> (String, String) {
    let base: String = format!("{}{}", config.name_prefix, domain)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();

    (
        fit_identifier(&base, domain, config.name_limit),
        fit_identifier(&base, domain, config.user_limit),
    )
}

fn fit_identifier(base: &str, domain: &str, limit: usize) -> String {
    if base.len() <= limit {
        return base.to_string();
    }

    let digest = Sha256::digest(domain.as_bytes());
    let suffix: String = digest
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>()
        .chars()
        .take(HASH_SUFFIX_LEN)
        .collect();

    let keep = limit.saturating_sub(HASH_SUFFIX_LEN + 1);
    format!("{}_{}", &base[..keep], suffix)
}

fn sql(ctx: &StageContext<'_>, statement: String, secret: Option<&str>, context: &str) -> Result<()> {
    let mut argv = ctx.config.database.client.clone();
    argv.push("-e".to_string());
    argv.push(statement);

    let mut invocation = Invocation::new(argv).elevated();
    if let Some(secret) = secret {
        invocation = invocation.redacting(secret);
    }
    run_checked(ctx.executor, &invocation, context)?;
    Ok(())
}

pub fn provision(ctx: &StageContext<'_>, repo: &dyn SiteRepository) -> Result<DatabaseCredential> {
    let config = &ctx.config.database;
    let (name, user) = derive_names(config, &ctx.site.domain);
    let password = token::urlsafe(config.password_length);

    let account = format!(
        "'{}'@'{}'",
        escape_sql_string(&user),
        escape_sql_string(&config.host)
    );

    sql(
        ctx,
        format!(
            "CREATE DATABASE IF NOT EXISTS `{}` CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci;",
            name
        ),
        None,
        "Failed to create database",
    )?;

    sql(
        ctx,
        format!(
            "DROP USER IF EXISTS {account}; CREATE USER {account} IDENTIFIED BY '{}';",
            escape_sql_string(&password)
        ),
        Some(escape_sql_string(&password).as_str()),
        "Failed to create database user",
    )?;

    sql(
        ctx,
        format!(
            "GRANT ALL PRIVILEGES ON `{}`.* TO {}; FLUSH PRIVILEGES;",
            name, account
        ),
        None,
        "Failed to grant database privileges",
    )?;

    let credential = DatabaseCredential {
        site_id: ctx.site.id,
        name,
        user,
        password,
        host: config.host.clone(),
    };
    repo.save_credential(&credential)?;

    crate::log_status!(
        "provision",
        "Database {} ready for {}",
        credential.name,
        ctx.site.domain
    );
    Ok(credential)
}
