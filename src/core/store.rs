//! SQLite-backed record store for sites, database credentials, SSH
//! profiles and server facts.
//!
//! Uniqueness of `(owner, domain)` is enforced by the schema, so two racing
//! creates for the same domain resolve here: one insert wins, the other
//! gets `site.conflict`. Secrets are sealed with [`CredentialCipher`] before
//! they touch the database.

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

use crate::error::{Error, Result};
use crate::exec::SshAuth;
use crate::host::{HostFacts, ServerRecord};
use crate::profile::SshProfile;
use crate::site::{DatabaseCredential, NewSite, SiteSpec, SiteStatus};
use crate::vault::CredentialCipher;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sites (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner TEXT NOT NULL,
    domain TEXT NOT NULL,
    root_path TEXT NOT NULL,
    kind TEXT NOT NULL,
    front_server TEXT NOT NULL,
    runtime_version TEXT NOT NULL,
    status TEXT NOT NULL,
    admin_user TEXT,
    admin_email TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(owner, domain)
);

CREATE TABLE IF NOT EXISTS database_credentials (
    site_id INTEGER PRIMARY KEY REFERENCES sites(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    user TEXT NOT NULL,
    password TEXT NOT NULL,
    host TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ssh_profiles (
    account TEXT PRIMARY KEY,
    ssh_username TEXT NOT NULL,
    host TEXT NOT NULL,
    port INTEGER NOT NULL,
    auth_type TEXT NOT NULL,
    secret TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS servers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hostname TEXT NOT NULL UNIQUE,
    ip_address TEXT,
    os_name TEXT,
    os_version TEXT,
    cpu_count INTEGER,
    total_ram INTEGER,
    total_disk INTEGER,
    is_local INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

const SERVER_COLUMNS: &str = "id, hostname, ip_address, os_name, os_version, cpu_count, \
     total_ram, total_disk, is_local, created_at, updated_at";

const SITE_COLUMNS: &str = "id, owner, domain, root_path, kind, front_server, runtime_version, \
     status, admin_user, admin_email, created_at, updated_at";

/// Persistence seam the engine depends on.
pub trait SiteRepository {
    fn insert_site(&self, site: &NewSite) -> Result<SiteSpec>;

    /// Sites owned by another account are reported as not found.
    fn find_site(&self, owner: &str, id: i64) -> Result<SiteSpec>;

    fn find_by_domain(&self, owner: &str, domain: &str) -> Result<Option<SiteSpec>>;

    fn list_sites(&self, owner: &str) -> Result<Vec<SiteSpec>>;

    fn set_status(&self, id: i64, status: SiteStatus) -> Result<SiteSpec>;

    /// Cascades to the site's database credential.
    fn delete_site(&self, id: i64) -> Result<()>;

    fn save_credential(&self, credential: &DatabaseCredential) -> Result<()>;

    fn find_credential(&self, site_id: i64) -> Result<Option<DatabaseCredential>>;
}

pub struct SqliteStore {
    conn: Connection,
    cipher: CredentialCipher,
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn db_error(context: &str) -> impl Fn(rusqlite::Error) -> Error + '_ {
    move |err| Error::store_failed(err.to_string(), Some(context.to_string()))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

fn server_from_row(row: &Row<'_>) -> rusqlite::Result<ServerRecord> {
    Ok(ServerRecord {
        id: row.get(0)?,
        hostname: row.get(1)?,
        ip_address: row.get(2)?,
        os_name: row.get(3)?,
        os_version: row.get(4)?,
        cpu_count: row.get(5)?,
        total_ram: row.get::<_, Option<i64>>(6)?.map(|v| v as u64),
        total_disk: row.get::<_, Option<i64>>(7)?.map(|v| v as u64),
        is_local: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

/// Raw column values; enum parsing happens outside the rusqlite closure so
/// a bad value surfaces as our own error.
struct SiteRow {
    id: i64,
    owner: String,
    domain: String,
    root_path: String,
    kind: String,
    front_server: String,
    runtime_version: String,
    status: String,
    admin_user: Option<String>,
    admin_email: Option<String>,
    created_at: String,
    updated_at: String,
}

impl SiteRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner: row.get(1)?,
            domain: row.get(2)?,
            root_path: row.get(3)?,
            kind: row.get(4)?,
            front_server: row.get(5)?,
            runtime_version: row.get(6)?,
            status: row.get(7)?,
            admin_user: row.get(8)?,
            admin_email: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn into_site(self) -> Result<SiteSpec> {
        Ok(SiteSpec {
            id: self.id,
            owner: self.owner,
            domain: self.domain,
            root_path: self.root_path,
            kind: self.kind.parse()?,
            front_server: self.front_server.parse()?,
            runtime_version: self.runtime_version,
            status: self.status.parse()?,
            admin_user: self.admin_user,
            admin_email: self.admin_email,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl SqliteStore {
    pub fn open(path: &Path, cipher: CredentialCipher) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::internal_io(e.to_string(), Some(format!("create {}", parent.display())))
            })?;
        }
        let conn = Connection::open(path).map_err(db_error("open database"))?;
        Self::init(conn, cipher)
    }

    pub fn open_in_memory(cipher: CredentialCipher) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_error("open database"))?;
        Self::init(conn, cipher)
    }

    fn init(conn: Connection, cipher: CredentialCipher) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(db_error("enable foreign keys"))?;
        conn.execute_batch(SCHEMA).map_err(db_error("create schema"))?;
        Ok(Self { conn, cipher })
    }

    fn query_site(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Option<SiteSpec>> {
        let row = self
            .conn
            .query_row(sql, params, SiteRow::from_row)
            .optional()
            .map_err(db_error("load site"))?;
        row.map(SiteRow::into_site).transpose()
    }

    pub fn save_profile(&self, profile: &SshProfile) -> Result<()> {
        let (auth_type, secret) = match &profile.auth {
            SshAuth::Password(secret) | SshAuth::PrivateKey(secret) => {
                (profile.auth.kind(), self.cipher.seal(secret)?)
            }
        };

        self.conn
            .execute(
                "INSERT INTO ssh_profiles (account, ssh_username, host, port, auth_type, secret, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(account) DO UPDATE SET
                    ssh_username = excluded.ssh_username,
                    host = excluded.host,
                    port = excluded.port,
                    auth_type = excluded.auth_type,
                    secret = excluded.secret,
                    updated_at = excluded.updated_at",
                params![
                    profile.account,
                    profile.ssh_username,
                    profile.host,
                    profile.port,
                    auth_type,
                    secret,
                    now()
                ],
            )
            .map_err(db_error("save ssh profile"))?;
        Ok(())
    }

    pub fn find_profile(&self, account: &str) -> Result<Option<SshProfile>> {
        let row = self
            .conn
            .query_row(
                "SELECT account, ssh_username, host, port, auth_type, secret
                 FROM ssh_profiles WHERE account = ?1",
                [account],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, u16>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()
            .map_err(db_error("load ssh profile"))?;

        let Some((account, ssh_username, host, port, auth_type, sealed)) = row else {
            return Ok(None);
        };

        let secret = self.cipher.open(&sealed)?;
        let auth = match auth_type.as_str() {
            "password" => SshAuth::Password(secret),
            "private_key" => SshAuth::PrivateKey(secret),
            other => {
                return Err(Error::store_failed(
                    format!("unknown auth_type '{}'", other),
                    Some(format!("ssh profile {}", account)),
                ))
            }
        };

        Ok(Some(SshProfile {
            account,
            ssh_username,
            host,
            port,
            auth,
        }))
    }

    /// Returns whether a profile was removed.
    pub fn delete_profile(&self, account: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM ssh_profiles WHERE account = ?1", [account])
            .map_err(db_error("delete ssh profile"))?;
        Ok(removed > 0)
    }

    /// Insert or refresh the record for `facts.hostname`. The first save
    /// fixes `created_at`; later saves overwrite every fact.
    pub fn save_server(&self, facts: &HostFacts, is_local: bool) -> Result<ServerRecord> {
        let hostname = facts.hostname.as_deref().ok_or_else(|| {
            Error::validation_missing_argument(vec!["hostname".to_string()])
                .with_hint("The host did not report a hostname; facts were not saved")
        })?;
        let stamp = now();

        self.conn
            .execute(
                "INSERT INTO servers (hostname, ip_address, os_name, os_version, cpu_count,
                    total_ram, total_disk, is_local, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
                 ON CONFLICT(hostname) DO UPDATE SET
                    ip_address = excluded.ip_address,
                    os_name = excluded.os_name,
                    os_version = excluded.os_version,
                    cpu_count = excluded.cpu_count,
                    total_ram = excluded.total_ram,
                    total_disk = excluded.total_disk,
                    is_local = excluded.is_local,
                    updated_at = excluded.updated_at",
                params![
                    hostname,
                    facts.ip_address,
                    facts.os_name,
                    facts.kernel,
                    facts.cpu_count,
                    facts.memory.as_ref().map(|m| m.total as i64),
                    facts.disk.as_ref().map(|d| d.total as i64),
                    is_local,
                    stamp
                ],
            )
            .map_err(db_error("save server"))?;

        self.conn
            .query_row(
                &format!("SELECT {} FROM servers WHERE hostname = ?1", SERVER_COLUMNS),
                [hostname],
                server_from_row,
            )
            .map_err(db_error("load server"))
    }

    pub fn list_servers(&self) -> Result<Vec<ServerRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM servers ORDER BY hostname", SERVER_COLUMNS))
            .map_err(db_error("list servers"))?;
        let rows = stmt
            .query_map([], server_from_row)
            .map_err(db_error("list servers"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_error("list servers"))
    }

    /// Open a transaction that is never committed. Reads still see the
    /// stored records; writes are rolled back when the store is dropped.
    pub fn discard_writes(&self) -> Result<()> {
        self.conn
            .execute_batch("BEGIN")
            .map_err(db_error("begin discarded transaction"))
    }
}

impl SiteRepository for SqliteStore {
    fn insert_site(&self, site: &NewSite) -> Result<SiteSpec> {
        let timestamp = now();
        let inserted = self.conn.execute(
            "INSERT INTO sites (owner, domain, root_path, kind, front_server, runtime_version,
                                status, admin_user, admin_email, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                site.owner,
                site.domain,
                site.root_path,
                site.kind.as_str(),
                site.front_server.as_str(),
                site.runtime_version,
                site.status.as_str(),
                site.admin_user,
                site.admin_email,
                timestamp
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(Error::site_conflict(&site.owner, &site.domain));
            }
            Err(err) => return Err(db_error("insert site")(err)),
        }

        let id = self.conn.last_insert_rowid();
        self.find_site(&site.owner, id)
    }

    fn find_site(&self, owner: &str, id: i64) -> Result<SiteSpec> {
        self.query_site(
            &format!("SELECT {} FROM sites WHERE id = ?1 AND owner = ?2", SITE_COLUMNS),
            &[&id, &owner],
        )?
        .ok_or_else(|| Error::site_not_found(id.to_string()))
    }

    fn find_by_domain(&self, owner: &str, domain: &str) -> Result<Option<SiteSpec>> {
        self.query_site(
            &format!("SELECT {} FROM sites WHERE owner = ?1 AND domain = ?2", SITE_COLUMNS),
            &[&owner, &domain],
        )
    }

    fn list_sites(&self, owner: &str) -> Result<Vec<SiteSpec>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM sites WHERE owner = ?1 ORDER BY domain",
                SITE_COLUMNS
            ))
            .map_err(db_error("list sites"))?;

        let rows = stmt
            .query_map([owner], SiteRow::from_row)
            .map_err(db_error("list sites"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_error("list sites"))?;

        rows.into_iter().map(SiteRow::into_site).collect()
    }

    fn set_status(&self, id: i64, status: SiteStatus) -> Result<SiteSpec> {
        let updated = self
            .conn
            .execute(
                "UPDATE sites SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now(), id],
            )
            .map_err(db_error("update site status"))?;
        if updated == 0 {
            return Err(Error::site_not_found(id.to_string()));
        }

        self.query_site(
            &format!("SELECT {} FROM sites WHERE id = ?1", SITE_COLUMNS),
            &[&id],
        )?
        .ok_or_else(|| Error::site_not_found(id.to_string()))
    }

    fn delete_site(&self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM sites WHERE id = ?1", [id])
            .map_err(db_error("delete site"))?;
        Ok(())
    }

    fn save_credential(&self, credential: &DatabaseCredential) -> Result<()> {
        let sealed = self.cipher.seal(&credential.password)?;
        self.conn
            .execute(
                "INSERT INTO database_credentials (site_id, name, user, password, host)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(site_id) DO UPDATE SET
                    name = excluded.name,
                    user = excluded.user,
                    password = excluded.password,
                    host = excluded.host",
                params![
                    credential.site_id,
                    credential.name,
                    credential.user,
                    sealed,
                    credential.host
                ],
            )
            .map_err(db_error("save database credential"))?;
        Ok(())
    }

    fn find_credential(&self, site_id: i64) -> Result<Option<DatabaseCredential>> {
        let row = self
            .conn
            .query_row(
                "SELECT site_id, name, user, password, host
                 FROM database_credentials WHERE site_id = ?1",
                [site_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(db_error("load database credential"))?;

        row.map(|(site_id, name, user, sealed, host)| {
            Ok(DatabaseCredential {
                site_id,
                name,
                user,
                password: self.cipher.open(&sealed)?,
                host,
            })
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::SiteKind;
    use crate::webserver::WebServerKind;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory(CredentialCipher::from_key(&[5u8; 32]).unwrap()).unwrap()
    }

    fn new_site(owner: &str, domain: &str) -> NewSite {
        NewSite {
            owner: owner.to_string(),
            domain: domain.to_string(),
            root_path: format!("/var/www/{}/{}", owner, domain),
            kind: SiteKind::ManagedCms,
            front_server: WebServerKind::Nginx,
            runtime_version: "8.1".to_string(),
            status: SiteStatus::Active,
            admin_user: None,
            admin_email: None,
        }
    }

    fn credential(site_id: i64) -> DatabaseCredential {
        DatabaseCredential {
            site_id,
            name: "wp_example_com".into(),
            user: "wp_example_com".into(),
            password: "Zx9_pw-abcdefghi".into(),
            host: "localhost".into(),
        }
    }

    #[test]
    fn insert_and_find_roundtrip_fields() {
        let store = store();
        let site = store.insert_site(&new_site("alice", "example.com")).unwrap();

        assert!(site.id > 0);
        assert_eq!(site.kind, SiteKind::ManagedCms);
        assert_eq!(site.status, SiteStatus::Active);
        assert_eq!(store.find_site("alice", site.id).unwrap(), site);
    }

    #[test]
    fn domain_is_unique_per_owner_only() {
        let store = store();
        store.insert_site(&new_site("alice", "example.com")).unwrap();

        let err = store.insert_site(&new_site("alice", "example.com")).unwrap_err();
        assert_eq!(err.code.as_str(), "site.conflict");

        assert!(store.insert_site(&new_site("bob", "example.com")).is_ok());
    }

    #[test]
    fn other_owners_cannot_see_a_site() {
        let store = store();
        let site = store.insert_site(&new_site("alice", "example.com")).unwrap();

        let err = store.find_site("mallory", site.id).unwrap_err();
        assert_eq!(err.code.as_str(), "site.not_found");
        assert!(store.list_sites("mallory").unwrap().is_empty());
    }

    #[test]
    fn credential_password_is_sealed_at_rest() {
        let store = store();
        let site = store.insert_site(&new_site("alice", "example.com")).unwrap();
        store.save_credential(&credential(site.id)).unwrap();

        let raw: String = store
            .conn
            .query_row(
                "SELECT password FROM database_credentials WHERE site_id = ?1",
                [site.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_ne!(raw, "Zx9_pw-abcdefghi");

        let loaded = store.find_credential(site.id).unwrap().unwrap();
        assert_eq!(loaded.password, "Zx9_pw-abcdefghi");
    }

    #[test]
    fn deleting_site_cascades_to_credential() {
        let store = store();
        let site = store.insert_site(&new_site("alice", "example.com")).unwrap();
        store.save_credential(&credential(site.id)).unwrap();

        store.delete_site(site.id).unwrap();

        assert!(store.find_credential(site.id).unwrap().is_none());
        assert!(store.find_by_domain("alice", "example.com").unwrap().is_none());
    }

    #[test]
    fn set_status_only_touches_status() {
        let store = store();
        let site = store.insert_site(&new_site("alice", "example.com")).unwrap();

        let disabled = store.set_status(site.id, SiteStatus::Disabled).unwrap();
        assert_eq!(disabled.status, SiteStatus::Disabled);
        assert_eq!(disabled.domain, site.domain);
        assert_eq!(disabled.root_path, site.root_path);
    }

    fn facts(hostname: &str, cpus: u32) -> HostFacts {
        HostFacts {
            hostname: Some(hostname.to_string()),
            ip_address: Some("10.0.0.4".to_string()),
            os_name: Some("Ubuntu 22.04.4 LTS".to_string()),
            kernel: Some("Linux 5.15.0-105-generic".to_string()),
            cpu_count: Some(cpus),
            memory: Some(crate::host::MemoryFacts {
                total: 8_192_000,
                available: 6_144_000,
                used: 2_048_000,
            }),
            ..HostFacts::default()
        }
    }

    #[test]
    fn saving_a_server_twice_updates_one_row() {
        let store = store();
        let first = store.save_server(&facts("web-01", 2), true).unwrap();
        assert_eq!(first.os_version.as_deref(), Some("Linux 5.15.0-105-generic"));
        assert_eq!(first.total_ram, Some(8_192_000));
        assert_eq!(first.total_disk, None);
        assert!(first.is_local);

        let second = store.save_server(&facts("web-01", 4), false).unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.cpu_count, Some(4));
        assert!(!second.is_local);

        store.save_server(&facts("db-01", 8), false).unwrap();
        let hostnames: Vec<String> = store
            .list_servers()
            .unwrap()
            .into_iter()
            .map(|server| server.hostname)
            .collect();
        assert_eq!(hostnames, vec!["db-01", "web-01"]);
    }

    #[test]
    fn server_without_hostname_is_not_saved() {
        let store = store();
        let err = store.save_server(&HostFacts::default(), true).unwrap_err();
        assert_eq!(err.code.as_str(), "validation.missing_argument");
        assert!(store.list_servers().unwrap().is_empty());
    }

    #[test]
    fn on_disk_store_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/skydock.db");
        let key = [8u8; 32];

        {
            let store = SqliteStore::open(&path, CredentialCipher::from_key(&key).unwrap()).unwrap();
            store.insert_site(&new_site("alice", "example.com")).unwrap();
        }

        let store = SqliteStore::open(&path, CredentialCipher::from_key(&key).unwrap()).unwrap();
        assert_eq!(store.list_sites("alice").unwrap().len(), 1);
    }

    #[test]
    fn discarded_writes_do_not_survive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skydock.db");
        let key = [4u8; 32];

        {
            let store = SqliteStore::open(&path, CredentialCipher::from_key(&key).unwrap()).unwrap();
            store.insert_site(&new_site("alice", "kept.example")).unwrap();
        }
        {
            let store = SqliteStore::open(&path, CredentialCipher::from_key(&key).unwrap()).unwrap();
            store.discard_writes().unwrap();
            assert_eq!(store.list_sites("alice").unwrap().len(), 1);
            store.insert_site(&new_site("alice", "dropped.example")).unwrap();
            assert_eq!(store.list_sites("alice").unwrap().len(), 2);
        }

        let store = SqliteStore::open(&path, CredentialCipher::from_key(&key).unwrap()).unwrap();
        let domains: Vec<String> = store
            .list_sites("alice")
            .unwrap()
            .into_iter()
            .map(|s| s.domain)
            .collect();
        assert_eq!(domains, vec!["kept.example"]);
    }
}
