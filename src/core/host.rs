//! Host facts for the server info record.
//!
//! Every fact is read independently; a failed or unparseable command leaves
//! its field empty instead of failing the whole collection. Facts can be
//! saved as a [`ServerRecord`], keyed by hostname.

use serde::Serialize;

use crate::exec::{CommandExecutor, Invocation};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostFacts {
    pub hostname: Option<String>,
    pub ip_address: Option<String>,
    pub os_name: Option<String>,
    pub kernel: Option<String>,
    pub cpu_count: Option<u32>,
    pub memory: Option<MemoryFacts>,
    pub disk: Option<DiskFacts>,
    pub uptime: Option<Uptime>,
    pub load_average: Option<[f64; 3]>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryFacts {
    pub total: u64,
    pub available: u64,
    pub used: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskFacts {
    pub total: u64,
    pub used: u64,
    pub free: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Uptime {
    pub seconds: u64,
    pub days: u64,
    pub hours: u64,
    pub minutes: u64,
}

impl Uptime {
    fn from_seconds(seconds: u64) -> Self {
        Self {
            seconds,
            days: seconds / 86_400,
            hours: (seconds % 86_400) / 3_600,
            minutes: (seconds % 3_600) / 60,
        }
    }
}

fn read_fact(executor: &dyn CommandExecutor, argv: &[&str]) -> Option<String> {
    match executor.run(&Invocation::new(argv.iter().copied())) {
        Ok(result) if result.success() => Some(result.stdout),
        Ok(result) => {
            tracing::debug!(command = %argv.join(" "), exit_code = result.exit_code, "host fact unavailable");
            None
        }
        Err(err) => {
            tracing::debug!(command = %argv.join(" "), error = %err, "host fact unavailable");
            None
        }
    }
}

/// Persisted summary of one host, one row per hostname.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRecord {
    pub id: i64,
    pub hostname: String,
    pub ip_address: Option<String>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub cpu_count: Option<u32>,
    /// Bytes.
    pub total_ram: Option<u64>,
    /// Bytes, root filesystem.
    pub total_disk: Option<u64>,
    pub is_local: bool,
    pub created_at: String,
    pub updated_at: String,
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

pub fn collect(executor: &dyn CommandExecutor) -> HostFacts {
    HostFacts {
        hostname: read_fact(executor, &["hostname"]).and_then(|s| non_empty(&s)),
        ip_address: read_fact(executor, &["hostname", "-I"])
            .and_then(|s| s.split_whitespace().next().map(str::to_string)),
        os_name: read_fact(executor, &["cat", "/etc/os-release"]).and_then(|s| parse_os_release(&s)),
        kernel: read_fact(executor, &["uname", "-sr"]).and_then(|s| non_empty(&s)),
        cpu_count: read_fact(executor, &["nproc"]).and_then(|s| s.trim().parse().ok()),
        memory: read_fact(executor, &["cat", "/proc/meminfo"]).and_then(|s| parse_meminfo(&s)),
        disk: read_fact(executor, &["df", "-P", "-B1", "/"]).and_then(|s| parse_df(&s)),
        uptime: read_fact(executor, &["cat", "/proc/uptime"]).and_then(|s| parse_uptime(&s)),
        load_average: read_fact(executor, &["cat", "/proc/loadavg"]).and_then(|s| parse_loadavg(&s)),
    }
}

fn parse_os_release(content: &str) -> Option<String> {
    let value = |key: &str| {
        content.lines().find_map(|line| {
            line.strip_prefix(key)
                .and_then(|rest| rest.strip_prefix('='))
                .map(|v| v.trim().trim_matches('"').to_string())
        })
    };
    value("PRETTY_NAME").or_else(|| value("NAME"))
}

/// `/proc/meminfo` reports kB; facts are bytes.
fn parse_meminfo(content: &str) -> Option<MemoryFacts> {
    let field = |key: &str| -> Option<u64> {
        content.lines().find_map(|line| {
            let rest = line.strip_prefix(key)?.strip_prefix(':')?;
            rest.split_whitespace().next()?.parse::<u64>().ok()
        })
    };
    let total = field("MemTotal")? * 1024;
    let available = field("MemAvailable")? * 1024;
    Some(MemoryFacts {
        total,
        available,
        used: total.saturating_sub(available),
    })
}

fn parse_df(content: &str) -> Option<DiskFacts> {
    let line = content.lines().nth(1)?;
    let mut cols = line.split_whitespace().skip(1);
    let total = cols.next()?.parse().ok()?;
    let used = cols.next()?.parse().ok()?;
    let free = cols.next()?.parse().ok()?;
    Some(DiskFacts { total, used, free })
}

fn parse_uptime(content: &str) -> Option<Uptime> {
    let seconds: f64 = content.split_whitespace().next()?.parse().ok()?;
    Some(Uptime::from_seconds(seconds as u64))
}

fn parse_loadavg(content: &str) -> Option<[f64; 3]> {
    let mut values = content.split_whitespace().map(|v| v.parse::<f64>().ok());
    Some([values.next()??, values.next()??, values.next()??])
}
