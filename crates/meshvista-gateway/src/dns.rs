//! Hosts-file generation for a local DNS forwarder.
//!
//! Writes `ip<TAB>name.domain<TAB>name` for every device that was online in
//! its latest connection row and has an IPv4 address. Reloading the DNS
//! server is left to the operator.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use async_trait::async_trait;
use meshvista_scheduler::{DnsRegenerator, Result};
use meshvista_storage::Database;
use tracing::debug;

pub struct HostsFileDns {
    db: Database,
    path: PathBuf,
    domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    pub ip: Ipv4Addr,
    pub name: String,
}

impl HostsFileDns {
    pub fn new(db: Database, path: impl Into<PathBuf>, domain: impl Into<String>) -> Self {
        Self {
            db,
            path: path.into(),
            domain: domain.into().trim_matches('.').to_string(),
        }
    }

    /// Online devices with a usable name, first claim per name wins.
    pub fn entries(&self) -> Result<Vec<HostEntry>> {
        let rows: Vec<(Option<String>, Option<String>, String)> = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT d.nickname, d.hostname, c.ip_address
                 FROM devices d
                 JOIN device_connections c ON c.id = (
                     SELECT id FROM device_connections
                     WHERE device_id = d.id
                     ORDER BY timestamp DESC, id DESC
                     LIMIT 1
                 )
                 WHERE c.is_connected = 1 AND c.ip_address IS NOT NULL
                 ORDER BY d.id",
            )?;
            let rows = stmt
                .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok::<_, rusqlite::Error>(rows)
        })?;

        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for (nickname, hostname, ip) in rows {
            let Ok(ip) = ip.parse::<Ipv4Addr>() else {
                continue;
            };
            let Some(name) = nickname
                .as_deref()
                .or(hostname.as_deref())
                .and_then(sanitize_hostname)
            else {
                continue;
            };
            if !seen.insert(name.clone()) {
                debug!(%name, %ip, "hostname already claimed, skipping");
                continue;
            }
            entries.push(HostEntry { ip, name });
        }
        Ok(entries)
    }

    pub fn render(&self, entries: &[HostEntry]) -> String {
        let mut out = String::from("# Generated by meshvista. Do not edit.\n");
        for e in entries {
            out.push_str(&format!("{}\t{}.{}\t{}\n", e.ip, e.name, self.domain, e.name));
        }
        out
    }
}

#[async_trait]
impl DnsRegenerator for HostsFileDns {
    async fn regenerate(&self) -> Result<usize> {
        let entries = self.entries()?;
        let contents = self.render(&entries);

        // write then rename so readers never see a partial file
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(entries.len())
    }
}

/// Reduce a device name to a DNS label: lowercase ASCII letters, digits and
/// single hyphens, at most 63 characters. `None` if nothing usable remains.
pub fn sanitize_hostname(raw: &str) -> Option<String> {
    let mut label = String::with_capacity(raw.len());
    for ch in raw.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            label.push(ch.to_ascii_lowercase());
        } else if !label.ends_with('-') && !label.is_empty() {
            label.push('-');
        }
    }
    let mut label = label.trim_end_matches('-').to_string();
    label.truncate(63);
    let label = label.trim_end_matches('-').to_string();
    (!label.is_empty()).then_some(label)
}
