use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meshvista_api::{Device, Eero, MeshApi, Network};
use meshvista_storage::{format_ts, Database};
use rusqlite::{params, Connection};
use tracing::{debug, error, info, warn};

use crate::bandwidth::{accumulate, BandwidthSubject};
use crate::collector::{for_each_network, Collector};
use crate::error::Result;
use crate::types::{CollectionStats, CollectorId};

/// Snapshots mesh nodes and client devices, and feeds the daily bandwidth
/// accumulators.
pub struct DeviceCollector {
    api: Arc<dyn MeshApi>,
    db: Database,
    /// Device poll interval, used to flag late bandwidth samples.
    expected_interval: Duration,
}

impl DeviceCollector {
    pub fn new(api: Arc<dyn MeshApi>, db: Database, expected_interval: Duration) -> Self {
        Self {
            api,
            db,
            expected_interval,
        }
    }

    async fn collect_network(&self, network: Network, name: String) -> Result<CollectionStats> {
        let eeros = self.api.eeros(&network).await?;
        if eeros.is_empty() {
            warn!(network = %name, "no mesh nodes returned");
            return Ok(CollectionStats {
                errors: 1,
                ..Default::default()
            });
        }
        let devices = self.api.devices(&network).await?;
        let now = Utc::now();
        let interval = self.expected_interval;

        self.db
            .with_tx(|tx| write_snapshot(tx, &name, &eeros, &devices, now, interval))
    }
}

#[async_trait]
impl Collector for DeviceCollector {
    fn id(&self) -> CollectorId {
        CollectorId::Device
    }

    async fn collect(&self) -> Result<CollectionStats> {
        for_each_network(self.api.as_ref(), self.id(), |network, name| {
            self.collect_network(network, name)
        })
        .await
    }
}

#[derive(Default)]
struct NodeCounts {
    wired: i64,
    wireless: i64,
}

fn write_snapshot(
    conn: &Connection,
    network: &str,
    eeros: &[Eero],
    devices: &[Device],
    now: DateTime<Utc>,
    expected_interval: Duration,
) -> Result<CollectionStats> {
    let ts = format_ts(now);
    let mut stats = CollectionStats::default();

    // eero resource url -> eero_nodes.id
    let mut nodes = HashMap::new();
    for eero in eeros {
        let id = upsert_node(conn, network, eero, &ts)?;
        nodes.insert(eero.url.clone(), id);
    }
    stats.add_detail("nodes", nodes.len() as u64);

    let mut counts: HashMap<i64, NodeCounts> = HashMap::new();
    let mut network_down = None::<f64>;
    let mut network_up = None::<f64>;

    for device in devices {
        let Some(mac) = device.mac.as_deref().map(str::to_lowercase) else {
            debug!(network, hostname = ?device.hostname, "device without MAC, skipping");
            continue;
        };

        let node_id = device
            .source
            .as_ref()
            .and_then(|s| s.url.as_ref())
            .and_then(|url| nodes.get(url).copied());

        match record_device(conn, network, &mac, device, node_id, &ts) {
            Ok(device_id) => {
                stats.items_collected += 1;
                if device.connected {
                    if let Some(node_id) = node_id {
                        let c = counts.entry(node_id).or_default();
                        if device.is_wireless() {
                            c.wireless += 1;
                        } else {
                            c.wired += 1;
                        }
                    }
                }

                let (down, up) = device
                    .usage
                    .as_ref()
                    .map_or((None, None), |u| (u.down_mbps, u.up_mbps));
                if let (Some(d), Some(u)) = (down, up) {
                    *network_down.get_or_insert(0.0) += d;
                    *network_up.get_or_insert(0.0) += u;
                }
                accumulate(
                    conn,
                    network,
                    BandwidthSubject::Device(device_id),
                    down,
                    up,
                    now,
                    expected_interval,
                )?;
            }
            Err(e) => {
                error!(network, mac = %mac, error = %e, "failed to record device");
                stats.errors += 1;
            }
        }
    }

    accumulate(
        conn,
        network,
        BandwidthSubject::Network,
        network_down,
        network_up,
        now,
        expected_interval,
    )?;

    for eero in eeros {
        let Some(&node_id) = nodes.get(&eero.url) else {
            continue;
        };
        let c = counts.remove(&node_id).unwrap_or_default();
        conn.execute(
            "INSERT INTO eero_node_metrics
                 (eero_node_id, timestamp, status, connected_device_count,
                  connected_wired_count, connected_wireless_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![node_id, ts, eero.status, c.wired + c.wireless, c.wired, c.wireless],
        )?;
    }

    info!(
        network,
        devices = stats.items_collected,
        nodes = nodes.len(),
        "device snapshot written"
    );
    Ok(stats)
}

fn upsert_node(conn: &Connection, network: &str, eero: &Eero, ts: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "INSERT INTO eero_nodes
             (network_name, eero_id, location, model, mac_address, is_gateway,
              os_version, update_available, created_at, last_seen)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
         ON CONFLICT(network_name, eero_id) DO UPDATE SET
             location = excluded.location,
             model = excluded.model,
             mac_address = excluded.mac_address,
             is_gateway = excluded.is_gateway,
             os_version = excluded.os_version,
             update_available = excluded.update_available,
             last_seen = excluded.last_seen
         RETURNING id",
        params![
            network,
            eero.node_id(),
            eero.location,
            eero.model,
            eero.mac_address,
            eero.gateway,
            eero.os_version,
            eero.update_available,
            ts,
        ],
        |row| row.get(0),
    )
}

/// Upsert the device and append its connection row. Returns `devices.id`.
fn record_device(
    conn: &Connection,
    network: &str,
    mac: &str,
    device: &Device,
    node_id: Option<i64>,
    ts: &str,
) -> rusqlite::Result<i64> {
    let device_id: i64 = conn.query_row(
        "INSERT INTO devices
             (network_name, mac_address, hostname, nickname, device_type, first_seen, last_seen)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
         ON CONFLICT(network_name, mac_address) DO UPDATE SET
             hostname = COALESCE(excluded.hostname, devices.hostname),
             nickname = COALESCE(excluded.nickname, devices.nickname),
             last_seen = excluded.last_seen
         RETURNING id",
        params![
            network,
            mac,
            device.hostname,
            device.nickname,
            guess_device_type(device),
            ts,
        ],
        |row| row.get(0),
    )?;

    let signal = if device.is_wireless() {
        device.connectivity.as_ref().and_then(|c| c.signal_dbm())
    } else {
        None
    };
    let connection_type = if device.is_wireless() { "wireless" } else { "wired" };
    let (down, up) = device
        .usage
        .as_ref()
        .map_or((None, None), |u| (u.down_mbps, u.up_mbps));

    conn.execute(
        "INSERT INTO device_connections
             (device_id, network_name, eero_node_id, timestamp, is_connected,
              connection_type, signal_strength, ip_address,
              bandwidth_down_mbps, bandwidth_up_mbps)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            device_id,
            network,
            node_id,
            ts,
            device.connected,
            connection_type,
            signal,
            device.ip,
            down,
            up,
        ],
    )?;
    Ok(device_id)
}

/// Best-effort category when the API does not report one.
fn guess_device_type(device: &Device) -> String {
    if let Some(t) = device.device_type.as_deref().filter(|t| !t.is_empty()) {
        return t.to_string();
    }
    let manufacturer = device.manufacturer.as_deref().unwrap_or("").to_lowercase();
    let hostname = device.hostname.as_deref().unwrap_or("").to_lowercase();
    let mentions = |words: &[&str]| {
        words
            .iter()
            .any(|w| manufacturer.contains(w) || hostname.contains(w))
    };

    let kind = if mentions(&["apple", "iphone", "ipad", "mac", "samsung", "android"]) {
        "mobile"
    } else if mentions(&["tv", "roku", "chromecast"]) {
        "entertainment"
    } else if mentions(&["printer", "canon", "hp"]) {
        "printer"
    } else {
        "unknown"
    };
    kind.to_string()
}
