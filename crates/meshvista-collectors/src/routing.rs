use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use meshvista_api::{Forward, MeshApi, Network, Reservation};
use meshvista_storage::{format_ts, Database};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::collector::{for_each_network, Collector};
use crate::error::Result;
use crate::types::{CollectionStats, CollectorId};

/// Mirrors DHCP reservations and port forwards. Runs hourly.
pub struct RoutingCollector {
    api: Arc<dyn MeshApi>,
    db: Database,
}

impl RoutingCollector {
    pub fn new(api: Arc<dyn MeshApi>, db: Database) -> Self {
        Self { api, db }
    }

    async fn collect_network(&self, network: Network, name: String) -> Result<CollectionStats> {
        let reservations = self.api.reservations(&network).await?;
        let forwards = self.api.forwards(&network).await?;
        let ts = format_ts(Utc::now());

        let stats = self
            .db
            .with_tx(|tx| -> rusqlite::Result<CollectionStats> {
                let mut stats = CollectionStats::default();
                for r in &reservations {
                    let key = if upsert_reservation(tx, &name, r, &ts)? {
                        "reservations_added"
                    } else {
                        "reservations_updated"
                    };
                    stats.add_detail(key, 1);
                }
                for f in &forwards {
                    let key = if upsert_forward(tx, &name, f, &ts)? {
                        "forwards_added"
                    } else {
                        "forwards_updated"
                    };
                    stats.add_detail(key, 1);
                }
                stats.items_collected = (reservations.len() + forwards.len()) as u64;
                Ok(stats)
            })?;

        info!(
            network = %name,
            reservations = reservations.len(),
            forwards = forwards.len(),
            "routing snapshot written"
        );
        Ok(stats)
    }
}

#[async_trait]
impl Collector for RoutingCollector {
    fn id(&self) -> CollectorId {
        CollectorId::Routing
    }

    async fn collect(&self) -> Result<CollectionStats> {
        for_each_network(self.api.as_ref(), self.id(), |network, name| {
            self.collect_network(network, name)
        })
        .await
    }
}

/// Returns `true` when a new row was inserted.
fn upsert_reservation(
    conn: &Connection,
    network: &str,
    r: &Reservation,
    ts: &str,
) -> rusqlite::Result<bool> {
    let mac = r.mac.to_lowercase();
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM ip_reservations WHERE network_name = ?1 AND mac_address = ?2",
            params![network, mac],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE ip_reservations
                 SET ip_address = ?1, description = ?2, eero_url = ?3, last_seen = ?4
                 WHERE id = ?5",
                params![r.ip, r.description, r.url, ts, id],
            )?;
            Ok(false)
        }
        None => {
            conn.execute(
                "INSERT INTO ip_reservations
                     (network_name, mac_address, ip_address, description, eero_url,
                      created_at, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![network, mac, r.ip, r.description, r.url, ts],
            )?;
            Ok(true)
        }
    }
}

fn upsert_forward(
    conn: &Connection,
    network: &str,
    f: &Forward,
    ts: &str,
) -> rusqlite::Result<bool> {
    let protocol = f.protocol.to_lowercase();
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM port_forwards
             WHERE network_name = ?1 AND ip_address = ?2 AND gateway_port = ?3 AND protocol = ?4",
            params![network, f.ip, f.gateway_port, protocol],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE port_forwards
                 SET client_port = ?1, description = ?2, enabled = ?3,
                     reservation_url = ?4, eero_url = ?5, last_seen = ?6
                 WHERE id = ?7",
                params![f.client_port, f.description, f.enabled, f.reservation, f.url, ts, id],
            )?;
            Ok(false)
        }
        None => {
            conn.execute(
                "INSERT INTO port_forwards
                     (network_name, ip_address, gateway_port, client_port, protocol,
                      description, enabled, reservation_url, eero_url, created_at, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                params![
                    network,
                    f.ip,
                    f.gateway_port,
                    f.client_port,
                    protocol,
                    f.description,
                    f.enabled,
                    f.reservation,
                    f.url,
                    ts,
                ],
            )?;
            Ok(true)
        }
    }
}
