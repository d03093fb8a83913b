use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use meshvista_api::{MeshApi, Network};
use meshvista_storage::{format_ts, Database};
use rusqlite::params;
use tracing::info;

use crate::collector::{for_each_network, Collector};
use crate::error::Result;
use crate::types::{CollectionStats, CollectorId};

/// One `network_metrics` row per network per run.
pub struct NetworkCollector {
    api: Arc<dyn MeshApi>,
    db: Database,
}

impl NetworkCollector {
    pub fn new(api: Arc<dyn MeshApi>, db: Database) -> Self {
        Self { api, db }
    }

    async fn collect_network(&self, network: Network, name: String) -> Result<CollectionStats> {
        let details = self.api.network_details(&network).await?;
        let devices = self.api.devices(&network).await?;

        let total = devices.len() as i64;
        let online = devices.iter().filter(|d| d.connected).count() as i64;
        let guest = details.guest_network.as_ref().is_some_and(|g| g.enabled);
        let wan = wan_status(details.status.as_deref());
        let mode = details.connection.and_then(|c| c.mode);
        let ts = format_ts(Utc::now());

        self.db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO network_metrics
                     (network_name, timestamp, total_devices, total_devices_online,
                      guest_network_enabled, wan_status, connection_mode)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![name, ts, total, online, guest, wan, mode],
            )
        })?;

        info!(network = %name, total, online, wan, "network metrics written");
        Ok(CollectionStats {
            items_collected: 1,
            ..Default::default()
        })
    }
}

#[async_trait]
impl Collector for NetworkCollector {
    fn id(&self) -> CollectorId {
        CollectorId::Network
    }

    async fn collect(&self) -> Result<CollectionStats> {
        for_each_network(self.api.as_ref(), self.id(), |network, name| {
            self.collect_network(network, name)
        })
        .await
    }
}

fn wan_status(raw: Option<&str>) -> &'static str {
    match raw {
        Some("connected") => "online",
        Some("disconnected") => "offline",
        _ => "unknown",
    }
}
