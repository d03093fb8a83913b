use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use meshvista_api::{MeshApi, Network};
use meshvista_storage::{format_ts, Database};
use rusqlite::{params, OptionalExtension};
use tracing::{debug, info};

use crate::collector::{for_each_network, Collector};
use crate::error::Result;
use crate::types::{CollectionStats, CollectorId};

/// Stores the mesh's most recent speed test once per test.
pub struct SpeedtestCollector {
    api: Arc<dyn MeshApi>,
    db: Database,
}

impl SpeedtestCollector {
    pub fn new(api: Arc<dyn MeshApi>, db: Database) -> Self {
        Self { api, db }
    }

    async fn collect_network(&self, network: Network, name: String) -> Result<CollectionStats> {
        let Some(test) = self.api.speedtest(&network).await? else {
            debug!(network = %name, "no speedtest data");
            return Ok(CollectionStats::default());
        };

        let down = test.down.map(|v| v.value);
        let up = test.up.map(|v| v.value);
        let ts = format_ts(test.date.unwrap_or_else(Utc::now));

        let inserted = self.db.with_tx(|tx| -> rusqlite::Result<bool> {
            // a test the mesh ran at or before our latest stored row is already recorded
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT id FROM speedtests WHERE network_name = ?1 AND timestamp >= ?2 LIMIT 1",
                    params![name, ts],
                    |r| r.get(0),
                )
                .optional()?;
            if existing.is_some() {
                return Ok(false);
            }
            tx.execute(
                "INSERT INTO speedtests (network_name, timestamp, download_mbps, upload_mbps)
                 VALUES (?1, ?2, ?3, ?4)",
                params![name, ts, down, up],
            )?;
            Ok(true)
        })?;

        if !inserted {
            debug!(network = %name, timestamp = %ts, "speedtest already recorded");
            return Ok(CollectionStats::default());
        }
        info!(network = %name, download_mbps = ?down, upload_mbps = ?up, "speedtest recorded");
        Ok(CollectionStats {
            items_collected: 1,
            ..Default::default()
        })
    }
}

#[async_trait]
impl Collector for SpeedtestCollector {
    fn id(&self) -> CollectorId {
        CollectorId::Speedtest
    }

    async fn collect(&self) -> Result<CollectionStats> {
        for_each_network(self.api.as_ref(), self.id(), |network, name| {
            self.collect_network(network, name)
        })
        .await
    }
}
