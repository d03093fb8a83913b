use std::future::Future;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meshvista_api::{MeshApi, Network};
use meshvista_storage::{format_ts, parse_ts, Database};
use tracing::{error, info, warn};

use crate::error::{CollectorError, Result};
use crate::types::{CollectionStats, CollectorId, RunResult};

/// A unit of work that fetches from the mesh API and writes one snapshot.
///
/// Implementations fetch everything they need first and then write inside a
/// single [`Database::with_tx`] call, so an error rolls the whole run back.
#[async_trait]
pub trait Collector: Send + Sync {
    fn id(&self) -> CollectorId;

    async fn collect(&self) -> Result<CollectionStats>;
}

/// Base wrapper around [`Collector::collect`]: auth gate, timing, logging and
/// the `last_collection_<id>` marker. Never returns an error.
pub async fn run_collector(
    collector: &dyn Collector,
    api: &dyn MeshApi,
    db: &Database,
) -> RunResult {
    let id = collector.id();
    if !api.is_authenticated() {
        warn!(collector = %id, "not authenticated, skipping collection");
        return RunResult::failed(CollectorError::NotAuthenticated.to_string());
    }

    let started = Instant::now();
    match collector.collect().await {
        Ok(stats) => {
            if let Err(e) = db.set_config(&id.last_collection_key(), &format_ts(Utc::now())) {
                error!(collector = %id, error = %e, "failed to record collection time");
            }
            let result = RunResult::completed(stats.clone(), started.elapsed());
            info!(
                collector = %id,
                items = stats.items_collected,
                errors = stats.errors,
                duration_ms = result.duration_ms,
                "collection completed"
            );
            result
        }
        Err(e) => {
            error!(collector = %id, error = %e, "collection failed");
            RunResult::failed(e.to_string()).with_duration(started.elapsed())
        }
    }
}

/// Time of the last successful run of `id`, if any.
pub fn last_collection(db: &Database, id: CollectorId) -> Result<Option<DateTime<Utc>>> {
    Ok(db
        .get_config(&id.last_collection_key())?
        .as_deref()
        .and_then(parse_ts))
}

/// Run `per_network` for every named network on the account.
///
/// A failing network is logged and counted in `errors`; the run as a whole
/// only fails when the network list itself cannot be fetched or every network
/// failed.
pub(crate) async fn for_each_network<F, Fut>(
    api: &dyn MeshApi,
    collector: CollectorId,
    mut per_network: F,
) -> Result<CollectionStats>
where
    F: FnMut(Network, String) -> Fut,
    Fut: Future<Output = Result<CollectionStats>>,
{
    let networks = api.networks().await?;
    let mut stats = CollectionStats::default();
    if networks.is_empty() {
        warn!(collector = %collector, "no networks found");
        return Ok(stats);
    }

    let mut succeeded = 0usize;
    let mut last_error = None;
    for network in networks {
        let Some(name) = network.name.clone() else {
            warn!(collector = %collector, url = %network.url, "network has no name, skipping");
            continue;
        };
        match per_network(network, name.clone()).await {
            Ok(s) => {
                succeeded += 1;
                stats.merge(s);
            }
            Err(e) => {
                error!(
                    collector = %collector,
                    network = %name,
                    error = %e,
                    "network collection failed"
                );
                stats.errors += 1;
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) if succeeded == 0 => Err(e),
        _ => Ok(stats),
    }
}
