//! Collectors: units of work that poll the mesh API and persist a snapshot.
//!
//! Each collector implements [`Collector`]; [`run_collector`] is the base run
//! wrapper the scheduler calls through its execution guard.

pub mod bandwidth;
pub mod collector;
pub mod device;
pub mod error;
pub mod network;
pub mod routing;
pub mod speedtest;
pub mod types;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use meshvista_api::MeshApi;
use meshvista_storage::Database;

pub use bandwidth::{accumulate, BandwidthSubject, DailyBandwidth, SampleOutcome};
pub use collector::{last_collection, run_collector, Collector};
pub use device::DeviceCollector;
pub use error::{CollectorError, Result};
pub use network::NetworkCollector;
pub use routing::RoutingCollector;
pub use speedtest::SpeedtestCollector;
pub use types::{CollectionStats, CollectorId, RunResult};

/// The four built-in collectors, in [`CollectorId::ALL`] order.
pub fn builtin_collectors(
    api: Arc<dyn MeshApi>,
    db: Database,
    device_interval: Duration,
) -> Vec<Arc<dyn Collector>> {
    vec![
        Arc::new(DeviceCollector::new(api.clone(), db.clone(), device_interval)),
        Arc::new(NetworkCollector::new(api.clone(), db.clone())),
        Arc::new(SpeedtestCollector::new(api.clone(), db.clone())),
        Arc::new(RoutingCollector::new(api, db)),
    ]
}
