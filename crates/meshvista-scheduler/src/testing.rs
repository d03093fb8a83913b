//! Fakes for the scheduler tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use meshvista_api::{Device, Eero, Forward, MeshApi, Network, NetworkDetails, Reservation, Result};
use meshvista_collectors::{CollectionStats, Collector, CollectorError, CollectorId};

pub struct FakeApi {
    authenticated: AtomicBool,
}

impl FakeApi {
    pub fn authenticated() -> Self {
        Self {
            authenticated: AtomicBool::new(true),
        }
    }

    pub fn unauthenticated() -> Self {
        Self {
            authenticated: AtomicBool::new(false),
        }
    }

    pub fn set_authenticated(&self, value: bool) {
        self.authenticated.store(value, Ordering::SeqCst);
    }
}

#[async_trait]
impl MeshApi for FakeApi {
    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }
    async fn networks(&self) -> Result<Vec<Network>> {
        Ok(Vec::new())
    }
    async fn eeros(&self, _: &Network) -> Result<Vec<Eero>> {
        Ok(Vec::new())
    }
    async fn devices(&self, _: &Network) -> Result<Vec<Device>> {
        Ok(Vec::new())
    }
    async fn network_details(&self, _: &Network) -> Result<NetworkDetails> {
        Ok(NetworkDetails::default())
    }
    async fn reservations(&self, _: &Network) -> Result<Vec<Reservation>> {
        Ok(Vec::new())
    }
    async fn forwards(&self, _: &Network) -> Result<Vec<Forward>> {
        Ok(Vec::new())
    }
}

/// Collector that records its calls and optionally sleeps or fails.
pub struct FakeCollector {
    pub id: CollectorId,
    pub calls: AtomicUsize,
    pub completed: AtomicUsize,
    pub delay: Duration,
    pub fail: AtomicBool,
    /// Order log shared between collectors.
    pub log: Option<Arc<std::sync::Mutex<Vec<CollectorId>>>>,
}

impl FakeCollector {
    pub fn new(id: CollectorId) -> Self {
        Self {
            id,
            calls: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            delay: Duration::ZERO,
            fail: AtomicBool::new(false),
            log: None,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Collector for FakeCollector {
    fn id(&self) -> CollectorId {
        self.id
    }

    async fn collect(&self) -> meshvista_collectors::Result<CollectionStats> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.lock().unwrap().push(self.id);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollectorError::Api(meshvista_api::ApiError::Status {
                status: 502,
                message: "bad gateway".into(),
            }));
        }
        Ok(CollectionStats {
            items_collected: 1,
            ..CollectionStats::default()
        })
    }
}
