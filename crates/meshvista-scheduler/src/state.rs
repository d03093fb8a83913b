use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use meshvista_collectors::CollectorId;

/// Per-collector mutable state. Running flags and failure counters share one
/// lock so health snapshots never see a stale running flag.
#[derive(Debug, Clone, Default)]
pub(crate) struct CollectorState {
    pub running: bool,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
}

/// Shared handle to the state of every known collector.
#[derive(Debug, Clone)]
pub struct CollectorTable {
    inner: Arc<Mutex<BTreeMap<CollectorId, CollectorState>>>,
}

impl Default for CollectorTable {
    fn default() -> Self {
        Self::new(CollectorId::ALL)
    }
}

impl CollectorTable {
    pub fn new(ids: impl IntoIterator<Item = CollectorId>) -> Self {
        let map = ids
            .into_iter()
            .map(|id| (id, CollectorState::default()))
            .collect();
        Self {
            inner: Arc::new(Mutex::new(map)),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, BTreeMap<CollectorId, CollectorState>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check-and-set the running flag. `false` means a run is already live.
    pub fn try_claim(&self, id: CollectorId) -> bool {
        let mut table = self.lock();
        let state = table.entry(id).or_default();
        if state.running {
            return false;
        }
        state.running = true;
        true
    }

    pub fn release(&self, id: CollectorId) {
        if let Some(state) = self.lock().get_mut(&id) {
            state.running = false;
        }
    }

    pub fn is_running(&self, id: CollectorId) -> bool {
        self.lock().get(&id).is_some_and(|s| s.running)
    }
}
