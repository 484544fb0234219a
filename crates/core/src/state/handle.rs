use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::media::SeriesId;

use super::{ProcessingState, StateError, StateStore, UnitKey};

struct Inner {
    /// What gets persisted.
    state: ProcessingState,
    /// Unmonitors simulated under dry-run. Visible to queries, never saved.
    simulated: ProcessingState,
}

/// Shared owner of the processing state.
///
/// Cheaply cloneable. Every operation takes the one lock, so concurrent
/// workers only ever see whole updates. No collection handle escapes.
#[derive(Clone)]
pub struct StateHandle {
    inner: Arc<Mutex<Inner>>,
    store: Arc<dyn StateStore>,
    dry_run: bool,
}

impl StateHandle {
    /// Load state from `store` and wrap it.
    pub fn load(store: Arc<dyn StateStore>, dry_run: bool) -> Self {
        let state = store.load();
        Self::with_state(state, store, dry_run)
    }

    pub fn with_state(state: ProcessingState, store: Arc<dyn StateStore>, dry_run: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state,
                simulated: ProcessingState::new(),
            })),
            store,
            dry_run,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub async fn is_processed(&self, key: UnitKey) -> bool {
        self.inner.lock().await.state.is_processed(&key)
    }

    /// Recorded unmonitored, including simulated unmonitors under dry-run.
    pub async fn is_unmonitored(&self, key: UnitKey) -> bool {
        let inner = self.inner.lock().await;
        inner.state.is_unmonitored(&key) || inner.simulated.is_unmonitored(&key)
    }

    /// Seasons of a series recorded unmonitored, including simulated ones.
    pub async fn unmonitored_seasons(&self, series: SeriesId) -> BTreeSet<u32> {
        let inner = self.inner.lock().await;
        let mut seasons = inner.state.unmonitored_seasons(series);
        seasons.extend(inner.simulated.unmonitored_seasons(series));
        seasons
    }

    /// Record a settled evaluation. A pending unmonitor is dropped.
    pub async fn mark_processed(&self, key: UnitKey) -> bool {
        let mut inner = self.inner.lock().await;
        inner.state.clear_pending(&key);
        inner.state.insert_processed(key)
    }

    /// Record a targeted unit whose unmonitor was rejected upstream.
    pub async fn mark_pending(&self, key: UnitKey) -> bool {
        self.inner.lock().await.state.insert_pending(key)
    }

    /// Record an unmonitor performed by us. Under dry-run the unit is only
    /// marked pending and the unmonitor lives in the in-memory overlay, so a
    /// later live run still picks it up.
    pub async fn mark_unmonitored(&self, key: UnitKey) -> bool {
        let mut inner = self.inner.lock().await;
        if self.dry_run {
            let already = inner.state.is_unmonitored(&key);
            if !already {
                inner.state.insert_pending(key);
            }
            inner.state.insert_processed(key);
            inner.simulated.insert_unmonitored(key) && !already
        } else {
            inner.state.insert_unmonitored(key)
        }
    }

    /// Record a unit observed unmonitored upstream. This is ground truth, so
    /// it is persisted even under dry-run.
    pub async fn record_upstream_unmonitored(&self, key: UnitKey) -> bool {
        self.inner.lock().await.state.insert_unmonitored(key)
    }

    pub async fn last_scan(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().await.state.last_scan
    }

    /// Clear processed sets, keeping unmonitored ones.
    pub async fn reset_processed(&self) {
        let mut inner = self.inner.lock().await;
        inner.state.reset_processed();
        inner.simulated = ProcessingState::new();
        info!("Cleared processed state for a full rescan");
    }

    /// Copy of the persisted state.
    pub async fn snapshot(&self) -> ProcessingState {
        self.inner.lock().await.state.clone()
    }

    /// Persisted state with simulated unmonitors folded in.
    pub async fn effective_snapshot(&self) -> ProcessingState {
        let inner = self.inner.lock().await;
        let mut state = inner.state.clone();
        state.merge_unmonitored(&inner.simulated);
        state
    }

    /// Persist the current state without rotating the backup.
    pub async fn checkpoint(&self) -> Result<(), StateError> {
        let inner = self.inner.lock().await;
        self.persist(inner.state.clone(), false).await?;
        debug!("State checkpoint written");
        Ok(())
    }

    /// Stamp the scan time and persist, rotating the previous file aside.
    pub async fn commit(&self, scanned_at: DateTime<Utc>) -> Result<(), StateError> {
        let mut inner = self.inner.lock().await;
        let mut stamped = inner.state.clone();
        stamped.last_scan = Some(scanned_at);
        self.persist(stamped, true).await?;
        inner.state.last_scan = Some(scanned_at);
        debug!("State committed");
        Ok(())
    }

    /// Run the blocking save on the blocking pool. Callers hold the lock, so
    /// saves never overtake each other.
    async fn persist(&self, state: ProcessingState, rotate_backup: bool) -> Result<(), StateError> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.save(&state, rotate_backup))
            .await
            .map_err(|e| StateError::SaveTask(e.to_string()))?
    }
}

impl std::fmt::Debug for StateHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateHandle")
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}
