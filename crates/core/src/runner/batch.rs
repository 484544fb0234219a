use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::debug;

use crate::policy::{Action, DecisionPolicy, LeafTarget};

/// Outcome of one leaf batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Units the policy was run on.
    pub evaluated: usize,
    /// Confirmed (or simulated, under dry-run) unmonitors.
    pub unmonitored: usize,
    /// Units left monitored.
    pub kept: usize,
    pub skipped: usize,
    /// Units never started because of an interrupt.
    pub not_started: usize,
    /// Count per action label.
    pub actions: BTreeMap<String, usize>,
    /// Whether any decision changed recorded state.
    pub changed: bool,
}

impl BatchReport {
    fn record(&mut self, action: &Action) {
        self.evaluated += 1;
        match action {
            Action::Unmonitor { .. } => self.unmonitored += 1,
            Action::Keep(_) => self.kept += 1,
            Action::Skip(_) => self.skipped += 1,
        }
        *self.actions.entry(action.label().to_string()).or_insert(0) += 1;
        self.changed |= action.changed_state();
    }

    /// Fold another batch into this one.
    pub fn absorb(&mut self, other: &BatchReport) {
        self.evaluated += other.evaluated;
        self.unmonitored += other.unmonitored;
        self.kept += other.kept;
        self.skipped += other.skipped;
        self.not_started += other.not_started;
        for (label, count) in &other.actions {
            *self.actions.entry(label.clone()).or_insert(0) += count;
        }
        self.changed |= other.changed;
    }
}

/// Runs the decision policy over independent leaf units with a bounded
/// number of workers.
#[derive(Clone)]
pub struct BatchRunner {
    workers: usize,
    shutdown: Arc<AtomicBool>,
}

impl BatchRunner {
    pub fn new(workers: usize, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            workers: workers.max(1),
            shutdown,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Decide every unit. Once shutdown is requested no further units are
    /// started; those in flight finish.
    pub async fn run<T: LeafTarget>(
        &self,
        policy: &DecisionPolicy,
        target: &T,
        units: Vec<T::Unit>,
    ) -> BatchReport {
        let total = units.len();
        let shutdown = &self.shutdown;

        let actions: Vec<Action> = stream::iter(units)
            .take_while(|_| future::ready(!shutdown.load(Ordering::SeqCst)))
            .map(move |unit| async move { policy.decide(target, &unit).await })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        let mut report = BatchReport::default();
        for action in &actions {
            report.record(action);
        }
        report.not_started = total - actions.len();

        debug!(
            granularity = %target.granularity(),
            evaluated = report.evaluated,
            unmonitored = report.unmonitored,
            not_started = report.not_started,
            "Batch drained"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arr::MovieLibrary;
    use crate::policy::MovieTarget;
    use crate::release_group::{ReleaseGroup, TargetGroups};
    use crate::state::{JsonStateStore, StateHandle, UnitKey};
    use crate::testing::{fixtures, MockMovieLibrary};
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Arc<MockMovieLibrary>, DecisionPolicy, Arc<AtomicBool>) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(JsonStateStore::new(dir.path().join("state.json")));
        let state = StateHandle::load(store, false);
        let shutdown = Arc::new(AtomicBool::new(false));
        let policy = DecisionPolicy::new(TargetGroups::new(["GROUP"]), state, shutdown.clone());

        let radarr = Arc::new(MockMovieLibrary::new());
        for id in 1..=6 {
            let path = if id % 2 == 0 {
                format!("/movies/Film.{}.2023.1080p.WEB-DL-GROUP.mkv", id)
            } else {
                format!("/movies/Film.{}.2023.1080p.WEB-DL-OTHER.mkv", id)
            };
            radarr
                .add_movie(fixtures::movie(id, &format!("Film {}", id)), Some(&path))
                .await;
        }
        (dir, radarr, policy, shutdown)
    }

    #[tokio::test]
    async fn test_batch_counts_actions() {
        let (_dir, radarr, policy, shutdown) = setup().await;
        let target = MovieTarget::new(radarr.clone());
        let runner = BatchRunner::new(3, shutdown);

        let movies = radarr.list_movies().await.unwrap();
        let report = runner.run(&policy, &target, movies).await;

        assert_eq!(report.evaluated, 6);
        assert_eq!(report.unmonitored, 3);
        assert_eq!(report.kept, 3);
        assert_eq!(report.actions.get("keep"), Some(&3));
        assert!(report.changed);
        assert_eq!(radarr.successful_mutations().await.len(), 3);
        assert!(policy.state().is_unmonitored(UnitKey::Movie(2)).await);
        assert!(!policy.state().is_unmonitored(UnitKey::Movie(1)).await);
    }

    #[tokio::test]
    async fn test_batch_second_run_is_idempotent() {
        let (_dir, radarr, policy, shutdown) = setup().await;
        let target = MovieTarget::new(radarr.clone());
        let runner = BatchRunner::new(4, shutdown);

        runner
            .run(&policy, &target, radarr.list_movies().await.unwrap())
            .await;
        radarr.clear_mutations().await;

        let report = runner
            .run(&policy, &target, radarr.list_movies().await.unwrap())
            .await;
        assert_eq!(report.unmonitored, 0);
        assert!(radarr.mutations().await.is_empty());
    }

    #[tokio::test]
    async fn test_batch_interrupted_starts_nothing() {
        let (_dir, radarr, policy, shutdown) = setup().await;
        let target = MovieTarget::new(radarr.clone());
        let runner = BatchRunner::new(2, shutdown.clone());

        shutdown.store(true, Ordering::SeqCst);
        let report = runner
            .run(&policy, &target, radarr.list_movies().await.unwrap())
            .await;

        assert_eq!(report.evaluated, 0);
        assert_eq!(report.not_started, 6);
        assert!(radarr.mutations().await.is_empty());
    }

    #[tokio::test]
    async fn test_zero_workers_clamped() {
        let runner = BatchRunner::new(0, Arc::new(AtomicBool::new(false)));
        assert_eq!(runner.workers(), 1);
    }

    #[test]
    fn test_absorb() {
        let mut a = BatchReport::default();
        a.record(&Action::Unmonitor {
            group: ReleaseGroup::new("GROUP"),
            dry_run: false,
        });
        let mut b = BatchReport::default();
        b.record(&Action::Keep(crate::policy::KeepReason::NoReleaseGroup));
        a.absorb(&b);

        assert_eq!(a.evaluated, 2);
        assert_eq!(a.unmonitored, 1);
        assert_eq!(a.kept, 1);
        assert!(a.changed);
    }
}
