//! Leaf-level decision policy.
//!
//! One generic function decides the fate of a movie or an episode. The
//! differences between the two live in a [`LeafTarget`] capability: which
//! granularity the unit is tracked at, how to find its file and how to
//! unmonitor it.

mod targets;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::arr::LibraryError;
use crate::media::{FileInfo, Granularity, LeafUnit};
use crate::metrics;
use crate::release_group::{ReleaseGroup, ReleaseGroupExtractor, TargetGroups};
use crate::state::{StateHandle, UnitKey};

pub use targets::{EpisodeTarget, MovieTarget};

/// Capability record for one kind of leaf unit.
#[async_trait]
pub trait LeafTarget: Send + Sync {
    type Unit: LeafUnit;

    fn granularity(&self) -> Granularity;

    /// Resolve the unit's file, preferring details embedded in the listing.
    async fn file_info(&self, unit: &Self::Unit) -> Result<Option<FileInfo>, LibraryError>;

    /// Set the unit's monitored flag to false upstream.
    async fn unmonitor(&self, unit: &Self::Unit) -> Result<(), LibraryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Already recorded unmonitored in state.
    AlreadyUnmonitored,
    /// Found unmonitored upstream and reconciled into state.
    AlreadyUnmonitoredUpstream,
    /// No file, or a file record without a path.
    NoFile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeepReason {
    NoReleaseGroup,
    NotTargeted(String),
    /// File lookup failed; the unit is not marked processed.
    LookupFailed,
    /// Remote rejected the mutation; retried next scan.
    MutationFailed,
    /// Shutdown was requested before the mutation was issued.
    Interrupted,
}

/// Outcome of evaluating one leaf unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Skip(SkipReason),
    Unmonitor { group: ReleaseGroup, dry_run: bool },
    Keep(KeepReason),
}

impl Action {
    /// Label used in metrics and reports.
    pub fn label(&self) -> &'static str {
        match self {
            Action::Skip(SkipReason::AlreadyUnmonitored) => "already_unmonitored",
            Action::Skip(SkipReason::AlreadyUnmonitoredUpstream) => "upstream_unmonitored",
            Action::Skip(SkipReason::NoFile) => "no_file",
            Action::Unmonitor { dry_run: true, .. } => "simulated_unmonitor",
            Action::Unmonitor { .. } => "unmonitor",
            Action::Keep(KeepReason::MutationFailed) => "mutation_failed",
            Action::Keep(KeepReason::LookupFailed) => "lookup_failed",
            Action::Keep(KeepReason::Interrupted) => "interrupted",
            Action::Keep(_) => "keep",
        }
    }

    pub fn is_unmonitor(&self) -> bool {
        matches!(self, Action::Unmonitor { .. })
    }

    /// True if this evaluation added something to the unmonitored sets.
    pub fn changed_state(&self) -> bool {
        matches!(
            self,
            Action::Unmonitor { .. } | Action::Skip(SkipReason::AlreadyUnmonitoredUpstream)
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Unmonitor { group, .. } => write!(f, "{} ({})", self.label(), group),
            Action::Keep(KeepReason::NotTargeted(group)) => write!(f, "keep ({})", group),
            _ => f.write_str(self.label()),
        }
    }
}

/// Decides, for one leaf unit, whether to unmonitor it.
pub struct DecisionPolicy {
    targets: TargetGroups,
    extractor: ReleaseGroupExtractor,
    state: StateHandle,
    shutdown: Arc<AtomicBool>,
}

impl DecisionPolicy {
    pub fn new(targets: TargetGroups, state: StateHandle, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            targets,
            extractor: ReleaseGroupExtractor::new(),
            state,
            shutdown,
        }
    }

    pub fn with_extractor(mut self, extractor: ReleaseGroupExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn state(&self) -> &StateHandle {
        &self.state
    }

    pub fn is_dry_run(&self) -> bool {
        self.state.is_dry_run()
    }

    /// Evaluate one unit. Rules are applied in order and the first match
    /// wins. Never fails: every remote error becomes a `Keep`.
    pub async fn decide<T: LeafTarget>(&self, target: &T, unit: &T::Unit) -> Action {
        let granularity = target.granularity();
        let action = self.evaluate(target, unit).await;

        metrics::DECISIONS_TOTAL
            .with_label_values(&[granularity.as_str(), action.label()])
            .inc();
        action
    }

    async fn evaluate<T: LeafTarget>(&self, target: &T, unit: &T::Unit) -> Action {
        let granularity = target.granularity();
        let Some(key) = UnitKey::leaf(granularity, unit.id()) else {
            return Action::Skip(SkipReason::NoFile);
        };

        if self.state.is_unmonitored(key).await {
            return Action::Skip(SkipReason::AlreadyUnmonitored);
        }

        if !unit.monitored() {
            self.state.record_upstream_unmonitored(key).await;
            debug!(%key, unit = %unit.label(), "Already unmonitored upstream");
            return Action::Skip(SkipReason::AlreadyUnmonitoredUpstream);
        }

        if !unit.has_file() {
            self.state.mark_processed(key).await;
            return Action::Skip(SkipReason::NoFile);
        }

        let path = match target.file_info(unit).await {
            Ok(Some(FileInfo {
                path: Some(path), ..
            })) => path,
            Ok(_) => {
                warn!(%key, unit = %unit.label(), "File record has no path, skipping");
                self.state.mark_processed(key).await;
                return Action::Skip(SkipReason::NoFile);
            }
            Err(e) => {
                warn!(%key, unit = %unit.label(), error = %e, "File lookup failed, will retry next scan");
                return Action::Keep(KeepReason::LookupFailed);
            }
        };

        let group = match self.extractor.extract(&path) {
            Some(group) if self.targets.contains(&group) => group,
            Some(group) => {
                self.state.mark_processed(key).await;
                return Action::Keep(KeepReason::NotTargeted(group.to_string()));
            }
            None => {
                debug!(%key, %path, "No release group found");
                self.state.mark_processed(key).await;
                return Action::Keep(KeepReason::NoReleaseGroup);
            }
        };

        if self.shutdown.load(Ordering::SeqCst) {
            return Action::Keep(KeepReason::Interrupted);
        }

        if self.state.is_dry_run() {
            info!(%key, unit = %unit.label(), %group, "[dry run] Would unmonitor");
            self.state.mark_unmonitored(key).await;
            return Action::Unmonitor {
                group,
                dry_run: true,
            };
        }

        match target.unmonitor(unit).await {
            Ok(()) => {
                self.state.mark_unmonitored(key).await;
                info!(%key, unit = %unit.label(), %group, "Unmonitored");
                Action::Unmonitor {
                    group,
                    dry_run: false,
                }
            }
            Err(e) => {
                self.state.mark_pending(key).await;
                warn!(%key, unit = %unit.label(), error = %e, "Failed to unmonitor, will retry next scan");
                Action::Keep(KeepReason::MutationFailed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::JsonStateStore;
    use crate::testing::{fixtures, MockMovieLibrary, MockSeriesLibrary};
    use tempfile::TempDir;

    struct Setup {
        _dir: TempDir,
        policy: DecisionPolicy,
        radarr: Arc<MockMovieLibrary>,
        target: MovieTarget,
        shutdown: Arc<AtomicBool>,
    }

    fn setup(dry_run: bool) -> Setup {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(JsonStateStore::new(dir.path().join("state.json")));
        let state = StateHandle::load(store, dry_run);
        let shutdown = Arc::new(AtomicBool::new(false));
        let policy = DecisionPolicy::new(TargetGroups::new(["grp"]), state, shutdown.clone());
        let radarr = Arc::new(MockMovieLibrary::new());
        let target = MovieTarget::new(radarr.clone());
        Setup {
            _dir: dir,
            policy,
            radarr,
            target,
            shutdown,
        }
    }

    async fn movie(setup: &Setup, id: u64, path: Option<&str>) -> crate::media::Movie {
        setup
            .radarr
            .add_movie(fixtures::movie(id, "Movie"), path)
            .await;
        setup.radarr.movie(id).await.unwrap()
    }

    #[tokio::test]
    async fn test_target_group_is_unmonitored() {
        let s = setup(false);
        let m = movie(&s, 1, Some("/movies/Movie.2020.1080p-GRP.mkv")).await;

        let action = s.policy.decide(&s.target, &m).await;
        assert_eq!(
            action,
            Action::Unmonitor {
                group: ReleaseGroup::new("GRP"),
                dry_run: false
            }
        );
        assert!(s.policy.state().is_unmonitored(UnitKey::Movie(1)).await);
        assert_eq!(s.radarr.successful_mutations().await.len(), 1);
    }

    #[tokio::test]
    async fn test_second_decision_issues_no_mutation() {
        let s = setup(false);
        let m = movie(&s, 1, Some("Movie.2020-GRP.mkv")).await;

        s.policy.decide(&s.target, &m).await;
        let again = s.policy.decide(&s.target, &m).await;
        assert_eq!(again, Action::Skip(SkipReason::AlreadyUnmonitored));
        assert_eq!(s.radarr.mutations().await.len(), 1);
    }

    #[tokio::test]
    async fn test_upstream_unmonitored_is_reconciled() {
        let s = setup(false);
        let mut m = movie(&s, 2, Some("Movie-OTHER.mkv")).await;
        m.monitored = false;

        let action = s.policy.decide(&s.target, &m).await;
        assert_eq!(action, Action::Skip(SkipReason::AlreadyUnmonitoredUpstream));
        assert!(s.policy.state().is_unmonitored(UnitKey::Movie(2)).await);
        assert!(s.radarr.mutations().await.is_empty());
    }

    #[tokio::test]
    async fn test_no_file_is_processed_not_unmonitored() {
        let s = setup(false);
        let m = movie(&s, 3, None).await;

        let action = s.policy.decide(&s.target, &m).await;
        assert_eq!(action, Action::Skip(SkipReason::NoFile));
        assert!(s.policy.state().is_processed(UnitKey::Movie(3)).await);
        assert!(!s.policy.state().is_unmonitored(UnitKey::Movie(3)).await);
    }

    #[tokio::test]
    async fn test_other_group_is_kept_case_insensitively() {
        let s = setup(false);
        let kept = movie(&s, 4, Some("Movie.2020-OTHER.mkv")).await;
        let matched = movie(&s, 5, Some("Movie.2020-gRp.mkv")).await;

        assert_eq!(
            s.policy.decide(&s.target, &kept).await,
            Action::Keep(KeepReason::NotTargeted("OTHER".into()))
        );
        assert!(s.policy.decide(&s.target, &matched).await.is_unmonitor());
        assert!(s.policy.state().is_processed(UnitKey::Movie(4)).await);
    }

    #[tokio::test]
    async fn test_failed_mutation_is_retried_next_time() {
        let s = setup(false);
        let m = movie(&s, 6, Some("Movie-GRP.mkv")).await;
        s.radarr.fail_mutations_for(6).await;

        let action = s.policy.decide(&s.target, &m).await;
        assert_eq!(action, Action::Keep(KeepReason::MutationFailed));
        assert!(s.policy.state().is_processed(UnitKey::Movie(6)).await);
        assert!(!s.policy.state().is_unmonitored(UnitKey::Movie(6)).await);
        assert!(s.policy.state().snapshot().await.is_pending(&UnitKey::Movie(6)));

        s.radarr.clear_failures().await;
        assert!(s.policy.decide(&s.target, &m).await.is_unmonitor());
        assert!(!s.policy.state().snapshot().await.is_pending(&UnitKey::Movie(6)));
    }

    #[tokio::test]
    async fn test_lookup_failure_leaves_unit_unprocessed() {
        let s = setup(false);
        let m = movie(&s, 7, Some("Movie-GRP.mkv")).await;
        s.radarr.set_lookup_error(Some(LibraryError::Timeout)).await;

        let action = s.policy.decide(&s.target, &m).await;
        assert_eq!(action, Action::Keep(KeepReason::LookupFailed));
        assert!(!s.policy.state().is_processed(UnitKey::Movie(7)).await);
    }

    #[tokio::test]
    async fn test_dry_run_makes_no_remote_call() {
        let s = setup(true);
        let m = movie(&s, 8, Some("Movie-GRP.mkv")).await;

        let action = s.policy.decide(&s.target, &m).await;
        assert_eq!(
            action,
            Action::Unmonitor {
                group: ReleaseGroup::new("GRP"),
                dry_run: true
            }
        );
        assert!(s.radarr.mutations().await.is_empty());
        let persisted = s.policy.state().snapshot().await;
        assert!(!persisted.is_unmonitored(&UnitKey::Movie(8)));
        assert!(persisted.is_pending(&UnitKey::Movie(8)));
    }

    #[tokio::test]
    async fn test_shutdown_stops_mutations() {
        let s = setup(false);
        let m = movie(&s, 9, Some("Movie-GRP.mkv")).await;
        s.shutdown.store(true, Ordering::SeqCst);

        let action = s.policy.decide(&s.target, &m).await;
        assert_eq!(action, Action::Keep(KeepReason::Interrupted));
        assert!(s.radarr.mutations().await.is_empty());
        assert!(!s.policy.state().is_processed(UnitKey::Movie(9)).await);
    }

    #[tokio::test]
    async fn test_episode_file_lookup_and_malformed_record() {
        let s = setup(false);
        let sonarr = Arc::new(MockSeriesLibrary::new());
        let target = EpisodeTarget::new(sonarr.clone());

        let ep = fixtures::episode_without_embedded_file(11, 1, 1, 1);
        sonarr.add_episode(ep.clone()).await;
        sonarr
            .add_episode_file(1100, FileInfo::new("Show.S01E01.GRP.mkv"))
            .await;
        assert!(s.policy.decide(&target, &ep).await.is_unmonitor());

        // file reference whose record has no path
        let broken = fixtures::episode_without_embedded_file(12, 1, 1, 2);
        sonarr.add_episode(broken.clone()).await;
        sonarr
            .add_episode_file(
                1200,
                FileInfo {
                    path: None,
                    added_at: None,
                },
            )
            .await;
        assert_eq!(
            s.policy.decide(&target, &broken).await,
            Action::Skip(SkipReason::NoFile)
        );
        assert!(s.policy.state().is_processed(UnitKey::Episode(12)).await);
    }

    #[test]
    fn test_action_labels() {
        assert_eq!(Action::Skip(SkipReason::NoFile).label(), "no_file");
        assert_eq!(
            Action::Unmonitor {
                group: ReleaseGroup::new("X"),
                dry_run: true
            }
            .to_string(),
            "simulated_unmonitor (X)"
        );
        assert!(Action::Skip(SkipReason::AlreadyUnmonitoredUpstream).changed_state());
        assert!(!Action::Keep(KeepReason::NoReleaseGroup).changed_state());
    }
}
