//! Hierarchical rollup: episodes to seasons, seasons to series.
//!
//! The verdict functions are pure and derive everything from already
//! recorded state, so a rollup interrupted between levels is simply
//! re-derived on the next scan. [`RollupEngine`] applies the verdicts,
//! one level at a time, checkpointing state after each level.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::arr::SeriesLibrary;
use crate::media::{Episode, EpisodeId, Season, Series, SeriesId};
use crate::metrics;
use crate::state::{ProcessingState, StateError, StateHandle, UnitKey};

/// Outcome of evaluating one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Already recorded unmonitored; nothing to do.
    AlreadyRecorded,
    /// Nothing with files at the level below.
    NoFiles,
    /// Some children are not unmonitored yet.
    Incomplete { remaining: usize },
    /// Complete, and already unmonitored upstream: record without a remote call.
    Reconcile,
    /// Complete and still monitored upstream: unmonitor it.
    Unmonitor,
}

/// Decide whether a season can roll up.
///
/// `episodes` are the season's episodes that have a file.
pub fn evaluate_season<F>(
    season: &Season,
    episodes: &[&Episode],
    recorded: bool,
    is_episode_unmonitored: F,
) -> Verdict
where
    F: Fn(EpisodeId) -> bool,
{
    if recorded {
        return Verdict::AlreadyRecorded;
    }
    if episodes.is_empty() {
        return Verdict::NoFiles;
    }
    let remaining = episodes
        .iter()
        .filter(|ep| !is_episode_unmonitored(ep.id))
        .count();
    if remaining > 0 {
        return Verdict::Incomplete { remaining };
    }
    if season.monitored {
        Verdict::Unmonitor
    } else {
        Verdict::Reconcile
    }
}

/// Decide whether a series can roll up. Specials (season 0) never block it.
pub fn evaluate_series(
    recorded: bool,
    monitored: bool,
    seasons: &[Season],
    unmonitored_seasons: &BTreeSet<u32>,
) -> Verdict {
    if recorded {
        return Verdict::AlreadyRecorded;
    }
    let with_files: Vec<u32> = seasons
        .iter()
        .filter(|s| !s.is_specials() && s.episode_file_count > 0)
        .map(|s| s.season_number)
        .collect();
    if with_files.is_empty() {
        return Verdict::NoFiles;
    }
    let remaining = with_files
        .iter()
        .filter(|n| !unmonitored_seasons.contains(n))
        .count();
    if remaining > 0 || unmonitored_seasons.is_empty() {
        return Verdict::Incomplete { remaining };
    }
    if monitored {
        Verdict::Unmonitor
    } else {
        Verdict::Reconcile
    }
}

/// Whether recorded state implies a rollup that has not happened yet, for
/// example after a crash between levels.
///
/// A season is owed when all its file-bearing episodes are recorded
/// unmonitored but the season is not. The series is owed when every
/// non-special season with files is recorded. Partially covered series are
/// not pending, so unchanged ones cost no season listing.
pub fn rollup_pending(series_id: SeriesId, episodes: &[Episode], state: &ProcessingState) -> bool {
    if state.is_unmonitored(&UnitKey::Series(series_id)) {
        return false;
    }
    let recorded = state.unmonitored_seasons(series_id);

    let mut covered: BTreeMap<u32, bool> = BTreeMap::new();
    for ep in episodes.iter().filter(|ep| ep.has_file) {
        let all = covered.entry(ep.season_number).or_insert(true);
        *all &= state.is_unmonitored(&UnitKey::Episode(ep.id));
    }

    if covered
        .iter()
        .any(|(season, all)| *all && !recorded.contains(season))
    {
        return true;
    }

    let mut with_files = covered.keys().filter(|s| **s != 0).peekable();
    with_files.peek().is_some() && with_files.all(|s| recorded.contains(s))
}

/// What a rollup pass did for one series.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollupOutcome {
    pub seasons_unmonitored: Vec<u32>,
    pub seasons_reconciled: Vec<u32>,
    pub series_unmonitored: bool,
    pub series_reconciled: bool,
    pub failures: usize,
    /// Seasons could not be listed; nothing was evaluated.
    pub skipped: bool,
}

impl RollupOutcome {
    pub fn changed(&self) -> bool {
        !self.seasons_unmonitored.is_empty()
            || !self.seasons_reconciled.is_empty()
            || self.series_unmonitored
            || self.series_reconciled
    }
}

/// Applies season and series rollups for one series at a time.
pub struct RollupEngine {
    library: Arc<dyn SeriesLibrary>,
    state: StateHandle,
    shutdown: Arc<AtomicBool>,
}

impl RollupEngine {
    pub fn new(
        library: Arc<dyn SeriesLibrary>,
        state: StateHandle,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            library,
            state,
            shutdown,
        }
    }

    /// Roll up one series after its leaf batch has drained.
    ///
    /// `episodes` are the series' episodes with files. Only state
    /// persistence failures are returned as errors.
    pub async fn roll_up(
        &self,
        series: &Series,
        episodes: &[Episode],
    ) -> Result<RollupOutcome, StateError> {
        let mut outcome = RollupOutcome::default();

        let mut seasons = match self.library.list_seasons(series.id).await {
            Ok(seasons) => seasons,
            Err(e) => {
                warn!(series = %series.title, error = %e, "Failed to list seasons, skipping rollup");
                outcome.skipped = true;
                return Ok(outcome);
            }
        };
        seasons.sort_by_key(|s| s.season_number);

        self.roll_up_seasons(series, &seasons, episodes, &mut outcome)
            .await;
        if !outcome.seasons_unmonitored.is_empty() || !outcome.seasons_reconciled.is_empty() {
            self.state.checkpoint().await?;
        }

        self.roll_up_series(series, &seasons, &mut outcome).await;
        if outcome.series_unmonitored || outcome.series_reconciled {
            self.state.checkpoint().await?;
        }

        Ok(outcome)
    }

    async fn roll_up_seasons(
        &self,
        series: &Series,
        seasons: &[Season],
        episodes: &[Episode],
        outcome: &mut RollupOutcome,
    ) {
        let snapshot = self.state.effective_snapshot().await;

        for season in seasons {
            let key = UnitKey::Season {
                series: series.id,
                season: season.season_number,
            };
            let in_season: Vec<&Episode> = episodes
                .iter()
                .filter(|ep| ep.season_number == season.season_number && ep.has_file)
                .collect();

            let verdict = evaluate_season(season, &in_season, snapshot.is_unmonitored(&key), |id| {
                snapshot.is_unmonitored(&UnitKey::Episode(id))
            });
            debug!(series = %series.title, season = season.season_number, ?verdict, "Season rollup verdict");

            match verdict {
                Verdict::Reconcile => {
                    self.state.record_upstream_unmonitored(key).await;
                    outcome.seasons_reconciled.push(season.season_number);
                    record_metric("season", "reconciled");
                }
                Verdict::Unmonitor => {
                    if self.shutdown.load(Ordering::SeqCst) {
                        return;
                    }
                    if self.apply(key).await {
                        info!(
                            series = %series.title,
                            season = season.season_number,
                            dry_run = self.state.is_dry_run(),
                            "Unmonitored season"
                        );
                        outcome.seasons_unmonitored.push(season.season_number);
                    } else {
                        outcome.failures += 1;
                    }
                }
                _ => {}
            }
        }
    }

    async fn roll_up_series(&self, series: &Series, seasons: &[Season], outcome: &mut RollupOutcome) {
        let key = UnitKey::Series(series.id);
        let recorded = self.state.is_unmonitored(key).await;
        let unmonitored_seasons = self.state.unmonitored_seasons(series.id).await;

        let verdict = evaluate_series(recorded, series.monitored, seasons, &unmonitored_seasons);
        debug!(series = %series.title, ?verdict, "Series rollup verdict");

        match verdict {
            Verdict::Reconcile => {
                self.state.record_upstream_unmonitored(key).await;
                outcome.series_reconciled = true;
                record_metric("series", "reconciled");
            }
            Verdict::Unmonitor => {
                if self.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                if self.apply(key).await {
                    info!(
                        series = %series.title,
                        dry_run = self.state.is_dry_run(),
                        "Unmonitored series"
                    );
                    outcome.series_unmonitored = true;
                } else {
                    outcome.failures += 1;
                }
            }
            _ => {}
        }
    }

    /// Unmonitor a season or series upstream (or simulate it) and record it.
    async fn apply(&self, key: UnitKey) -> bool {
        let level = key.granularity().as_str();

        if self.state.is_dry_run() {
            self.state.mark_unmonitored(key).await;
            record_metric(level, "simulated");
            return true;
        }

        let result = match key {
            UnitKey::Season { series, season } => {
                self.library.set_season_monitored(series, season, false).await
            }
            UnitKey::Series(series) => self.library.set_series_monitored(series, false).await,
            _ => return false,
        };

        match result {
            Ok(()) => {
                self.state.mark_unmonitored(key).await;
                record_metric(level, "unmonitored");
                true
            }
            Err(e) => {
                warn!(%key, error = %e, "Rollup mutation failed, will retry next scan");
                record_metric(level, "failed");
                false
            }
        }
    }
}

fn record_metric(level: &str, outcome: &str) {
    metrics::ROLLUPS_TOTAL
        .with_label_values(&[level, outcome])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    fn season(number: u32, files: u32, monitored: bool) -> Season {
        Season {
            series_id: 1,
            season_number: number,
            monitored,
            episode_file_count: files,
        }
    }

    #[test]
    fn test_season_requires_every_episode() {
        let e1 = fixtures::episode(1, 1, 1, 1, "a-GRP.mkv");
        let e2 = fixtures::episode(2, 1, 1, 2, "b-GRP.mkv");
        let eps = vec![&e1, &e2];
        let s = season(1, 2, true);

        assert_eq!(
            evaluate_season(&s, &eps, false, |id| id == 1),
            Verdict::Incomplete { remaining: 1 }
        );
        assert_eq!(evaluate_season(&s, &eps, false, |_| true), Verdict::Unmonitor);
        assert_eq!(evaluate_season(&s, &eps, true, |_| true), Verdict::AlreadyRecorded);
        assert_eq!(evaluate_season(&s, &[], false, |_| true), Verdict::NoFiles);
    }

    #[test]
    fn test_season_already_unmonitored_upstream_reconciles() {
        let e1 = fixtures::episode(1, 1, 1, 1, "a-GRP.mkv");
        let s = season(1, 1, false);
        assert_eq!(evaluate_season(&s, &[&e1], false, |_| true), Verdict::Reconcile);
    }

    #[test]
    fn test_series_ignores_specials() {
        let seasons = vec![season(0, 3, true), season(1, 1, false), season(2, 1, false)];
        let done = BTreeSet::from([1, 2]);
        assert_eq!(evaluate_series(false, true, &seasons, &done), Verdict::Unmonitor);

        let partial = BTreeSet::from([1]);
        assert_eq!(
            evaluate_series(false, true, &seasons, &partial),
            Verdict::Incomplete { remaining: 1 }
        );
    }

    #[test]
    fn test_series_without_files_never_rolls_up() {
        let seasons = vec![season(0, 2, true), season(1, 0, true)];
        assert_eq!(
            evaluate_series(false, true, &seasons, &BTreeSet::from([0])),
            Verdict::NoFiles
        );
        assert_eq!(
            evaluate_series(true, true, &seasons, &BTreeSet::new()),
            Verdict::AlreadyRecorded
        );
    }

    #[test]
    fn test_series_needs_recorded_seasons() {
        let seasons = vec![season(1, 1, true)];
        assert_eq!(
            evaluate_series(false, true, &seasons, &BTreeSet::new()),
            Verdict::Incomplete { remaining: 1 }
        );
        assert_eq!(
            evaluate_series(false, false, &seasons, &BTreeSet::from([1])),
            Verdict::Reconcile
        );
    }

    #[test]
    fn test_rollup_pending() {
        let e1 = fixtures::episode(10, 1, 1, 1, "a-GRP.mkv");
        let mut state = ProcessingState::new();
        assert!(!rollup_pending(1, &[e1.clone()], &state));

        state.insert_unmonitored(UnitKey::Episode(10));
        assert!(rollup_pending(1, &[e1.clone()], &state));

        state.insert_unmonitored(UnitKey::Season {
            series: 1,
            season: 1,
        });
        // season recorded but series not yet
        assert!(rollup_pending(1, &[e1.clone()], &state));

        state.insert_unmonitored(UnitKey::Series(1));
        assert!(!rollup_pending(1, &[e1], &state));
    }

    #[test]
    fn test_partial_coverage_is_not_pending() {
        let s1 = fixtures::episode(10, 1, 1, 1, "a-GRP.mkv");
        let s2a = fixtures::episode(20, 1, 2, 1, "b-GRP.mkv");
        let s2b = fixtures::episode(21, 1, 2, 2, "c-OTHER.mkv");
        let episodes = vec![s1, s2a, s2b];

        let mut state = ProcessingState::new();
        state.insert_unmonitored(UnitKey::Episode(10));
        state.insert_unmonitored(UnitKey::Season {
            series: 1,
            season: 1,
        });
        state.insert_unmonitored(UnitKey::Episode(20));
        state.insert_processed(UnitKey::Episode(21));

        assert!(!rollup_pending(1, &episodes, &state));

        state.insert_unmonitored(UnitKey::Episode(21));
        assert!(rollup_pending(1, &episodes, &state));
    }

    #[test]
    fn test_specials_alone_do_not_make_series_pending() {
        let special = fixtures::episode(5, 1, 0, 1, "sp-GRP.mkv");
        let mut state = ProcessingState::new();
        state.insert_unmonitored(UnitKey::Episode(5));
        state.insert_unmonitored(UnitKey::Season {
            series: 1,
            season: 0,
        });

        assert!(!rollup_pending(1, &[special], &state));
    }
}
