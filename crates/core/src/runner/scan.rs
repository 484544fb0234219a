use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::arr::{MovieLibrary, RadarrClient, SeriesLibrary, SonarrClient};
use crate::config::{Config, ServiceKind};
use crate::media::{Granularity, LeafUnit, Series};
use crate::metrics;
use crate::policy::{DecisionPolicy, EpisodeTarget, MovieTarget};
use crate::release_group::TargetGroups;
use crate::rollup::{rollup_pending, RollupEngine};
use crate::state::{ProcessingState, StateHandle, UnitKey};

use super::batch::BatchRunner;
use super::report::{ScanReport, SeriesPassReport, ServiceReport};
use super::{ScanError, ScanMode};

/// Whether an already processed unit must be looked at again.
fn changed_since<U: LeafUnit>(unit: &U, since: DateTime<Utc>) -> bool {
    let after = |t: Option<DateTime<Utc>>| t.is_some_and(|t| t > since);
    after(unit.added()) || after(unit.embedded_file().and_then(|f| f.added_at))
}

/// Narrow `units` to those an incremental scan needs to evaluate: never
/// processed, changed since the last scan, or still waiting for an unmonitor.
fn select<U: LeafUnit>(
    units: Vec<U>,
    granularity: Granularity,
    mode: ScanMode,
    state: &ProcessingState,
) -> Vec<U> {
    let since = match (mode, state.last_scan) {
        (ScanMode::Incremental, Some(since)) => since,
        _ => return units,
    };
    units
        .into_iter()
        .filter(|unit| {
            let Some(key) = UnitKey::leaf(granularity, unit.id()) else {
                return true;
            };
            !state.is_processed(&key) || state.is_pending(&key) || changed_since(unit, since)
        })
        .collect()
}

/// Runs scans over the enabled libraries.
pub struct Scanner {
    movies: Option<Arc<dyn MovieLibrary>>,
    series: Option<Arc<dyn SeriesLibrary>>,
    policy: DecisionPolicy,
    runner: BatchRunner,
    state: StateHandle,
    shutdown: Arc<AtomicBool>,
    season_filter: Option<u32>,
}

impl Scanner {
    pub fn new(state: StateHandle, targets: TargetGroups, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            movies: None,
            series: None,
            policy: DecisionPolicy::new(targets, state.clone(), shutdown.clone()),
            runner: BatchRunner::new(1, shutdown.clone()),
            state,
            shutdown,
            season_filter: None,
        }
    }

    /// Build a scanner with HTTP clients for every enabled service.
    pub fn from_config(
        config: &Config,
        state: StateHandle,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, ScanError> {
        let general = &config.general;
        let mut scanner = Self::new(
            state,
            TargetGroups::new(general.release_groups.iter()),
            shutdown,
        )
        .with_workers(general.concurrent)
        .with_season_filter(general.season_filter);

        if let Some(service) = config.services.enabled(ServiceKind::Radarr) {
            let client = RadarrClient::new(service, config.retry.clone())
                .map_err(|source| ScanError::Client {
                    service: ServiceKind::Radarr.to_string(),
                    source,
                })?
                .with_sample_size(general.sample_size);
            scanner = scanner.with_movie_library(Arc::new(client));
        }
        if let Some(service) = config.services.enabled(ServiceKind::Sonarr) {
            let client = SonarrClient::new(service, config.retry.clone())
                .map_err(|source| ScanError::Client {
                    service: ServiceKind::Sonarr.to_string(),
                    source,
                })?
                .with_sample_size(general.sample_size);
            scanner = scanner.with_series_library(Arc::new(client));
        }

        if scanner.movies.is_none() && scanner.series.is_none() {
            return Err(ScanError::NoServices);
        }
        Ok(scanner)
    }

    pub fn with_movie_library(mut self, library: Arc<dyn MovieLibrary>) -> Self {
        self.movies = Some(library);
        self
    }

    pub fn with_series_library(mut self, library: Arc<dyn SeriesLibrary>) -> Self {
        self.series = Some(library);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.runner = BatchRunner::new(workers, self.shutdown.clone());
        self
    }

    pub fn with_season_filter(mut self, season: Option<u32>) -> Self {
        self.season_filter = season;
        self
    }

    pub fn state(&self) -> &StateHandle {
        &self.state
    }

    fn interrupted(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Run one scan and commit state.
    ///
    /// With `force_full`, processed sets are cleared first so every unit is
    /// evaluated again; unmonitored sets are kept.
    pub async fn run(&self, mode: ScanMode, force_full: bool) -> Result<ScanReport, ScanError> {
        let started = Instant::now();
        let mut report = ScanReport::new(mode, self.state.is_dry_run());
        info!(%mode, dry_run = report.dry_run, force_full, "Starting scan");

        if force_full {
            self.state.reset_processed().await;
        }

        if let Some(library) = &self.movies {
            report.movies = Some(self.movie_pass(library, mode).await?);
        }
        if let Some(library) = &self.series {
            report.episodes = Some(self.series_pass(library, mode, &mut report.series).await?);
        }

        report.interrupted = self.interrupted();
        let scanned_at = Utc::now();
        self.state.commit(scanned_at).await?;

        let elapsed = started.elapsed();
        report.duration_ms = elapsed.as_millis() as u64;
        metrics::SCAN_DURATION
            .with_label_values(&[mode.as_str()])
            .observe(elapsed.as_secs_f64());
        metrics::LAST_SCAN_TIMESTAMP.set(scanned_at.timestamp());

        info!(
            %mode,
            unmonitored = report.total_unmonitored(),
            seasons = report.series.seasons_rolled_up,
            series = report.series.series_rolled_up,
            interrupted = report.interrupted,
            duration_ms = report.duration_ms,
            "Scan complete"
        );
        Ok(report)
    }

    async fn movie_pass(
        &self,
        library: &Arc<dyn MovieLibrary>,
        mode: ScanMode,
    ) -> Result<ServiceReport, ScanError> {
        let mut report = ServiceReport::new(library.name());

        let movies = match library.list_movies().await {
            Ok(movies) => movies,
            Err(e) => {
                warn!(service = library.name(), error = %e, "Failed to list movies, skipping service");
                report.listing_error = Some(e.to_string());
                return Ok(report);
            }
        };
        report.listed = movies.len();

        let snapshot = self.state.snapshot().await;
        let units = select(movies, Granularity::Movie, mode, &snapshot);
        info!(listed = report.listed, selected = units.len(), "Evaluating movies");

        let target = MovieTarget::new(library.clone());
        report.leaves = self.runner.run(&self.policy, &target, units).await;
        self.state.checkpoint().await?;

        Ok(report)
    }

    async fn series_pass(
        &self,
        library: &Arc<dyn SeriesLibrary>,
        mode: ScanMode,
        series_report: &mut SeriesPassReport,
    ) -> Result<ServiceReport, ScanError> {
        let mut report = ServiceReport::new(library.name());

        let all_series = match library.list_series().await {
            Ok(series) => series,
            Err(e) => {
                warn!(service = library.name(), error = %e, "Failed to list series, skipping service");
                report.listing_error = Some(e.to_string());
                return Ok(report);
            }
        };
        report.listed = all_series.len();
        info!(listed = report.listed, "Evaluating series");

        let target = EpisodeTarget::new(library.clone());
        let rollup = RollupEngine::new(library.clone(), self.state.clone(), self.shutdown.clone());

        for series in &all_series {
            if self.interrupted() {
                info!("Shutdown requested, stopping series pass");
                break;
            }
            self.scan_series(library, &target, &rollup, series, mode, &mut report, series_report)
                .await?;
        }

        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    async fn scan_series(
        &self,
        library: &Arc<dyn SeriesLibrary>,
        target: &EpisodeTarget,
        rollup: &RollupEngine,
        series: &Series,
        mode: ScanMode,
        report: &mut ServiceReport,
        series_report: &mut SeriesPassReport,
    ) -> Result<(), ScanError> {
        let key = UnitKey::Series(series.id);

        if self.state.is_unmonitored(key).await {
            debug!(series = %series.title, "Series already unmonitored, skipping");
            series_report.skipped += 1;
            return Ok(());
        }
        if !series.monitored {
            self.state.record_upstream_unmonitored(key).await;
            debug!(series = %series.title, "Series unmonitored upstream, recorded");
            series_report.reconciled += 1;
            return Ok(());
        }

        let episodes = match library.list_episodes(series.id, self.season_filter).await {
            Ok(episodes) => episodes,
            Err(e) => {
                warn!(series = %series.title, error = %e, "Failed to list episodes");
                series_report.failed += 1;
                return Ok(());
            }
        };

        let snapshot = self.state.snapshot().await;
        let units = select(episodes.clone(), Granularity::Episode, mode, &snapshot);

        let unchanged = mode == ScanMode::Incremental
            && units.is_empty()
            && snapshot.is_processed(&key)
            && !snapshot
                .last_scan
                .is_some_and(|since| series.added.is_some_and(|added| added > since));
        if unchanged {
            series_report.unchanged += 1;
            let effective = self.state.effective_snapshot().await;
            if rollup_pending(series.id, &episodes, &effective) {
                self.run_rollup(rollup, series, &episodes, series_report).await?;
            }
            return Ok(());
        }

        series_report.evaluated += 1;
        debug!(series = %series.title, episodes = units.len(), "Evaluating episodes");
        let batch = self.runner.run(&self.policy, target, units).await;

        if batch.not_started == 0 {
            self.state.mark_processed(key).await;
        }

        let effective = self.state.effective_snapshot().await;
        if batch.changed || rollup_pending(series.id, &episodes, &effective) {
            self.run_rollup(rollup, series, &episodes, series_report).await?;
        }

        report.leaves.absorb(&batch);
        self.state.checkpoint().await?;
        Ok(())
    }

    async fn run_rollup(
        &self,
        rollup: &RollupEngine,
        series: &Series,
        episodes: &[crate::media::Episode],
        series_report: &mut SeriesPassReport,
    ) -> Result<(), ScanError> {
        let outcome = rollup.roll_up(series, episodes).await?;
        series_report.seasons_rolled_up += outcome.seasons_unmonitored.len();
        series_report.series_rolled_up += usize::from(outcome.series_unmonitored);
        series_report.rollup_failures += outcome.failures;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{FileInfo, Movie};
    use chrono::TimeZone;

    fn movie(id: u64, added: Option<DateTime<Utc>>, file_added: Option<DateTime<Utc>>) -> Movie {
        let mut file = FileInfo::new(format!("/movies/{}-GRP.mkv", id));
        file.added_at = file_added;
        Movie {
            id,
            title: format!("Movie {}", id),
            monitored: true,
            has_file: true,
            added,
            file: Some(file),
        }
    }

    #[test]
    fn test_full_mode_selects_everything() {
        let mut state = ProcessingState::new();
        state.insert_processed(UnitKey::Movie(1));
        state.last_scan = Some(Utc::now());

        let selected = select(vec![movie(1, None, None)], Granularity::Movie, ScanMode::Full, &state);
        assert_eq!(selected.len(), 1);
    }

    #[test]
    fn test_incremental_selects_new_and_changed() {
        let last = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let before = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();

        let mut state = ProcessingState::new();
        state.last_scan = Some(last);
        state.insert_processed(UnitKey::Movie(1));
        state.insert_processed(UnitKey::Movie(2));
        state.insert_processed(UnitKey::Movie(3));
        state.insert_pending(UnitKey::Movie(5));

        let movies = vec![
            movie(1, Some(before), Some(before)), // unchanged
            movie(2, Some(after), None),          // re-added
            movie(3, Some(before), Some(after)),  // new file
            movie(4, Some(before), None),         // never processed
            movie(5, Some(before), Some(before)), // unmonitor still owed
        ];
        let ids: Vec<u64> = select(movies, Granularity::Movie, ScanMode::Incremental, &state)
            .iter()
            .map(|m| m.id)
            .collect();

        assert_eq!(ids, vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_incremental_without_last_scan_selects_everything() {
        let mut state = ProcessingState::new();
        state.insert_processed(UnitKey::Movie(1));

        let selected = select(
            vec![movie(1, None, None)],
            Granularity::Movie,
            ScanMode::Incremental,
            &state,
        );
        assert_eq!(selected.len(), 1);
    }

    #[test]
    fn test_from_config_requires_a_service() {
        let config = Config::default();
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(crate::state::JsonStateStore::new(dir.path().join("s.json")));
        let state = StateHandle::load(store, false);

        let result = Scanner::from_config(&config, state, Arc::new(AtomicBool::new(false)));
        assert!(matches!(result, Err(ScanError::NoServices)));
    }
}
