//! Persisted processing state.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::media::{EpisodeId, Granularity, MovieId, SeriesId};

use super::StateError;

/// Current on-disk format version.
pub const STATE_VERSION: &str = "2.0";

/// Identifies one unit at one granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKey {
    Movie(MovieId),
    Episode(EpisodeId),
    Season { series: SeriesId, season: u32 },
    Series(SeriesId),
}

impl UnitKey {
    pub fn granularity(&self) -> Granularity {
        match self {
            UnitKey::Movie(_) => Granularity::Movie,
            UnitKey::Episode(_) => Granularity::Episode,
            UnitKey::Season { .. } => Granularity::Season,
            UnitKey::Series(_) => Granularity::Series,
        }
    }

    /// Key for a leaf unit of the given granularity.
    pub fn leaf(granularity: Granularity, id: u64) -> Option<Self> {
        match granularity {
            Granularity::Movie => Some(UnitKey::Movie(id)),
            Granularity::Episode => Some(UnitKey::Episode(id)),
            _ => None,
        }
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitKey::Movie(id) => write!(f, "movie {}", id),
            UnitKey::Episode(id) => write!(f, "episode {}", id),
            UnitKey::Season { series, season } => write!(f, "series {} season {}", series, season),
            UnitKey::Series(id) => write!(f, "series {}", id),
        }
    }
}

/// Accepts RFC 3339 as well as naive ISO timestamps (taken as UTC).
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovieServiceState {
    #[serde(default)]
    pub processed_ids: BTreeSet<MovieId>,
    #[serde(default)]
    pub unmonitored_ids: BTreeSet<MovieId>,
    /// Targeted but still monitored upstream: a rejected or simulated
    /// unmonitor. Re-selected by incremental scans.
    #[serde(default)]
    pub pending_ids: BTreeSet<MovieId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeServiceState {
    /// Series ids.
    #[serde(default)]
    pub processed_ids: BTreeSet<SeriesId>,
    /// Series ids.
    #[serde(default)]
    pub unmonitored_ids: BTreeSet<SeriesId>,
    #[serde(default)]
    pub processed_episode_ids: BTreeSet<EpisodeId>,
    #[serde(default)]
    pub unmonitored_episode_ids: BTreeSet<EpisodeId>,
    #[serde(default)]
    pub pending_episode_ids: BTreeSet<EpisodeId>,
    #[serde(default)]
    pub processed_seasons: BTreeMap<SeriesId, BTreeSet<u32>>,
    #[serde(default)]
    pub unmonitored_seasons: BTreeMap<SeriesId, BTreeSet<u32>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMetadata {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    /// Older files kept the scan time here.
    #[serde(default, deserialize_with = "lenient_timestamp", skip_serializing)]
    pub last_scan: Option<DateTime<Utc>>,
}

fn default_version() -> String {
    STATE_VERSION.to_string()
}

impl Default for StateMetadata {
    fn default() -> Self {
        Self {
            version: default_version(),
            created_at: Some(Utc::now()),
            last_scan: None,
        }
    }
}

/// The durable record of what has been evaluated and what is unmonitored.
///
/// For every granularity `unmonitored` is a subset of `processed`.
/// [`normalize`](Self::normalize) restores that after loading and
/// [`check_invariants`](Self::check_invariants) guards every save.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingState {
    #[serde(rename = "movie-service", alias = "radarr", default)]
    pub movies: MovieServiceState,
    #[serde(rename = "episode-service", alias = "sonarr", default)]
    pub episodes: EpisodeServiceState,
    #[serde(default)]
    pub metadata: StateMetadata,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub last_scan: Option<DateTime<Utc>>,
}

impl ProcessingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_processed(&self, key: &UnitKey) -> bool {
        match *key {
            UnitKey::Movie(id) => self.movies.processed_ids.contains(&id),
            UnitKey::Episode(id) => self.episodes.processed_episode_ids.contains(&id),
            UnitKey::Season { series, season } => self
                .episodes
                .processed_seasons
                .get(&series)
                .is_some_and(|s| s.contains(&season)),
            UnitKey::Series(id) => self.episodes.processed_ids.contains(&id),
        }
    }

    pub fn is_unmonitored(&self, key: &UnitKey) -> bool {
        match *key {
            UnitKey::Movie(id) => self.movies.unmonitored_ids.contains(&id),
            UnitKey::Episode(id) => self.episodes.unmonitored_episode_ids.contains(&id),
            UnitKey::Season { series, season } => self
                .episodes
                .unmonitored_seasons
                .get(&series)
                .is_some_and(|s| s.contains(&season)),
            UnitKey::Series(id) => self.episodes.unmonitored_ids.contains(&id),
        }
    }

    /// Returns true if the key was not yet processed.
    pub fn insert_processed(&mut self, key: UnitKey) -> bool {
        match key {
            UnitKey::Movie(id) => self.movies.processed_ids.insert(id),
            UnitKey::Episode(id) => self.episodes.processed_episode_ids.insert(id),
            UnitKey::Season { series, season } => self
                .episodes
                .processed_seasons
                .entry(series)
                .or_default()
                .insert(season),
            UnitKey::Series(id) => self.episodes.processed_ids.insert(id),
        }
    }

    /// Whether a leaf unit is waiting for an unmonitor that has not reached
    /// the remote yet.
    pub fn is_pending(&self, key: &UnitKey) -> bool {
        match *key {
            UnitKey::Movie(id) => self.movies.pending_ids.contains(&id),
            UnitKey::Episode(id) => self.episodes.pending_episode_ids.contains(&id),
            _ => false,
        }
    }

    /// Record a targeted leaf unit whose unmonitor did not happen. The unit
    /// is processed, and stays selectable until the unmonitor lands.
    /// Returns false for non-leaf keys.
    pub fn insert_pending(&mut self, key: UnitKey) -> bool {
        self.insert_processed(key);
        match key {
            UnitKey::Movie(id) => self.movies.pending_ids.insert(id),
            UnitKey::Episode(id) => self.episodes.pending_episode_ids.insert(id),
            _ => false,
        }
    }

    /// Returns true if the key was pending.
    pub fn clear_pending(&mut self, key: &UnitKey) -> bool {
        match *key {
            UnitKey::Movie(id) => self.movies.pending_ids.remove(&id),
            UnitKey::Episode(id) => self.episodes.pending_episode_ids.remove(&id),
            _ => false,
        }
    }

    /// Record a unit as unmonitored. It is always recorded as processed too,
    /// and is no longer pending.
    /// Returns true if the key was not yet unmonitored.
    pub fn insert_unmonitored(&mut self, key: UnitKey) -> bool {
        self.insert_processed(key);
        self.clear_pending(&key);
        match key {
            UnitKey::Movie(id) => self.movies.unmonitored_ids.insert(id),
            UnitKey::Episode(id) => self.episodes.unmonitored_episode_ids.insert(id),
            UnitKey::Season { series, season } => self
                .episodes
                .unmonitored_seasons
                .entry(series)
                .or_default()
                .insert(season),
            UnitKey::Series(id) => self.episodes.unmonitored_ids.insert(id),
        }
    }

    /// Seasons of a series recorded unmonitored.
    pub fn unmonitored_seasons(&self, series: SeriesId) -> BTreeSet<u32> {
        self.episodes
            .unmonitored_seasons
            .get(&series)
            .cloned()
            .unwrap_or_default()
    }

    /// Repair a freshly loaded state: fold unmonitored and pending entries
    /// into the processed sets, drop pending entries that are already
    /// unmonitored, drop empty season entries and pick up a legacy scan
    /// timestamp.
    pub fn normalize(&mut self) {
        let movies = &mut self.movies;
        movies
            .processed_ids
            .extend(movies.unmonitored_ids.iter().copied());
        let unmonitored = &movies.unmonitored_ids;
        movies.pending_ids.retain(|id| !unmonitored.contains(id));
        movies.processed_ids.extend(movies.pending_ids.iter().copied());

        let eps = &mut self.episodes;
        eps.processed_ids.extend(eps.unmonitored_ids.iter().copied());
        eps.processed_episode_ids
            .extend(eps.unmonitored_episode_ids.iter().copied());
        let unmonitored = &eps.unmonitored_episode_ids;
        eps.pending_episode_ids.retain(|id| !unmonitored.contains(id));
        eps.processed_episode_ids
            .extend(eps.pending_episode_ids.iter().copied());
        eps.unmonitored_seasons.retain(|_, seasons| !seasons.is_empty());
        for (series, seasons) in &eps.unmonitored_seasons {
            eps.processed_seasons
                .entry(*series)
                .or_default()
                .extend(seasons.iter().copied());
        }
        eps.processed_seasons.retain(|_, seasons| !seasons.is_empty());

        if self.last_scan.is_none() {
            self.last_scan = self.metadata.last_scan.take();
        }
    }

    /// Verify `unmonitored ⊆ processed` at every granularity.
    pub fn check_invariants(&self) -> Result<(), StateError> {
        let violation = |granularity: Granularity, id: String| {
            Err(StateError::InvariantViolation(format!(
                "{} {} is unmonitored but not processed",
                granularity, id
            )))
        };

        if let Some(id) = self
            .movies
            .unmonitored_ids
            .difference(&self.movies.processed_ids)
            .next()
        {
            return violation(Granularity::Movie, id.to_string());
        }
        if let Some(id) = self
            .episodes
            .unmonitored_episode_ids
            .difference(&self.episodes.processed_episode_ids)
            .next()
        {
            return violation(Granularity::Episode, id.to_string());
        }
        if let Some(id) = self
            .episodes
            .unmonitored_ids
            .difference(&self.episodes.processed_ids)
            .next()
        {
            return violation(Granularity::Series, id.to_string());
        }
        if let Some(id) = self
            .movies
            .pending_ids
            .difference(&self.movies.processed_ids)
            .next()
        {
            return violation(Granularity::Movie, format!("{} (pending)", id));
        }
        if let Some(id) = self
            .episodes
            .pending_episode_ids
            .difference(&self.episodes.processed_episode_ids)
            .next()
        {
            return violation(Granularity::Episode, format!("{} (pending)", id));
        }
        for (series, seasons) in &self.episodes.unmonitored_seasons {
            let processed = self.episodes.processed_seasons.get(series);
            if let Some(season) = seasons
                .iter()
                .find(|s| !processed.is_some_and(|p| p.contains(*s)))
            {
                return violation(Granularity::Season, format!("{}/{}", series, season));
            }
        }
        Ok(())
    }

    /// Forget what has been evaluated while keeping what is known to be
    /// unmonitored upstream.
    pub fn reset_processed(&mut self) {
        self.movies.processed_ids = self.movies.unmonitored_ids.clone();
        self.movies.pending_ids.clear();
        self.episodes.pending_episode_ids.clear();
        self.episodes.processed_ids = self.episodes.unmonitored_ids.clone();
        self.episodes.processed_episode_ids = self.episodes.unmonitored_episode_ids.clone();
        self.episodes.processed_seasons = self.episodes.unmonitored_seasons.clone();
    }

    /// Copy every unmonitored entry of `other` into this state.
    pub fn merge_unmonitored(&mut self, other: &ProcessingState) {
        for id in &other.movies.unmonitored_ids {
            self.insert_unmonitored(UnitKey::Movie(*id));
        }
        for id in &other.episodes.unmonitored_episode_ids {
            self.insert_unmonitored(UnitKey::Episode(*id));
        }
        for id in &other.episodes.unmonitored_ids {
            self.insert_unmonitored(UnitKey::Series(*id));
        }
        for (series, seasons) in &other.episodes.unmonitored_seasons {
            for season in seasons {
                self.insert_unmonitored(UnitKey::Season {
                    series: *series,
                    season: *season,
                });
            }
        }
    }

    pub fn summary(&self) -> StateSummary {
        StateSummary::from(self)
    }
}

fn ratio(unmonitored: usize, processed: usize) -> f64 {
    if processed == 0 {
        0.0
    } else {
        unmonitored as f64 / processed as f64
    }
}

/// Derived counts written alongside the state for operators. Never read back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSummary {
    pub movies_processed: usize,
    pub movies_unmonitored: usize,
    pub movies_unmonitored_ratio: f64,
    pub series_processed: usize,
    pub series_unmonitored: usize,
    pub series_unmonitored_ratio: f64,
    pub episodes_processed: usize,
    pub episodes_unmonitored: usize,
    pub episodes_unmonitored_ratio: f64,
    pub seasons_processed: usize,
    pub seasons_unmonitored: usize,
    pub series_with_unmonitored_seasons: usize,
}

impl From<&ProcessingState> for StateSummary {
    fn from(state: &ProcessingState) -> Self {
        let m = &state.movies;
        let e = &state.episodes;
        let seasons_processed = e.processed_seasons.values().map(BTreeSet::len).sum();
        let seasons_unmonitored = e.unmonitored_seasons.values().map(BTreeSet::len).sum();

        Self {
            movies_processed: m.processed_ids.len(),
            movies_unmonitored: m.unmonitored_ids.len(),
            movies_unmonitored_ratio: ratio(m.unmonitored_ids.len(), m.processed_ids.len()),
            series_processed: e.processed_ids.len(),
            series_unmonitored: e.unmonitored_ids.len(),
            series_unmonitored_ratio: ratio(e.unmonitored_ids.len(), e.processed_ids.len()),
            episodes_processed: e.processed_episode_ids.len(),
            episodes_unmonitored: e.unmonitored_episode_ids.len(),
            episodes_unmonitored_ratio: ratio(
                e.unmonitored_episode_ids.len(),
                e.processed_episode_ids.len(),
            ),
            seasons_processed,
            seasons_unmonitored,
            series_with_unmonitored_seasons: e.unmonitored_seasons.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmonitored_implies_processed() {
        let mut state = ProcessingState::new();
        assert!(state.insert_unmonitored(UnitKey::Season {
            series: 1,
            season: 2
        }));
        assert!(state.is_processed(&UnitKey::Season {
            series: 1,
            season: 2
        }));
        assert!(!state.insert_unmonitored(UnitKey::Season {
            series: 1,
            season: 2
        }));
        state.check_invariants().unwrap();
    }

    #[test]
    fn test_check_invariants_detects_violation() {
        let mut state = ProcessingState::new();
        state.episodes.unmonitored_episode_ids.insert(5);
        let err = state.check_invariants().unwrap_err();
        assert!(err.to_string().contains("episode 5"));

        state.normalize();
        state.check_invariants().unwrap();
    }

    #[test]
    fn test_reset_keeps_unmonitored() {
        let mut state = ProcessingState::new();
        state.insert_processed(UnitKey::Movie(1));
        state.insert_unmonitored(UnitKey::Movie(2));
        state.insert_processed(UnitKey::Episode(10));
        state.insert_unmonitored(UnitKey::Season {
            series: 3,
            season: 1,
        });

        state.reset_processed();

        assert!(!state.is_processed(&UnitKey::Movie(1)));
        assert!(state.is_unmonitored(&UnitKey::Movie(2)));
        assert!(!state.is_processed(&UnitKey::Episode(10)));
        assert_eq!(state.unmonitored_seasons(3), BTreeSet::from([1]));
        state.check_invariants().unwrap();
    }

    #[test]
    fn test_pending_lifecycle() {
        let mut state = ProcessingState::new();
        assert!(state.insert_pending(UnitKey::Episode(3)));
        assert!(state.is_processed(&UnitKey::Episode(3)));
        assert!(state.is_pending(&UnitKey::Episode(3)));
        assert!(!state.insert_pending(UnitKey::Series(1)));

        state.insert_unmonitored(UnitKey::Episode(3));
        assert!(!state.is_pending(&UnitKey::Episode(3)));

        state.insert_pending(UnitKey::Movie(4));
        state.reset_processed();
        assert!(!state.is_pending(&UnitKey::Movie(4)));
        state.check_invariants().unwrap();
    }

    #[test]
    fn test_normalize_drops_pending_already_unmonitored() {
        let json = r#"{
            "movie-service": {"processed_ids": [], "unmonitored_ids": [1], "pending_ids": [1, 2]}
        }"#;
        let mut state: ProcessingState = serde_json::from_str(json).unwrap();
        assert!(state.check_invariants().is_err());

        state.normalize();
        assert!(!state.is_pending(&UnitKey::Movie(1)));
        assert!(state.is_pending(&UnitKey::Movie(2)));
        assert!(state.is_processed(&UnitKey::Movie(2)));
        state.check_invariants().unwrap();
    }

    #[test]
    fn test_legacy_layout_loads() {
        let json = r#"{
            "metadata": {"version": "1.0", "created_at": "2024-01-02T03:04:05.123456", "last_scan": "2024-02-01T00:00:00"},
            "radarr": {"processed_ids": [1, 2], "unmonitored_ids": [2], "summary": {"total_processed": 2}},
            "sonarr": {
                "processed_ids": [7],
                "processed_episode_ids": [],
                "unmonitored_ids": [],
                "unmonitored_episode_ids": [70, 71],
                "unmonitored_seasons": {"7": [1], "8": []}
            }
        }"#;
        let mut state: ProcessingState = serde_json::from_str(json).unwrap();
        state.normalize();

        assert!(state.is_unmonitored(&UnitKey::Movie(2)));
        assert!(state.is_processed(&UnitKey::Episode(70)));
        assert!(state.is_unmonitored(&UnitKey::Season {
            series: 7,
            season: 1
        }));
        assert!(!state.episodes.unmonitored_seasons.contains_key(&8));
        assert!(state.last_scan.is_some());
        assert!(state.metadata.created_at.is_some());
        state.check_invariants().unwrap();
    }

    #[test]
    fn test_serialized_layout_uses_service_keys() {
        let mut state = ProcessingState::new();
        state.insert_unmonitored(UnitKey::Season {
            series: 4,
            season: 2,
        });
        let value = serde_json::to_value(&state).unwrap();
        assert!(value.get("movie-service").is_some());
        assert_eq!(
            value["episode-service"]["unmonitored_seasons"]["4"],
            serde_json::json!([2])
        );
        assert!(value["metadata"].get("last_scan").is_none());
    }

    #[test]
    fn test_merge_unmonitored() {
        let mut base = ProcessingState::new();
        let mut overlay = ProcessingState::new();
        overlay.insert_unmonitored(UnitKey::Series(9));
        overlay.insert_unmonitored(UnitKey::Episode(90));

        base.merge_unmonitored(&overlay);
        assert!(base.is_unmonitored(&UnitKey::Series(9)));
        assert!(base.is_unmonitored(&UnitKey::Episode(90)));
    }

    #[test]
    fn test_summary_ratios() {
        let mut state = ProcessingState::new();
        state.insert_processed(UnitKey::Movie(1));
        state.insert_unmonitored(UnitKey::Movie(2));
        let summary = state.summary();
        assert_eq!(summary.movies_processed, 2);
        assert_eq!(summary.movies_unmonitored_ratio, 0.5);
        assert_eq!(summary.episodes_unmonitored_ratio, 0.0);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp("2024-05-01T10:00:00Z").is_some());
        assert!(parse_timestamp("2024-05-01T10:00:00+02:00").is_some());
        assert!(parse_timestamp("2024-05-01T10:00:00.5").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }
}
