//! Mock series library for testing.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::arr::records::{seasons_of, SeriesResource};
use crate::arr::{apply_season_monitored, apply_series_monitored, LibraryError, SeriesLibrary};
use crate::media::{Episode, EpisodeId, FileId, FileInfo, Season, Series, SeriesId};
use crate::state::UnitKey;

use super::RecordedMutation;

/// Mock implementation of the SeriesLibrary trait.
///
/// Series are stored as raw JSON records and mutated with the same
/// read-modify-write helpers as the real client, so tests can assert that
/// unrelated fields survive. Season file counts are derived from the stored
/// episodes.
pub struct MockSeriesLibrary {
    series: Arc<RwLock<BTreeMap<SeriesId, Value>>>,
    episodes: Arc<RwLock<BTreeMap<EpisodeId, Episode>>>,
    files: Arc<RwLock<HashMap<FileId, FileInfo>>>,
    mutations: Arc<RwLock<Vec<RecordedMutation>>>,
    /// If set, the next mutation will fail with this error.
    next_error: Arc<RwLock<Option<LibraryError>>>,
    /// Units whose mutations always fail.
    failing: Arc<RwLock<HashSet<UnitKey>>>,
    list_error: Arc<RwLock<Option<LibraryError>>>,
    seasons_error: Arc<RwLock<Option<LibraryError>>>,
    lookup_error: Arc<RwLock<Option<LibraryError>>>,
    season_listings: Arc<AtomicUsize>,
}

impl std::fmt::Debug for MockSeriesLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSeriesLibrary")
            .field("series", &"<series>")
            .field("episodes", &"<episodes>")
            .field("mutations", &"<mutations>")
            .finish()
    }
}

impl Default for MockSeriesLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSeriesLibrary {
    /// Create an empty mock library.
    pub fn new() -> Self {
        Self {
            series: Arc::new(RwLock::new(BTreeMap::new())),
            episodes: Arc::new(RwLock::new(BTreeMap::new())),
            files: Arc::new(RwLock::new(HashMap::new())),
            mutations: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
            failing: Arc::new(RwLock::new(HashSet::new())),
            list_error: Arc::new(RwLock::new(None)),
            seasons_error: Arc::new(RwLock::new(None)),
            lookup_error: Arc::new(RwLock::new(None)),
            season_listings: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Add a raw series record (see [`fixtures::series_record`](super::fixtures::series_record)).
    pub async fn add_series(&self, record: Value) {
        let id = record.get("id").and_then(Value::as_u64).unwrap_or_default();
        self.series.write().await.insert(id, record);
    }

    pub async fn add_episode(&self, episode: Episode) {
        self.episodes.write().await.insert(episode.id, episode);
    }

    /// Register a file served by `episode_file` lookups.
    pub async fn add_episode_file(&self, file_id: FileId, file: FileInfo) {
        self.files.write().await.insert(file_id, file);
    }

    /// Current raw record of a series.
    pub async fn raw_series(&self, id: SeriesId) -> Option<Value> {
        self.series.read().await.get(&id).cloned()
    }

    pub async fn episode(&self, id: EpisodeId) -> Option<Episode> {
        self.episodes.read().await.get(&id).cloned()
    }

    /// Flip a series flag upstream without recording a mutation.
    pub async fn set_upstream_series_monitored(&self, id: SeriesId, monitored: bool) {
        if let Some(record) = self.series.write().await.get_mut(&id) {
            let _ = apply_series_monitored(record, monitored);
        }
    }

    /// Flip an episode flag upstream without recording a mutation.
    pub async fn set_upstream_episode_monitored(&self, id: EpisodeId, monitored: bool) {
        if let Some(ep) = self.episodes.write().await.get_mut(&id) {
            ep.monitored = monitored;
        }
    }

    /// All recorded mutation attempts, in order.
    pub async fn mutations(&self) -> Vec<RecordedMutation> {
        self.mutations.read().await.clone()
    }

    /// Mutations that succeeded.
    pub async fn successful_mutations(&self) -> Vec<RecordedMutation> {
        self.mutations
            .read()
            .await
            .iter()
            .filter(|m| m.succeeded)
            .cloned()
            .collect()
    }

    pub async fn clear_mutations(&self) {
        self.mutations.write().await.clear();
    }

    /// Make the next mutation fail.
    pub async fn set_next_error(&self, error: LibraryError) {
        *self.next_error.write().await = Some(error);
    }

    /// Make every mutation of `key` fail until [`clear_failures`](Self::clear_failures).
    pub async fn fail_mutations_for(&self, key: UnitKey) {
        self.failing.write().await.insert(key);
    }

    pub async fn clear_failures(&self) {
        self.failing.write().await.clear();
        *self.next_error.write().await = None;
    }

    pub async fn set_list_error(&self, error: Option<LibraryError>) {
        *self.list_error.write().await = error;
    }

    pub async fn set_seasons_error(&self, error: Option<LibraryError>) {
        *self.seasons_error.write().await = error;
    }

    /// How many times `list_seasons` was called.
    pub fn season_listings(&self) -> usize {
        self.season_listings.load(Ordering::SeqCst)
    }

    pub async fn set_lookup_error(&self, error: Option<LibraryError>) {
        *self.lookup_error.write().await = error;
    }

    async fn parse_series(&self, record: &Value) -> Result<Series, LibraryError> {
        let resource: SeriesResource = serde_json::from_value(record.clone())
            .map_err(|e| LibraryError::Parse(e.to_string()))?;
        let mut series = Series::from(resource);
        self.fill_file_counts(&mut series.seasons).await;
        Ok(series)
    }

    async fn fill_file_counts(&self, seasons: &mut [Season]) {
        let episodes = self.episodes.read().await;
        for season in seasons.iter_mut() {
            season.episode_file_count = episodes
                .values()
                .filter(|ep| {
                    ep.series_id == season.series_id
                        && ep.season_number == season.season_number
                        && ep.has_file
                })
                .count() as u32;
        }
    }

    /// Failure configured for the next mutation of `key`, if any.
    async fn injected_failure(&self, key: &UnitKey) -> Option<LibraryError> {
        if let Some(err) = self.next_error.write().await.take() {
            return Some(err);
        }
        if self.failing.read().await.contains(key) {
            return Some(LibraryError::Rejected {
                status: 500,
                message: "mock failure".to_string(),
            });
        }
        None
    }

    async fn record(&self, key: UnitKey, monitored: bool, result: &Result<(), LibraryError>) {
        self.mutations.write().await.push(RecordedMutation {
            key,
            monitored,
            succeeded: result.is_ok(),
        });
    }

    async fn with_series_record<F>(&self, series_id: SeriesId, edit: F) -> Result<(), LibraryError>
    where
        F: FnOnce(&mut Value) -> Result<(), LibraryError>,
    {
        let mut series = self.series.write().await;
        let record = series
            .get_mut(&series_id)
            .ok_or_else(|| LibraryError::NotFound(format!("series/{}", series_id)))?;
        // read-modify-write on a copy, like the real client
        let mut updated = record.clone();
        edit(&mut updated)?;
        *record = updated;
        Ok(())
    }
}

#[async_trait]
impl SeriesLibrary for MockSeriesLibrary {
    fn name(&self) -> &str {
        "mock-sonarr"
    }

    async fn list_series(&self) -> Result<Vec<Series>, LibraryError> {
        if let Some(err) = self.list_error.read().await.clone() {
            return Err(err);
        }
        let records: Vec<Value> = self.series.read().await.values().cloned().collect();
        let mut series = Vec::with_capacity(records.len());
        for record in &records {
            series.push(self.parse_series(record).await?);
        }
        Ok(series)
    }

    async fn list_seasons(&self, series_id: SeriesId) -> Result<Vec<Season>, LibraryError> {
        self.season_listings.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.seasons_error.read().await.clone() {
            return Err(err);
        }
        let record = self
            .raw_series(series_id)
            .await
            .ok_or_else(|| LibraryError::NotFound(format!("series/{}", series_id)))?;
        let resource: SeriesResource =
            serde_json::from_value(record).map_err(|e| LibraryError::Parse(e.to_string()))?;
        let mut seasons = seasons_of(series_id, resource.seasons);
        self.fill_file_counts(&mut seasons).await;
        Ok(seasons)
    }

    async fn list_episodes(
        &self,
        series_id: SeriesId,
        season_number: Option<u32>,
    ) -> Result<Vec<Episode>, LibraryError> {
        Ok(self
            .episodes
            .read()
            .await
            .values()
            .filter(|ep| ep.series_id == series_id && ep.has_file)
            .filter(|ep| season_number.map_or(true, |s| ep.season_number == s))
            .cloned()
            .collect())
    }

    async fn episode_file(&self, file_id: FileId) -> Result<Option<FileInfo>, LibraryError> {
        if let Some(err) = self.lookup_error.read().await.clone() {
            return Err(err);
        }
        Ok(self.files.read().await.get(&file_id).cloned())
    }

    async fn set_episode_monitored(
        &self,
        episode_id: EpisodeId,
        monitored: bool,
    ) -> Result<(), LibraryError> {
        let key = UnitKey::Episode(episode_id);
        let result = match self.injected_failure(&key).await {
            Some(err) => Err(err),
            None => match self.episodes.write().await.get_mut(&episode_id) {
                Some(ep) => {
                    ep.monitored = monitored;
                    Ok(())
                }
                None => Err(LibraryError::NotFound(format!("episode/{}", episode_id))),
            },
        };
        self.record(key, monitored, &result).await;
        result
    }

    async fn set_season_monitored(
        &self,
        series_id: SeriesId,
        season_number: u32,
        monitored: bool,
    ) -> Result<(), LibraryError> {
        let key = UnitKey::Season {
            series: series_id,
            season: season_number,
        };
        let result = match self.injected_failure(&key).await {
            Some(err) => Err(err),
            None => {
                self.with_series_record(series_id, |record| {
                    apply_season_monitored(record, season_number, monitored)
                })
                .await
            }
        };
        self.record(key, monitored, &result).await;
        result
    }

    async fn set_series_monitored(
        &self,
        series_id: SeriesId,
        monitored: bool,
    ) -> Result<(), LibraryError> {
        let key = UnitKey::Series(series_id);
        let result = match self.injected_failure(&key).await {
            Some(err) => Err(err),
            None => {
                self.with_series_record(series_id, |record| {
                    apply_series_monitored(record, monitored)
                })
                .await
            }
        };
        self.record(key, monitored, &result).await;
        result
    }
}
