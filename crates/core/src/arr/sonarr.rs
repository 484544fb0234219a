//! Sonarr v3 client.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::{RetryConfig, ServiceConfig, ServiceKind};
use crate::media::{Episode, EpisodeId, FileId, FileInfo, Season, Series, SeriesId};

use super::http::ApiTransport;
use super::records::{
    apply_monitored, apply_season_monitored, apply_series_monitored, seasons_of, EpisodeResource,
    FileResource, SeriesResource,
};
use super::{LibraryError, SeriesLibrary};

/// Sonarr client implementation.
pub struct SonarrClient {
    transport: ApiTransport,
    /// Truncate the series listing to this many items (0 = all).
    sample_size: usize,
}

impl SonarrClient {
    pub fn new(config: &ServiceConfig, retry: RetryConfig) -> Result<Self, LibraryError> {
        Ok(Self {
            transport: ApiTransport::new(ServiceKind::Sonarr, config, retry)?,
            sample_size: 0,
        })
    }

    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    async fn series_record(&self, series_id: SeriesId) -> Result<Value, LibraryError> {
        self.transport
            .get_json(&format!("series/{}", series_id))
            .await
    }
}

#[async_trait]
impl SeriesLibrary for SonarrClient {
    fn name(&self) -> &str {
        "sonarr"
    }

    async fn list_series(&self) -> Result<Vec<Series>, LibraryError> {
        let series: Vec<SeriesResource> = self.transport.get_json("series").await?;
        let total = series.len();

        let limit = if self.sample_size > 0 {
            self.sample_size
        } else {
            total
        };
        let series: Vec<Series> = series.into_iter().take(limit).map(Series::from).collect();

        if series.len() < total {
            info!(total, sampled = series.len(), "Limiting Sonarr series to sample size");
        }
        debug!(count = series.len(), "Fetched Sonarr series");
        Ok(series)
    }

    async fn list_seasons(&self, series_id: SeriesId) -> Result<Vec<Season>, LibraryError> {
        let series: SeriesResource = self
            .transport
            .get_json(&format!("series/{}", series_id))
            .await?;
        Ok(seasons_of(series.id, series.seasons))
    }

    async fn list_episodes(
        &self,
        series_id: SeriesId,
        season_number: Option<u32>,
    ) -> Result<Vec<Episode>, LibraryError> {
        let mut endpoint = format!("episode?seriesId={}&includeEpisodeFile=true", series_id);
        if let Some(season) = season_number {
            endpoint.push_str(&format!("&seasonNumber={}", season));
        }

        let episodes: Vec<EpisodeResource> = self.transport.get_json(&endpoint).await?;
        Ok(episodes
            .into_iter()
            .filter(|ep| ep.has_file)
            .map(Episode::from)
            .collect())
    }

    async fn episode_file(&self, file_id: FileId) -> Result<Option<FileInfo>, LibraryError> {
        match self
            .transport
            .get_json::<FileResource>(&format!("episodefile/{}", file_id))
            .await
        {
            Ok(file) => Ok(Some(file.into())),
            Err(LibraryError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn set_episode_monitored(
        &self,
        episode_id: EpisodeId,
        monitored: bool,
    ) -> Result<(), LibraryError> {
        let endpoint = format!("episode/{}", episode_id);
        let mut record: Value = self.transport.get_json(&endpoint).await?;
        apply_monitored(&mut record, monitored)?;
        self.transport.put_json(&endpoint, &record).await
    }

    async fn set_season_monitored(
        &self,
        series_id: SeriesId,
        season_number: u32,
        monitored: bool,
    ) -> Result<(), LibraryError> {
        let mut record = self.series_record(series_id).await?;
        apply_season_monitored(&mut record, season_number, monitored)?;
        self.transport
            .put_json(&format!("series/{}", series_id), &record)
            .await
    }

    async fn set_series_monitored(
        &self,
        series_id: SeriesId,
        monitored: bool,
    ) -> Result<(), LibraryError> {
        let mut record = self.series_record(series_id).await?;
        apply_series_monitored(&mut record, monitored)?;
        self.transport
            .put_json(&format!("series/{}", series_id), &record)
            .await
    }
}
