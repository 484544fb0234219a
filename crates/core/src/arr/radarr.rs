//! Radarr v3 client.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::{RetryConfig, ServiceConfig, ServiceKind};
use crate::media::{FileInfo, Movie, MovieId};

use super::http::ApiTransport;
use super::records::{apply_monitored, FileResource, MovieResource};
use super::{LibraryError, MovieLibrary};

/// Radarr client implementation.
pub struct RadarrClient {
    transport: ApiTransport,
    /// Truncate listings to this many items (0 = all).
    sample_size: usize,
}

impl RadarrClient {
    pub fn new(config: &ServiceConfig, retry: RetryConfig) -> Result<Self, LibraryError> {
        Ok(Self {
            transport: ApiTransport::new(ServiceKind::Radarr, config, retry)?,
            sample_size: 0,
        })
    }

    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }
}

#[async_trait]
impl MovieLibrary for RadarrClient {
    fn name(&self) -> &str {
        "radarr"
    }

    async fn list_movies(&self) -> Result<Vec<Movie>, LibraryError> {
        let movies: Vec<MovieResource> = self.transport.get_json("movie").await?;
        let total = movies.len();

        let limit = if self.sample_size > 0 {
            self.sample_size
        } else {
            total
        };
        let movies: Vec<Movie> = movies.into_iter().take(limit).map(Movie::from).collect();

        if movies.len() < total {
            info!(total, sampled = movies.len(), "Limiting Radarr movies to sample size");
        }
        debug!(count = movies.len(), "Fetched Radarr movies");
        Ok(movies)
    }

    async fn movie_file(&self, movie_id: MovieId) -> Result<Option<FileInfo>, LibraryError> {
        let files: Vec<FileResource> = self
            .transport
            .get_json(&format!("moviefile?movieId={}", movie_id))
            .await?;
        Ok(files.into_iter().next().map(FileInfo::from))
    }

    async fn set_movie_monitored(
        &self,
        movie_id: MovieId,
        monitored: bool,
    ) -> Result<(), LibraryError> {
        let endpoint = format!("movie/{}", movie_id);
        let mut record: Value = self.transport.get_json(&endpoint).await?;
        apply_monitored(&mut record, monitored)?;
        self.transport.put_json(&endpoint, &record).await
    }
}
