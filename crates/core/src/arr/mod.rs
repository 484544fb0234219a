//! Library manager abstraction.
//!
//! This module provides `MovieLibrary` and `SeriesLibrary` traits for the
//! remote managers whose monitored flags we prune, with Radarr and Sonarr v3
//! REST implementations.

mod http;
mod radarr;
pub(crate) mod records;
mod sonarr;

use async_trait::async_trait;
use thiserror::Error;

use crate::media::{
    Episode, EpisodeId, FileId, FileInfo, Movie, MovieId, Season, Series, SeriesId,
};

pub use http::ApiTransport;
pub use radarr::RadarrClient;
pub use records::{apply_monitored, apply_season_monitored, apply_series_monitored};
pub use sonarr::SonarrClient;

/// Errors from library manager operations.
#[derive(Debug, Clone, Error)]
pub enum LibraryError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Request rejected with HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Malformed record: {0}")]
    Malformed(String),
}

impl LibraryError {
    /// Whether a read may succeed if simply attempted again.
    pub fn is_retryable(&self) -> bool {
        match self {
            LibraryError::Timeout | LibraryError::Connection(_) => true,
            LibraryError::Rejected { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            LibraryError::Timeout => "timeout",
            LibraryError::Connection(_) => "connection",
            LibraryError::Rejected { .. } => "rejected",
            LibraryError::NotFound(_) => "not_found",
            LibraryError::Parse(_) => "parse",
            LibraryError::Malformed(_) => "malformed",
        }
    }
}

/// Movie manager capabilities (Radarr).
#[async_trait]
pub trait MovieLibrary: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &str;

    /// List every movie in the library.
    async fn list_movies(&self) -> Result<Vec<Movie>, LibraryError>;

    /// File details for a movie, `None` if the movie has no file.
    async fn movie_file(&self, movie_id: MovieId) -> Result<Option<FileInfo>, LibraryError>;

    /// Set the monitored flag, preserving every other field of the movie.
    async fn set_movie_monitored(&self, movie_id: MovieId, monitored: bool)
        -> Result<(), LibraryError>;
}

/// Series manager capabilities (Sonarr).
#[async_trait]
pub trait SeriesLibrary: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &str;

    /// List every series in the library.
    async fn list_series(&self) -> Result<Vec<Series>, LibraryError>;

    /// Current seasons of one series, freshly read.
    async fn list_seasons(&self, series_id: SeriesId) -> Result<Vec<Season>, LibraryError>;

    /// Episodes that have a file, optionally restricted to one season.
    async fn list_episodes(
        &self,
        series_id: SeriesId,
        season_number: Option<u32>,
    ) -> Result<Vec<Episode>, LibraryError>;

    /// File details for an episode file.
    async fn episode_file(&self, file_id: FileId) -> Result<Option<FileInfo>, LibraryError>;

    async fn set_episode_monitored(
        &self,
        episode_id: EpisodeId,
        monitored: bool,
    ) -> Result<(), LibraryError>;

    /// Flip one season's flag via a read-modify-write of the series record.
    async fn set_season_monitored(
        &self,
        series_id: SeriesId,
        season_number: u32,
        monitored: bool,
    ) -> Result<(), LibraryError>;

    /// Flip the series flag via a read-modify-write of the series record.
    ///
    /// Every other field, including the monitor-new-items setting, must be
    /// sent back unchanged.
    async fn set_series_monitored(
        &self,
        series_id: SeriesId,
        monitored: bool,
    ) -> Result<(), LibraryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LibraryError::Timeout.is_retryable());
        assert!(LibraryError::Connection("refused".into()).is_retryable());
        assert!(LibraryError::Rejected {
            status: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(LibraryError::Rejected {
            status: 429,
            message: String::new()
        }
        .is_retryable());
        assert!(!LibraryError::Rejected {
            status: 400,
            message: String::new()
        }
        .is_retryable());
        assert!(!LibraryError::NotFound("movie/1".into()).is_retryable());
        assert!(!LibraryError::Parse("bad".into()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = LibraryError::Rejected {
            status: 401,
            message: "Unauthorized".into(),
        };
        assert_eq!(err.to_string(), "Request rejected with HTTP 401: Unauthorized");
        assert_eq!(err.kind(), "rejected");
    }
}
