//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of the library traits so that
//! whole scans can be exercised without a running Radarr or Sonarr.
//!
//! # Example
//!
//! ```rust,ignore
//! use unmonitarr_core::testing::{fixtures, MockSeriesLibrary};
//!
//! let sonarr = MockSeriesLibrary::new();
//! sonarr.add_series(fixtures::series_record(1, "Show", &[1, 2])).await;
//! sonarr.add_episode(fixtures::episode(10, 1, 1, 1, "Show.S01E01.GRP.mkv")).await;
//!
//! // run a scan, then
//! let mutations = sonarr.successful_mutations().await;
//! ```

mod mock_movie_library;
mod mock_series_library;

pub use mock_movie_library::MockMovieLibrary;
pub use mock_series_library::MockSeriesLibrary;

use crate::state::UnitKey;

/// A monitored-flag mutation seen by a mock library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedMutation {
    pub key: UnitKey,
    pub monitored: bool,
    pub succeeded: bool,
}

/// Test fixtures and helper functions.
pub mod fixtures {
    use serde_json::{json, Value};

    use crate::media::{Episode, EpisodeId, FileInfo, Movie, MovieId, SeriesId};

    /// A monitored movie. The mock decides whether it has a file.
    pub fn movie(id: MovieId, title: &str) -> Movie {
        Movie {
            id,
            title: title.to_string(),
            monitored: true,
            has_file: false,
            added: None,
            file: None,
        }
    }

    /// A monitored episode whose listing embeds its file.
    pub fn episode(
        id: EpisodeId,
        series_id: SeriesId,
        season_number: u32,
        episode_number: u32,
        path: &str,
    ) -> Episode {
        Episode {
            id,
            series_id,
            season_number,
            episode_number,
            title: format!("Episode {}", episode_number),
            monitored: true,
            has_file: true,
            episode_file_id: Some(id * 100),
            file: Some(FileInfo::new(path)),
        }
    }

    /// An episode with a file reference but no embedded file details.
    pub fn episode_without_embedded_file(
        id: EpisodeId,
        series_id: SeriesId,
        season_number: u32,
        episode_number: u32,
    ) -> Episode {
        Episode {
            file: None,
            ..episode(id, series_id, season_number, episode_number, "")
        }
    }

    /// A raw Sonarr series record with the given seasons, all monitored.
    ///
    /// Carries fields we never touch (`monitorNewItems`, `seasonFolder`,
    /// profile ids, tags) so preservation can be asserted.
    pub fn series_record(id: SeriesId, title: &str, seasons: &[u32]) -> Value {
        let seasons: Vec<Value> = seasons
            .iter()
            .map(|n| {
                json!({
                    "seasonNumber": n,
                    "monitored": true,
                    "statistics": {"episodeFileCount": 0}
                })
            })
            .collect();

        json!({
            "id": id,
            "title": title,
            "monitored": true,
            "monitorNewItems": "all",
            "seasonFolder": true,
            "qualityProfileId": 1,
            "languageProfileId": 1,
            "tags": [3, 5],
            "added": "2024-01-01T00:00:00Z",
            "seasons": seasons
        })
    }
}
