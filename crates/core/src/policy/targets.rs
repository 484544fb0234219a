use std::sync::Arc;

use async_trait::async_trait;

use crate::arr::{LibraryError, MovieLibrary, SeriesLibrary};
use crate::media::{Episode, FileInfo, Granularity, LeafUnit, Movie};

use super::LeafTarget;

fn embedded(file: Option<&FileInfo>) -> Option<FileInfo> {
    file.filter(|f| f.path.as_deref().is_some_and(|p| !p.is_empty()))
        .cloned()
}

/// Movies tracked by a movie library.
#[derive(Clone)]
pub struct MovieTarget {
    library: Arc<dyn MovieLibrary>,
}

impl MovieTarget {
    pub fn new(library: Arc<dyn MovieLibrary>) -> Self {
        Self { library }
    }
}

#[async_trait]
impl LeafTarget for MovieTarget {
    type Unit = Movie;

    fn granularity(&self) -> Granularity {
        Granularity::Movie
    }

    async fn file_info(&self, unit: &Movie) -> Result<Option<FileInfo>, LibraryError> {
        if let Some(file) = embedded(unit.embedded_file()) {
            return Ok(Some(file));
        }
        self.library.movie_file(unit.id).await
    }

    async fn unmonitor(&self, unit: &Movie) -> Result<(), LibraryError> {
        self.library.set_movie_monitored(unit.id, false).await
    }
}

/// Episodes tracked by a series library.
#[derive(Clone)]
pub struct EpisodeTarget {
    library: Arc<dyn SeriesLibrary>,
}

impl EpisodeTarget {
    pub fn new(library: Arc<dyn SeriesLibrary>) -> Self {
        Self { library }
    }
}

#[async_trait]
impl LeafTarget for EpisodeTarget {
    type Unit = Episode;

    fn granularity(&self) -> Granularity {
        Granularity::Episode
    }

    async fn file_info(&self, unit: &Episode) -> Result<Option<FileInfo>, LibraryError> {
        if let Some(file) = embedded(unit.embedded_file()) {
            return Ok(Some(file));
        }
        match unit.episode_file_id {
            Some(file_id) => self.library.episode_file(file_id).await,
            None => Ok(None),
        }
    }

    async fn unmonitor(&self, unit: &Episode) -> Result<(), LibraryError> {
        self.library.set_episode_monitored(unit.id, false).await
    }
}
