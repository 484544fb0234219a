//! Mock movie library for testing.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::arr::{LibraryError, MovieLibrary};
use crate::media::{FileInfo, Movie, MovieId};
use crate::state::UnitKey;

use super::RecordedMutation;

/// Mock implementation of the MovieLibrary trait.
///
/// Provides controllable behavior for testing:
/// - Serve a configurable set of movies and files
/// - Record every monitored-flag mutation
/// - Simulate listing, lookup and mutation failures
///
/// Successful mutations are applied to the stored movie, so a later scan
/// sees the new upstream flag.
pub struct MockMovieLibrary {
    movies: Arc<RwLock<BTreeMap<MovieId, Movie>>>,
    files: Arc<RwLock<HashMap<MovieId, FileInfo>>>,
    mutations: Arc<RwLock<Vec<RecordedMutation>>>,
    /// If set, the next mutation will fail with this error.
    next_error: Arc<RwLock<Option<LibraryError>>>,
    /// Movies whose mutations always fail.
    failing: Arc<RwLock<HashSet<MovieId>>>,
    list_error: Arc<RwLock<Option<LibraryError>>>,
    lookup_error: Arc<RwLock<Option<LibraryError>>>,
}

impl std::fmt::Debug for MockMovieLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockMovieLibrary")
            .field("movies", &"<movies>")
            .field("mutations", &"<mutations>")
            .finish()
    }
}

impl Default for MockMovieLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMovieLibrary {
    /// Create an empty mock library.
    pub fn new() -> Self {
        Self {
            movies: Arc::new(RwLock::new(BTreeMap::new())),
            files: Arc::new(RwLock::new(HashMap::new())),
            mutations: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
            failing: Arc::new(RwLock::new(HashSet::new())),
            list_error: Arc::new(RwLock::new(None)),
            lookup_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Add a movie, optionally backed by a file at `path`.
    pub async fn add_movie(&self, mut movie: Movie, path: Option<&str>) {
        movie.has_file = path.is_some();
        if let Some(path) = path {
            self.files
                .write()
                .await
                .insert(movie.id, FileInfo::new(path));
        }
        self.movies.write().await.insert(movie.id, movie);
    }

    /// Current upstream record of a movie.
    pub async fn movie(&self, id: MovieId) -> Option<Movie> {
        self.movies.read().await.get(&id).cloned()
    }

    /// Flip the upstream flag without recording a mutation.
    pub async fn set_upstream_monitored(&self, id: MovieId, monitored: bool) {
        if let Some(movie) = self.movies.write().await.get_mut(&id) {
            movie.monitored = monitored;
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

    /// Make every mutation of `id` fail until [`clear_failures`](Self::clear_failures).
    pub async fn fail_mutations_for(&self, id: MovieId) {
        self.failing.write().await.insert(id);
    }

    pub async fn clear_failures(&self) {
        self.failing.write().await.clear();
        *self.next_error.write().await = None;
    }

    pub async fn set_list_error(&self, error: Option<LibraryError>) {
        *self.list_error.write().await = error;
    }

    pub async fn set_lookup_error(&self, error: Option<LibraryError>) {
        *self.lookup_error.write().await = error;
    }
}

#[async_trait]
impl MovieLibrary for MockMovieLibrary {
    fn name(&self) -> &str {
        "mock-radarr"
    }

    async fn list_movies(&self) -> Result<Vec<Movie>, LibraryError> {
        if let Some(err) = self.list_error.read().await.clone() {
            return Err(err);
        }
        Ok(self.movies.read().await.values().cloned().collect())
    }

    async fn movie_file(&self, movie_id: MovieId) -> Result<Option<FileInfo>, LibraryError> {
        if let Some(err) = self.lookup_error.read().await.clone() {
            return Err(err);
        }
        Ok(self.files.read().await.get(&movie_id).cloned())
    }

    async fn set_movie_monitored(
        &self,
        movie_id: MovieId,
        monitored: bool,
    ) -> Result<(), LibraryError> {
        let mut error = self.next_error.write().await.take();
        if error.is_none() && self.failing.read().await.contains(&movie_id) {
            error = Some(LibraryError::Rejected {
                status: 500,
                message: "mock failure".to_string(),
            });
        }

        let result = match error {
            Some(err) => Err(err),
            None => match self.movies.write().await.get_mut(&movie_id) {
                Some(movie) => {
                    movie.monitored = monitored;
                    Ok(())
                }
                None => Err(LibraryError::NotFound(format!("movie/{}", movie_id))),
            },
        };

        self.mutations.write().await.push(RecordedMutation {
            key: UnitKey::Movie(movie_id),
            monitored,
            succeeded: result.is_ok(),
        });
        result
    }
}
