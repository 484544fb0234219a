//! Typed media records shared by the library clients, the decision policy and
//! the rollup engine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifiers assigned by the library managers.
pub type MovieId = u64;
pub type SeriesId = u64;
pub type EpisodeId = u64;
pub type FileId = u64;

/// Level at which processed/unmonitored membership is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Movie,
    Episode,
    Season,
    Series,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Movie => "movie",
            Granularity::Episode => "episode",
            Granularity::Season => "season",
            Granularity::Series => "series",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What we know about the file backing a movie or episode.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileInfo {
    pub path: Option<String>,
    pub added_at: Option<DateTime<Utc>>,
}

impl FileInfo {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            added_at: None,
        }
    }

    pub fn with_added_at(mut self, added_at: DateTime<Utc>) -> Self {
        self.added_at = Some(added_at);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Movie {
    pub id: MovieId,
    pub title: String,
    pub monitored: bool,
    pub has_file: bool,
    pub added: Option<DateTime<Utc>>,
    /// File details when the listing already embedded them.
    pub file: Option<FileInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Episode {
    pub id: EpisodeId,
    pub series_id: SeriesId,
    pub season_number: u32,
    pub episode_number: u32,
    pub title: String,
    pub monitored: bool,
    pub has_file: bool,
    pub episode_file_id: Option<FileId>,
    pub file: Option<FileInfo>,
}

impl Episode {
    /// `S01E02`-style code used in logs.
    pub fn code(&self) -> String {
        format!("S{:02}E{:02}", self.season_number, self.episode_number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Season {
    pub series_id: SeriesId,
    pub season_number: u32,
    pub monitored: bool,
    /// Number of episodes with files, as reported by the manager.
    pub episode_file_count: u32,
}

impl Season {
    pub fn is_specials(&self) -> bool {
        self.season_number == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub id: SeriesId,
    pub title: String,
    pub monitored: bool,
    pub added: Option<DateTime<Utc>>,
    pub seasons: Vec<Season>,
}

/// A leaf unit evaluated by the decision policy.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaUnit {
    Movie(Movie),
    Episode(Episode),
}

impl MediaUnit {
    pub fn granularity(&self) -> Granularity {
        match self {
            MediaUnit::Movie(_) => Granularity::Movie,
            MediaUnit::Episode(_) => Granularity::Episode,
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            MediaUnit::Movie(m) => m.id,
            MediaUnit::Episode(e) => e.id,
        }
    }
}

/// Common view over leaf units.
pub trait LeafUnit: Send + Sync {
    fn id(&self) -> u64;

    /// Human readable label for logs.
    fn label(&self) -> String;

    fn monitored(&self) -> bool;

    fn has_file(&self) -> bool;

    fn embedded_file(&self) -> Option<&FileInfo>;

    /// When the unit itself entered the library, if known.
    fn added(&self) -> Option<DateTime<Utc>> {
        None
    }
}

impl LeafUnit for Movie {
    fn id(&self) -> u64 {
        self.id
    }

    fn label(&self) -> String {
        self.title.clone()
    }

    fn monitored(&self) -> bool {
        self.monitored
    }

    fn has_file(&self) -> bool {
        self.has_file
    }

    fn embedded_file(&self) -> Option<&FileInfo> {
        self.file.as_ref()
    }

    fn added(&self) -> Option<DateTime<Utc>> {
        self.added
    }
}

impl LeafUnit for Episode {
    fn id(&self) -> u64 {
        self.id
    }

    fn label(&self) -> String {
        format!("{} {}", self.code(), self.title)
    }

    fn monitored(&self) -> bool {
        self.monitored
    }

    fn has_file(&self) -> bool {
        self.has_file && self.episode_file_id.is_some()
    }

    fn embedded_file(&self) -> Option<&FileInfo> {
        self.file.as_ref()
    }
}
