//! Wire records of the v3 API and pure read-modify-write helpers.
//!
//! Mutations never go through these typed records: they edit the raw
//! `serde_json::Value` read from the server so that fields we do not model
//! survive the round trip untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::media::{Episode, FileInfo, Movie, Season, Series, SeriesId};

use super::LibraryError;

fn lenient_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FileResource {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub relative_path: Option<String>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub date_added: Option<DateTime<Utc>>,
}

impl From<FileResource> for FileInfo {
    fn from(file: FileResource) -> Self {
        let path = file
            .path
            .filter(|p| !p.trim().is_empty())
            .or(file.relative_path.filter(|p| !p.trim().is_empty()));
        FileInfo {
            path,
            added_at: file.date_added,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MovieResource {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub monitored: bool,
    #[serde(default)]
    pub has_file: bool,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub added: Option<DateTime<Utc>>,
    #[serde(default)]
    pub movie_file: Option<FileResource>,
}

impl From<MovieResource> for Movie {
    fn from(movie: MovieResource) -> Self {
        Movie {
            id: movie.id,
            title: movie.title,
            monitored: movie.monitored,
            has_file: movie.has_file,
            added: movie.added,
            file: movie.movie_file.map(FileInfo::from),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SeasonStatistics {
    #[serde(default)]
    pub episode_file_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SeasonResource {
    pub season_number: u32,
    #[serde(default)]
    pub monitored: bool,
    #[serde(default)]
    pub statistics: Option<SeasonStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SeriesResource {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub monitored: bool,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub added: Option<DateTime<Utc>>,
    #[serde(default)]
    pub seasons: Vec<SeasonResource>,
}

pub(crate) fn seasons_of(series_id: SeriesId, seasons: Vec<SeasonResource>) -> Vec<Season> {
    seasons
        .into_iter()
        .map(|s| Season {
            series_id,
            season_number: s.season_number,
            monitored: s.monitored,
            episode_file_count: s.statistics.unwrap_or_default().episode_file_count,
        })
        .collect()
}

impl From<SeriesResource> for Series {
    fn from(series: SeriesResource) -> Self {
        Series {
            id: series.id,
            title: series.title,
            monitored: series.monitored,
            added: series.added,
            seasons: seasons_of(series.id, series.seasons),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EpisodeResource {
    pub id: u64,
    pub series_id: u64,
    #[serde(default)]
    pub season_number: u32,
    #[serde(default)]
    pub episode_number: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub monitored: bool,
    #[serde(default)]
    pub has_file: bool,
    #[serde(default)]
    pub episode_file_id: u64,
    #[serde(default)]
    pub episode_file: Option<FileResource>,
}

impl From<EpisodeResource> for Episode {
    fn from(ep: EpisodeResource) -> Self {
        Episode {
            id: ep.id,
            series_id: ep.series_id,
            season_number: ep.season_number,
            episode_number: ep.episode_number,
            title: ep.title,
            monitored: ep.monitored,
            has_file: ep.has_file,
            // the API reports 0 for "no file"
            episode_file_id: (ep.episode_file_id != 0).then_some(ep.episode_file_id),
            file: ep.episode_file.map(FileInfo::from),
        }
    }
}

/// Set the top-level `monitored` flag of a movie, episode or series record.
pub fn apply_monitored(record: &mut Value, monitored: bool) -> Result<(), LibraryError> {
    let object = record
        .as_object_mut()
        .ok_or_else(|| LibraryError::Malformed("record is not a JSON object".to_string()))?;
    object.insert("monitored".to_string(), Value::Bool(monitored));
    Ok(())
}

/// Series rollup only flips the series flag. Seasons and the
/// monitor-new-items setting are left as they are.
pub fn apply_series_monitored(record: &mut Value, monitored: bool) -> Result<(), LibraryError> {
    apply_monitored(record, monitored)
}

/// Set `monitored` on one entry of the record's `seasons` array.
pub fn apply_season_monitored(
    record: &mut Value,
    season_number: u32,
    monitored: bool,
) -> Result<(), LibraryError> {
    let seasons = record
        .get_mut("seasons")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| LibraryError::Malformed("series record has no seasons".to_string()))?;

    let season = seasons
        .iter_mut()
        .find(|s| s.get("seasonNumber").and_then(Value::as_u64) == Some(season_number as u64))
        .ok_or_else(|| LibraryError::NotFound(format!("season {}", season_number)))?;

    apply_monitored(season, monitored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn series_record() -> Value {
        json!({
            "id": 7,
            "title": "Show",
            "monitored": true,
            "monitorNewItems": "all",
            "seasonFolder": true,
            "qualityProfileId": 4,
            "seasons": [
                {"seasonNumber": 0, "monitored": false, "statistics": {"episodeFileCount": 0}},
                {"seasonNumber": 1, "monitored": true, "statistics": {"episodeFileCount": 3}},
            ],
        })
    }

    #[test]
    fn test_series_monitored_preserves_other_fields() {
        let before = series_record();
        let mut after = before.clone();
        apply_series_monitored(&mut after, false).unwrap();

        assert_eq!(after["monitored"], json!(false));
        let mut restored = after.clone();
        restored["monitored"] = json!(true);
        assert_eq!(restored, before);
        assert_eq!(after["monitorNewItems"], json!("all"));
    }

    #[test]
    fn test_season_monitored_touches_one_season() {
        let mut record = series_record();
        apply_season_monitored(&mut record, 1, false).unwrap();
        assert_eq!(record["seasons"][1]["monitored"], json!(false));
        assert_eq!(record["seasons"][0]["monitored"], json!(false));
        assert_eq!(record["monitored"], json!(true));
        assert_eq!(record["seasons"][1]["statistics"]["episodeFileCount"], json!(3));
    }

    #[test]
    fn test_season_missing() {
        let mut record = series_record();
        let err = apply_season_monitored(&mut record, 9, false).unwrap_err();
        assert!(matches!(err, LibraryError::NotFound(_)));

        let mut not_series = json!([1, 2]);
        assert!(matches!(
            apply_season_monitored(&mut not_series, 1, false),
            Err(LibraryError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_series_resource() {
        let series: Series = serde_json::from_value::<SeriesResource>(series_record())
            .unwrap()
            .into();
        assert_eq!(series.id, 7);
        assert_eq!(series.seasons.len(), 2);
        assert_eq!(series.seasons[1].episode_file_count, 3);
        assert_eq!(series.seasons[1].series_id, 7);
    }

    #[test]
    fn test_parse_episode_without_file() {
        let ep: Episode = serde_json::from_value::<EpisodeResource>(json!({
            "id": 3,
            "seriesId": 7,
            "seasonNumber": 1,
            "episodeNumber": 2,
            "hasFile": false,
            "episodeFileId": 0,
            "monitored": true
        }))
        .unwrap()
        .into();
        assert_eq!(ep.episode_file_id, None);
        assert!(ep.file.is_none());
    }

    #[test]
    fn test_parse_movie_with_embedded_file_and_bad_date() {
        let movie: Movie = serde_json::from_value::<MovieResource>(json!({
            "id": 1,
            "title": "Movie",
            "monitored": true,
            "hasFile": true,
            "added": "not a date",
            "movieFile": {
                "id": 5,
                "relativePath": "Movie.2020-GRP.mkv",
                "dateAdded": "2024-03-01T10:00:00Z"
            }
        }))
        .unwrap()
        .into();
        assert!(movie.added.is_none());
        let file = movie.file.unwrap();
        assert_eq!(file.path.as_deref(), Some("Movie.2020-GRP.mkv"));
        assert!(file.added_at.is_some());
    }
}
