use chrono::{DateTime, Utc};
use serde::Serialize;

use super::batch::BatchReport;
use super::ScanMode;

/// Per-service section of a scan report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServiceReport {
    pub service: String,
    /// Top-level items listed (movies or series).
    pub listed: usize,
    /// Leaf decisions for this service.
    pub leaves: BatchReport,
    /// Set when the top-level listing failed and the service was skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing_error: Option<String>,
}

impl ServiceReport {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Default::default()
        }
    }
}

/// Series-level bookkeeping.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SeriesPassReport {
    pub evaluated: usize,
    /// Already recorded unmonitored.
    pub skipped: usize,
    /// Unchanged since the last scan (incremental mode).
    pub unchanged: usize,
    /// Found unmonitored upstream and recorded.
    pub reconciled: usize,
    /// Episode listing failed.
    pub failed: usize,
    pub seasons_rolled_up: usize,
    pub series_rolled_up: usize,
    pub rollup_failures: usize,
}

/// Summary of one scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub mode: ScanMode,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub dry_run: bool,
    pub interrupted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub movies: Option<ServiceReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episodes: Option<ServiceReport>,
    pub series: SeriesPassReport,
}

impl ScanReport {
    pub fn new(mode: ScanMode, dry_run: bool) -> Self {
        Self {
            mode,
            started_at: Utc::now(),
            duration_ms: 0,
            dry_run,
            interrupted: false,
            movies: None,
            episodes: None,
            series: SeriesPassReport::default(),
        }
    }

    /// Unmonitors across every level, including rollups.
    pub fn total_unmonitored(&self) -> usize {
        let leaves = [&self.movies, &self.episodes]
            .iter()
            .filter_map(|s| s.as_ref())
            .map(|s| s.leaves.unmonitored)
            .sum::<usize>();
        leaves + self.series.seasons_rolled_up + self.series.series_rolled_up
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_unmonitored() {
        let mut report = ScanReport::new(ScanMode::Full, false);
        let mut movies = ServiceReport::new("radarr");
        movies.leaves.unmonitored = 2;
        report.movies = Some(movies);
        report.series.seasons_rolled_up = 1;
        report.series.series_rolled_up = 1;

        assert_eq!(report.total_unmonitored(), 4);
    }

    #[test]
    fn test_report_serializes() {
        let report = ScanReport::new(ScanMode::Incremental, true);
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["mode"], "incremental");
        assert_eq!(json["dry_run"], true);
        assert!(json.get("movies").is_none());
    }
}
