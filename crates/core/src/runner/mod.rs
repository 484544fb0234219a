//! Scan orchestration.
//!
//! - [`BatchRunner`]: bounded-concurrency leaf decisions
//! - [`Scanner`]: one full or incremental pass over every enabled service
//! - [`ScanReport`]: what a scan did

mod batch;
mod report;
mod scan;

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::arr::LibraryError;
use crate::state::StateError;

pub use batch::{BatchReport, BatchRunner};
pub use report::{ScanReport, SeriesPassReport, ServiceReport};
pub use scan::Scanner;

/// Which units a scan looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Every unit.
    Full,
    /// Units not yet processed, or added since the last scan.
    Incremental,
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::Full => "full",
            ScanMode::Incremental => "incremental",
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that abort a scan.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Failed to persist state: {0}")]
    State(#[from] StateError),

    #[error("Failed to create {service} client: {source}")]
    Client {
        service: String,
        #[source]
        source: LibraryError,
    },

    #[error("No library service enabled")]
    NoServices,
}
