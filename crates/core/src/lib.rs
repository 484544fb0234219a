pub mod arr;
pub mod config;
pub mod media;
pub mod metrics;
pub mod policy;
pub mod release_group;
pub mod rollup;
pub mod runner;
pub mod state;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use arr::{LibraryError, MovieLibrary, RadarrClient, SeriesLibrary, SonarrClient};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
    ServiceKind,
};
pub use policy::{Action, DecisionPolicy, EpisodeTarget, LeafTarget, MovieTarget};
pub use release_group::{extract_release_group, ReleaseGroup, ReleaseGroupExtractor, TargetGroups};
pub use runner::{BatchReport, BatchRunner, ScanError, ScanMode, ScanReport, Scanner};
pub use state::{JsonStateStore, ProcessingState, StateError, StateHandle, StateStore, UnitKey};
