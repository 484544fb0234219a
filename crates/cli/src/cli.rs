use std::path::PathBuf;

use clap::Parser;

use unmonitarr_core::Config;

/// Unmonitor Radarr/Sonarr media produced by selected release groups.
#[derive(Parser, Debug)]
#[command(name = "unmonitarr", version, about)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, env = "CONFIG_PATH", default_value = "unmonitarr.toml")]
    pub config: PathBuf,

    /// Keep running, scanning incrementally every interval
    #[arg(long, env = "MONITOR_MODE")]
    pub monitor: bool,

    /// Seconds between scans in monitor mode (overrides the config)
    #[arg(long, env = "MONITOR_INTERVAL")]
    pub interval: Option<u64>,

    /// Forget processed units and evaluate everything again
    #[arg(long)]
    pub force_full_scan: bool,

    /// Report what would change without touching Radarr/Sonarr
    #[arg(long)]
    pub dry_run: bool,

    /// Path to the state file (overrides the config)
    #[arg(long, env = "STATE_FILE")]
    pub state_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Fold command line overrides into the loaded configuration.
    pub fn apply(&self, config: &mut Config) {
        if self.dry_run {
            config.general.dry_run = true;
        }
        if let Some(path) = &self.state_file {
            config.state.path = path.clone();
        }
        if let Some(interval) = self.interval {
            config.monitor.interval_secs = interval;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["unmonitarr"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("unmonitarr.toml"));
        assert!(!cli.monitor);
        assert!(!cli.dry_run);
        assert!(cli.interval.is_none());
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "unmonitarr",
            "--config",
            "/config/unmonitarr.toml",
            "--monitor",
            "--interval",
            "600",
            "--force-full-scan",
            "--dry-run",
            "--state-file",
            "/data/state.json",
            "-v",
        ])
        .unwrap();

        assert!(cli.monitor);
        assert!(cli.force_full_scan);
        assert!(cli.verbose);
        assert_eq!(cli.interval, Some(600));
    }

    #[test]
    fn test_apply_overrides() {
        let cli = Cli::try_parse_from([
            "unmonitarr",
            "--dry-run",
            "--interval",
            "120",
            "--state-file",
            "/data/state.json",
        ])
        .unwrap();
        let mut config = Config::default();
        cli.apply(&mut config);

        assert!(config.general.dry_run);
        assert_eq!(config.monitor.interval_secs, 120);
        assert_eq!(config.state.path, PathBuf::from("/data/state.json"));
    }

    #[test]
    fn test_no_overrides_keep_config() {
        let cli = Cli::try_parse_from(["unmonitarr"]).unwrap();
        let mut config = Config::default();
        config.general.dry_run = true;
        cli.apply(&mut config);

        // --dry-run can only force dry-run on, never off
        assert!(config.general.dry_run);
        assert_eq!(config.monitor.interval_secs, 3600);
    }

    #[test]
    fn test_invalid_interval_rejected() {
        assert!(Cli::try_parse_from(["unmonitarr", "--interval", "soon"]).is_err());
    }
}
