use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Settings shared by both services.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralConfig {
    /// Release groups whose files get unmonitored.
    /// Accepts a list, a comma separated string, or a mix of both.
    #[serde(default, deserialize_with = "deserialize_release_groups")]
    pub release_groups: Vec<String>,
    /// Compute and report decisions without changing anything remotely.
    #[serde(default)]
    pub dry_run: bool,
    /// Worker count for leaf-level decisions.
    #[serde(default = "default_concurrent")]
    pub concurrent: usize,
    /// Only look at the first N movies / series (0 = all).
    #[serde(default)]
    pub sample_size: usize,
    /// Restrict episode evaluation to one season number.
    #[serde(default)]
    pub season_filter: Option<u32>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            release_groups: Vec::new(),
            dry_run: false,
            concurrent: default_concurrent(),
            sample_size: 0,
            season_filter: None,
        }
    }
}

fn default_concurrent() -> usize {
    4
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReleaseGroupsRepr {
    Joined(String),
    List(Vec<String>),
}

fn deserialize_release_groups<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = match ReleaseGroupsRepr::deserialize(deserializer)? {
        ReleaseGroupsRepr::Joined(s) => vec![s],
        ReleaseGroupsRepr::List(list) => list,
    };
    Ok(split_release_groups(raw))
}

/// Flatten comma separated entries, trimming whitespace and dropping empties.
pub fn split_release_groups<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .flat_map(|entry| {
            entry
                .as_ref()
                .split(',')
                .map(|g| g.trim().to_string())
                .collect::<Vec<_>>()
        })
        .filter(|g| !g.is_empty())
        .collect()
}

/// Which external library manager a service section configures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Radarr,
    Sonarr,
}

impl ServiceKind {
    pub fn default_port(self) -> u16 {
        match self {
            ServiceKind::Radarr => 7878,
            ServiceKind::Sonarr => 8989,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceKind::Radarr => "radarr",
            ServiceKind::Sonarr => "sonarr",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServicesConfig {
    #[serde(default)]
    pub radarr: Option<ServiceConfig>,
    #[serde(default)]
    pub sonarr: Option<ServiceConfig>,
}

impl ServicesConfig {
    /// The section for `kind`, if present and enabled.
    pub fn enabled(&self, kind: ServiceKind) -> Option<&ServiceConfig> {
        let section = match kind {
            ServiceKind::Radarr => self.radarr.as_ref(),
            ServiceKind::Sonarr => self.sonarr.as_ref(),
        };
        section.filter(|s| s.enabled)
    }
}

/// Connection settings for one Radarr/Sonarr instance.
#[derive(Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_service_host")]
    pub host: String,
    /// Defaults to 7878 for Radarr and 8989 for Sonarr.
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default, alias = "apikey")]
    pub api_key: String,
    #[serde(default)]
    pub use_ssl: bool,
    /// Reverse proxy prefix, e.g. "/radarr".
    #[serde(default)]
    pub url_base: String,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
}

impl ServiceConfig {
    pub fn new(host: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            enabled: true,
            host: host.into(),
            port: None,
            api_key: api_key.into(),
            use_ssl: false,
            url_base: String::new(),
            timeout_secs: default_timeout(),
        }
    }

    pub fn port_for(&self, kind: ServiceKind) -> u16 {
        self.port.unwrap_or_else(|| kind.default_port())
    }

    /// Base URL of the v3 API, without trailing slash.
    pub fn api_url(&self, kind: ServiceKind) -> String {
        let scheme = if self.use_ssl { "https" } else { "http" };
        let base = self.url_base.trim_matches('/');
        if base.is_empty() {
            format!("{}://{}:{}/api/v3", scheme, self.host, self.port_for(kind))
        } else {
            format!(
                "{}://{}:{}/{}/api/v3",
                scheme,
                self.host,
                self.port_for(kind),
                base
            )
        }
    }
}

// API keys never end up in logs.
impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("enabled", &self.enabled)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("api_key_configured", &!self.api_key.is_empty())
            .field("use_ssl", &self.use_ssl)
            .field("url_base", &self.url_base)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

fn default_enabled() -> bool {
    true
}

fn default_service_host() -> String {
    "localhost".to_string()
}

fn default_timeout() -> u32 {
    30
}

/// Transport-level retry policy for read requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StateConfig {
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

fn default_state_path() -> PathBuf {
    PathBuf::from("unmonitarr_state.json")
}

/// Monitoring loop settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    /// Seconds between the start of two scans.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Delay before retrying after a fatal scan error.
    #[serde(default = "default_error_retry")]
    pub error_retry_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            error_retry_secs: default_error_retry(),
        }
    }
}

fn default_interval() -> u64 {
    3600
}

fn default_error_retry() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Directory for daily rotated log files (disabled when unset).
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Write Prometheus text format here after every scan.
    #[serde(default)]
    pub textfile: Option<PathBuf>,
}

/// Sanitized config for logging (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub release_groups: Vec<String>,
    pub dry_run: bool,
    pub concurrent: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radarr: Option<SanitizedServiceConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sonarr: Option<SanitizedServiceConfig>,
    pub state_path: PathBuf,
}

/// Service section with the API key hidden
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedServiceConfig {
    pub url: String,
    pub api_key_configured: bool,
    pub timeout_secs: u32,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        let sanitize = |kind: ServiceKind| {
            config
                .services
                .enabled(kind)
                .map(|s| SanitizedServiceConfig {
                    url: s.api_url(kind),
                    api_key_configured: !s.api_key.is_empty(),
                    timeout_secs: s.timeout_secs,
                })
        };

        Self {
            release_groups: config.general.release_groups.clone(),
            dry_run: config.general.dry_run,
            concurrent: config.general.concurrent,
            radarr: sanitize(ServiceKind::Radarr),
            sonarr: sanitize(ServiceKind::Sonarr),
            state_path: config.state.path.clone(),
        }
    }
}
