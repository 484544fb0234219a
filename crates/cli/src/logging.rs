use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use unmonitarr_core::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "unmonitarr.log";

/// Filter from RUST_LOG, else `debug` when verbose, else the configured level.
fn env_filter(config: &LoggingConfig, verbose: bool) -> EnvFilter {
    if verbose {
        return EnvFilter::new("debug");
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be kept
/// alive for the lifetime of the process.
pub fn init(config: &LoggingConfig, verbose: bool) -> Option<WorkerGuard> {
    let mut guard = None;
    let file_layer = match &config.directory {
        Some(dir) => match std::fs::create_dir_all(dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
                let (writer, file_guard) = tracing_appender::non_blocking(appender);
                guard = Some(file_guard);
                Some(fmt::layer().with_writer(writer).with_ansi(false))
            }
            Err(e) => {
                eprintln!("Warning: failed to create log directory {}: {}", dir.display(), e);
                None
            }
        },
        None => None,
    };

    let json_layer = config
        .json
        .then(|| fmt::layer().json().with_writer(std::io::stderr));
    let plain_layer = (!config.json).then(|| fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(env_filter(config, verbose))
        .with(plain_layer)
        .with(json_layer)
        .with(file_layer)
        .init();

    guard
}
