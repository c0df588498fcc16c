use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "DRIVE_MOVER_LOG";
const DEFAULT_DIRECTIVE: &str = "info";

/// Installs the stderr subscriber. Safe to call more than once; later calls
/// leave the first subscriber in place.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn env_filter() -> EnvFilter {
    filter_from(
        std::env::var(LOG_ENV).ok(),
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
    )
}

fn filter_from(own: Option<String>, rust_log: Option<String>) -> EnvFilter {
    [own, rust_log]
        .into_iter()
        .flatten()
        .filter(|directive| !directive.trim().is_empty())
        .find_map(|directive| EnvFilter::try_new(directive).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVE))
}
