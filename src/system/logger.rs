use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Variable checked before `RUST_LOG` for a log filter.
pub const LOG_ENV: &str = "LOADFLEET_LOG";

/// Installs the global subscriber. Later calls keep the first subscriber.
pub fn init_logging(verbose: bool, no_color: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = std::env::var(LOG_ENV)
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .and_then(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new(fallback));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_ansi(!no_color)
        .with_target(verbose)
        .finish();

    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set global default subscriber: {}", err);
    }
}
