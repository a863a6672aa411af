use std::env::var;

use tracing::{level_filters::LevelFilter, warn};
use tracing_subscriber::{Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub use tracing_subscriber::util::TryInitError as InitError;

/// Environment variable selecting the output format (`json` or compact text)
const LOG_FORMAT_VAR: &str = "RUST_LOG_FORMAT";

/// Install the global subscriber at INFO, honouring `RUST_LOG`.
///
/// Panics if a global subscriber was already installed; use
/// [`try_init_with_level`] where that can happen.
pub fn init() {
    if let Err(error) = try_init_with_level(LevelFilter::INFO) {
        panic!("Failed to install tracing subscriber: {error}");
    }
}

/// Install the global subscriber with `level` as the default directive.
pub fn try_init_with_level(level: LevelFilter) -> Result<(), InitError> {
    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    let log_format = var(LOG_FORMAT_VAR).unwrap_or_default();

    let log_layer = match log_format.as_str() {
        "json" => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .with_filter(env_filter)
            .boxed(),
        "" | "compact" => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_filter(env_filter)
            .boxed(),
        other => {
            let layer = tracing_subscriber::fmt::layer().compact().with_filter(env_filter).boxed();
            tracing_subscriber::registry().with(layer).try_init()?;
            warn!("Unknown {LOG_FORMAT_VAR} '{other}', falling back to compact output");
            return Ok(());
        }
    };

    tracing_subscriber::registry().with(log_layer).try_init()
}
