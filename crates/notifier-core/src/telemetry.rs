//! Tracing initialization shared by every binary in the workspace.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Installs a global `tracing` subscriber. `RUST_LOG` takes precedence
/// over `default_level` when set. `json` switches to structured JSON
/// output for log aggregation; otherwise output is human-readable.
pub fn init_tracing(json: bool, default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let fmt_layer: Box<dyn Layer<_> + Send + Sync> = if json {
        Box::new(tracing_subscriber::fmt::layer().json().with_target(true))
    } else {
        Box::new(tracing_subscriber::fmt::layer().with_target(true))
    };

    let _ = tracing_subscriber::registry().with(filter).with(fmt_layer).try_init();
}
