//! Tracing-based structured logging.
//!
//! A `tracing_subscriber::fmt` layer filtered by `EnvFilter`, built once
//! by the host before the first `do_work`. Unlike the hot-path modules,
//! this is explicitly *not* called from inside the tick loop.

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::reload;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, Registry};

/// Handle returned by [`init`] that lets the `LogLevel` property push a
/// new filter directive at runtime without restarting the process.
pub type ReloadHandle = reload::Handle<EnvFilter, Registry>;

/// Install the global subscriber. `initial_level` seeds the filter from
/// the `LogLevel` property's starting value (itself sourced from
/// `LOG_LEVEL`, default `info`).
pub fn init(initial_level: &str) -> ReloadHandle {
    let filter = EnvFilter::try_new(initial_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, handle) = reload::Layer::new(filter);
    let subscriber = Registry::default().with(filter).with(fmt::layer());
    subscriber.init();
    handle
}

/// Apply a new `LogLevel` property write to the live filter. Errors are
/// swallowed into a `warn!` log: a bad filter string shouldn't take down
/// the property write that requested it; a rejected filter string is
/// logged, not escalated.
pub fn set_level(handle: &ReloadHandle, level: &str) {
    match EnvFilter::try_new(level) {
        Ok(filter) => {
            if handle.reload(filter).is_err() {
                tracing::warn!(level, "failed to reload log filter: subscriber already dropped");
            }
        }
        Err(err) => {
            tracing::warn!(level, error = %err, "invalid LogLevel directive, keeping previous filter");
        }
    }
}
