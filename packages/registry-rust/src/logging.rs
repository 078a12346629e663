//! Tracing subscriber setup for binaries embedding the registry.
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is left to the application. `RUST_LOG` overrides the default filter.

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber.
///
/// `default_filter` applies when `RUST_LOG` is unset, e.g.
/// `"info,longops_registry=debug"`. With `json` set, events are written as
/// one JSON object per line instead of the human-readable format.
///
/// # Errors
///
/// Fails if `default_filter` does not parse or a global subscriber is
/// already installed.
pub fn init_tracing(default_filter: &str, json: bool) -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)
            .with_context(|| format!("invalid log filter {default_filter:?}"))?,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .try_init()
        .context("tracing subscriber already installed")?;
    Ok(())
}
