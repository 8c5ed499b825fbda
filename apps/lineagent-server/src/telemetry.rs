//! Logging initialization

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::Args;

/// Install the tracing subscriber; `RUST_LOG` overrides `--log-level`
pub fn init_telemetry(args: &Args) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("Failed to create environment filter")?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if args.json_logs {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).compact())
            .try_init()
    };

    installed.context("Failed to install tracing subscriber")
}
