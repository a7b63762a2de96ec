//! incert CLI - inject CA certificates into container images.

pub mod args;

use incert_core::error::Result;
use incert_engine::{OciRegistry, Pipeline, PipelineReport};
use tracing_subscriber::EnvFilter;

pub use args::Cli;

/// Install the stderr subscriber. `RUST_LOG` overrides the `warn` default.
pub fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Run one injection against the registries named by `cli`.
pub async fn execute(cli: Cli) -> Result<PipelineReport> {
    let registry =
        OciRegistry::new(&cli.insecure_registries).with_max_index_depth(cli.max_index_depth);
    let config = cli.into_run_config()?;

    tracing::info!(
        version = incert_engine::VERSION,
        source = %config.source,
        destination = %config.destination,
        "Starting incert"
    );
    Pipeline::new(registry).run(&config).await
}
