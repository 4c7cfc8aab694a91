//! wagate - Main entry point.

use anyhow::Result;
use wagate_common::config::Config;
use wagate_common::logging::init_logging_with_exclusions;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load_and_validate()?;

    init_logging_with_exclusions(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    tracing::info!("wagate v{}", env!("CARGO_PKG_VERSION"));

    wagate_api::start_server(config).await
}
