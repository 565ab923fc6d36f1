#![cfg(not(tarpaulin_include))]

use exambank::app;
use exambank::config::AppConfig;

/// Main entry point for the question bank API server.
///
/// Loads the configuration (file plus `EXAMBANK_*` overrides), opens the
/// store and serves the JSON API on the configured bind address.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    exambank::init_logging();
    let config = AppConfig::load()?;
    app::run(config).await
}
