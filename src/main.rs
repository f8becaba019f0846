//! ollama-memory binary entry point.

use clap::Parser;

use ollama_memory::cli::App;
use ollama_memory::logging;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let app = App::parse();
    let config = app.load_config()?;
    let _log_guard = logging::init(&config.logging, app.verbose)?;

    tracing::info!(config = %config.summary(), "Loaded configuration");

    app.run(config).await
}
