//! Init command handler.

use color_eyre::Result;

use crate::config::Config;
use crate::context::Context;

use super::App;

impl App {
    /// Create constraints and indexes in the configured store.
    pub async fn run_init(&self, config: Config) -> Result<()> {
        let dimensions = config.embedder.dimensions;
        let ctx = Context::from_config(config).await?;

        tracing::info!(
            backend = ctx.store.backend(),
            dimensions,
            "Building graph indexes..."
        );
        let report = ctx.store.build_indices(dimensions).await?;

        tracing::info!(applied = report.applied, "Graph indexes ready");
        for statement in &report.skipped {
            tracing::warn!(statement = %statement, "Index not created");
        }
        Ok(())
    }
}
