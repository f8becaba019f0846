//! Check command handler.

use color_eyre::Result;

use crate::config::Config;
use crate::context::Context;
use crate::di::FromRef;
use crate::services::StatusService;

use super::App;

impl App {
    /// Probe every component and print the report as JSON on stdout.
    pub async fn run_check(&self, config: Config) -> Result<()> {
        let ctx = Context::from_config(config).await?;
        let report = StatusService::from_ref(&ctx).test_connection().await;

        println!("{}", serde_json::to_string_pretty(&report)?);

        if report.all_ok() {
            Ok(())
        } else {
            Err(color_eyre::eyre::eyre!("One or more components are unavailable"))
        }
    }
}
