//! Standalone front-end server for development and interface testing:
//! serves the real HTTP surface against a simulated machine backend.

mod cli;
mod sim;

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use gantry_core::logging::{LogFormat, init_logging};
use gantry_web::{WebConfig, WebServer, WebState};

use crate::cli::Cli;
use crate::sim::SimMachine;

#[tokio::main]
async fn main() -> gantry_core::Result<()> {
    let cli = Cli::parse();

    let format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    init_logging(2u8.saturating_add(cli.verbose), cli.log_file.as_deref(), format)?;

    let config = WebConfig {
        web_dir: cli.web_dir,
        storage_dir: cli.storage_dir,
        cors_site: cli.cors,
        ..WebConfig::default()
    };
    info!(web_dir = %config.web_dir.display(), storage_dir = %config.storage_dir.display(), "configured");

    let machine = Arc::new(SimMachine::new(cli.password));
    let state = WebState::new(config, machine);

    let server = WebServer::bind(cli.bind, state).await?;
    server.run().await
}
