//! CLI module for ollama-memory.
//!
//! Subcommands:
//! - `mcp`: Run the MCP server (stdio transport)
//! - `serve`: Run the MCP server (HTTP transport)
//! - `init`: Create graph constraints and indexes
//! - `check`: Test connectivity and print a JSON report

mod check;
mod init;
mod mcp;
mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;

/// ollama-memory - knowledge-graph memory for AI assistants
#[derive(Parser)]
#[command(name = "ollama-memory")]
#[command(about = "Knowledge-graph memory MCP server backed by Neo4j and Ollama")]
#[command(version)]
pub struct App {
    /// Run in verbose mode
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file (TOML, or JSON with a .json extension)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the MCP server (stdio transport for local use)
    Mcp,

    /// Run the MCP server (HTTP transport for remote access)
    Serve {
        /// Host address to bind to (default: server.host)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (default: server.port)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Create graph constraints and indexes
    Init,

    /// Test Neo4j and Ollama connectivity
    Check,
}

impl App {
    /// Load configuration for this invocation.
    pub fn load_config(&self) -> color_eyre::Result<Config> {
        Ok(Config::load(self.config.as_deref())?)
    }

    /// Run the CLI application.
    pub async fn run(self, config: Config) -> color_eyre::Result<()> {
        match self.command {
            Command::Mcp => self.run_mcp(config).await,
            Command::Serve { ref host, port } => {
                let host = host.clone().unwrap_or_else(|| config.server.host.clone());
                let port = port.unwrap_or(config.server.port);
                self.run_serve(config, &host, port).await
            }
            Command::Init => self.run_init(config).await,
            Command::Check => self.run_check(config).await,
        }
    }
}
