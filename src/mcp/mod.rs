//! Model Context Protocol (MCP) server.
//!
//! Tool handlers resolve services from the shared [`Context`](crate::context::Context)
//! per call using `FromRef`.
//!
//! ## Modules
//!
//! - `server`: MCP server implementation with tool router
//! - `protocol`: response and logging helpers shared by tools
//! - `tools`: tool implementations organized by domain

pub(crate) mod protocol;
pub(crate) mod server;
pub mod tools;

pub use server::McpServer;
