//! MCP tool implementations organized by domain.

pub mod memory;
pub mod search;
pub mod status;
