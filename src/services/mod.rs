//! Business logic for the memory tools.
//!
//! Services hold `Arc` handles to the store and model clients and are
//! resolved from [`Context`](crate::context::Context) via
//! [`FromRef`](crate::di::FromRef).

pub mod extraction;
pub mod memory;
pub mod search;
pub mod status;

pub use extraction::{Extraction, ExtractionService, ExtractionStatus};
pub use memory::{AddMemoryResult, GroupLocks, MemoryService, NewEpisode};
pub use search::SearchService;
pub use status::{ConnectionReport, StatusService};
