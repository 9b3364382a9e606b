//! Action execution protocol.
//!
//! - Tool registry built once and shared read-only (`Arc<ToolRegistry>`)
//! - Argument validation against each tool's declared schema
//! - Deadline-bounded execution with bounded re-issue on timeout
//! - Confirmation mode (`propose` / `commit` / `reject`)
//! - Artifact persistence through the [`ArtifactSink`] port

pub mod errors;
mod executor;
mod registry;
pub mod schema;
mod sink;
pub mod types;

pub use errors::*;
pub use executor::ActionExecutor;
pub use registry::{Executable, FnTool, ToolFactory, ToolRegistry, ToolRegistryBuilder};
pub use schema::{ArgField, ArgKind, ArgSchema, ToolSpec};
pub use sink::{artifact_location, ArtifactSink, MemorySink, DIFF_DIR, DOM_DIR, SCREENSHOT_DIR};
pub use types::*;
