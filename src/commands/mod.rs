//! CLI command implementations.
//!
//! Each command is implemented in its own module.
//! Commands orchestrate the various library components to perform user tasks.

pub mod diff;
pub mod models;
pub mod profile;
pub mod record;
pub mod render;
pub mod summary;
pub mod utils;

// Re-export main command functions
pub use diff::execute_diff;
pub use models::{
    DiffArgs, OutputTargets, ProfileArgs, RecordArgs, RenderArgs, RenderOptions, RunSummary,
    SummaryArgs,
};
pub use profile::execute_profile;
pub use record::{execute_record, run_workload};
pub use render::execute_render;
pub use summary::execute_summary;
pub use utils::display_version;
