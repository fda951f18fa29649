mod project;
mod tm_entry;
mod workflow;

pub use project::{ProjectRecord, ProjectStatus};
pub use tm_entry::{TMEntry, TMKey};
pub use workflow::WorkflowRecord;
