mod project;
mod state;

pub use project::{FileType, NewProjectFile, NewRemark, Project, ProjectFile, ProjectId, Remark};
pub use state::{ParseStatusError, PipelineKind, ProjectStatus};
