//! Relational-store capability.
//!
//! The conditional transition in [`Repository::try_begin`] is the only
//! concurrency guard for project processing; it is evaluated by the store
//! itself, never by in-process locks.

mod memory;
mod sqlite;

use async_trait::async_trait;

pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;

use crate::error::Result;
use crate::state_machine::{
    FileType, NewProjectFile, NewRemark, PipelineKind, Project, ProjectFile, ProjectId,
    ProjectStatus, Remark,
};

#[async_trait]
pub trait Repository: Send + Sync {
    /// Inserts a project in `Ready`.
    async fn create_project(&self, name: &str) -> Result<Project>;

    /// Fails with `ProjectNotFound` for unknown ids.
    async fn get_project(&self, id: ProjectId) -> Result<Project>;

    /// All projects, oldest first.
    async fn list_projects(&self) -> Result<Vec<Project>>;

    /// Atomically moves `Ready → kind.busy_status()`.
    ///
    /// Among concurrent callers for the same project at most one succeeds;
    /// the rest get `ProjectBusy`. Unknown ids get `ProjectNotFound`.
    async fn try_begin(&self, id: ProjectId, kind: PipelineKind) -> Result<Project>;

    /// Unconditional status write, used to release a project.
    async fn set_status(&self, id: ProjectId, status: ProjectStatus) -> Result<()>;

    async fn create_project_file(&self, file: NewProjectFile) -> Result<ProjectFile>;

    /// Records the file only if its project is `Ready`, checked in the same
    /// statement as the insert. `ProjectBusy` otherwise.
    async fn create_project_file_if_ready(&self, file: NewProjectFile) -> Result<ProjectFile>;

    /// Files of a project, newest first, optionally narrowed to one type.
    async fn list_project_files(
        &self,
        project_id: ProjectId,
        file_type: Option<FileType>,
    ) -> Result<Vec<ProjectFile>>;

    async fn latest_project_file(
        &self,
        project_id: ProjectId,
        file_type: FileType,
    ) -> Result<Option<ProjectFile>> {
        Ok(self
            .list_project_files(project_id, Some(file_type))
            .await?
            .into_iter()
            .next())
    }

    async fn create_remark(&self, remark: NewRemark) -> Result<Remark>;

    /// Bulk insert; backends may override this with a single transaction.
    async fn create_remarks(&self, remarks: Vec<NewRemark>) -> Result<usize> {
        let count = remarks.len();
        for remark in remarks {
            self.create_remark(remark).await?;
        }
        Ok(count)
    }

    /// Remarks of a project, newest first.
    async fn list_remarks(&self, project_id: ProjectId) -> Result<Vec<Remark>>;
}
