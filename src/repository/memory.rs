use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use super::Repository;
use crate::error::{EvalError, Result};
use crate::state_machine::{
    FileType, NewProjectFile, NewRemark, PipelineKind, Project, ProjectFile, ProjectId,
    ProjectStatus, Remark,
};

#[derive(Default)]
struct Tables {
    next_id: i64,
    projects: BTreeMap<ProjectId, Project>,
    files: Vec<ProjectFile>,
    remarks: Vec<Remark>,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_file(&mut self, file: NewProjectFile) -> ProjectFile {
        let stored = ProjectFile {
            id: self.allocate_id(),
            project_id: file.project_id,
            filename: file.filename,
            original_name: file.original_name,
            file_path: file.file_path,
            file_size: file.file_size,
            extension: file.extension,
            file_type: file.file_type,
            uploaded_at: Utc::now(),
        };
        self.files.push(stored.clone());
        stored
    }
}

/// Repository held entirely in process memory.
///
/// One mutex covers every table, so the conditional transition is atomic
/// in the same sense the SQL `UPDATE ... WHERE status = 'ready'` is.
#[derive(Default)]
pub struct MemoryRepository {
    tables: Mutex<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create_project(&self, name: &str) -> Result<Project> {
        let mut tables = self.lock();
        let project = Project {
            id: tables.allocate_id(),
            name: name.to_string(),
            status: ProjectStatus::Ready,
            created_at: Utc::now(),
        };
        tables.projects.insert(project.id, project.clone());
        Ok(project)
    }

    async fn get_project(&self, id: ProjectId) -> Result<Project> {
        self.lock()
            .projects
            .get(&id)
            .cloned()
            .ok_or(EvalError::ProjectNotFound(id))
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        Ok(self.lock().projects.values().cloned().collect())
    }

    async fn try_begin(&self, id: ProjectId, kind: PipelineKind) -> Result<Project> {
        let mut tables = self.lock();
        let project = tables
            .projects
            .get_mut(&id)
            .ok_or(EvalError::ProjectNotFound(id))?;
        let next = kind.busy_status();
        if !project.status.can_transition_to(next) {
            return Err(EvalError::ProjectBusy {
                project_id: id,
                status: project.status,
            });
        }
        project.status = next;
        Ok(project.clone())
    }

    async fn set_status(&self, id: ProjectId, status: ProjectStatus) -> Result<()> {
        let mut tables = self.lock();
        let project = tables
            .projects
            .get_mut(&id)
            .ok_or(EvalError::ProjectNotFound(id))?;
        project.status = status;
        Ok(())
    }

    async fn create_project_file(&self, file: NewProjectFile) -> Result<ProjectFile> {
        let mut tables = self.lock();
        if !tables.projects.contains_key(&file.project_id) {
            return Err(EvalError::ProjectNotFound(file.project_id));
        }
        Ok(tables.insert_file(file))
    }

    async fn create_project_file_if_ready(&self, file: NewProjectFile) -> Result<ProjectFile> {
        let mut tables = self.lock();
        let status = tables
            .projects
            .get(&file.project_id)
            .ok_or(EvalError::ProjectNotFound(file.project_id))?
            .status;
        if status != ProjectStatus::Ready {
            return Err(EvalError::ProjectBusy {
                project_id: file.project_id,
                status,
            });
        }
        Ok(tables.insert_file(file))
    }

    async fn list_project_files(
        &self,
        project_id: ProjectId,
        file_type: Option<FileType>,
    ) -> Result<Vec<ProjectFile>> {
        Ok(self
            .lock()
            .files
            .iter()
            .rev()
            .filter(|f| f.project_id == project_id)
            .filter(|f| file_type.is_none_or(|t| f.file_type == t))
            .cloned()
            .collect())
    }

    async fn create_remark(&self, remark: NewRemark) -> Result<Remark> {
        let mut tables = self.lock();
        if !tables.projects.contains_key(&remark.project_id) {
            return Err(EvalError::ProjectNotFound(remark.project_id));
        }
        let stored = Remark {
            id: tables.allocate_id(),
            project_id: remark.project_id,
            direction: remark.direction,
            section: remark.section,
            subsection: remark.subsection,
            content: remark.content,
            created_at: Utc::now(),
        };
        tables.remarks.push(stored.clone());
        Ok(stored)
    }

    async fn list_remarks(&self, project_id: ProjectId) -> Result<Vec<Remark>> {
        Ok(self
            .lock()
            .remarks
            .iter()
            .rev()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect())
    }
}
