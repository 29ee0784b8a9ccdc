//! Project/file operations exposed to collaborators (HTTP layer, CLI).
//!
//! Every operation that starts work goes through [`Repository::try_begin`];
//! when the task cannot be queued the project is put back to `Ready`
//! before the call returns.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{EvalError, Result};
use crate::pipeline::{PipelineContext, ProjectProcessorTask};
use crate::rag::ChecklistReport;
use crate::repository::Repository;
use crate::state_machine::{
    FileType, NewProjectFile, PipelineKind, Project, ProjectFile, ProjectId, ProjectStatus,
};
use crate::storage::{ObjectStorage, content_type_for, file_extension};
use crate::tasks::{TaskManager, TaskStats};

const MAX_PROJECT_NAME_CHARS: usize = 255;

/// Result of an upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadReceipt {
    pub file: ProjectFile,
    /// `true` when the upload started a pipeline (remarks).
    pub processing: bool,
}

/// A generated document and where to fetch it.
#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub file: ProjectFile,
    pub url: String,
}

pub struct ProjectService {
    ctx: PipelineContext,
    tasks: Arc<TaskManager>,
}

impl ProjectService {
    pub fn new(ctx: PipelineContext, tasks: Arc<TaskManager>) -> Self {
        Self { ctx, tasks }
    }

    fn repo(&self) -> &dyn Repository {
        self.ctx.repo.as_ref()
    }

    fn storage(&self) -> &dyn ObjectStorage {
        self.ctx.storage.as_ref()
    }

    pub async fn create_project(&self, name: &str) -> Result<Project> {
        if name.trim().is_empty() {
            return Err(EvalError::BadRequest("project name is required".into()));
        }
        if name.chars().count() > MAX_PROJECT_NAME_CHARS {
            return Err(EvalError::BadRequest(format!(
                "project name too long (max {MAX_PROJECT_NAME_CHARS} characters)"
            )));
        }
        let project = self.repo().create_project(name).await?;
        info!(project_id = project.id, name = %project.name, "project created");
        Ok(project)
    }

    pub async fn get_project(&self, project_id: ProjectId) -> Result<Project> {
        self.repo().get_project(project_id).await
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        self.repo().list_projects().await
    }

    /// Files of a project, newest first.
    pub async fn list_files(
        &self,
        project_id: ProjectId,
        file_type: Option<FileType>,
    ) -> Result<Vec<ProjectFile>> {
        self.repo().get_project(project_id).await?;
        self.repo().list_project_files(project_id, file_type).await
    }

    pub fn task_stats(&self) -> TaskStats {
        self.tasks.stats()
    }

    /// Stores an uploaded file.
    ///
    /// `remarks` uploads take the project busy and queue the remarks
    /// pipeline. `documentation` and `checklist` uploads are stored as is
    /// but refused while the project is busy.
    pub async fn upload_project_file(
        &self,
        project_id: ProjectId,
        file_type: &str,
        original_name: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadReceipt> {
        let file_type: FileType = file_type
            .parse()
            .map_err(|_| EvalError::BadRequest(format!("invalid file type: {file_type}")))?;
        if !file_type.is_uploadable() {
            return Err(EvalError::BadRequest(format!(
                "{file_type} files are generated, not uploaded"
            )));
        }
        let extension = file_extension(original_name)
            .ok_or_else(|| EvalError::BadRequest("file must have an extension".into()))?;

        if file_type != FileType::Remarks {
            // Checked again, atomically, when the record is written.
            let project = self.repo().get_project(project_id).await?;
            if project.status.is_busy() {
                return Err(EvalError::ProjectBusy {
                    project_id,
                    status: project.status,
                });
            }
            let file = self
                .store_upload(project_id, file_type, original_name, &extension, bytes, true)
                .await?;
            return Ok(UploadReceipt {
                file,
                processing: false,
            });
        }

        let project = self.repo().try_begin(project_id, PipelineKind::Remarks).await?;
        info!(project_id, status = %project.status, "project taken for remarks upload");

        let file = match self
            .store_upload(project_id, file_type, original_name, &extension, bytes, false)
            .await
        {
            Ok(file) => file,
            Err(e) => {
                self.restore_ready(project_id).await;
                return Err(e);
            }
        };
        self.submit(project_id, PipelineKind::Remarks).await?;
        Ok(UploadReceipt {
            file,
            processing: true,
        })
    }

    pub async fn generate_checklist(&self, project_id: ProjectId) -> Result<Project> {
        self.start_pipeline(project_id, PipelineKind::Checklist).await
    }

    pub async fn generate_final_report(&self, project_id: ProjectId) -> Result<Project> {
        self.start_pipeline(project_id, PipelineKind::FinalReport).await
    }

    /// Latest checklist result, parsed.
    pub async fn get_checklist(&self, project_id: ProjectId) -> Result<ChecklistReport> {
        let file = self
            .latest_result(project_id, PipelineKind::Checklist, FileType::ChecklistReport)
            .await?;
        let bytes = self.storage().download(&file.file_path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn get_remarks_clustered(&self, project_id: ProjectId) -> Result<Artifact> {
        self.artifact(project_id, PipelineKind::Remarks, FileType::RemarksClustered)
            .await
    }

    pub async fn get_final_report(&self, project_id: ProjectId) -> Result<Artifact> {
        self.artifact(project_id, PipelineKind::FinalReport, FileType::FinalReport)
            .await
    }

    async fn artifact(
        &self,
        project_id: ProjectId,
        kind: PipelineKind,
        file_type: FileType,
    ) -> Result<Artifact> {
        let file = self.latest_result(project_id, kind, file_type).await?;
        let url = self.storage().url_for(&file.file_path);
        Ok(Artifact { file, url })
    }

    /// Newest artifact of `file_type`, unless `kind` is still running.
    async fn latest_result(
        &self,
        project_id: ProjectId,
        kind: PipelineKind,
        file_type: FileType,
    ) -> Result<ProjectFile> {
        let project = self.repo().get_project(project_id).await?;
        if project.status == kind.busy_status() {
            return Err(EvalError::StillProcessing {
                project_id,
                status: project.status,
            });
        }
        self.repo()
            .latest_project_file(project_id, file_type)
            .await?
            .ok_or(EvalError::ArtifactNotFound {
                project_id,
                file_type,
            })
    }

    async fn start_pipeline(&self, project_id: ProjectId, kind: PipelineKind) -> Result<Project> {
        let project = self.repo().try_begin(project_id, kind).await?;
        info!(project_id, status = %project.status, "project taken for processing");
        self.submit(project_id, kind).await?;
        Ok(project)
    }

    /// Queues the pipeline task, releasing the project if that fails.
    async fn submit(&self, project_id: ProjectId, kind: PipelineKind) -> Result<()> {
        let task = ProjectProcessorTask::new(project_id, kind, self.ctx.clone());
        if let Err(e) = self.tasks.submit(Arc::new(task)) {
            warn!(project_id, pipeline = %kind, error = %e, "task submission failed");
            self.restore_ready(project_id).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn restore_ready(&self, project_id: ProjectId) {
        match self.repo().set_status(project_id, ProjectStatus::Ready).await {
            Ok(()) => info!(project_id, "project status restored to ready"),
            Err(e) => error!(project_id, error = %e, "failed to restore project status"),
        }
    }

    /// Uploads the object, then records it. With `require_ready` the record
    /// is only written while the project is `Ready`. The object is deleted
    /// again when the record cannot be written.
    async fn store_upload(
        &self,
        project_id: ProjectId,
        file_type: FileType,
        original_name: &str,
        extension: &str,
        bytes: Vec<u8>,
        require_ready: bool,
    ) -> Result<ProjectFile> {
        let file_size = bytes.len() as i64;
        let key = self
            .storage()
            .upload(bytes, original_name, content_type_for(extension))
            .await?;
        let new_file = NewProjectFile {
            project_id,
            filename: key.clone(),
            original_name: original_name.to_string(),
            file_path: key.clone(),
            file_size,
            extension: extension.to_string(),
            file_type,
        };
        let recorded = if require_ready {
            self.repo().create_project_file_if_ready(new_file).await
        } else {
            self.repo().create_project_file(new_file).await
        };

        match recorded {
            Ok(file) => {
                info!(project_id, file_id = file.id, file_type = %file_type, size = file_size, "file uploaded");
                Ok(file)
            }
            Err(e) => {
                warn!(project_id, key = %key, error = %e, "file not recorded, removing object");
                if let Err(delete_err) = self.storage().delete(&key).await {
                    error!(project_id, key = %key, error = %delete_err, "orphaned object left in storage");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::clustering::RemarkGroup;
    use crate::error::ErrorKind;
    use crate::rag::{ChecklistStatus, DEFAULT_CRITERIA};
    use crate::repository::MemoryRepository;
    use crate::storage::{MemoryStorage, StorageError};
    use crate::tasks::TaskManagerError;
    use crate::test_support::{Harness, remarks_sheet};

    fn running_manager(workers: usize, queue: usize) -> Arc<TaskManager> {
        let manager = Arc::new(TaskManager::new(workers, queue, 16));
        manager.start().unwrap();
        manager
    }

    fn register() -> Vec<u8> {
        remarks_sheet(&[
            ("Геологическая модель", "Нет карты по кровле"),
            ("Геологическая модель", "Карта по кровле устарела"),
            ("Петрофизическая модель", "Не обоснованы граничные значения"),
        ])
    }

    #[tokio::test]
    async fn project_name_validation() {
        let h = Harness::new();
        let service = h.service(running_manager(1, 10));
        assert_eq!(
            service.create_project("  ").await.unwrap_err().kind(),
            ErrorKind::BadRequest
        );
        let long = "я".repeat(256);
        assert_eq!(
            service.create_project(&long).await.unwrap_err().kind(),
            ErrorKind::BadRequest
        );
        let project = service.create_project(&"я".repeat(255)).await.unwrap();
        assert_eq!(project.status, ProjectStatus::Ready);
        assert_eq!(service.list_projects().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn upload_is_validated_before_any_state_change() {
        let h = Harness::new();
        let service = h.service(running_manager(1, 10));
        let project = service.create_project("Well 8306").await.unwrap();

        for (file_type, name) in [
            ("spreadsheet", "a.xlsx"),
            ("final_report", "a.docx"),
            ("remarks", "no_extension"),
        ] {
            let err = service
                .upload_project_file(project.id, file_type, name, b"x".to_vec())
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::BadRequest, "{file_type} {name}");
        }
        assert_eq!(
            service.get_project(project.id).await.unwrap().status,
            ProjectStatus::Ready
        );
        assert!(h.storage.is_empty());

        let err = service
            .upload_project_file(999, "remarks", "a.xlsx", register())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn well_8306_remarks_scenario() {
        let h = Harness::new();
        h.clusterer.hold();
        h.clusterer.respond_with(
            [
                (
                    "geological".to_string(),
                    vec![RemarkGroup {
                        group_name: "Структурная карта".into(),
                        synthesized_remark: "Актуализировать карту по кровле".into(),
                        original_duplicates: vec![
                            "Нет карты по кровле".into(),
                            "Карта по кровле устарела".into(),
                        ],
                    }],
                ),
                (
                    "petrophysical".to_string(),
                    vec![RemarkGroup {
                        group_name: "Граничные значения".into(),
                        synthesized_remark: "Обосновать граничные значения".into(),
                        original_duplicates: vec!["Не обоснованы граничные значения".into()],
                    }],
                ),
            ]
            .into(),
        );
        let service = h.service(running_manager(1, 10));
        let project = service.create_project("Well 8306").await.unwrap();
        assert_eq!(project.status, ProjectStatus::Ready);

        let receipt = service
            .upload_project_file(project.id, "remarks", "Замечания.xlsx", register())
            .await
            .unwrap();
        assert!(receipt.processing);
        assert_eq!(receipt.file.file_type, FileType::Remarks);
        assert_eq!(receipt.file.extension, ".xlsx");
        assert_eq!(
            service.get_project(project.id).await.unwrap().status,
            ProjectStatus::ProcessingRemarks
        );

        let second = service
            .upload_project_file(project.id, "remarks", "Замечания.xlsx", register())
            .await
            .unwrap_err();
        assert!(matches!(second, EvalError::ProjectBusy { .. }));
        assert_eq!(second.kind(), ErrorKind::Conflict);

        let docs = service
            .upload_project_file(project.id, "documentation", "tz.txt", b"text".to_vec())
            .await
            .unwrap_err();
        assert_eq!(docs.kind(), ErrorKind::Conflict);

        let pending = service.get_remarks_clustered(project.id).await.unwrap_err();
        assert!(matches!(pending, EvalError::StillProcessing { .. }));

        h.clusterer.release();
        let project = h.wait_until_ready(project.id).await;
        assert_eq!(project.status, ProjectStatus::Ready);

        let reports = service
            .list_files(project.id, Some(FileType::RemarksClustered))
            .await
            .unwrap();
        assert_eq!(reports.len(), 1);
        let remarks = h.repo.list_remarks(project.id).await.unwrap();
        assert_eq!(remarks.len(), 2);
        assert!(remarks.iter().any(|r| r.subsection == "Структурная карта"
            && r.content == "Актуализировать карту по кровле"));

        let artifact = service.get_remarks_clustered(project.id).await.unwrap();
        assert_eq!(artifact.file.id, reports[0].id);
        assert!(artifact.url.starts_with("memory://"));
    }

    /// Storage that lets a checklist run take the project while an upload
    /// is in flight.
    struct PipelineStartsMidUpload {
        inner: Arc<MemoryStorage>,
        repo: Arc<MemoryRepository>,
        project_id: ProjectId,
    }

    #[async_trait]
    impl ObjectStorage for PipelineStartsMidUpload {
        async fn upload(
            &self,
            bytes: Vec<u8>,
            name: &str,
            content_type: &str,
        ) -> std::result::Result<String, StorageError> {
            self.repo
                .try_begin(self.project_id, PipelineKind::Checklist)
                .await
                .unwrap();
            self.inner.upload(bytes, name, content_type).await
        }

        async fn download(&self, key: &str) -> std::result::Result<Vec<u8>, StorageError> {
            self.inner.download(key).await
        }

        async fn delete(&self, key: &str) -> std::result::Result<(), StorageError> {
            self.inner.delete(key).await
        }

        fn url_for(&self, key: &str) -> String {
            self.inner.url_for(key)
        }
    }

    #[tokio::test]
    async fn upload_racing_a_pipeline_start_is_refused() {
        let h = Harness::new();
        let project = h.repo.create_project("Well 8306").await.unwrap();
        let ctx = PipelineContext {
            storage: Arc::new(PipelineStartsMidUpload {
                inner: h.storage.clone(),
                repo: h.repo.clone(),
                project_id: project.id,
            }),
            ..h.ctx()
        };
        let service = ProjectService::new(ctx, running_manager(1, 10));

        let err = service
            .upload_project_file(project.id, "documentation", "tz.txt", b"text".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EvalError::ProjectBusy {
                status: ProjectStatus::ProcessingChecklist,
                ..
            }
        ));
        assert!(h.repo.list_project_files(project.id, None).await.unwrap().is_empty());
        assert!(h.storage.is_empty());
    }

    #[tokio::test]
    async fn submission_failure_restores_ready() {
        let h = Harness::new();
        let stopped = Arc::new(TaskManager::new(1, 10, 10));
        let service = h.service(stopped);
        let project = service.create_project("Well 8306").await.unwrap();

        let err = service
            .upload_project_file(project.id, "remarks", "r.xlsx", register())
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::Submit(TaskManagerError::NotRunning)));
        assert_eq!(err.kind(), ErrorKind::ServerError);
        assert_eq!(
            service.get_project(project.id).await.unwrap().status,
            ProjectStatus::Ready
        );

        let err = service.generate_checklist(project.id).await.unwrap_err();
        assert!(matches!(err, EvalError::Submit(_)));
        assert_eq!(
            service.get_project(project.id).await.unwrap().status,
            ProjectStatus::Ready
        );
    }

    #[tokio::test]
    async fn full_queue_is_unavailable_and_restores_ready() {
        let h = Harness::new();
        h.clusterer.hold();
        let service = h.service(running_manager(1, 1));
        let a = service.create_project("A").await.unwrap();
        let b = service.create_project("B").await.unwrap();
        let c = service.create_project("C").await.unwrap();

        service
            .upload_project_file(a.id, "remarks", "r.xlsx", register())
            .await
            .unwrap();
        // worker is now parked inside A's clustering call
        tokio::time::timeout(Duration::from_secs(5), async {
            while h.clusterer.calls() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        service.generate_checklist(b.id).await.unwrap();
        let err = service.generate_checklist(c.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert_eq!(
            service.get_project(c.id).await.unwrap().status,
            ProjectStatus::Ready
        );

        h.clusterer.release();
        h.wait_until_ready(a.id).await;
        h.wait_until_ready(b.id).await;
    }

    #[tokio::test]
    async fn concurrent_generation_admits_one() {
        let h = Harness::new();
        h.model.hold();
        let service = Arc::new(h.service(running_manager(2, 32)));
        let project = service.create_project("Well 8306").await.unwrap();
        service
            .upload_project_file(
                project.id,
                "documentation",
                "tz.txt",
                "Техническое задание согласовано.".as_bytes().to_vec(),
            )
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service.generate_checklist(project.id).await
            }));
        }
        let mut accepted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(e) => assert_eq!(e.kind(), ErrorKind::Conflict),
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(service.task_stats().total_submitted, 1);

        h.model.release();
        h.wait_until_ready(project.id).await;
    }

    #[tokio::test]
    async fn missing_checklist_is_not_found_without_side_effects() {
        let h = Harness::new();
        let service = h.service(running_manager(1, 10));
        let project = service.create_project("Well 8306").await.unwrap();

        for _ in 0..2 {
            let err = service.get_checklist(project.id).await.unwrap_err();
            assert!(matches!(
                err,
                EvalError::ArtifactNotFound {
                    file_type: FileType::ChecklistReport,
                    ..
                }
            ));
            assert_eq!(err.kind(), ErrorKind::NotFound);
        }
        assert_eq!(
            service.get_project(project.id).await.unwrap().status,
            ProjectStatus::Ready
        );
        assert!(service.list_files(project.id, None).await.unwrap().is_empty());
        assert_eq!(service.task_stats().total_submitted, 0);
    }

    #[tokio::test]
    async fn checklist_then_final_report() {
        let h = Harness::new();
        h.model
            .set_reply(r#"{"status": "partial", "answer": "ТЗ есть, подписи нет [ИСТОЧНИК 1]"}"#);
        let service = h.service(running_manager(1, 10));
        let project = service.create_project("Well 8306").await.unwrap();
        service
            .upload_project_file(
                project.id,
                "documentation",
                "tz.txt",
                "Техническое задание согласовано.".as_bytes().to_vec(),
            )
            .await
            .unwrap();

        let busy = service.generate_checklist(project.id).await.unwrap();
        assert_eq!(busy.status, ProjectStatus::ProcessingChecklist);
        h.wait_until_ready(project.id).await;

        let report = service.get_checklist(project.id).await.unwrap();
        assert_eq!(report.project_name, "Well 8306");
        assert_eq!(report.results.len(), DEFAULT_CRITERIA.len());
        let first = &report.results[0];
        assert_eq!(first.criterion, "Наличие технического задания");
        assert_eq!(first.status, ChecklistStatus::Partial);

        assert_eq!(
            service.get_final_report(project.id).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
        service.generate_final_report(project.id).await.unwrap();
        h.wait_until_ready(project.id).await;
        let artifact = service.get_final_report(project.id).await.unwrap();
        assert_eq!(artifact.file.file_type, FileType::FinalReport);
    }

    #[tokio::test]
    async fn failed_pipeline_leaves_project_ready() {
        let h = Harness::new();
        let service = h.service(running_manager(1, 10));
        let project = service.create_project("Well 8306").await.unwrap();

        // nothing to aggregate yet
        service.generate_final_report(project.id).await.unwrap();
        let project = h.wait_until_ready(project.id).await;
        assert_eq!(project.status, ProjectStatus::Ready);
        tokio::time::timeout(Duration::from_secs(5), async {
            while service.task_stats().failed == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(service.task_stats().completed, 0);
    }
}
