//! Project processing: one task type that runs exactly one pipeline for a
//! busy project and always hands the project back in `Ready`.

mod checklist;
mod final_report;
mod remarks;

use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::clustering::RemarkClusterer;
use crate::rag::AnswerEngine;
use crate::repository::Repository;
use crate::state_machine::{
    FileType, NewProjectFile, PipelineKind, Project, ProjectFile, ProjectId, ProjectStatus,
};
use crate::storage::{ObjectStorage, content_type_for, file_extension};
use crate::tasks::Task;

/// Capabilities every pipeline works against.
#[derive(Clone)]
pub struct PipelineContext {
    pub repo: Arc<dyn Repository>,
    pub storage: Arc<dyn ObjectStorage>,
    pub clusterer: Arc<dyn RemarkClusterer>,
    pub engine: Arc<AnswerEngine>,
}

impl PipelineContext {
    /// Uploads a generated artifact and records it.
    pub(crate) async fn store_artifact(
        &self,
        project_id: ProjectId,
        bytes: Vec<u8>,
        object_name: &str,
        original_name: &str,
        file_type: FileType,
    ) -> Result<ProjectFile> {
        let extension = file_extension(object_name).unwrap_or_default();
        let file_size = bytes.len() as i64;
        let key = self
            .storage
            .upload(bytes, object_name, content_type_for(&extension))
            .await
            .with_context(|| format!("failed to upload {object_name}"))?;

        let file = self
            .repo
            .create_project_file(NewProjectFile {
                project_id,
                filename: key.clone(),
                original_name: original_name.to_string(),
                file_path: key,
                file_size,
                extension,
                file_type,
            })
            .await
            .context("failed to record generated file")?;
        Ok(file)
    }
}

/// Bails out at a step boundary once shutdown was requested.
pub(crate) fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        bail!("cancelled by shutdown");
    }
    Ok(())
}

/// Runs the pipeline matching the project's busy state.
pub struct ProjectProcessorTask {
    project_id: ProjectId,
    /// `None` only for recovery, where the stored status decides.
    kind: Option<PipelineKind>,
    ctx: PipelineContext,
    name: String,
}

impl ProjectProcessorTask {
    pub fn new(project_id: ProjectId, kind: PipelineKind, ctx: PipelineContext) -> Self {
        Self {
            project_id,
            kind: Some(kind),
            ctx,
            name: format!("{kind}:{project_id}"),
        }
    }

    /// Task for a project found busy with no task behind it.
    pub fn recover(project_id: ProjectId, ctx: PipelineContext) -> Self {
        Self {
            project_id,
            kind: None,
            ctx,
            name: format!("recover:{project_id}"),
        }
    }

    pub fn kind(&self) -> Option<PipelineKind> {
        self.kind
    }
}

async fn run_pipeline(
    ctx: PipelineContext,
    kind: PipelineKind,
    project: Project,
    cancel: CancellationToken,
) -> Result<()> {
    match kind {
        PipelineKind::Remarks => remarks::run(&ctx, &project, &cancel).await,
        PipelineKind::Checklist => checklist::run(&ctx, &project, &cancel).await,
        PipelineKind::FinalReport => final_report::run(&ctx, &project, &cancel).await,
    }
}

#[async_trait]
impl Task for ProjectProcessorTask {
    async fn execute(&self, cancel: CancellationToken) -> Result<()> {
        let project = self
            .ctx
            .repo
            .get_project(self.project_id)
            .await
            .context("failed to load project")?;

        // The task only owns the project while it sits in the matching busy
        // state; otherwise the status is left alone.
        let kind = match (self.kind, project.status.pipeline()) {
            (Some(tagged), Some(current)) if tagged == current => tagged,
            (None, Some(current)) => current,
            (tagged, _) => bail!(
                "project {} is {}, expected {}",
                self.project_id,
                project.status,
                tagged.map_or_else(|| "a busy state".to_string(), |k| k.busy_status().to_string())
            ),
        };

        info!(project_id = self.project_id, pipeline = %kind, "pipeline started");
        // Spawned so a panic surfaces as a JoinError and the release below
        // still runs.
        let handle = tokio::spawn(run_pipeline(self.ctx.clone(), kind, project, cancel));
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => Err(anyhow!("{kind} pipeline panicked")),
            Err(e) => Err(anyhow!("{kind} pipeline aborted: {e}")),
        };

        let released = self
            .ctx
            .repo
            .set_status(self.project_id, ProjectStatus::Ready)
            .await;

        match (outcome, released) {
            (Ok(()), Ok(())) => {
                info!(project_id = self.project_id, pipeline = %kind, "pipeline finished");
                Ok(())
            }
            (Err(e), Ok(())) => {
                warn!(
                    project_id = self.project_id,
                    pipeline = %kind,
                    error = %format!("{e:#}"),
                    "pipeline failed, project released"
                );
                Err(e)
            }
            (outcome, Err(release_err)) => {
                error!(
                    project_id = self.project_id,
                    pipeline = %kind,
                    error = %release_err,
                    "failed to release project, it stays busy"
                );
                Err(match outcome {
                    Ok(()) => anyhow!(release_err).context("failed to release project"),
                    Err(e) => e.context(format!("failed to release project: {release_err}")),
                })
            }
        }
    }

    fn project_id(&self) -> ProjectId {
        self.project_id
    }

    fn name(&self) -> &str {
        &self.name
    }
}
