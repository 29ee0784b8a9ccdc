use anyhow::{Context, Result, bail};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{PipelineContext, checkpoint};
use crate::rag::ChecklistReport;
use crate::report::render_final_report;
use crate::state_machine::{FileType, Project, Remark};

pub(crate) const FINAL_OBJECT_NAME: &str = "final_report.docx";
pub(crate) const FINAL_ORIGINAL_NAME: &str = "Итоговый отчет.docx";

async fn latest_checklist(ctx: &PipelineContext, project: &Project) -> Result<Option<ChecklistReport>> {
    let Some(file) = ctx
        .repo
        .latest_project_file(project.id, FileType::ChecklistReport)
        .await?
    else {
        return Ok(None);
    };
    let bytes = ctx
        .storage
        .download(&file.file_path)
        .await
        .context("failed to download checklist report")?;
    let report = serde_json::from_slice(&bytes).context("malformed checklist report")?;
    Ok(Some(report))
}

/// Remarks written by the most recent successful remarks run: rows are
/// stored right after that run's report, so anything older belongs to an
/// earlier spreadsheet.
async fn latest_remarks(ctx: &PipelineContext, project: &Project) -> Result<Vec<Remark>> {
    let Some(report) = ctx
        .repo
        .latest_project_file(project.id, FileType::RemarksClustered)
        .await?
    else {
        return Ok(Vec::new());
    };
    let mut remarks = ctx.repo.list_remarks(project.id).await?;
    remarks.retain(|r| r.created_at >= report.uploaded_at);
    Ok(remarks)
}

/// Latest checklist report + latest remarks run → `FinalReport` document.
pub(super) async fn run(
    ctx: &PipelineContext,
    project: &Project,
    cancel: &CancellationToken,
) -> Result<()> {
    checkpoint(cancel)?;
    let checklist = latest_checklist(ctx, project).await?;
    let remarks = latest_remarks(ctx, project).await?;
    if checklist.is_none() && remarks.is_empty() {
        bail!("nothing to report: no checklist result and no remarks");
    }
    info!(
        project_id = project.id,
        has_checklist = checklist.is_some(),
        remarks = remarks.len(),
        "assembling final report"
    );

    let document = render_final_report(project, checklist.as_ref(), &remarks, Utc::now())?;
    checkpoint(cancel)?;
    let file = ctx
        .store_artifact(
            project.id,
            document,
            FINAL_OBJECT_NAME,
            FINAL_ORIGINAL_NAME,
            FileType::FinalReport,
        )
        .await?;

    info!(project_id = project.id, file_id = file.id, "final report stored");
    Ok(())
}
