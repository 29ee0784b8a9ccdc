use anyhow::{Context, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{PipelineContext, checkpoint};
use crate::clustering::ClusteredRemarks;
use crate::remarks::{ReviewCategory, build_payload, parse_remarks};
use crate::report::render_remarks_report;
use crate::state_machine::{FileType, NewRemark, Project, ProjectId};

pub(crate) const REPORT_OBJECT_NAME: &str = "remarks_report.docx";
pub(crate) const REPORT_ORIGINAL_NAME: &str = "Отчет по замечаниям.docx";

/// One remark row per clustered group.
fn to_remarks(project_id: ProjectId, clustered: &ClusteredRemarks) -> Vec<NewRemark> {
    clustered
        .iter()
        .flat_map(|(key, groups)| {
            let direction = ReviewCategory::from_key(key)
                .map(|c| c.label().to_string())
                .unwrap_or_else(|| key.clone());
            groups.iter().map(move |group| NewRemark {
                project_id,
                direction: direction.clone(),
                section: key.clone(),
                subsection: group.group_name.clone(),
                content: group.synthesized_remark.clone(),
            })
        })
        .collect()
}

/// Latest remarks spreadsheet → clustering service → remark rows and a
/// `RemarksClustered` report.
pub(super) async fn run(
    ctx: &PipelineContext,
    project: &Project,
    cancel: &CancellationToken,
) -> Result<()> {
    checkpoint(cancel)?;
    let source = ctx
        .repo
        .latest_project_file(project.id, FileType::Remarks)
        .await?
        .context("no remarks file uploaded")?;
    let bytes = ctx
        .storage
        .download(&source.file_path)
        .await
        .with_context(|| format!("failed to download {}", source.original_name))?;
    info!(
        project_id = project.id,
        file = %source.original_name,
        size = bytes.len(),
        "remarks file downloaded"
    );

    let rows = parse_remarks(&bytes).context("failed to parse remarks spreadsheet")?;
    let payload = build_payload(&rows);
    info!(
        project_id = project.id,
        rows = rows.len(),
        categories = payload.len(),
        "remarks parsed"
    );

    checkpoint(cancel)?;
    let clustered = ctx
        .clusterer
        .cluster(&payload)
        .await
        .context("remark clustering failed")?;

    // Rows go in last: a failed report upload must not leave them behind,
    // and the final report only reads rows newer than the latest report.
    let report = render_remarks_report(project, &clustered, Utc::now())?;
    checkpoint(cancel)?;
    let file = ctx
        .store_artifact(
            project.id,
            report,
            REPORT_OBJECT_NAME,
            REPORT_ORIGINAL_NAME,
            FileType::RemarksClustered,
        )
        .await?;

    let stored = ctx
        .repo
        .create_remarks(to_remarks(project.id, &clustered))
        .await
        .context("failed to store remarks")?;

    info!(
        project_id = project.id,
        remarks = stored,
        file_id = file.id,
        "remarks report stored"
    );
    Ok(())
}
