use anyhow::{Context, Result, bail};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{PipelineContext, checkpoint};
use crate::rag::{
    ChecklistReport, DocumentChunk, ReportType, default_criteria, extract_pages, parse_criteria,
    split_into_chunks,
};
use crate::state_machine::{FileType, Project};

/// Builds the chunk corpus from every documentation file. Files that fail
/// to download or extract are skipped.
async fn load_corpus(
    ctx: &PipelineContext,
    project: &Project,
    cancel: &CancellationToken,
) -> Result<Vec<DocumentChunk>> {
    let files = ctx
        .repo
        .list_project_files(project.id, Some(FileType::Documentation))
        .await?;
    if files.is_empty() {
        info!(project_id = project.id, "no documentation files");
    }

    let mut corpus = Vec::new();
    for file in files {
        checkpoint(cancel)?;
        let bytes = match ctx.storage.download(&file.file_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(project_id = project.id, file = %file.original_name, error = %e, "skipping documentation file");
                continue;
            }
        };
        let pages = match extract_pages(&bytes, &file.extension) {
            Ok(pages) => pages,
            Err(e) => {
                warn!(project_id = project.id, file = %file.original_name, error = %e, "skipping documentation file");
                continue;
            }
        };
        let before = corpus.len();
        for page in &pages {
            let chunks = split_into_chunks(&page.text, &file.original_name);
            match page.number {
                Some(n) => corpus.extend(chunks.into_iter().map(|c| c.with_page(n))),
                None => corpus.extend(chunks),
            }
        }
        info!(
            project_id = project.id,
            file = %file.original_name,
            pages = pages.len(),
            chunks = corpus.len() - before,
            "documentation indexed"
        );
    }
    Ok(corpus)
}

/// Criteria from the latest checklist file, or the default list.
async fn load_criteria(ctx: &PipelineContext, project: &Project) -> Result<(Vec<String>, ReportType)> {
    let Some(file) = ctx
        .repo
        .latest_project_file(project.id, FileType::Checklist)
        .await?
    else {
        return Ok((default_criteria(), ReportType::BasicChecklist));
    };

    let bytes = ctx
        .storage
        .download(&file.file_path)
        .await
        .with_context(|| format!("failed to download checklist {}", file.original_name))?;
    let criteria = parse_criteria(&String::from_utf8_lossy(&bytes));
    if criteria.is_empty() {
        warn!(project_id = project.id, file = %file.original_name, "checklist file has no criteria, using defaults");
        return Ok((default_criteria(), ReportType::BasicChecklist));
    }
    Ok((criteria, ReportType::ChecklistVerification))
}

fn report_type_name(report_type: ReportType) -> &'static str {
    match report_type {
        ReportType::BasicChecklist => "basic_checklist",
        ReportType::ChecklistVerification => "checklist_verification",
    }
}

/// Documentation corpus + criteria → answer engine → JSON checklist report.
pub(super) async fn run(
    ctx: &PipelineContext,
    project: &Project,
    cancel: &CancellationToken,
) -> Result<()> {
    checkpoint(cancel)?;
    let corpus = load_corpus(ctx, project, cancel).await?;
    let (criteria, report_type) = load_criteria(ctx, project).await?;
    info!(
        project_id = project.id,
        chunks = corpus.len(),
        criteria = criteria.len(),
        "checklist verification started"
    );

    checkpoint(cancel)?;
    let Some(results) = ctx.engine.answer_all(&criteria, &corpus, cancel).await else {
        bail!("cancelled by shutdown");
    };

    let report = ChecklistReport {
        project_id: project.id,
        project_name: project.name.clone(),
        report_type,
        generated_at: Utc::now(),
        results,
    };
    let json = serde_json::to_vec_pretty(&report).context("failed to serialize checklist")?;

    checkpoint(cancel)?;
    // Object names never carry the free-form project name.
    let type_name = report_type_name(report_type);
    let file = ctx
        .store_artifact(
            project.id,
            json,
            &format!("{type_name}_project{}.json", project.id),
            &format!("Отчет по чек-листу: {type_name}"),
            FileType::ChecklistReport,
        )
        .await?;

    info!(project_id = project.id, file_id = file.id, "checklist report stored");
    Ok(())
}
