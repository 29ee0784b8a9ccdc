//! DOCX rendering for generated deliverables.

mod docx;
mod final_report;
mod remarks;

use thiserror::Error;

pub use docx::{Align, DocxBuilder};
pub use final_report::render_final_report;
pub use remarks::render_remarks_report;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to write document archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Date line used on title pages.
pub(crate) fn format_date(date: chrono::DateTime<chrono::Utc>) -> String {
    date.format("%d.%m.%Y").to_string()
}

/// Shared title page: organisation, document title, project, date.
pub(crate) fn title_page(
    doc: &mut DocxBuilder,
    title: &str,
    project: &crate::state_machine::Project,
    date: chrono::DateTime<chrono::Utc>,
) {
    doc.title_line("ПАО «Газпром»", true, 16)
        .styled("", Align::Center, false, None)
        .styled("", Align::Center, false, None)
        .title_line(title, true, 20)
        .styled("", Align::Center, false, None)
        .title_line(&format!("Проект: {}", project.name), false, 14)
        .title_line(&format!("Идентификатор проекта: {}", project.id), false, 14)
        .styled("", Align::Center, false, None)
        .title_line(&format!("Дата формирования: {}", format_date(date)), false, 14)
        .page_break()
        .title_line("СОДЕРЖАНИЕ", true, 14)
        .table_of_contents()
        .page_break();
}
