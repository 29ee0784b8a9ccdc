use chrono::{DateTime, Utc};

use super::{DocxBuilder, ReportError, title_page};
use crate::clustering::{ClusteredRemarks, RemarkGroup};
use crate::remarks::ReviewCategory;
use crate::state_machine::Project;

/// Sections in taxonomy order, then any category keys the clustering
/// service returned that the taxonomy does not know. Empty ones are skipped.
fn ordered_sections(clustered: &ClusteredRemarks) -> Vec<(String, &[RemarkGroup])> {
    let mut sections: Vec<(String, &[RemarkGroup])> = ReviewCategory::ALL
        .iter()
        .filter_map(|category| {
            clustered
                .get(category.key())
                .filter(|groups| !groups.is_empty())
                .map(|groups| (category.label().to_string(), groups.as_slice()))
        })
        .collect();

    for (key, groups) in clustered {
        if ReviewCategory::from_key(key).is_none() && !groups.is_empty() {
            sections.push((key.clone(), groups.as_slice()));
        }
    }
    sections
}

/// Renders the clustered-remarks report.
pub fn render_remarks_report(
    project: &Project,
    clustered: &ClusteredRemarks,
    generated_at: DateTime<Utc>,
) -> Result<Vec<u8>, ReportError> {
    let sections = ordered_sections(clustered);
    let group_count: usize = sections.iter().map(|(_, groups)| groups.len()).sum();
    let source_count: usize = sections
        .iter()
        .flat_map(|(_, groups)| groups.iter())
        .map(|g| g.original_duplicates.len())
        .sum();

    let mut doc = DocxBuilder::new();
    title_page(
        &mut doc,
        "Отчёт по результатам анализа замечаний",
        project,
        generated_at,
    );

    doc.heading("ВВЕДЕНИЕ", 1).paragraph(&format!(
        "Настоящий отчёт содержит результаты анализа замечаний экспертизы по проекту «{}». \
         Замечания сгруппированы по направлениям экспертизы, близкие по смыслу замечания \
         объединены в группы, для каждой группы сформулирована краткая сводка.",
        project.name
    ));

    for (n, (title, groups)) in sections.iter().enumerate() {
        doc.page_break()
            .heading(&format!("{}. {}", n + 1, title), 1);
        for (m, group) in groups.iter().enumerate() {
            doc.heading(&format!("{}.{}. {}", n + 1, m + 1, group.group_name), 2);
            if !group.synthesized_remark.trim().is_empty() {
                doc.strong("Краткая сводка:")
                    .paragraph(&group.synthesized_remark);
            }
            if !group.original_duplicates.is_empty() {
                let rows: Vec<Vec<String>> = group
                    .original_duplicates
                    .iter()
                    .enumerate()
                    .map(|(i, text)| vec![(i + 1).to_string(), text.clone()])
                    .collect();
                doc.strong("Оригинальные замечания:")
                    .table(&["№", "Замечание"], &[1, 12], &rows);
            }
        }
    }

    doc.page_break().heading("ЗАКЛЮЧЕНИЕ", 1);
    if sections.is_empty() {
        doc.paragraph("Замечания для анализа отсутствуют.");
    } else {
        doc.paragraph(&format!(
            "Проанализировано исходных замечаний: {source_count}. \
             Сформировано групп: {group_count} по {} направлениям экспертизы.",
            sections.len()
        ));
    }

    doc.build()
}
