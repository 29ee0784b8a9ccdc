use chrono::{DateTime, Utc};

use super::{DocxBuilder, ReportError, title_page};
use crate::rag::{ChecklistReport, ChecklistStatus};
use crate::remarks::ReviewCategory;
use crate::state_machine::{Project, Remark};

const STATUS_ORDER: [ChecklistStatus; 5] = [
    ChecklistStatus::Confirmed,
    ChecklistStatus::Partial,
    ChecklistStatus::Indirect,
    ChecklistStatus::RequiresConfirmation,
    ChecklistStatus::NotFound,
];

/// Remarks grouped by section key in taxonomy order, unknown sections last.
/// Input is newest-first; output keeps creation order within a section.
fn remarks_by_section(remarks: &[Remark]) -> Vec<(String, Vec<&Remark>)> {
    let mut sections: Vec<(String, Vec<&Remark>)> = Vec::new();
    for remark in remarks.iter().rev() {
        match sections.iter_mut().find(|(key, _)| *key == remark.section) {
            Some((_, list)) => list.push(remark),
            None => sections.push((remark.section.clone(), vec![remark])),
        }
    }
    let rank = |key: &str| {
        ReviewCategory::from_key(key)
            .and_then(|c| ReviewCategory::ALL.iter().position(|a| *a == c))
            .unwrap_or(ReviewCategory::ALL.len())
    };
    sections.sort_by_key(|(key, _)| rank(key));
    sections
}

fn section_title(key: &str) -> String {
    ReviewCategory::from_key(key)
        .map(|c| c.label().to_string())
        .unwrap_or_else(|| key.to_string())
}

/// Renders the final deliverable from the latest checklist result and the
/// stored remarks. Either may be missing, not both (the caller checks).
pub fn render_final_report(
    project: &Project,
    checklist: Option<&ChecklistReport>,
    remarks: &[Remark],
    generated_at: DateTime<Utc>,
) -> Result<Vec<u8>, ReportError> {
    let mut doc = DocxBuilder::new();
    title_page(&mut doc, "Итоговый отчёт по проекту", project, generated_at);

    doc.heading("1. Результаты проверки по чек-листу", 1);
    match checklist {
        Some(report) => {
            doc.paragraph(&format!(
                "Проверено критериев: {}. Дата проверки: {}.",
                report.results.len(),
                super::format_date(report.generated_at)
            ));
            let summary: Vec<Vec<String>> = STATUS_ORDER
                .iter()
                .map(|status| vec![status.caption().to_string(), report.count(*status).to_string()])
                .collect();
            doc.strong("Сводка по статусам:")
                .table(&["Статус", "Количество"], &[3, 1], &summary);

            let rows: Vec<Vec<String>> = report
                .results
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    vec![
                        (i + 1).to_string(),
                        item.criterion.clone(),
                        item.status.caption().to_string(),
                        item.answer.clone(),
                    ]
                })
                .collect();
            doc.strong("Результаты по критериям:").table(
                &["№", "Критерий", "Статус", "Обоснование"],
                &[1, 5, 3, 8],
                &rows,
            );
        }
        None => {
            doc.paragraph("Проверка по чек-листу не проводилась.");
        }
    }

    doc.page_break().heading("2. Замечания экспертизы", 1);
    let sections = remarks_by_section(remarks);
    if sections.is_empty() {
        doc.paragraph("Замечания отсутствуют.");
    }
    for (n, (key, list)) in sections.iter().enumerate() {
        doc.heading(&format!("2.{}. {}", n + 1, section_title(key)), 2);
        let rows: Vec<Vec<String>> = list
            .iter()
            .enumerate()
            .map(|(i, r)| vec![(i + 1).to_string(), r.subsection.clone(), r.content.clone()])
            .collect();
        doc.table(&["№", "Группа", "Замечание"], &[1, 4, 10], &rows);
    }

    doc.page_break().heading("ЗАКЛЮЧЕНИЕ", 1);
    let mut conclusion = Vec::new();
    if let Some(report) = checklist {
        conclusion.push(format!(
            "Подтверждено {} из {} критериев чек-листа.",
            report.count(ChecklistStatus::Confirmed),
            report.results.len()
        ));
    }
    if !remarks.is_empty() {
        conclusion.push(format!(
            "Сформулировано замечаний: {} по {} направлениям экспертизы.",
            remarks.len(),
            sections.len()
        ));
    }
    doc.paragraph(&conclusion.join(" "));

    doc.build()
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};

    use super::*;
    use crate::rag::{ChecklistItem, ReportType};
    use crate::state_machine::ProjectStatus;

    fn document_xml(bytes: &[u8]) -> String {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut xml = String::new();
        archive
            .by_name("word/document.xml")
            .unwrap()
            .read_to_string(&mut xml)
            .unwrap();
        xml
    }

    fn remark(id: i64, section: ReviewCategory, group: &str, content: &str) -> Remark {
        Remark {
            id,
            project_id: 1,
            direction: section.label().into(),
            section: section.key().into(),
            subsection: group.into(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    fn project() -> Project {
        Project {
            id: 1,
            name: "Well 8306".into(),
            status: ProjectStatus::GeneratingFinalReport,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn sections_in_taxonomy_order_oldest_first() {
        // newest first, as the repository returns them
        let remarks = vec![
            remark(3, ReviewCategory::Reassessment, "Б", "третье"),
            remark(2, ReviewCategory::Development, "В", "второе"),
            remark(1, ReviewCategory::Reassessment, "А", "первое"),
        ];
        let sections = remarks_by_section(&remarks);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].0, "reassessment");
        let ids: Vec<i64> = sections[0].1.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(sections[1].0, "development");
    }

    #[test]
    fn renders_checklist_and_remarks() {
        let checklist = ChecklistReport {
            project_id: 1,
            project_name: "Well 8306".into(),
            report_type: ReportType::BasicChecklist,
            generated_at: Utc::now(),
            results: vec![
                ChecklistItem {
                    criterion: "Наличие технического задания".into(),
                    status: ChecklistStatus::Confirmed,
                    answer: "ТЗ согласовано".into(),
                    sources: Vec::new(),
                },
                ChecklistItem {
                    criterion: "Наличие проектной документации".into(),
                    status: ChecklistStatus::NotFound,
                    answer: "Не найдено".into(),
                    sources: Vec::new(),
                },
            ],
        };
        let remarks = vec![remark(1, ReviewCategory::Geological, "Карты", "Обновить карты")];

        let bytes = render_final_report(&project(), Some(&checklist), &remarks, Utc::now()).unwrap();
        let xml = document_xml(&bytes);
        assert!(xml.contains("Итоговый отчёт по проекту"));
        assert!(xml.contains("Проверено критериев: 2."));
        assert!(xml.contains("ТЗ согласовано"));
        assert!(xml.contains(&format!("2.1. {}", ReviewCategory::Geological.label())));
        assert!(xml.contains("Обновить карты"));
        assert!(xml.contains("Подтверждено 1 из 2 критериев чек-листа."));
    }

    #[test]
    fn checklist_section_notes_absence() {
        let remarks = vec![remark(1, ReviewCategory::None, "Прочее", "Текст")];
        let bytes = render_final_report(&project(), None, &remarks, Utc::now()).unwrap();
        let xml = document_xml(&bytes);
        assert!(xml.contains("Проверка по чек-листу не проводилась."));
        assert!(xml.contains(ReviewCategory::None.label()));
    }
}
