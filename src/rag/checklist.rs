use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state_machine::ProjectId;

/// Baseline criteria used when a project has no criteria file.
pub const DEFAULT_CRITERIA: [&str; 5] = [
    "Наличие технического задания",
    "Наличие проектной документации",
    "Наличие исполнительной документации",
    "Соответствие требованиям безопасности",
    "Соответствие нормативным требованиям",
];

pub fn default_criteria() -> Vec<String> {
    DEFAULT_CRITERIA.iter().map(|c| c.to_string()).collect()
}

/// Verdict for one criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecklistStatus {
    Confirmed,
    NotFound,
    Partial,
    Indirect,
    RequiresConfirmation,
}

impl ChecklistStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecklistStatus::Confirmed => "confirmed",
            ChecklistStatus::NotFound => "not_found",
            ChecklistStatus::Partial => "partial",
            ChecklistStatus::Indirect => "indirect",
            ChecklistStatus::RequiresConfirmation => "requires_confirmation",
        }
    }

    /// Lenient parse of a model-supplied status. Unknown values are `None`.
    pub fn parse_lenient(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "confirmed" => Some(ChecklistStatus::Confirmed),
            "not_found" => Some(ChecklistStatus::NotFound),
            "partial" => Some(ChecklistStatus::Partial),
            "indirect" => Some(ChecklistStatus::Indirect),
            "requires_confirmation" => Some(ChecklistStatus::RequiresConfirmation),
            _ => None,
        }
    }

    /// Russian caption for reports.
    pub fn caption(&self) -> &'static str {
        match self {
            ChecklistStatus::Confirmed => "Подтверждено",
            ChecklistStatus::NotFound => "Не найдено",
            ChecklistStatus::Partial => "Частично",
            ChecklistStatus::Indirect => "Косвенно",
            ChecklistStatus::RequiresConfirmation => "Требует подтверждения",
        }
    }
}

impl fmt::Display for ChecklistStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an answer came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub filename: String,
    /// Page or slide number for PDF and PPTX, otherwise the chunk id
    /// within the file.
    pub page: String,
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub criterion: String,
    pub status: ChecklistStatus,
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<Source>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    /// Criteria came from the built-in list.
    BasicChecklist,
    /// Criteria came from an uploaded checklist file.
    ChecklistVerification,
}

/// The persisted checklist artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistReport {
    pub project_id: ProjectId,
    pub project_name: String,
    pub report_type: ReportType,
    pub generated_at: DateTime<Utc>,
    pub results: Vec<ChecklistItem>,
}

impl ChecklistReport {
    pub fn count(&self, status: ChecklistStatus) -> usize {
        self.results.iter().filter(|i| i.status == status).count()
    }
}

/// Criteria from an uploaded checklist file: one per line, first
/// comma-separated field, header lines starting with `criterion` skipped.
pub fn parse_criteria(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.trim().trim_start_matches('\u{feff}'))
        .filter(|line| !line.is_empty())
        .filter(|line| !line.to_lowercase().starts_with("criterion"))
        .filter_map(|line| {
            let field = line.split(',').next().unwrap_or(line).trim().trim_matches('"').trim();
            (!field.is_empty()).then(|| field.to_string())
        })
        .collect()
}
