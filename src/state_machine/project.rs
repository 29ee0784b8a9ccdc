use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::ProjectStatus;

pub type ProjectId = i64;

/// A project under evaluation.
///
/// `status` is the only concurrency flag for the project; everything else
/// is immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
}

/// Kind of artifact attached to a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    /// Uploaded documentation, the corpus for checklist verification.
    Documentation,
    /// Uploaded remarks spreadsheet.
    Remarks,
    /// Uploaded list of checklist criteria.
    Checklist,
    /// Generated checklist verification result (JSON).
    ChecklistReport,
    /// Generated clustered-remarks report.
    RemarksClustered,
    /// Generated final deliverable.
    FinalReport,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Documentation => "documentation",
            FileType::Remarks => "remarks",
            FileType::Checklist => "checklist",
            FileType::ChecklistReport => "checklist_report",
            FileType::RemarksClustered => "remarks_clustered",
            FileType::FinalReport => "final_report",
        }
    }

    /// Types a user may upload directly; the rest are produced by pipelines.
    pub fn is_uploadable(&self) -> bool {
        matches!(
            self,
            FileType::Documentation | FileType::Remarks | FileType::Checklist
        )
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "documentation" => Ok(FileType::Documentation),
            "remarks" => Ok(FileType::Remarks),
            "checklist" => Ok(FileType::Checklist),
            "checklist_report" => Ok(FileType::ChecklistReport),
            "remarks_clustered" => Ok(FileType::RemarksClustered),
            "final_report" => Ok(FileType::FinalReport),
            other => Err(format!("unknown file type: {other}")),
        }
    }
}

/// A stored artifact. Append-only: created once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectFile {
    pub id: i64,
    pub project_id: ProjectId,
    /// Collision-free internal name.
    pub filename: String,
    /// User-facing name, used for display and re-download.
    pub original_name: String,
    /// Object key inside the storage capability.
    pub file_path: String,
    pub file_size: i64,
    pub extension: String,
    pub file_type: FileType,
    pub uploaded_at: DateTime<Utc>,
}

/// Insert parameters for [`ProjectFile`].
#[derive(Debug, Clone)]
pub struct NewProjectFile {
    pub project_id: ProjectId,
    pub filename: String,
    pub original_name: String,
    pub file_path: String,
    pub file_size: i64,
    pub extension: String,
    pub file_type: FileType,
}

/// One synthesized remark produced by the remarks pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Remark {
    pub id: i64,
    pub project_id: ProjectId,
    pub direction: String,
    pub section: String,
    pub subsection: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRemark {
    pub project_id: ProjectId,
    pub direction: String,
    pub section: String,
    pub subsection: String,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_type_text_roundtrip() {
        for ft in [
            FileType::Documentation,
            FileType::Remarks,
            FileType::Checklist,
            FileType::ChecklistReport,
            FileType::RemarksClustered,
            FileType::FinalReport,
        ] {
            assert_eq!(ft.as_str().parse::<FileType>().unwrap(), ft);
        }
        assert!("spreadsheet".parse::<FileType>().is_err());
    }

    #[test]
    fn generated_types_are_not_uploadable() {
        assert!(FileType::Remarks.is_uploadable());
        assert!(FileType::Documentation.is_uploadable());
        assert!(FileType::Checklist.is_uploadable());
        assert!(!FileType::ChecklistReport.is_uploadable());
        assert!(!FileType::RemarksClustered.is_uploadable());
        assert!(!FileType::FinalReport.is_uploadable());
    }

    #[test]
    fn project_serializes_status_as_text() {
        let project = Project {
            id: 7,
            name: "Well 8306".into(),
            status: ProjectStatus::ProcessingRemarks,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&project).unwrap();
        assert_eq!(json["status"], "processing_remarks");
        assert_eq!(json["name"], "Well 8306");
    }
}
