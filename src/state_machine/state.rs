use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Processing status of a project.
///
/// `Ready` is the only idle state. The three busy states each mean that
/// exactly one pipeline owns the project until it is released back to
/// `Ready`:
///
/// ```text
///            ┌──────────── try_begin (CAS) ────────────┐
///            │                                         ▼
///   Ready ───┼──▶ ProcessingRemarks ──────┐
///     ▲      ├──▶ ProcessingChecklist ────┼── release ──▶ Ready
///     │      └──▶ GeneratingFinalReport ──┘
///     └──────────────── (on success and on failure) ────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Ready,
    ProcessingRemarks,
    ProcessingChecklist,
    GeneratingFinalReport,
}

impl ProjectStatus {
    /// Storage representation, also used in JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Ready => "ready",
            ProjectStatus::ProcessingRemarks => "processing_remarks",
            ProjectStatus::ProcessingChecklist => "processing_checklist",
            ProjectStatus::GeneratingFinalReport => "generating_final_report",
        }
    }

    /// True for every status other than `Ready`.
    pub fn is_busy(&self) -> bool {
        !matches!(self, ProjectStatus::Ready)
    }

    /// The pipeline that owns a project in this status, if any.
    pub fn pipeline(&self) -> Option<PipelineKind> {
        match self {
            ProjectStatus::Ready => None,
            ProjectStatus::ProcessingRemarks => Some(PipelineKind::Remarks),
            ProjectStatus::ProcessingChecklist => Some(PipelineKind::Checklist),
            ProjectStatus::GeneratingFinalReport => Some(PipelineKind::FinalReport),
        }
    }

    /// Whether `self → next` is a defined transition.
    ///
    /// Only `Ready → busy` and `busy → Ready` exist. Re-entering `Ready`
    /// from `Ready` is accepted because the release is unconditional.
    pub fn can_transition_to(&self, next: ProjectStatus) -> bool {
        matches!(
            (self, next),
            (ProjectStatus::Ready, _) | (_, ProjectStatus::Ready)
        )
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown project status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for ProjectStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(ProjectStatus::Ready),
            "processing_remarks" => Ok(ProjectStatus::ProcessingRemarks),
            "processing_checklist" => Ok(ProjectStatus::ProcessingChecklist),
            "generating_final_report" => Ok(ProjectStatus::GeneratingFinalReport),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// The three kinds of processing work a project can be admitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    Remarks,
    Checklist,
    FinalReport,
}

impl PipelineKind {
    /// The busy status a project holds while this pipeline runs.
    pub fn busy_status(&self) -> ProjectStatus {
        match self {
            PipelineKind::Remarks => ProjectStatus::ProcessingRemarks,
            PipelineKind::Checklist => ProjectStatus::ProcessingChecklist,
            PipelineKind::FinalReport => ProjectStatus::GeneratingFinalReport,
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineKind::Remarks => write!(f, "remarks"),
            PipelineKind::Checklist => write!(f, "checklist"),
            PipelineKind::FinalReport => write!(f, "final-report"),
        }
    }
}
