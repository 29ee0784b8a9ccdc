//! Retrieval/answer engine for checklist verification.
//!
//! Documentation is reduced to sentence-sized chunks, each criterion is
//! matched against them by keyword overlap, and the best chunks are handed
//! to the language model as numbered sources.

mod checklist;
mod chunk;
mod engine;
mod extract;

pub use checklist::{
    ChecklistItem, ChecklistReport, ChecklistStatus, DEFAULT_CRITERIA, ReportType, Source,
    default_criteria, parse_criteria,
};
pub use chunk::{DocumentChunk, split_into_chunks};
pub use engine::{AnswerEngine, NOT_FOUND_ANSWER};
pub use extract::{ExtractError, TextPage, extract_pages, extract_text};
