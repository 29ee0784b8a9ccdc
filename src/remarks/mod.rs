//! Review remarks: the category taxonomy and spreadsheet ingestion.

mod category;
mod sheet;

pub use category::ReviewCategory;
pub use sheet::{RemarkRow, SheetError, build_payload, parse_remarks, read_first_sheet};
