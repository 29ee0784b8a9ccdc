use std::io::{Cursor, Read};

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use thiserror::Error;
use tracing::debug;

use super::ReviewCategory;
use crate::clustering::RemarkPayload;

/// Decompressed size cap for any single XML part.
const MAX_PART_BYTES: u64 = 50 * 1024 * 1024;

/// Columns per worksheet row; `XFD` is the last one.
const MAX_COLUMNS: usize = 16_384;

// Column positions (0-based) in the remarks register.
const COL_PROJECT: usize = 1;
const COL_DIRECTION: usize = 2;
const COL_SECTION: usize = 3;
const COL_TEXT: usize = 4;
const COL_URGENCY: usize = 5;

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("not a valid xlsx archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("malformed spreadsheet XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("failed to read archive entry: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive part {0} exceeds size limit")]
    TooLarge(String),

    #[error("cell reference out of range: {0}")]
    BadCellReference(String),

    #[error("workbook contains no worksheet")]
    NoWorksheet,

    #[error("worksheet is empty")]
    Empty,
}

/// One data row of the remarks register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemarkRow {
    pub project_name: String,
    pub expertise_direction: String,
    pub expertise_section: String,
    pub text: String,
    pub urgency: String,
}

impl RemarkRow {
    pub fn category(&self) -> ReviewCategory {
        ReviewCategory::from_label(&self.expertise_section)
    }
}

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

fn read_part(archive: &mut Archive<'_>, name: &str) -> Result<Option<Vec<u8>>, SheetError> {
    let entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut out = Vec::new();
    entry.take(MAX_PART_BYTES).read_to_end(&mut out)?;
    if out.len() as u64 >= MAX_PART_BYTES {
        return Err(SheetError::TooLarge(name.to_string()));
    }
    Ok(Some(out))
}

fn first_worksheet_name(archive: &Archive<'_>) -> Option<String> {
    archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .min_by_key(|name| {
            name.trim_start_matches("xl/worksheets/sheet")
                .trim_end_matches(".xml")
                .parse::<u32>()
                .unwrap_or(u32::MAX)
        })
        .map(str::to_string)
}

/// Shared-string table; rich-text runs inside one `<si>` are concatenated.
fn read_shared_strings(xml: &[u8]) -> Result<Vec<String>, SheetError> {
    let mut strings = Vec::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Event::Text(te) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&te.unescape()?);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_t = false,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Converts the letters of a cell reference (`"AB12"`) to a 0-based column.
/// `Ok(None)` when the reference carries no letters.
fn column_index(reference: &str) -> Result<Option<usize>, SheetError> {
    let letters: Vec<u8> = reference
        .bytes()
        .take_while(u8::is_ascii_alphabetic)
        .map(|b| b.to_ascii_uppercase())
        .collect();
    if letters.is_empty() {
        return Ok(None);
    }
    if letters.len() > 3 {
        return Err(SheetError::BadCellReference(reference.to_string()));
    }
    let index = letters
        .iter()
        .fold(0usize, |acc, b| acc * 26 + usize::from(b - b'A' + 1))
        - 1;
    if index >= MAX_COLUMNS {
        return Err(SheetError::BadCellReference(reference.to_string()));
    }
    Ok(Some(index))
}

fn attr(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.try_get_attribute(name)
        .ok()
        .flatten()
        .and_then(|a| String::from_utf8(a.value.into_owned()).ok())
}

#[derive(Default)]
struct CellState {
    column: usize,
    kind: Option<String>,
    value: String,
    in_value: bool,
}

/// Reads the first worksheet into dense rows of cell text.
///
/// Handles shared strings, inline strings and literal values (numbers,
/// booleans, formula results). Gaps between referenced cells become empty
/// strings; trailing empty cells are trimmed.
pub fn read_first_sheet(bytes: &[u8]) -> Result<Vec<Vec<String>>, SheetError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let shared = match read_part(&mut archive, "xl/sharedStrings.xml")? {
        Some(xml) => read_shared_strings(&xml)?,
        None => Vec::new(),
    };
    let sheet_name = first_worksheet_name(&archive).ok_or(SheetError::NoWorksheet)?;
    let xml = read_part(&mut archive, &sheet_name)?.ok_or(SheetError::NoWorksheet)?;

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell: Option<CellState> = None;

    let mut reader = Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => row.clear(),
                b"c" => {
                    let reference = attr(&e, b"r");
                    let column = match reference.as_deref().map(column_index).transpose()? {
                        Some(Some(index)) => index,
                        _ if row.len() < MAX_COLUMNS => row.len(),
                        _ => {
                            return Err(SheetError::BadCellReference(
                                reference.unwrap_or_else(|| format!("#{}", row.len() + 1)),
                            ));
                        }
                    };
                    cell = Some(CellState {
                        column,
                        kind: attr(&e, b"t"),
                        ..CellState::default()
                    });
                }
                b"v" | b"t" => {
                    if let Some(c) = cell.as_mut() {
                        c.in_value = true;
                    }
                }
                _ => {}
            },
            Event::Text(te) => {
                if let Some(c) = cell.as_mut() {
                    if c.in_value {
                        c.value.push_str(&te.unescape()?);
                    }
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => {
                    if let Some(c) = cell.as_mut() {
                        c.in_value = false;
                    }
                }
                b"c" => {
                    if let Some(c) = cell.take() {
                        let text = match c.kind.as_deref() {
                            Some("s") => c
                                .value
                                .trim()
                                .parse::<usize>()
                                .ok()
                                .and_then(|i| shared.get(i).cloned())
                                .unwrap_or_default(),
                            _ => c.value,
                        };
                        if row.len() <= c.column {
                            row.resize(c.column + 1, String::new());
                        }
                        row[c.column] = text;
                    }
                }
                b"row" => {
                    while row.last().is_some_and(|s| s.trim().is_empty()) {
                        row.pop();
                    }
                    rows.push(std::mem::take(&mut row));
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    debug!(sheet = %sheet_name, rows = rows.len(), shared = shared.len(), "worksheet read");
    Ok(rows)
}

fn cell(row: &[String], index: usize) -> String {
    row.get(index).map(|s| s.trim().to_string()).unwrap_or_default()
}

/// Parses the remarks register: header row skipped, rows without remark
/// text skipped.
pub fn parse_remarks(bytes: &[u8]) -> Result<Vec<RemarkRow>, SheetError> {
    let rows = read_first_sheet(bytes)?;
    if rows.is_empty() {
        return Err(SheetError::Empty);
    }
    Ok(rows
        .iter()
        .skip(1)
        .map(|row| RemarkRow {
            project_name: cell(row, COL_PROJECT),
            expertise_direction: cell(row, COL_DIRECTION),
            expertise_section: cell(row, COL_SECTION),
            text: cell(row, COL_TEXT),
            urgency: cell(row, COL_URGENCY),
        })
        .filter(|r| !r.text.is_empty())
        .collect())
}

/// Groups remark texts by category key, the shape the clustering service takes.
pub fn build_payload(rows: &[RemarkRow]) -> RemarkPayload {
    let mut payload = RemarkPayload::new();
    for row in rows {
        payload
            .entry(row.category().key().to_string())
            .or_default()
            .push(row.text.clone());
    }
    payload
}
