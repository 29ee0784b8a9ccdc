use std::io::{Cursor, Read};
use std::sync::LazyLock;

use quick_xml::Reader;
use quick_xml::events::Event;
use regex::Regex;
use thiserror::Error;

use crate::remarks::read_first_sheet;

static MARKUP_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("invalid markup regex"));

const MAX_XML_PART_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported document format: {0}")]
    Unsupported(String),

    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),
}

/// Text of one page (PDF) or slide (PPTX). Formats without pages come
/// back as a single unnumbered entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextPage {
    /// 1-based.
    pub number: Option<usize>,
    pub text: String,
}

impl TextPage {
    fn whole(text: String) -> Self {
        Self { number: None, text }
    }
}

/// Text of a documentation file split by page, chosen by extension.
///
/// PDF and PPTX keep their page/slide numbers. DOCX yields one line per
/// paragraph, XLSX one line per row of the first sheet. Legacy binary
/// Office formats are refused; anything else is read as (lossy) UTF-8 with
/// markup tags removed.
pub fn extract_pages(bytes: &[u8], extension: &str) -> Result<Vec<TextPage>, ExtractError> {
    match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "pdf" => extract_pdf(bytes),
        "pptx" => extract_pptx(bytes),
        "docx" => Ok(vec![TextPage::whole(extract_docx(bytes)?)]),
        "xlsx" => Ok(vec![TextPage::whole(extract_xlsx(bytes)?)]),
        "doc" | "xls" | "ppt" => Err(ExtractError::Unsupported(extension.to_string())),
        _ => Ok(vec![TextPage::whole(strip_markup(&String::from_utf8_lossy(bytes)))]),
    }
}

/// All pages of [`extract_pages`] joined into one string.
pub fn extract_text(bytes: &[u8], extension: &str) -> Result<String, ExtractError> {
    let pages = extract_pages(bytes, extension)?;
    Ok(pages
        .into_iter()
        .map(|p| p.text)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n"))
}

fn strip_markup(text: &str) -> String {
    MARKUP_TAG.replace_all(text, "").trim().to_string()
}

/// pdf-extract panics on some malformed inputs; those count as extraction
/// failures like any other.
fn extract_pdf(bytes: &[u8]) -> Result<Vec<TextPage>, ExtractError> {
    let pages = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
        .map_err(|_| ExtractError::Pdf("parser panicked".to_string()))?
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| TextPage {
            number: Some(i + 1),
            text: text.trim().to_string(),
        })
        .collect())
}

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_part(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{name}: {e}")))?;
    let mut xml = Vec::new();
    entry
        .take(MAX_XML_PART_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if xml.len() as u64 >= MAX_XML_PART_BYTES {
        return Err(ExtractError::Ooxml(format!("{name} exceeds size limit")));
    }
    Ok(xml)
}

/// Concatenated text runs (`<w:t>`, `<a:t>`), a newline after each
/// paragraph.
fn paragraph_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"tab" => out.push(' '),
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim().to_string())
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_part(&mut archive, "word/document.xml")?;
    paragraph_text(&xml)
}

fn extract_pptx(bytes: &[u8]) -> Result<Vec<TextPage>, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .filter_map(|name| {
            name.trim_start_matches("ppt/slides/slide")
                .trim_end_matches(".xml")
                .parse::<u32>()
                .ok()
                .map(|n| (n, name.to_string()))
        })
        .collect();
    if slides.is_empty() {
        return Err(ExtractError::Ooxml("presentation has no slides".to_string()));
    }
    slides.sort();

    let mut pages = Vec::with_capacity(slides.len());
    for (number, name) in slides {
        let xml = read_part(&mut archive, &name)?;
        pages.push(TextPage {
            number: Some(number as usize),
            text: paragraph_text(&xml)?,
        });
    }
    Ok(pages)
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let rows = read_first_sheet(bytes).map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    Ok(rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|cell| cell.trim())
                .filter(|cell| !cell.is_empty())
                .collect::<Vec<_>>()
                .join("; ")
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(".\n"))
}
