//! Text extraction for the supported upload formats.
//!
//! Every supported extension maps to one [`FileKind`]; dispatch is an exhaustive `match`,
//! so adding a format means adding a variant and handling it everywhere it is matched.
//! Extraction reads a file from disk and returns one or more [`Document`]s: PDFs yield a
//! document per page, spreadsheets a document per worksheet, Markdown a document per
//! heading-delimited section.

use super::types::{Document, ExtractionError, UnsupportedFileType};
use quick_xml::{Reader, events::Event};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;

/// Metadata key holding the 1-based page number of a PDF document.
pub const PAGE_LABEL_KEY: &str = "page_label";
/// Metadata key holding the worksheet name of a spreadsheet document.
pub const SHEET_NAME_KEY: &str = "sheet_name";

/// Maximum decompressed bytes read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum worksheets read from a workbook.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum non-empty cells read per worksheet.
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

/// Upload formats the extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// Portable Document Format.
    Pdf,
    /// Office Open XML word-processing document.
    Docx,
    /// Plain UTF-8 text.
    Text,
    /// Markdown.
    Markdown,
    /// Office Open XML spreadsheet.
    Spreadsheet,
}

impl FileKind {
    /// Every supported kind, in the order advertised to clients.
    pub const ALL: [FileKind; 5] = [
        FileKind::Pdf,
        FileKind::Docx,
        FileKind::Text,
        FileKind::Markdown,
        FileKind::Spreadsheet,
    ];

    /// Canonical extension, including the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            FileKind::Pdf => ".pdf",
            FileKind::Docx => ".docx",
            FileKind::Text => ".txt",
            FileKind::Markdown => ".md",
            FileKind::Spreadsheet => ".xlsx",
        }
    }

    /// MIME type used when the client did not declare one.
    pub fn default_content_type(self) -> &'static str {
        match self {
            FileKind::Pdf => "application/pdf",
            FileKind::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            FileKind::Text => "text/plain",
            FileKind::Markdown => "text/markdown",
            FileKind::Spreadsheet => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
        }
    }

    /// Comma-separated list of supported extensions.
    pub fn supported_list() -> String {
        Self::ALL
            .iter()
            .map(|kind| kind.extension())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Resolve a kind from a filename's final extension, case-insensitively.
    pub fn from_filename(filename: &str) -> Result<Self, UnsupportedFileType> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{}", ext.to_lowercase()))
            .unwrap_or_default();

        Self::ALL
            .into_iter()
            .find(|kind| kind.extension() == extension)
            .ok_or(UnsupportedFileType { extension })
    }

    /// Extract documents from the file at `path`.
    pub fn extract(self, path: &Path) -> Result<Vec<Document>, ExtractionError> {
        match self {
            FileKind::Pdf => extract_pdf(path),
            FileKind::Docx => extract_docx(&std::fs::read(path)?),
            FileKind::Text => Ok(vec![Document::new(read_utf8(path)?)]),
            FileKind::Markdown => Ok(split_markdown(&read_utf8(path)?)),
            FileKind::Spreadsheet => extract_xlsx(&std::fs::read(path)?),
        }
    }
}

fn read_utf8(path: &Path) -> Result<String, ExtractionError> {
    let text = String::from_utf8(std::fs::read(path)?)?;
    Ok(match text.strip_prefix('\u{feff}') {
        Some(stripped) => stripped.to_string(),
        None => text,
    })
}

fn extract_pdf(path: &Path) -> Result<Vec<Document>, ExtractionError> {
    let pages = pdf_extract::extract_text_by_pages(path)
        .map_err(|err| ExtractionError::Pdf(err.to_string()))?;
    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(index, text)| {
            Document::new(text).with_metadata(PAGE_LABEL_KEY, (index + 1).to_string())
        })
        .collect())
}

/// Split Markdown into heading-delimited sections; headings inside code fences do not split.
fn split_markdown(text: &str) -> Vec<Document> {
    let mut sections = Vec::new();
    let mut current = String::new();
    let mut open_fence: Option<&str> = None;

    for line in text.lines() {
        let trimmed = line.trim_start();
        let marker = ["```", "~~~"]
            .into_iter()
            .find(|marker| trimmed.starts_with(marker));
        if let Some(marker) = marker {
            match open_fence {
                None => open_fence = Some(marker),
                Some(opened) if opened == marker => open_fence = None,
                Some(_) => {}
            }
        } else if open_fence.is_none() && is_heading(trimmed) && !current.trim().is_empty() {
            sections.push(Document::new(current.trim_end()));
            current.clear();
        }
        current.push_str(line);
        current.push('\n');
    }

    if !current.trim().is_empty() {
        sections.push(Document::new(current.trim_end()));
    }
    if sections.is_empty() {
        sections.push(Document::new(text));
    }
    sections
}

fn is_heading(line: &str) -> bool {
    let hashes = line.bytes().take_while(|byte| *byte == b'#').count();
    if !(1..=6).contains(&hashes) {
        return false;
    }
    let rest = &line[hashes..];
    rest.is_empty() || rest.starts_with(' ') || rest.starts_with('\t')
}

fn ooxml(err: impl std::fmt::Display) -> ExtractionError {
    ExtractionError::Ooxml(err.to_string())
}

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractionError> {
    zip::ZipArchive::new(Cursor::new(bytes)).map_err(ooxml)
}

fn read_zip_entry_bounded(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractionError> {
    let entry = archive.by_name(name).map_err(ooxml)?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(ooxml)?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractionError::Ooxml(format!(
            "ZIP entry {name} exceeds size limit ({MAX_XML_ENTRY_BYTES} bytes)"
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<Vec<Document>, ExtractionError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml")?;
    Ok(vec![Document::new(docx_text(&xml)?)])
}

/// Collect `w:t` runs, ending each paragraph with a newline.
fn docx_text(xml: &[u8]) -> Result<String, ExtractionError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" | b"cr" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(text)) if in_text => out.push_str(&text.unescape().map_err(ooxml)?),
            Ok(Event::Eof) => break,
            Err(err) => return Err(ooxml(err)),
            _ => {}
        }
        buf.clear();
    }

    Ok(out.trim_end().to_string())
}

fn extract_xlsx(bytes: &[u8]) -> Result<Vec<Document>, ExtractionError> {
    let mut archive = open_archive(bytes)?;
    let shared_strings = read_shared_strings(&mut archive)?;
    let worksheets = resolve_worksheets(&mut archive)?;

    if worksheets.is_empty() {
        return Err(ExtractionError::Ooxml(
            "workbook contains no worksheets".to_string(),
        ));
    }
    if worksheets.len() > XLSX_MAX_SHEETS {
        tracing::warn!(
            sheets = worksheets.len(),
            limit = XLSX_MAX_SHEETS,
            skipped = ?worksheets[XLSX_MAX_SHEETS..]
                .iter()
                .map(|(name, _)| name.as_str())
                .collect::<Vec<_>>(),
            "Workbook exceeds sheet limit; remaining sheets skipped"
        );
    }

    let mut documents = Vec::new();
    for (name, entry) in worksheets.into_iter().take(XLSX_MAX_SHEETS) {
        let xml = read_zip_entry_bounded(&mut archive, &entry)?;
        let (text, truncated) = sheet_text(&xml, &shared_strings)?;
        if truncated {
            tracing::warn!(
                sheet = %name,
                limit = XLSX_MAX_CELLS_PER_SHEET,
                "Worksheet exceeds cell limit; remaining cells skipped"
            );
        }
        documents.push(Document::new(text).with_metadata(SHEET_NAME_KEY, name));
    }
    Ok(documents)
}

/// Worksheets as `(name, part path)` in workbook tab order.
///
/// Sheets are linked to their parts through `r:id` in `xl/_rels/workbook.xml.rels`. Without
/// that file the parts are taken in `sheetN.xml` numeric order and named positionally.
fn resolve_worksheets(archive: &mut Archive<'_>) -> Result<Vec<(String, String)>, ExtractionError> {
    let sheets = read_workbook_sheets(archive)?;
    if let Some(relationships) = read_workbook_relationships(archive)? {
        let resolved: Vec<(String, String)> = sheets
            .into_iter()
            .filter_map(|sheet| {
                let target = relationships.get(sheet.relationship_id.as_deref()?)?;
                Some((sheet.name, target.clone()))
            })
            .filter(|(_, target)| archive.file_names().any(|entry| entry == target))
            .collect();
        return Ok(resolved);
    }

    let mut parts: Vec<String> = archive
        .file_names()
        .filter(|name| name.starts_with("xl/worksheets/sheet") && name.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    parts.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    Ok(parts
        .into_iter()
        .enumerate()
        .map(|(index, part)| {
            let name = sheets
                .get(index)
                .map(|sheet| sheet.name.clone())
                .unwrap_or_else(|| format!("Sheet{}", index + 1));
            (name, part)
        })
        .collect())
}

/// Shared strings, concatenating rich-text runs inside each `si`.
fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, ExtractionError> {
    if !archive.file_names().any(|entry| entry == "xl/sharedStrings.xml") {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml")?;

    let mut reader = Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.push(std::mem::take(&mut current)),
                b"t" => in_text = false,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Ok(Event::Text(text)) if in_text => {
                current.push_str(&text.unescape().map_err(ooxml)?);
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(ooxml(err)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// `<sheet>` entry of `xl/workbook.xml`.
struct WorkbookSheet {
    name: String,
    relationship_id: Option<String>,
}

/// Worksheet declarations in workbook tab order.
fn read_workbook_sheets(archive: &mut Archive<'_>) -> Result<Vec<WorkbookSheet>, ExtractionError> {
    if !archive.file_names().any(|entry| entry == "xl/workbook.xml") {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, "xl/workbook.xml")?;

    let mut reader = Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut sheets = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sheet" => {
                let mut name = None;
                let mut relationship_id = None;
                for attribute in e.attributes() {
                    let attribute = attribute.map_err(ooxml)?;
                    let value = attribute.unescape_value().map_err(ooxml)?.into_owned();
                    match attribute.key.local_name().as_ref() {
                        b"name" => name = Some(value),
                        b"id" => relationship_id = Some(value),
                        _ => {}
                    }
                }
                if let Some(name) = name {
                    sheets.push(WorkbookSheet {
                        name,
                        relationship_id,
                    });
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(ooxml(err)),
            _ => {}
        }
        buf.clear();
    }
    Ok(sheets)
}

/// Relationship id to part path (`xl/...`), or `None` when the workbook has no rels part.
fn read_workbook_relationships(
    archive: &mut Archive<'_>,
) -> Result<Option<HashMap<String, String>>, ExtractionError> {
    const RELS: &str = "xl/_rels/workbook.xml.rels";
    if !archive.file_names().any(|entry| entry == RELS) {
        return Ok(None);
    }
    let xml = read_zip_entry_bounded(archive, RELS)?;

    let mut reader = Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut relationships = HashMap::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let mut id = None;
                let mut target = None;
                for attribute in e.attributes() {
                    let attribute = attribute.map_err(ooxml)?;
                    match attribute.key.local_name().as_ref() {
                        b"Id" => id = Some(attribute.unescape_value().map_err(ooxml)?.into_owned()),
                        b"Target" => {
                            target = Some(attribute.unescape_value().map_err(ooxml)?.into_owned())
                        }
                        _ => {}
                    }
                }
                if let (Some(id), Some(target)) = (id, target) {
                    relationships.insert(id, workbook_part_path(&target));
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(ooxml(err)),
            _ => {}
        }
        buf.clear();
    }
    Ok(Some(relationships))
}

/// Resolve a relationship target against the `xl/` directory.
fn workbook_part_path(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target.trim_start_matches("./")),
    }
}

/// Render a worksheet as lines of tab-separated non-empty cell values.
///
/// The flag is set when the cell limit stopped the read early.
fn sheet_text(xml: &[u8], shared_strings: &[String]) -> Result<(String, bool), ExtractionError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rows: Vec<String> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell_type: Option<String> = None;
    let mut value = String::new();
    let mut in_value = false;
    let mut cell_count = 0usize;
    let mut truncated = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    value.clear();
                    cell_type = None;
                    for attribute in e.attributes() {
                        let attribute = attribute.map_err(ooxml)?;
                        if attribute.key.local_name().as_ref() == b"t" {
                            cell_type =
                                Some(attribute.unescape_value().map_err(ooxml)?.into_owned());
                        }
                    }
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(text)) if in_value => {
                value.push_str(&text.unescape().map_err(ooxml)?);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let Some(resolved) = resolve_cell(cell_type.as_deref(), &value, shared_strings)
                    {
                        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
                            truncated = true;
                            break;
                        }
                        row.push(resolved);
                        cell_count += 1;
                    }
                    value.clear();
                }
                b"row" => {
                    if !row.is_empty() {
                        rows.push(row.join("\t"));
                        row.clear();
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(err) => return Err(ooxml(err)),
            _ => {}
        }
        buf.clear();
    }

    if !row.is_empty() {
        rows.push(row.join("\t"));
    }
    Ok((rows.join("\n"), truncated))
}

fn resolve_cell(cell_type: Option<&str>, raw: &str, shared_strings: &[String]) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let resolved = match cell_type {
        Some("s") => shared_strings.get(raw.parse::<usize>().ok()?)?.clone(),
        Some("b") => if raw == "1" { "TRUE" } else { "FALSE" }.to_string(),
        _ => raw.to_string(),
    };
    (!resolved.trim().is_empty()).then_some(resolved)
}
