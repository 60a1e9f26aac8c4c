//! Loading schemas and documents from disk.
//!
//! Schema sheets are Excel workbooks or CSV exports with either the Korean
//! column headers (`대분류`, `필드명`, `설명`, `데이터타입`, `검증규칙`) or
//! their English equivalents; JSON schemas are a field array or
//! `{"fields": [...]}`. Documents are PDF files or plain text in UTF-8 or
//! CP949.

use std::io::Read;
use std::path::Path;

use calamine::{open_workbook, Data, Range, Reader, Xlsx};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::domain::{DataType, Document, IngestError, Schema, SchemaField};

/// Largest document accepted by [`load_document`].
pub const MAX_DOCUMENT_BYTES: u64 = 50 * 1024 * 1024;

const NAME_HEADERS: &[&str] = &["필드명", "name", "field_name", "field"];
const DATA_TYPE_HEADERS: &[&str] = &["데이터타입", "data_type", "datatype", "type"];
const DESCRIPTION_HEADERS: &[&str] = &["설명", "description"];
const VALIDATION_HEADERS: &[&str] = &["검증규칙", "validation", "validation_rule"];
const CATEGORY_HEADERS: &[&str] = &["대분류", "category"];

/// Column positions of a schema sheet.
struct SheetColumns {
    name: usize,
    data_type: usize,
    description: Option<usize>,
    validation: Option<usize>,
    category: Option<usize>,
}

impl SheetColumns {
    fn locate(headers: &[String]) -> Result<Self, IngestError> {
        let normalized: Vec<String> = headers
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_lowercase())
            .collect();
        let find = |aliases: &[&str]| normalized.iter().position(|h| aliases.contains(&h.as_str()));

        Ok(Self {
            name: find(NAME_HEADERS)
                .ok_or_else(|| IngestError::MissingColumn("필드명 (name)".to_string()))?,
            data_type: find(DATA_TYPE_HEADERS)
                .ok_or_else(|| IngestError::MissingColumn("데이터타입 (data_type)".to_string()))?,
            description: find(DESCRIPTION_HEADERS),
            validation: find(VALIDATION_HEADERS),
            category: find(CATEGORY_HEADERS),
        })
    }
}

fn cell(row: &[String], index: Option<usize>) -> &str {
    index.and_then(|i| row.get(i)).map(|c| c.trim()).unwrap_or("")
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

/// Build a schema from a header row and data rows. Rows without a field name
/// are skipped and an empty data-type cell means text.
fn schema_from_rows<I>(headers: &[String], rows: I) -> Result<Schema, IngestError>
where
    I: IntoIterator<Item = Result<Vec<String>, IngestError>>,
{
    let columns = SheetColumns::locate(headers)?;

    let mut fields = Vec::new();
    for row in rows {
        let row = row?;
        let name = cell(&row, Some(columns.name));
        if name.is_empty() {
            continue;
        }

        let data_type = match cell(&row, Some(columns.data_type)) {
            "" => DataType::Text,
            label => label.parse()?,
        };

        let mut field = SchemaField::new(name, data_type)
            .with_description(cell(&row, columns.description));
        field.validation_rule = non_empty(cell(&row, columns.validation));
        field.category = non_empty(cell(&row, columns.category));
        fields.push(field);
    }

    Ok(Schema::new(fields)?)
}

fn record_cells(record: &csv::StringRecord) -> Vec<String> {
    record.iter().map(str::to_string).collect()
}

/// Parse a CSV schema sheet.
pub fn parse_schema_csv<R: Read>(reader: R) -> Result<Schema, IngestError> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = record_cells(rdr.headers()?);
    let rows = rdr
        .records()
        .map(|record| record.map(|r| record_cells(&r)).map_err(IngestError::from));
    schema_from_rows(&headers, rows)
}

// ---------------------------------------------------------------------------
// Excel workbooks
// ---------------------------------------------------------------------------

fn range_cells(row: &[Data]) -> Vec<String> {
    row.iter().map(|c| c.to_string()).collect()
}

/// Build a schema from a worksheet whose first row holds the headers.
pub fn parse_schema_range(range: &Range<Data>) -> Result<Schema, IngestError> {
    let mut rows = range.rows();
    let headers = rows.next().map(range_cells).unwrap_or_default();
    schema_from_rows(&headers, rows.map(|row| Ok(range_cells(row))))
}

/// Parse the first worksheet of an `.xlsx` workbook.
pub fn parse_schema_xlsx(path: &Path) -> Result<Schema, IngestError> {
    let mut workbook: Xlsx<_> =
        open_workbook(path).map_err(|e: calamine::XlsxError| IngestError::Workbook(e.to_string()))?;
    let Some(sheet) = workbook.sheet_names().first().cloned() else {
        return Err(IngestError::Workbook("workbook has no sheets".to_string()));
    };
    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| IngestError::Workbook(format!("sheet {sheet}: {e}")))?;
    debug!(sheet = %sheet, rows = range.height(), "reading schema worksheet");
    parse_schema_range(&range)
}

/// Parse a JSON schema: a field array or an object with a `fields` array.
pub fn parse_schema_json(text: &str) -> Result<Schema, IngestError> {
    let value: Value = serde_json::from_str(text)?;
    let fields = match value {
        Value::Object(mut map) => map.remove("fields").unwrap_or(Value::Null),
        other => other,
    };
    Ok(serde_json::from_value(fields)?)
}

/// Load a schema file, choosing the parser by extension (`.xlsx`, `.csv` or
/// `.json`).
pub fn load_schema(path: &Path) -> Result<Schema, IngestError> {
    let extension = file_extension(path);
    let schema = match extension.as_str() {
        "xlsx" | "xlsm" => parse_schema_xlsx(path)?,
        "csv" => parse_schema_csv(std::fs::File::open(path)?)?,
        "json" => parse_schema_json(&std::fs::read_to_string(path)?)?,
        other => return Err(IngestError::UnsupportedFormat(other.to_string())),
    };
    info!(path = %path.display(), fields = schema.len(), "loaded schema");
    Ok(schema)
}

/// Collapse every whitespace run to one space and trim the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn file_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default()
}

/// Decode text as UTF-8, falling back to CP949 (EUC-KR) for legacy Korean
/// exports.
pub fn decode_text(bytes: &[u8]) -> Result<String, IngestError> {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return Ok(text.trim_start_matches('\u{feff}').to_string());
    }
    warn!("document is not valid UTF-8, decoding as CP949");
    let (text, _, had_errors) = encoding_rs::EUC_KR.decode(bytes);
    if had_errors {
        return Err(IngestError::UndecodableText);
    }
    Ok(text.into_owned())
}

/// Join per-page text, prefixing each non-blank page with `[PAGE n]` so
/// agents can cite page numbers.
pub fn mark_pages<S: AsRef<str>>(pages: &[S]) -> String {
    pages
        .iter()
        .enumerate()
        .filter(|(_, text)| !text.as_ref().trim().is_empty())
        .map(|(index, text)| format!("[PAGE {}] {}", index + 1, text.as_ref().trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Extract page-marked text from a PDF.
pub fn extract_pdf_text(path: &Path) -> Result<String, IngestError> {
    // pdf_extract can panic on malformed files
    let owned = path.to_path_buf();
    let pages = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pdf_extract::extract_text_by_pages(&owned)
    }))
    .map_err(|_| IngestError::Pdf("extraction panicked on a malformed file".to_string()))?
    .map_err(|e| IngestError::Pdf(e.to_string()))?;

    debug!(path = %path.display(), pages = pages.len(), "extracted pdf text");
    Ok(mark_pages(&pages))
}

/// Load a document, refusing files above [`MAX_DOCUMENT_BYTES`].
///
/// `.pdf` files go through text extraction with page markers; anything else
/// is read as UTF-8 or CP949 text. Whitespace is collapsed either way.
pub fn load_document(path: &Path) -> Result<Document, IngestError> {
    let size = std::fs::metadata(path)?.len();
    if size > MAX_DOCUMENT_BYTES {
        return Err(IngestError::DocumentTooLarge {
            size,
            limit: MAX_DOCUMENT_BYTES,
        });
    }

    let raw = match file_extension(path).as_str() {
        "pdf" => extract_pdf_text(path)?,
        _ => decode_text(&std::fs::read(path)?)?,
    };
    let text = collapse_whitespace(&raw);
    info!(
        path = %path.display(),
        bytes = size,
        chars = text.chars().count(),
        "loaded document"
    );
    Ok(Document::new(text))
}
