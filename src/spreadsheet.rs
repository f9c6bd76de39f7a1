// spreadsheet.rs
// Minimal spreadsheet IO: reads the first sheet of an .xlsx workbook (or a
// .csv file) into rows of trimmed strings and writes single-sheet .xlsx files.

use std::io::{Cursor, Read, Write};

use thiserror::Error;
use zip::{ZipArchive, ZipWriter, write::SimpleFileOptions};

const XLSX_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xltx", "xltm"];
const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

#[derive(Debug, Error)]
pub enum SpreadsheetError {
    #[error("Invalid file type. Allowed: .xlsx, .xlsm, .xltx, .xltm or .csv files only.")]
    Unsupported,
    #[error("Legacy .xls workbooks are not supported, save the file as .xlsx.")]
    LegacyXls,
    #[error("Could not read the spreadsheet: {0}")]
    Unreadable(String),
}

impl From<zip::result::ZipError> for SpreadsheetError {
    fn from(err: zip::result::ZipError) -> Self {
        SpreadsheetError::Unreadable(err.to_string())
    }
}

impl From<roxmltree::Error> for SpreadsheetError {
    fn from(err: roxmltree::Error) -> Self {
        SpreadsheetError::Unreadable(err.to_string())
    }
}

impl From<std::io::Error> for SpreadsheetError {
    fn from(err: std::io::Error) -> Self {
        SpreadsheetError::Unreadable(err.to_string())
    }
}

impl From<csv::Error> for SpreadsheetError {
    fn from(err: csv::Error) -> Self {
        SpreadsheetError::Unreadable(err.to_string())
    }
}

pub fn extension(filename: &str) -> String {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Reads all rows of the uploaded file, picking the reader by extension.
pub fn read_rows(filename: &str, bytes: &[u8]) -> Result<Vec<Vec<String>>, SpreadsheetError> {
    let ext = extension(filename);
    if ext == "csv" {
        read_csv(bytes)
    } else if XLSX_EXTENSIONS.contains(&ext.as_str()) {
        read_xlsx(bytes)
    } else if ext == "xls" {
        Err(SpreadsheetError::LegacyXls)
    } else {
        Err(SpreadsheetError::Unsupported)
    }
}

fn read_csv(bytes: &[u8]) -> Result<Vec<Vec<String>>, SpreadsheetError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(|cell| cell.trim().to_string()).collect());
    }
    Ok(rows)
}

fn read_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<Option<String>, SpreadsheetError> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let mut text = String::new();
    file.read_to_string(&mut text)?;
    Ok(Some(text))
}

fn read_xlsx(bytes: &[u8]) -> Result<Vec<Vec<String>>, SpreadsheetError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    let shared = match read_entry(&mut archive, "xl/sharedStrings.xml")? {
        Some(xml) => shared_strings(&xml)?,
        None => Vec::new(),
    };
    let sheet_path = first_sheet_path(&mut archive)?;
    let sheet = read_entry(&mut archive, &sheet_path)?
        .ok_or_else(|| SpreadsheetError::Unreadable(format!("missing {sheet_path}")))?;
    sheet_rows(&sheet, &shared)
}

fn shared_strings(xml: &str) -> Result<Vec<String>, SpreadsheetError> {
    let doc = roxmltree::Document::parse(xml)?;
    Ok(doc
        .descendants()
        .filter(|n| n.tag_name().name() == "si")
        .map(|si| {
            // Rich text splits a string into several <r><t> runs.
            si.descendants()
                .filter(|n| n.tag_name().name() == "t")
                .filter_map(|t| t.text())
                .collect::<String>()
        })
        .collect())
}

/// Resolves the worksheet of the first `<sheet>` in workbook order.
fn first_sheet_path(archive: &mut ZipArchive<Cursor<&[u8]>>) -> Result<String, SpreadsheetError> {
    let fallback = "xl/worksheets/sheet1.xml".to_string();
    let (Some(workbook), Some(rels)) = (
        read_entry(archive, "xl/workbook.xml")?,
        read_entry(archive, "xl/_rels/workbook.xml.rels")?,
    ) else {
        return Ok(fallback);
    };

    let workbook = roxmltree::Document::parse(&workbook)?;
    let Some(rel_id) = workbook
        .descendants()
        .find(|n| n.tag_name().name() == "sheet")
        .and_then(|n| n.attribute((REL_NS, "id")))
    else {
        return Ok(fallback);
    };

    let rels = roxmltree::Document::parse(&rels)?;
    let target = rels
        .descendants()
        .filter(|n| n.tag_name().name() == "Relationship")
        .find(|n| n.attribute("Id") == Some(rel_id))
        .and_then(|n| n.attribute("Target"));

    Ok(match target {
        Some(t) if t.starts_with('/') => t.trim_start_matches('/').to_string(),
        Some(t) => format!("xl/{t}"),
        None => fallback,
    })
}

/// Widest sheet Excel writes (column XFD).
const MAX_COLUMNS: usize = 16_384;

/// Zero-based column index of a cell reference such as "AB12". `Err` when the
/// column lies beyond the widest possible sheet.
fn column_index(reference: &str) -> Result<Option<usize>, SpreadsheetError> {
    let mut index = 0usize;
    let mut seen = false;
    for ch in reference.chars().take_while(|c| c.is_ascii_alphabetic()) {
        seen = true;
        let digit = ch.to_ascii_uppercase() as usize - 'A' as usize + 1;
        index = index
            .checked_mul(26)
            .and_then(|i| i.checked_add(digit))
            .filter(|i| *i <= MAX_COLUMNS)
            .ok_or_else(|| SpreadsheetError::Unreadable(format!("cell reference {reference} is out of range")))?;
    }
    Ok(seen.then(|| index - 1))
}

fn sheet_rows(xml: &str, shared: &[String]) -> Result<Vec<Vec<String>>, SpreadsheetError> {
    let doc = roxmltree::Document::parse(xml)?;
    let mut rows = Vec::new();
    for row in doc.descendants().filter(|n| n.tag_name().name() == "row") {
        let mut values: Vec<String> = Vec::new();
        for cell in row.children().filter(|n| n.tag_name().name() == "c") {
            let col = match cell.attribute("r") {
                Some(reference) => column_index(reference)?,
                None => None,
            }
            .unwrap_or(values.len());
            let kind = cell.attribute("t").unwrap_or("n");
            let raw = cell
                .children()
                .find(|n| n.tag_name().name() == "v")
                .and_then(|v| v.text())
                .unwrap_or_default();
            let value = match kind {
                "s" => raw
                    .trim()
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| shared.get(i).cloned())
                    .unwrap_or_default(),
                "inlineStr" => cell
                    .descendants()
                    .filter(|n| n.tag_name().name() == "t")
                    .filter_map(|t| t.text())
                    .collect(),
                "b" => if raw == "1" { "TRUE" } else { "FALSE" }.to_string(),
                _ => raw.to_string(),
            };
            if values.len() <= col {
                values.resize(col + 1, String::new());
            }
            values[col] = value.trim().to_string();
        }
        rows.push(values);
    }
    Ok(rows)
}

/// Cell of an exported sheet.
#[derive(Debug, Clone)]
pub enum Cell {
    Text(String),
    Number(String),
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    pub fn number(value: impl ToString) -> Self {
        Cell::Number(value.to_string())
    }
}

fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if (c as u32) < 0x20 && c != '\n' && c != '\t' && c != '\r' => {}
            c => out.push(c),
        }
    }
    out
}

fn column_name(mut index: usize) -> String {
    let mut name = Vec::new();
    loop {
        name.push((b'A' + (index % 26) as u8) as char);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    name.iter().rev().collect()
}

fn sheet_xml(headers: &[&str], rows: &[Vec<Cell>]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );
    let header_row: Vec<Cell> = headers.iter().map(|h| Cell::text(*h)).collect();
    for (r, row) in std::iter::once(&header_row).chain(rows.iter()).enumerate() {
        let row_num = r + 1;
        xml.push_str(&format!(r#"<row r="{row_num}">"#));
        for (c, cell) in row.iter().enumerate() {
            let reference = format!("{}{}", column_name(c), row_num);
            match cell {
                Cell::Text(text) => xml.push_str(&format!(
                    r#"<c r="{reference}" t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
                    escape_xml(text)
                )),
                Cell::Number(num) => xml.push_str(&format!(
                    r#"<c r="{reference}"><v>{}</v></c>"#,
                    escape_xml(num)
                )),
            }
        }
        xml.push_str("</row>");
    }
    xml.push_str("</sheetData></worksheet>");
    xml
}

/// Builds a single-sheet workbook.
pub fn write_xlsx(
    sheet_name: &str,
    headers: &[&str],
    rows: &[Vec<Cell>],
) -> Result<Vec<u8>, SpreadsheetError> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();

    let parts: [(&str, String); 5] = [
        (
            "[Content_Types].xml",
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#
                .to_string(),
        ),
        (
            "_rels/.rels",
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#
                .to_string(),
        ),
        (
            "xl/workbook.xml",
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="{REL_NS}"><sheets><sheet name="{}" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
                escape_xml(sheet_name)
            ),
        ),
        (
            "xl/_rels/workbook.xml.rels",
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#
                .to_string(),
        ),
        ("xl/worksheets/sheet1.xml", sheet_xml(headers, rows)),
    ];

    for (name, body) in parts.iter() {
        zip.start_file(*name, options)?;
        zip.write_all(body.as_bytes())?;
    }
    Ok(zip.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_rows_are_trimmed() {
        let rows = read_rows(
            "products.csv",
            b"Name,Price,Quantity,Category\n\"Widget\", 9.99 ,5,\"Tools\"\n",
        )
        .unwrap();
        assert_eq!(rows[0], vec!["Name", "Price", "Quantity", "Category"]);
        assert_eq!(rows[1], vec!["Widget", "9.99", "5", "Tools"]);
    }

    #[test]
    fn legacy_and_unknown_extensions_are_rejected() {
        assert!(matches!(
            read_rows("old.XLS", b""),
            Err(SpreadsheetError::LegacyXls)
        ));
        assert!(matches!(
            read_rows("notes.txt", b""),
            Err(SpreadsheetError::Unsupported)
        ));
    }

    #[test]
    fn written_workbook_reads_back() {
        let bytes = write_xlsx(
            "Customers",
            &["ID", "Name", "Email"],
            &[vec![
                Cell::number(1),
                Cell::text("Ann & Co <west>"),
                Cell::text("ann@example.com"),
            ]],
        )
        .unwrap();
        let rows = read_rows("customers.xlsx", &bytes).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec!["ID", "Name", "Email"]);
        assert_eq!(rows[1], vec!["1", "Ann & Co <west>", "ann@example.com"]);
    }

    #[test]
    fn shared_strings_and_sparse_cells() {
        let shared = vec!["Name".to_string(), "Widget".to_string()];
        let sheet = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>
            <row r="1"><c r="A1" t="s"><v>0</v></c></row>
            <row r="2"><c r="A2" t="s"><v>1</v></c><c r="C2"><v>5</v></c></row>
        </sheetData></worksheet>"#;
        let rows = sheet_rows(sheet, &shared).unwrap();
        assert_eq!(rows[0], vec!["Name"]);
        assert_eq!(rows[1], vec!["Widget", "", "5"]);
    }

    #[test]
    fn column_names_match_references() {
        assert_eq!(column_name(0), "A");
        assert_eq!(column_name(25), "Z");
        assert_eq!(column_name(26), "AA");
        assert_eq!(column_index("AA7").unwrap(), Some(26));
        assert_eq!(column_index("C2").unwrap(), Some(2));
        assert_eq!(column_index("XFD1").unwrap(), Some(16_383));
        assert_eq!(column_index("7").unwrap(), None);
    }

    #[test]
    fn oversized_cell_references_are_unreadable() {
        assert!(matches!(column_index("XFE1"), Err(SpreadsheetError::Unreadable(_))));
        let xml = r#"<worksheet><sheetData><row r="1"><c r="ZZZZZZZZZZZZZZ1" t="inlineStr"><is><t>x</t></is></c></row></sheetData></worksheet>"#;
        assert!(matches!(sheet_rows(xml, &[]), Err(SpreadsheetError::Unreadable(_))));
        let xml = r#"<worksheet><sheetData><row r="1"><c r="ZZZZZZZ1"><v>1</v></c></row></sheetData></worksheet>"#;
        assert!(matches!(sheet_rows(xml, &[]), Err(SpreadsheetError::Unreadable(_))));
    }
}
