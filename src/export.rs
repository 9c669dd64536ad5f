//! Export serializers: per-type CSV, the JSON sheet map, and the `.xlsx` workbook.
//!
//! The workbook is plain SpreadsheetML written into a zip archive with inline
//! strings, one worksheet per activity type in sheet order.

use std::io::{Cursor, Write};

use anyhow::Context;
use serde_json::{Map, Value};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::activity::{ActivityScope, ActivityType};
use crate::completion::status_of;
use crate::error::{PortalError, PortalResult};
use crate::models::ActivityRecord;
use crate::query::ExportSet;

pub const CSV_HEADER: [&str; 5] = ["Student Email", "Activity Type", "Title", "Status", "Date"];

pub const CSV_CONTENT_TYPE: &str = "text/csv; charset=utf-8";
pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const JSON_CONTENT_TYPE: &str = "application/json";

fn display_row(record: &ActivityRecord) -> [String; 5] {
    [
        record.email_id.clone(),
        record.activity_type.tag().to_string(),
        record.title().to_string(),
        status_of(record).label().to_string(),
        record
            .primary_date()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
    ]
}

/// Header row first, always, then one row per record.
pub fn write_csv<'a, I>(records: I) -> PortalResult<Vec<u8>>
where
    I: IntoIterator<Item = &'a ActivityRecord>,
{
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(CSV_HEADER)
        .context("failed to write csv header")?;
    for record in records {
        writer
            .write_record(display_row(record))
            .context("failed to write csv row")?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("failed to flush csv: {}", e.error()))?;
    Ok(bytes)
}

/// `{ sheet_name: [row, ...] }` with a key for every partition, empty or not.
pub fn sheet_map(set: &ExportSet) -> Value {
    let mut sheets = Map::new();
    for (activity_type, records) in &set.partitions {
        let rows: Vec<Value> = records
            .iter()
            .map(|record| {
                let row: Map<String, Value> = CSV_HEADER
                    .iter()
                    .zip(display_row(record))
                    .map(|(header, cell)| (header.to_string(), Value::String(cell)))
                    .collect();
                Value::Object(row)
            })
            .collect();
        sheets.insert(activity_type.sheet_name().to_string(), Value::Array(rows));
    }
    Value::Object(sheets)
}

fn xml_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c if (c as u32) < 0x20 && !matches!(c, '\t' | '\n' | '\r') => {}
            c => escaped.push(c),
        }
    }
    escaped
}

/// Zero-based column index to A, B, ... Z, AA, ...
fn column_name(mut index: usize) -> String {
    let mut name = Vec::new();
    loop {
        name.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    name.reverse();
    String::from_utf8(name).unwrap_or_default()
}

fn sheet_xml(records: &[ActivityRecord]) -> String {
    let mut rows = Vec::with_capacity(records.len() + 1);
    rows.push(CSV_HEADER.map(str::to_string));
    rows.extend(records.iter().map(display_row));

    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );
    for (r, row) in rows.iter().enumerate() {
        let row_no = r + 1;
        xml.push_str(&format!(r#"<row r="{row_no}">"#));
        for (c, cell) in row.iter().enumerate() {
            xml.push_str(&format!(
                r#"<c r="{}{row_no}" t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
                column_name(c),
                xml_escape(cell)
            ));
        }
        xml.push_str("</row>");
    }
    xml.push_str("</sheetData></worksheet>");
    xml
}

fn content_types_xml(sheet_count: usize) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#,
    );
    for i in 1..=sheet_count {
        xml.push_str(&format!(
            r#"<Override PartName="/xl/worksheets/sheet{i}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#
        ));
    }
    xml.push_str("</Types>");
    xml
}

const ROOT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

fn workbook_xml(sheet_names: &[&str]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>"#,
    );
    for (i, name) in sheet_names.iter().enumerate() {
        let id = i + 1;
        xml.push_str(&format!(
            r#"<sheet name="{}" sheetId="{id}" r:id="rId{id}"/>"#,
            xml_escape(name)
        ));
    }
    xml.push_str("</sheets></workbook>");
    xml
}

fn workbook_rels_xml(sheet_count: usize) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    );
    for id in 1..=sheet_count {
        xml.push_str(&format!(
            r#"<Relationship Id="rId{id}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{id}.xml"/>"#
        ));
    }
    xml.push_str("</Relationships>");
    xml
}

/// One worksheet per partition, in partition order, header row on every sheet.
pub fn write_workbook(set: &ExportSet) -> PortalResult<Vec<u8>> {
    let sheet_names: Vec<&str> = set
        .partitions
        .iter()
        .map(|(ty, _)| ActivityType::sheet_name(*ty))
        .collect();

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries: Vec<(String, String)> = vec![
        (
            "[Content_Types].xml".to_string(),
            content_types_xml(sheet_names.len()),
        ),
        ("_rels/.rels".to_string(), ROOT_RELS_XML.to_string()),
        ("xl/workbook.xml".to_string(), workbook_xml(&sheet_names)),
        (
            "xl/_rels/workbook.xml.rels".to_string(),
            workbook_rels_xml(sheet_names.len()),
        ),
    ];
    for (i, (_, records)) in set.partitions.iter().enumerate() {
        entries.push((
            format!("xl/worksheets/sheet{}.xml", i + 1),
            sheet_xml(records),
        ));
    }

    for (name, body) in entries {
        zip.start_file(name.as_str(), opts)
            .with_context(|| format!("failed to start workbook entry {name}"))?;
        zip.write_all(body.as_bytes())
            .with_context(|| format!("failed to write workbook entry {name}"))?;
    }

    let cursor = zip.finish().context("failed to finalize workbook")?;
    Ok(cursor.into_inner())
}

/// Output shape for an `All` export; single-type exports are always CSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownloadFormat {
    #[default]
    Json,
    Xlsx,
}

impl DownloadFormat {
    pub fn parse(raw: Option<&str>) -> PortalResult<Self> {
        match raw.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("json") => Ok(DownloadFormat::Json),
            Some("xlsx") | Some("excel") => Ok(DownloadFormat::Xlsx),
            Some(other) => Err(PortalError::validation(format!("unknown format: {other:?}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Download {
    pub content_type: &'static str,
    pub file_name: String,
    pub body: Vec<u8>,
}

pub fn render(set: &ExportSet, format: DownloadFormat) -> PortalResult<Download> {
    match (set.scope, format) {
        (ActivityScope::Single(activity_type), _) => Ok(Download {
            content_type: CSV_CONTENT_TYPE,
            file_name: format!("{}-activities.csv", activity_type.descriptor().slug),
            body: write_csv(set.records())?,
        }),
        (ActivityScope::All, DownloadFormat::Json) => Ok(Download {
            content_type: JSON_CONTENT_TYPE,
            file_name: "activities.json".to_string(),
            body: serde_json::to_vec(&sheet_map(set)).context("failed to encode export")?,
        }),
        (ActivityScope::All, DownloadFormat::Xlsx) => Ok(Download {
            content_type: XLSX_CONTENT_TYPE,
            file_name: "activities.xlsx".to_string(),
            body: write_workbook(set)?,
        }),
    }
}
