//! Dialog export and import formats.
//!
//! JSON goes through serde. CSV, TSV, plain text and XML are small enough
//! to read and write by hand; each carries the same columns.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::{CodecError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Tsv,
    Text,
    Xml,
}

impl ExportFormat {
    pub fn name(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Tsv => "tsv",
            ExportFormat::Text => "txt",
            ExportFormat::Xml => "xml",
        }
    }

    /// Guess the format from a file extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        ext.parse().ok()
    }
}

impl FromStr for ExportFormat {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "tsv" | "tab" => Ok(ExportFormat::Tsv),
            "txt" | "text" => Ok(ExportFormat::Text),
            "xml" => Ok(ExportFormat::Xml),
            other => Err(CodecError::Config(format!("unknown export format '{}'", other))),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One dialog as it appears in an export file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DialogRow {
    pub id: u16,
    pub text: String,
    pub pointer: u16,
    pub address: usize,
    pub length: usize,
    pub tags: Vec<String>,
    pub notes: String,
    pub modified: bool,
}

pub fn render(format: ExportFormat, rows: &[DialogRow], rom_name: &str) -> Result<String> {
    match format {
        ExportFormat::Json => render_json(rows, rom_name),
        ExportFormat::Csv => Ok(render_delimited(rows, ',')),
        ExportFormat::Tsv => Ok(render_delimited(rows, '\t')),
        ExportFormat::Text => Ok(render_text(rows, rom_name)),
        ExportFormat::Xml => Ok(render_xml(rows, rom_name)),
    }
}

pub fn parse(format: ExportFormat, src: &str) -> Result<Vec<DialogRow>> {
    match format {
        ExportFormat::Json => parse_json(src),
        ExportFormat::Csv => parse_delimited(src, ExportFormat::Csv),
        ExportFormat::Tsv => parse_delimited(src, ExportFormat::Tsv),
        ExportFormat::Text => parse_text(src),
        ExportFormat::Xml => parse_xml(src),
    }
}

fn format_error(format: ExportFormat, record: usize, reason: impl Into<String>) -> CodecError {
    CodecError::ImportFormat {
        format: format.name(),
        record,
        reason: reason.into(),
    }
}

fn parse_number(s: &str) -> Option<u64> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

fn parse_id(format: ExportFormat, record: usize, s: &str) -> Result<u16> {
    parse_number(s)
        .and_then(|n| u16::try_from(n).ok())
        .ok_or_else(|| format_error(format, record, format!("bad dialog id '{}'", s)))
}

// JSON

#[derive(Serialize)]
struct JsonExport<'a> {
    dialogs: Vec<JsonDialog<'a>>,
    count: usize,
    rom: &'a str,
}

#[derive(Serialize)]
struct JsonDialog<'a> {
    id: String,
    text: &'a str,
    pointer: String,
    address: String,
    length: usize,
    tags: &'a [String],
    notes: &'a str,
    modified: bool,
}

#[derive(Deserialize)]
struct JsonImport {
    dialogs: Vec<JsonImportDialog>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonNumber {
    Text(String),
    Int(u64),
}

impl JsonNumber {
    fn value(&self) -> Option<u64> {
        match self {
            JsonNumber::Text(s) => parse_number(s),
            JsonNumber::Int(n) => Some(*n),
        }
    }
}

#[derive(Deserialize)]
struct JsonImportDialog {
    id: JsonNumber,
    text: String,
    #[serde(default)]
    pointer: Option<JsonNumber>,
    #[serde(default)]
    address: Option<JsonNumber>,
    #[serde(default)]
    length: Option<usize>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    notes: String,
    #[serde(default)]
    modified: bool,
}

fn render_json(rows: &[DialogRow], rom_name: &str) -> Result<String> {
    let export = JsonExport {
        dialogs: rows
            .iter()
            .map(|r| JsonDialog {
                id: format!("0x{:04X}", r.id),
                text: &r.text,
                pointer: format!("0x{:04X}", r.pointer),
                address: format!("0x{:06X}", r.address),
                length: r.length,
                tags: &r.tags,
                notes: &r.notes,
                modified: r.modified,
            })
            .collect(),
        count: rows.len(),
        rom: rom_name,
    };
    Ok(serde_json::to_string_pretty(&export)?)
}

fn parse_json(src: &str) -> Result<Vec<DialogRow>> {
    let import: JsonImport = serde_json::from_str(src)?;
    import
        .dialogs
        .into_iter()
        .enumerate()
        .map(|(i, d)| {
            let record = i + 1;
            let id = d
                .id
                .value()
                .and_then(|n| u16::try_from(n).ok())
                .ok_or_else(|| format_error(ExportFormat::Json, record, "bad dialog id"))?;
            Ok(DialogRow {
                id,
                text: d.text,
                pointer: d
                    .pointer
                    .and_then(|p| p.value())
                    .and_then(|n| u16::try_from(n).ok())
                    .unwrap_or(0),
                address: d
                    .address
                    .and_then(|a| a.value())
                    .and_then(|n| usize::try_from(n).ok())
                    .unwrap_or(0),
                length: d.length.unwrap_or(0),
                tags: d.tags,
                notes: d.notes,
                modified: d.modified,
            })
        })
        .collect()
}

// CSV / TSV

const COLUMNS: [&str; 8] = [
    "id", "pointer", "address", "length", "modified", "tags", "notes", "text",
];

fn row_fields(r: &DialogRow) -> [String; 8] {
    [
        format!("0x{:04X}", r.id),
        format!("0x{:04X}", r.pointer),
        format!("0x{:06X}", r.address),
        r.length.to_string(),
        r.modified.to_string(),
        join_tags(&r.tags),
        r.notes.clone(),
        r.text.clone(),
    ]
}

/// Tags share one column, separated by `;`. A literal `;` or backslash
/// inside a tag is backslash-escaped.
fn join_tags(tags: &[String]) -> String {
    tags.iter()
        .map(|t| t.replace('\\', "\\\\").replace(';', "\\;"))
        .collect::<Vec<_>>()
        .join(";")
}

fn split_tags(field: &str) -> Vec<String> {
    let mut tags = Vec::new();
    let mut tag = String::new();
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => tag.push(chars.next().unwrap_or('\\')),
            ';' => tags.push(std::mem::take(&mut tag)),
            c => tag.push(c),
        }
    }
    tags.push(tag);
    tags.retain(|t| !t.is_empty());
    tags
}

fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn tsv_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for c in field.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

fn tsv_unescape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn render_delimited(rows: &[DialogRow], sep: char) -> String {
    let escape: fn(&str) -> String = if sep == ',' { csv_field } else { tsv_field };
    let sep = sep.to_string();
    let mut out = COLUMNS.join(&sep);
    out.push('\n');
    for r in rows {
        let fields: Vec<String> = row_fields(r).iter().map(|f| escape(f)).collect();
        out.push_str(&fields.join(&sep));
        out.push('\n');
    }
    out
}

/// Split CSV into records, honouring quoted fields that span lines.
fn csv_records(src: &str) -> std::result::Result<Vec<Vec<String>>, (usize, String)> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = src.chars().peekable();

    while let Some(c) = chars.next() {
        if quoted {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => quoted = false,
                c => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => quoted = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            c => field.push(c),
        }
    }
    if quoted {
        return Err((records.len(), "unterminated quoted field".to_string()));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    records.retain(|r| !(r.len() == 1 && r[0].is_empty()));
    Ok(records)
}

fn parse_delimited(src: &str, format: ExportFormat) -> Result<Vec<DialogRow>> {
    let records: Vec<Vec<String>> = if format == ExportFormat::Csv {
        csv_records(src).map_err(|(record, reason)| format_error(format, record, reason))?
    } else {
        src.lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.is_empty())
            .map(|l| l.split('\t').map(tsv_unescape).collect())
            .collect()
    };

    let mut iter = records.into_iter();
    let header = iter
        .next()
        .ok_or_else(|| format_error(format, 0, "missing header row"))?;
    let column = |name: &str| header.iter().position(|h| h.trim() == name);
    let id_col = column("id").ok_or_else(|| format_error(format, 0, "no 'id' column"))?;
    let text_col = column("text").ok_or_else(|| format_error(format, 0, "no 'text' column"))?;
    let pointer_col = column("pointer");
    let address_col = column("address");
    let length_col = column("length");
    let modified_col = column("modified");
    let tags_col = column("tags");
    let notes_col = column("notes");

    let mut rows = Vec::new();
    for (i, fields) in iter.enumerate() {
        let record = i + 1;
        let get = |col: Option<usize>| col.and_then(|c| fields.get(c)).map(String::as_str);
        let id = parse_id(format, record, get(Some(id_col)).unwrap_or(""))?;
        let text = get(Some(text_col))
            .ok_or_else(|| format_error(format, record, "missing text field"))?
            .to_string();
        rows.push(DialogRow {
            id,
            text,
            pointer: get(pointer_col)
                .and_then(parse_number)
                .and_then(|n| u16::try_from(n).ok())
                .unwrap_or(0),
            address: get(address_col)
                .and_then(parse_number)
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(0),
            length: get(length_col)
                .and_then(parse_number)
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(0),
            tags: get(tags_col).map(split_tags).unwrap_or_default(),
            notes: get(notes_col).unwrap_or("").to_string(),
            modified: get(modified_col) == Some("true"),
        });
    }
    Ok(rows)
}

// Plain text

const TEXT_HEADER: &str = "### Dialog ";

fn render_text(rows: &[DialogRow], rom_name: &str) -> String {
    let mut out = format!("# {} ({} dialogs)\n\n", rom_name, rows.len());
    for r in rows {
        out.push_str(&format!("{}0x{:04X}\n{}\n\n", TEXT_HEADER, r.id, r.text));
    }
    out
}

/// Closes the current block. Only truly empty trailing lines are separators;
/// a line of spaces is dialog text.
fn finish_block(rows: &mut [DialogRow], body: &mut Vec<&str>) {
    while body.last().is_some_and(|l| l.is_empty()) {
        body.pop();
    }
    if let Some(row) = rows.last_mut() {
        row.text = body.join("\n");
    }
    body.clear();
}

fn parse_text(src: &str) -> Result<Vec<DialogRow>> {
    let mut rows: Vec<DialogRow> = Vec::new();
    let mut body: Vec<&str> = Vec::new();

    for line in src.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(id) = line.strip_prefix(TEXT_HEADER) {
            finish_block(&mut rows, &mut body);
            let record = rows.len() + 1;
            rows.push(DialogRow {
                id: parse_id(ExportFormat::Text, record, id)?,
                ..DialogRow::default()
            });
        } else if !rows.is_empty() {
            body.push(line);
        }
    }
    finish_block(&mut rows, &mut body);
    Ok(rows)
}

// XML

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

fn xml_unescape(s: &str) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let semi = tail
            .find(';')
            .ok_or_else(|| format!("unterminated entity in '{}'", s))?;
        let entity = &tail[1..semi];
        let c = match entity {
            "amp" => '&',
            "lt" => '<',
            "gt" => '>',
            "quot" => '"',
            "apos" => '\'',
            _ => {
                let code = if let Some(hex) = entity.strip_prefix("#x") {
                    u32::from_str_radix(hex, 16).ok()
                } else if let Some(dec) = entity.strip_prefix('#') {
                    dec.parse().ok()
                } else {
                    None
                };
                code.and_then(char::from_u32)
                    .ok_or_else(|| format!("unknown entity '&{};'", entity))?
            }
        };
        out.push(c);
        rest = &tail[semi + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn render_xml(rows: &[DialogRow], rom_name: &str) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(&format!(
        "<dialogs rom=\"{}\" count=\"{}\">\n",
        xml_escape(rom_name),
        rows.len()
    ));
    for r in rows {
        out.push_str(&format!(
            "  <dialog id=\"0x{:04X}\" pointer=\"0x{:04X}\" address=\"0x{:06X}\" length=\"{}\" modified=\"{}\">\n",
            r.id, r.pointer, r.address, r.length, r.modified
        ));
        out.push_str(&format!("    <text>{}</text>\n", xml_escape(&r.text)));
        if !r.tags.is_empty() {
            out.push_str("    <tags>");
            for tag in &r.tags {
                out.push_str(&format!("<tag>{}</tag>", xml_escape(tag)));
            }
            out.push_str("</tags>\n");
        }
        if !r.notes.is_empty() {
            out.push_str(&format!("    <notes>{}</notes>\n", xml_escape(&r.notes)));
        }
        out.push_str("  </dialog>\n");
    }
    out.push_str("</dialogs>\n");
    out
}

fn xml_attr<'a>(start_tag: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!(" {}=\"", name);
    let from = start_tag.find(&needle)? + needle.len();
    let len = start_tag[from..].find('"')?;
    Some(&start_tag[from..from + len])
}

/// Contents of every `<name>…</name>` element directly inside `body`.
fn xml_elements<'a>(body: &'a str, name: &str) -> Vec<&'a str> {
    let open = format!("<{}>", name);
    let close = format!("</{}>", name);
    let mut found = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find(&open) {
        let inner = &rest[start + open.len()..];
        match inner.find(&close) {
            Some(end) => {
                found.push(&inner[..end]);
                rest = &inner[end + close.len()..];
            }
            None => break,
        }
    }
    found
}

fn parse_xml(src: &str) -> Result<Vec<DialogRow>> {
    let format = ExportFormat::Xml;
    let mut rows = Vec::new();
    let mut rest = src;

    while let Some(start) = rest.find("<dialog ") {
        let record = rows.len() + 1;
        let element = &rest[start..];
        let tag_end = element
            .find('>')
            .ok_or_else(|| format_error(format, record, "unterminated <dialog> tag"))?;
        let start_tag = &element[..tag_end];
        let body_end = element
            .find("</dialog>")
            .ok_or_else(|| format_error(format, record, "missing </dialog>"))?;
        let body = &element[tag_end + 1..body_end];

        let unescape = |s: &str| xml_unescape(s).map_err(|e| format_error(format, record, e));
        let attr_number = |name: &str| xml_attr(start_tag, name).and_then(parse_number);

        let id_attr =
            xml_attr(start_tag, "id").ok_or_else(|| format_error(format, record, "no id"))?;
        let text = if body.contains("<text/>") {
            String::new()
        } else {
            let raw = xml_elements(body, "text")
                .into_iter()
                .next()
                .ok_or_else(|| format_error(format, record, "no <text> element"))?;
            unescape(raw)?
        };

        rows.push(DialogRow {
            id: parse_id(format, record, id_attr)?,
            text,
            pointer: attr_number("pointer")
                .and_then(|n| u16::try_from(n).ok())
                .unwrap_or(0),
            address: attr_number("address")
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(0),
            length: attr_number("length")
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(0),
            tags: xml_elements(body, "tag")
                .into_iter()
                .map(unescape)
                .collect::<Result<Vec<_>>>()?,
            notes: match xml_elements(body, "notes").into_iter().next() {
                Some(n) => unescape(n)?,
                None => String::new(),
            },
            modified: xml_attr(start_tag, "modified") == Some("true"),
        });

        rest = &element[body_end + "</dialog>".len()..];
    }
    Ok(rows)
}
