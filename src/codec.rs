//! Tab-separated row codec used for every table entry in a backup archive.
//!
//! Values are never quoted. Instead the four control characters that would
//! break a line apart are escaped: backslash first, then tab, newline and
//! carriage return. Decoding walks each field once from left to right, so the
//! backslash introduced by escaping is never confused with payload text.

use std::sync::Arc;

pub const FIELD_SEPARATOR: char = '\t';

/// One decoded data line. `line` is the 1-based line number in the source
/// entry (the header is line 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRow {
    pub line: usize,
    pub fields: Vec<String>,
    header: Arc<[String]>,
}

impl RecordRow {
    pub fn new(line: usize, header: Arc<[String]>, fields: Vec<String>) -> Self {
        Self {
            line,
            fields,
            header,
        }
    }

    /// Raw field for a column, looked up through the table header. `None`
    /// when the header has no such column or the line is short.
    pub fn get(&self, column: &str) -> Option<&str> {
        let idx = self.header.iter().position(|name| name == column)?;
        self.fields.get(idx).map(String::as_str)
    }

    /// Like [`RecordRow::get`] but treats blank values as absent.
    pub fn non_blank(&self, column: &str) -> Option<&str> {
        self.get(column).map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }
}

/// A fully decoded table entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedTable {
    pub header: Vec<String>,
    pub rows: Vec<RecordRow>,
}

pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

pub fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            // Unknown escapes and a trailing backslash are kept verbatim.
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Encode one row as a single line terminated by `\n`.
pub fn encode_line<S: AsRef<str>>(values: &[S]) -> String {
    let mut line = String::new();
    for (idx, value) in values.iter().enumerate() {
        if idx > 0 {
            line.push(FIELD_SEPARATOR);
        }
        line.push_str(&escape(value.as_ref()));
    }
    line.push('\n');
    line
}

pub fn decode_line(line: &str) -> Vec<String> {
    line.split(FIELD_SEPARATOR).map(unescape).collect()
}

/// Encode a header plus rows into the text of one table entry.
pub fn encode_table<S: AsRef<str>>(header: &[S], rows: &[Vec<String>]) -> String {
    let mut out = encode_line(header);
    for row in rows {
        out.push_str(&encode_line(row));
    }
    out
}

/// Decode a table entry. The first non-blank line is the header; empty input
/// yields an empty table, a header alone yields zero rows.
pub fn decode_table(text: &str) -> DecodedTable {
    let mut lines = text
        .split('\n')
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.strip_suffix('\r').unwrap_or(line)))
        .filter(|(_, line)| !line.is_empty());

    let Some((_, header_line)) = lines.next() else {
        return DecodedTable::default();
    };
    let header = decode_line(header_line);
    let shared: Arc<[String]> = header.clone().into();
    let rows = lines
        .map(|(line_no, line)| RecordRow::new(line_no, shared.clone(), decode_line(line)))
        .collect();

    DecodedTable { header, rows }
}
