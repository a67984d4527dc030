//! `export_info.tsv`: the metadata entry written last into every archive.
//!
//! Layout is `key<TAB>value` lines, a blank line, then one
//! `table_name<TAB>description` line per table kind.

use thiserror::Error;

use crate::codec::{decode_line, encode_line};
use crate::model::{TableKind, SCHEMA_VERSION};
use crate::time::{format_datetime, now_local};

pub const EXPORT_INFO_ENTRY: &str = "export_info.tsv";
pub const FULL_BACKUP: &str = "full_backup";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExportInfoError {
    #[error("export_info.tsv is missing key {0}")]
    MissingKey(&'static str),
    #[error("export_info.tsv has a non-numeric {key}: {value}")]
    NotNumeric { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportInfo {
    pub export_type: String,
    pub export_date: String,
    pub app_version: String,
    pub schema_version: u32,
    pub table_count: usize,
    /// `(table_name, description)` in archive order.
    pub tables: Vec<(String, String)>,
}

impl ExportInfo {
    /// Metadata describing a full backup written now by this build.
    pub fn full_backup(app_version: impl Into<String>) -> Self {
        Self {
            export_type: FULL_BACKUP.to_string(),
            export_date: format_datetime(&now_local()),
            app_version: app_version.into(),
            schema_version: SCHEMA_VERSION,
            table_count: TableKind::ALL.len(),
            tables: TableKind::ALL
                .iter()
                .map(|k| (k.table_name().to_string(), k.description().to_string()))
                .collect(),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&encode_line(&["export_type", self.export_type.as_str()]));
        out.push_str(&encode_line(&["export_date", self.export_date.as_str()]));
        out.push_str(&encode_line(&["app_version", self.app_version.as_str()]));
        out.push_str(&encode_line(&[
            "schema_version".to_string(),
            self.schema_version.to_string(),
        ]));
        out.push_str(&encode_line(&[
            "table_count".to_string(),
            self.table_count.to_string(),
        ]));
        out.push('\n');
        for (name, description) in &self.tables {
            out.push_str(&encode_line(&[name, description]));
        }
        out
    }

    pub fn parse(text: &str) -> Result<Self, ExportInfoError> {
        let mut keys: Vec<(String, String)> = Vec::new();
        let mut tables = Vec::new();
        let mut in_directory = false;
        for raw in text.split('\n') {
            let line = raw.strip_suffix('\r').unwrap_or(raw);
            if line.trim().is_empty() {
                if !keys.is_empty() {
                    in_directory = true;
                }
                continue;
            }
            let mut fields = decode_line(line).into_iter();
            let key = fields.next().unwrap_or_default();
            let value = fields.next().unwrap_or_default();
            if in_directory {
                tables.push((key, value));
            } else {
                keys.push((key, value));
            }
        }

        let lookup = |key: &'static str| -> Result<String, ExportInfoError> {
            keys.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.trim().to_string())
                .ok_or(ExportInfoError::MissingKey(key))
        };

        Ok(Self {
            export_type: lookup("export_type")?,
            export_date: lookup("export_date").unwrap_or_default(),
            app_version: lookup("app_version")?,
            schema_version: numeric("schema_version", lookup("schema_version")?)?,
            table_count: lookup("table_count")
                .and_then(|value| numeric("table_count", value))
                .unwrap_or(tables.len()),
            tables,
        })
    }
}

/// Parsed into the target width directly so out-of-range values are rejected.
fn numeric<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ExportInfoError> {
    value
        .parse::<T>()
        .map_err(|_| ExportInfoError::NotNumeric { key, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_backup_lists_every_table() {
        let info = ExportInfo::full_backup("1.2.3");
        assert_eq!(info.table_count, 10);
        assert_eq!(info.tables[0].0, "meals");
        assert_eq!(info.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn schema_version_out_of_range_is_rejected() {
        let text = ExportInfo::full_backup("1.2.3")
            .render()
            .replace("schema_version\t1\n", "schema_version\t4294967297\n");
        assert_eq!(
            ExportInfo::parse(&text),
            Err(ExportInfoError::NotNumeric {
                key: "schema_version",
                value: "4294967297".into(),
            })
        );
    }

    #[test]
    fn render_then_parse() {
        let info = ExportInfo::full_backup("1.2.3");
        let text = info.render();
        assert!(text.starts_with("export_type\tfull_backup\n"));
        assert!(text.contains("\n\nmeals\t"));
        assert_eq!(ExportInfo::parse(&text).unwrap(), info);
    }

    #[test]
    fn parse_reports_missing_keys() {
        let err = ExportInfo::parse("export_type\tfull_backup\n").unwrap_err();
        assert_eq!(err, ExportInfoError::MissingKey("app_version"));

        let err = ExportInfo::parse(
            "export_type\tfull_backup\napp_version\t1.0.0\nschema_version\tone\n",
        )
        .unwrap_err();
        assert!(matches!(err, ExportInfoError::NotNumeric { key: "schema_version", .. }));
    }
}
