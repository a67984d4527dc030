use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Non-blocking, e.g. a table missing from the archive.
    Warning,
    /// Row-level: the row was skipped or failed, siblings proceed.
    Error,
    /// Session- or table-level abort.
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportIssue {
    pub table_name: String,
    pub line: Option<usize>,
    pub field: Option<String>,
    pub message: String,
    pub severity: Severity,
}

impl ImportIssue {
    pub fn new(table_name: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            line: None,
            field: None,
            message: message.into(),
            severity,
        }
    }

    pub fn warning(table_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(table_name, Severity::Warning, message)
    }

    pub fn error(table_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(table_name, Severity::Error, message)
    }

    pub fn fatal(table_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(table_name, Severity::Fatal, message)
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    pub fn on_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableImportResult {
    pub table_name: String,
    pub processed: usize,
    pub imported: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<ImportIssue>,
    pub warnings: Vec<ImportIssue>,
    /// Archive-local id to newly assigned id, for rows inserted by this table.
    pub id_mappings: BTreeMap<String, i64>,
}

impl TableImportResult {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            ..Self::default()
        }
    }

    pub fn has_fatal(&self) -> bool {
        self.errors.iter().any(|e| e.severity == Severity::Fatal)
    }

    pub(crate) fn push(&mut self, issue: ImportIssue) {
        match issue.severity {
            Severity::Warning => self.warnings.push(issue),
            Severity::Error | Severity::Fatal => self.errors.push(issue),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    /// No issue of [`Severity::Fatal`] occurred anywhere in the session.
    pub success: bool,
    pub tables_imported: Vec<String>,
    pub records_processed: usize,
    pub records_imported: usize,
    pub records_skipped: usize,
    pub records_failed: usize,
    pub errors: Vec<ImportIssue>,
    pub warnings: Vec<ImportIssue>,
    pub table_results: Vec<TableImportResult>,
    pub backup_path: Option<String>,
}

impl ImportResult {
    /// Fold per-table results plus session-level issues into the final result.
    pub fn aggregate(
        table_results: Vec<TableImportResult>,
        session_issues: Vec<ImportIssue>,
        backup_path: Option<String>,
    ) -> Self {
        let mut result = ImportResult {
            backup_path,
            ..Self::default()
        };
        for issue in session_issues {
            match issue.severity {
                Severity::Warning => result.warnings.push(issue),
                Severity::Error | Severity::Fatal => result.errors.push(issue),
            }
        }
        for table in &table_results {
            result.records_processed += table.processed;
            result.records_imported += table.imported;
            result.records_skipped += table.skipped;
            result.records_failed += table.failed;
            result.errors.extend(table.errors.iter().cloned());
            result.warnings.extend(table.warnings.iter().cloned());
            if table.imported > 0 && !table.has_fatal() {
                result.tables_imported.push(table.table_name.clone());
            }
        }
        result.success = !result.errors.iter().any(|e| e.severity == Severity::Fatal);
        result.table_results = table_results;
        result
    }

    /// Percentage of processed rows that were imported, 0 when nothing was
    /// processed.
    pub fn success_rate(&self) -> f64 {
        if self.records_processed == 0 {
            return 0.0;
        }
        self.records_imported as f64 / self.records_processed as f64 * 100.0
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImportReportFile<'a> {
    generated_at: String,
    archive_path: String,
    success_rate: f64,
    result: &'a ImportResult,
}

pub fn write_import_report(
    reports_dir: &Path,
    archive_path: &Path,
    result: &ImportResult,
) -> Result<PathBuf> {
    fs::create_dir_all(reports_dir)
        .with_context(|| format!("create reports directory {}", reports_dir.display()))?;

    let timestamp = Utc::now().format("import-%Y%m%d-%H%M%S.json");
    let path = reports_dir.join(timestamp.to_string());
    let payload = ImportReportFile {
        generated_at: Utc::now().to_rfc3339(),
        archive_path: archive_path.display().to_string(),
        success_rate: result.success_rate(),
        result,
    };
    let json = serde_json::to_string_pretty(&payload).context("serialize import report")?;
    fs::write(&path, json).with_context(|| format!("write import report {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn table(name: &str, processed: usize, imported: usize) -> TableImportResult {
        TableImportResult {
            processed,
            imported,
            skipped: processed - imported,
            ..TableImportResult::new(name)
        }
    }

    #[test]
    fn success_rate_handles_empty_session() {
        let result = ImportResult::aggregate(Vec::new(), Vec::new(), None);
        assert_eq!(result.success_rate(), 0.0);
        assert!(result.success);
    }

    #[test]
    fn aggregate_sums_tables_and_flags_fatal() {
        let mut broken = table("pills", 0, 0);
        broken.push(ImportIssue::fatal("pills", "begin failed"));
        let result = ImportResult::aggregate(
            vec![table("meals", 4, 3), broken],
            vec![ImportIssue::warning("tags", "table missing from archive")],
            None,
        );
        assert_eq!(result.records_processed, 4);
        assert_eq!(result.records_imported, 3);
        assert_eq!(result.records_skipped, 1);
        assert_eq!(result.tables_imported, vec!["meals".to_string()]);
        assert_eq!(result.warnings.len(), 1);
        assert!(!result.success);
        assert_eq!(result.success_rate(), 75.0);
    }

    #[test]
    fn row_errors_do_not_clear_success() {
        let mut meals = table("meals", 2, 1);
        meals.push(ImportIssue::error("meals", "name is blank").at_line(3).on_field("name"));
        let result = ImportResult::aggregate(vec![meals], Vec::new(), None);
        assert!(result.success);
        assert_eq!(result.errors[0].line, Some(3));
    }

    #[test]
    fn report_lands_in_reports_dir() {
        let dir = TempDir::new().unwrap();
        let result = ImportResult::aggregate(vec![table("meals", 1, 1)], Vec::new(), None);
        let path =
            write_import_report(&dir.path().join("reports"), Path::new("backup.zip"), &result)
                .unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["result"]["recordsImported"], 1);
        assert_eq!(value["archivePath"], "backup.zip");
    }
}
