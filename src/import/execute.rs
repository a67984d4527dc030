use std::path::{Path, PathBuf};
use std::time::Instant;

use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task;
use tracing::{debug, error, info, warn};

use super::assets::AssetRelocator;
use super::bundle::{ExtractedArchive, ImportBundle, ImportBundleError};
use super::id_map::IdMapTable;
use super::progress::{overall_percent, ImportProgress, ProgressPublisher};
use super::report::{write_import_report, ImportIssue, ImportResult, TableImportResult};
use super::rows::{build_record, RowContext, RowError};
use super::table_order::IMPORT_ORDER;
use super::validator::{check_disk_space, check_export_info, validate, ValidationError};
use crate::codec::decode_table;
use crate::export;
use crate::model::TableKind;
use crate::store::Store;
use crate::time::now_local;
use crate::AppError;

/// What to do with a row whose parent was not imported in this session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanPolicy {
    /// Drop the row and count it as skipped.
    #[default]
    Skip,
    /// Count the row as failed and report an error.
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOptions {
    pub create_backup: bool,
    pub orphan_policy: OrphanPolicy,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            create_backup: true,
            orphan_policy: OrphanPolicy::Skip,
        }
    }
}

/// Everything an import session needs besides the archive itself.
pub struct ImportContext<'a> {
    pub store: &'a dyn Store,
    pub progress: &'a ProgressPublisher,
    pub meal_images_dir: &'a Path,
    pub exercise_images_dir: &'a Path,
    pub backups_dir: &'a Path,
    pub reports_dir: Option<&'a Path>,
    pub archive_prefix: &'a str,
    pub app_version: &'a str,
    pub minimum_app_version: &'a Version,
    pub available_space_override: Option<u64>,
}

/// Session-level failures. Any of these aborts the whole import.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Bundle(#[from] ImportBundleError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("pre-import backup failed: {0}")]
    Backup(AppError),
    #[error("import task failed: {0}")]
    Task(String),
}

impl From<ImportError> for AppError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::Bundle(ImportBundleError::Missing(path)) => AppError::new(
                "IMPORT/SOURCE_MISSING",
                "The backup archive does not exist.",
            )
            .with_context("path", path.display().to_string()),
            ImportError::Bundle(other) => {
                AppError::new("IMPORT/ARCHIVE_INVALID", other.to_string())
            }
            ImportError::Validation(ValidationError::InsufficientDisk {
                required_bytes,
                available_bytes,
            }) => AppError::new("IMPORT/LOW_DISK", "Not enough disk space for archive images.")
                .with_context("required_bytes", required_bytes.to_string())
                .with_context("available_bytes", available_bytes.to_string()),
            ImportError::Validation(other) => {
                AppError::new("IMPORT/INCOMPATIBLE", other.to_string())
            }
            ImportError::Backup(inner) => {
                AppError::new("IMPORT/BACKUP_FAILED", "Pre-import backup failed.").with_cause(inner)
            }
            ImportError::Task(message) => AppError::new("IMPORT/TASK", message),
        }
    }
}

struct Preflight {
    bundle: ImportBundle,
    issues: Vec<ImportIssue>,
}

struct Extraction {
    archive: ExtractedArchive,
    relocator: AssetRelocator,
    issues: Vec<ImportIssue>,
}

/// Run one import session. Table- and row-level problems land in the
/// returned [`ImportResult`]; only session-level faults produce `Err`, and in
/// that case published progress is cleared.
pub async fn run_import(
    source: &Path,
    options: ImportOptions,
    ctx: &ImportContext<'_>,
) -> Result<ImportResult, ImportError> {
    let started = Instant::now();
    match run_session(source, options, ctx).await {
        Ok(result) => {
            info!(
                target: "nutrilog",
                event = "import_complete",
                source = %source.display(),
                success = result.success,
                processed = result.records_processed,
                imported = result.records_imported,
                skipped = result.records_skipped,
                failed = result.records_failed,
                ms = started.elapsed().as_millis() as u64
            );
            Ok(result)
        }
        Err(err) => {
            ctx.progress.clear();
            error!(
                target: "nutrilog",
                event = "import_failed",
                source = %source.display(),
                error = %err
            );
            Err(err)
        }
    }
}

async fn run_session(
    source: &Path,
    options: ImportOptions,
    ctx: &ImportContext<'_>,
) -> Result<ImportResult, ImportError> {
    if !source.is_file() {
        return Err(ImportBundleError::Missing(source.to_path_buf()).into());
    }

    let Preflight {
        bundle,
        issues: mut session_issues,
    } = preflight(source, ctx).await?;

    let backup_path = if options.create_backup {
        let summary = export::export_into(
            ctx.store,
            ctx.backups_dir,
            ctx.archive_prefix,
            ctx.app_version,
        )
        .await
        .map_err(ImportError::Backup)?;
        info!(
            target: "nutrilog",
            event = "import_backup_created",
            path = %summary.archive_path.display()
        );
        Some(summary.archive_path.display().to_string())
    } else {
        None
    };

    let mut id_map = IdMapTable::new();
    id_map.clear();

    let Extraction {
        archive,
        relocator,
        issues,
    } = extract(bundle, ctx).await?;
    session_issues.extend(issues);

    let now = now_local();
    let total = IMPORT_ORDER.len();
    let mut table_results = Vec::with_capacity(total);
    let mut running = (0_usize, 0_usize);
    for (idx, kind) in IMPORT_ORDER.into_iter().enumerate() {
        let Some(text) = archive.tables.get(&kind) else {
            warn!(target: "nutrilog", event = "import_table_missing", table = kind.table_name());
            session_issues.push(ImportIssue::warning(
                kind.table_name(),
                format!("{} not found in archive", kind.file_name()),
            ));
            publish(ctx.progress, kind, 100, overall_percent(idx + 1, total), running);
            continue;
        };

        publish(ctx.progress, kind, 0, overall_percent(idx, total), running);
        let rows = RowInputs {
            kind,
            text,
            relocator: &relocator,
            now,
            orphan_policy: options.orphan_policy,
        };
        let result = import_table(ctx.store, rows, &mut id_map).await;
        running.0 += result.processed;
        running.1 += result.imported;
        publish(ctx.progress, kind, 100, overall_percent(idx + 1, total), running);
        table_results.push(result);
    }

    let result = ImportResult::aggregate(table_results, session_issues, backup_path);
    ctx.progress.publish(ImportProgress {
        current_table: String::new(),
        current_table_progress: 100,
        total_tables: total,
        overall_progress: 100,
        records_processed: result.records_processed,
        records_imported: result.records_imported,
        is_complete: true,
    });

    if let Some(dir) = ctx.reports_dir {
        match write_import_report(dir, source, &result) {
            Ok(path) => info!(target: "nutrilog", event = "import_report_written", path = %path.display()),
            Err(err) => warn!(target: "nutrilog", event = "import_report_failed", error = %err),
        }
    }
    Ok(result)
}

fn publish(
    progress: &ProgressPublisher,
    kind: TableKind,
    table_percent: u8,
    overall: u8,
    (processed, imported): (usize, usize),
) {
    progress.publish(ImportProgress {
        current_table: kind.table_name().to_string(),
        current_table_progress: table_percent,
        total_tables: IMPORT_ORDER.len(),
        overall_progress: overall,
        records_processed: processed,
        records_imported: imported,
        is_complete: false,
    });
}

/// Open the archive and run the export-info and disk checks. Nothing is
/// written until this succeeds.
async fn preflight(source: &Path, ctx: &ImportContext<'_>) -> Result<Preflight, ImportError> {
    let source: PathBuf = source.to_path_buf();
    let meal_dir = ctx.meal_images_dir.to_path_buf();
    let minimum = ctx.minimum_app_version.clone();
    let space_override = ctx.available_space_override;

    task::spawn_blocking(move || -> Result<Preflight, ImportError> {
        let mut issues = Vec::new();
        let mut bundle = ImportBundle::open(&source)?;

        match bundle.export_info()? {
            Some(info) => check_export_info(&info, &minimum)?,
            None => issues.push(ImportIssue::warning(
                "export_info",
                "export_info.tsv not found in archive; version checks skipped",
            )),
        }

        let image_bytes = bundle.image_bytes()?;
        if image_bytes > 0 {
            let images_root = nearest_existing(&meal_dir);
            check_disk_space(image_bytes, &images_root, space_override)?;
        }
        Ok(Preflight { bundle, issues })
    })
    .await
    .map_err(|err| ImportError::Task(err.to_string()))?
}

/// Single pass over the archive entries: tables are read, images relocated.
async fn extract(
    mut bundle: ImportBundle,
    ctx: &ImportContext<'_>,
) -> Result<Extraction, ImportError> {
    let meal_dir = ctx.meal_images_dir.to_path_buf();
    let exercise_dir = ctx.exercise_images_dir.to_path_buf();

    task::spawn_blocking(move || -> Result<Extraction, ImportError> {
        let mut relocator = AssetRelocator::new(meal_dir, exercise_dir);
        let archive = bundle.extract(&mut relocator)?;
        let issues = archive
            .rejected_entries
            .iter()
            .map(|entry| {
                ImportIssue::warning(
                    "archive",
                    format!("entry {entry} escapes the archive root and was ignored"),
                )
            })
            .collect();
        debug!(
            target: "nutrilog",
            event = "import_extracted",
            entries = bundle.entry_count(),
            tables = archive.tables.len(),
            images = archive.images_relocated
        );
        Ok(Extraction {
            archive,
            relocator,
            issues,
        })
    })
    .await
    .map_err(|err| ImportError::Task(err.to_string()))?
}

/// Free space is measured on the closest ancestor that already exists.
fn nearest_existing(path: &Path) -> PathBuf {
    path.ancestors()
        .find(|p| p.exists())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

struct RowInputs<'a> {
    kind: TableKind,
    text: &'a str,
    relocator: &'a AssetRelocator,
    now: chrono::NaiveDateTime,
    orphan_policy: OrphanPolicy,
}

/// Replay one table inside a single unit of work. Row faults are recorded and
/// the loop moves on; failing to open or commit the unit is a table-level
/// fatal that discards the table's id mappings.
async fn import_table(
    store: &dyn Store,
    input: RowInputs<'_>,
    id_map: &mut IdMapTable,
) -> TableImportResult {
    let kind = input.kind;
    let table = kind.table_name();
    let started = Instant::now();
    let decoded = decode_table(input.text);
    let mut result = TableImportResult::new(table);

    let mut unit = match store.begin(kind).await {
        Ok(unit) => unit,
        Err(err) => {
            error!(target: "nutrilog", event = "import_table_begin_failed", table, error = %err);
            result.push(ImportIssue::fatal(
                table,
                format!("could not start unit of work: {err}"),
            ));
            return result;
        }
    };

    for row in &decoded.rows {
        result.processed += 1;
        let outcome = validate(kind, row);
        result.warnings.extend(outcome.warnings);
        if !outcome.is_valid {
            result.skipped += 1;
            result.errors.extend(outcome.errors);
            continue;
        }

        let ctx = RowContext {
            id_map: &*id_map,
            relocator: input.relocator,
            now: input.now,
        };
        let built = match build_record(kind, row, &ctx) {
            Ok(built) => built,
            Err(err @ RowError::MissingParent { .. }) => {
                match input.orphan_policy {
                    OrphanPolicy::Skip => {
                        debug!(target: "nutrilog", event = "import_row_orphan", table, line = row.line, reason = %err);
                        result.skipped += 1;
                    }
                    OrphanPolicy::Fail => {
                        result.failed += 1;
                        result.push(
                            ImportIssue::error(table, err.to_string())
                                .at_line(row.line)
                                .on_field(err.field()),
                        );
                    }
                }
                continue;
            }
            Err(err) => {
                result.failed += 1;
                result.push(
                    ImportIssue::error(table, err.to_string())
                        .at_line(row.line)
                        .on_field(err.field()),
                );
                continue;
            }
        };

        for image in &built.unresolved_images {
            result.push(
                ImportIssue::warning(table, format!("image {image} not found in archive"))
                    .at_line(row.line),
            );
        }

        let written = if kind.owns_primary_key() {
            unit.insert(&built.record).await
        } else {
            unit.upsert(&built.record).await.map(|()| None)
        };
        match written {
            Ok(new_id) => {
                result.imported += 1;
                if let (Some(old_id), Some(new_id)) = (built.record.id(), new_id) {
                    id_map.put(kind, old_id.to_string(), new_id);
                }
            }
            Err(err) => {
                result.failed += 1;
                result.push(
                    ImportIssue::error(table, format!("insert failed: {err}")).at_line(row.line),
                );
            }
        }
    }

    if let Err(err) = unit.commit().await {
        error!(target: "nutrilog", event = "import_table_commit_failed", table, error = %err);
        id_map.forget(kind);
        result.failed += result.imported;
        result.imported = 0;
        result.push(ImportIssue::fatal(
            table,
            format!("could not commit table: {err}"),
        ));
        return result;
    }

    if kind.owns_primary_key() {
        result.id_mappings = id_map.mappings_for(kind);
    }
    info!(
        target: "nutrilog",
        event = "import_table",
        table,
        processed = result.processed,
        imported = result.imported,
        skipped = result.skipped,
        failed = result.failed,
        ms = started.elapsed().as_millis() as u64
    );
    result
}
