use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;
use tokio::task;
use tracing::{info, warn};
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::codec::encode_table;
use crate::import::assets::{archive_entry_name, ImageKind};
use crate::model::{join_list, Record, TableKind};
use crate::store::Store;
use crate::time::{format_date, format_datetime, format_iso_local, now_local, FILE_STAMP_FORMAT};
use crate::{AppError, AppResult};

use self::manifest::{ExportInfo, EXPORT_INFO_ENTRY};

pub mod manifest;

pub const ARCHIVE_EXTENSION: &str = "zip";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSummary {
    pub archive_path: PathBuf,
    pub table_counts: BTreeMap<String, usize>,
    pub images_written: usize,
    pub images_missing: usize,
}

impl ExportSummary {
    pub fn total_records(&self) -> usize {
        self.table_counts.values().sum()
    }

    /// Human-readable success message handed back to callers.
    pub fn message(&self) -> String {
        format!(
            "Exported {} records from {} tables and {} images to {}",
            self.total_records(),
            self.table_counts.len(),
            self.images_written,
            self.archive_path.display()
        )
    }
}

/// `<prefix>_<yyyyMMdd_HHmmss>.zip`
pub fn archive_file_name(prefix: &str) -> String {
    format!(
        "{}_{}.{}",
        prefix,
        now_local().format(FILE_STAMP_FORMAT),
        ARCHIVE_EXTENSION
    )
}

/// A conventional archive path in `dir`, suffixed `-NN` if the name is taken.
pub fn unique_archive_path(dir: &Path, prefix: &str) -> AppResult<PathBuf> {
    let base = archive_file_name(prefix);
    let candidate = dir.join(&base);
    if !candidate.exists() {
        return Ok(candidate);
    }
    let stem = base.trim_end_matches(&format!(".{ARCHIVE_EXTENSION}")).to_string();
    for n in 1..100 {
        let candidate = dir.join(format!("{stem}-{n:02}.{ARCHIVE_EXTENSION}"));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(AppError::new(
        "EXPORT/NAME_EXHAUSTED",
        "Could not allocate a unique archive name",
    )
    .with_context("dir", dir.display().to_string()))
}

fn real(value: f64) -> String {
    value.to_string()
}

fn opt_real(value: Option<f64>) -> String {
    value.map(real).unwrap_or_default()
}

fn flag(value: bool) -> String {
    value.to_string()
}

/// Archive fields for a record, in the column order of its kind.
pub fn render_record(record: &Record) -> Vec<String> {
    match record {
        Record::Meal(m) => vec![
            m.id.to_string(),
            m.name.clone(),
            real(m.serving_size_value),
            m.serving_size_unit.as_str().to_string(),
            real(m.calories),
            real(m.protein),
            real(m.carbs),
            real(m.fat),
            opt_real(m.fiber),
            opt_real(m.sugar),
            real(m.sodium),
            m.local_image_path.clone().unwrap_or_default(),
            flag(m.is_favorite),
            format_datetime(&m.created_at),
        ],
        Record::Exercise(e) => vec![
            e.id.to_string(),
            e.name.clone(),
            e.category.as_str().to_string(),
            join_list(&e.muscle_groups),
            join_list(&e.image_paths),
            flag(e.is_favorite),
            format_datetime(&e.created_at),
        ],
        Record::Pill(p) => vec![
            p.id.to_string(),
            p.name.clone(),
            p.dosage.clone().unwrap_or_default(),
            p.notes.clone().unwrap_or_default(),
            format_datetime(&p.created_at),
        ],
        Record::Tag(t) => vec![
            t.id.to_string(),
            t.name.clone(),
            t.color.clone().unwrap_or_default(),
            format_datetime(&t.created_at),
        ],
        Record::UserGoal(g) => vec![
            g.id.to_string(),
            real(g.daily_calories),
            real(g.daily_protein),
            real(g.daily_carbs),
            real(g.daily_fat),
            real(g.daily_sodium),
            opt_real(g.target_weight),
            format_datetime(&g.updated_at),
        ],
        Record::MealCheckIn(c) => vec![
            c.id.to_string(),
            c.meal_id.to_string(),
            c.meal_type.as_str().to_string(),
            real(c.servings_multiplier),
            format_date(&c.check_in_date),
            format_datetime(&c.check_in_date_time),
            c.notes.clone().unwrap_or_default(),
        ],
        Record::ExerciseLog(l) => vec![
            l.id.to_string(),
            l.exercise_id.to_string(),
            real(l.weight),
            l.reps.to_string(),
            l.sets.to_string(),
            l.duration_minutes.map(|d| d.to_string()).unwrap_or_default(),
            l.notes.clone().unwrap_or_default(),
            format_iso_local(&l.logged_at),
        ],
        Record::PillCheckIn(p) => vec![
            p.id.to_string(),
            p.pill_id.to_string(),
            format_iso_local(&p.taken_at),
        ],
        Record::MealTag(j) => vec![j.meal_id.to_string(), j.tag_id.to_string()],
        Record::ExerciseTag(j) => vec![j.exercise_id.to_string(), j.tag_id.to_string()],
    }
}

fn image_refs(record: &Record) -> Vec<(ImageKind, String)> {
    match record {
        Record::Meal(m) => m
            .local_image_path
            .iter()
            .map(|p| (ImageKind::Meal, p.clone()))
            .collect(),
        Record::Exercise(e) => e
            .image_paths
            .iter()
            .map(|p| (ImageKind::Exercise, p.clone()))
            .collect(),
        _ => Vec::new(),
    }
}

struct TableEntry {
    kind: TableKind,
    text: String,
    rows: usize,
}

/// Write a full backup of `store` to `destination`.
pub async fn export_archive(
    store: &dyn Store,
    destination: &Path,
    app_version: &str,
) -> AppResult<ExportSummary> {
    let mut tables = Vec::with_capacity(TableKind::ALL.len());
    let mut images = Vec::new();
    for kind in TableKind::ALL {
        let records = store
            .fetch_all(kind)
            .await
            .map_err(|err| err.with_context("operation", "export_fetch"))?;
        let rows: Vec<Vec<String>> = records.iter().map(render_record).collect();
        images.extend(records.iter().flat_map(image_refs));
        tables.push(TableEntry {
            kind,
            text: encode_table(&kind.header(), &rows),
            rows: rows.len(),
        });
    }

    let info = ExportInfo::full_backup(app_version);
    let destination = destination.to_path_buf();
    let summary = task::spawn_blocking(move || write_archive(&destination, &tables, &images, &info))
        .await
        .map_err(|err| {
            AppError::new("EXPORT/TASK", "Export task panicked")
                .with_context("error", err.to_string())
        })??;

    info!(
        target: "nutrilog",
        event = "export_complete",
        path = %summary.archive_path.display(),
        records = summary.total_records(),
        images = summary.images_written,
        images_missing = summary.images_missing
    );
    Ok(summary)
}

/// Export into `dir` under a conventional archive name.
pub async fn export_into(
    store: &dyn Store,
    dir: &Path,
    prefix: &str,
    app_version: &str,
) -> AppResult<ExportSummary> {
    fs::create_dir_all(dir).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "create_export_dir")
            .with_context("path", dir.display().to_string())
    })?;
    let destination = unique_archive_path(dir, prefix)?;
    export_archive(store, &destination, app_version).await
}

fn write_archive(
    destination: &Path,
    tables: &[TableEntry],
    images: &[(ImageKind, String)],
    info: &ExportInfo,
) -> AppResult<ExportSummary> {
    let parent = match destination.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "create_export_parent")
            .with_context("path", parent.display().to_string())
    })?;
    let mut tmp = NamedTempFile::new_in(&parent).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "export_tempfile")
            .with_context("path", parent.display().to_string())
    })?;

    let mut table_counts = BTreeMap::new();
    let mut images_written = 0;
    let mut images_missing = 0;
    {
        let mut writer = ZipWriter::new(tmp.as_file_mut());
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

        for table in tables {
            writer
                .start_file(table.kind.file_name(), options)
                .map_err(|err| map_zip_error(err, "export_zip_table"))?;
            writer
                .write_all(table.text.as_bytes())
                .map_err(|err| AppError::from(err).with_context("operation", "export_zip_write"))?;
            table_counts.insert(table.kind.table_name().to_string(), table.rows);
        }

        let mut seen = HashSet::new();
        for (kind, local_path) in images {
            let Some(entry) = archive_entry_name(*kind, local_path) else {
                continue;
            };
            if !seen.insert(entry.clone()) {
                continue;
            }
            let source = Path::new(local_path);
            let mut file = match File::open(source) {
                Ok(file) => file,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    images_missing += 1;
                    warn!(
                        target: "nutrilog",
                        event = "export_image_missing",
                        path = %source.display()
                    );
                    continue;
                }
                Err(err) => {
                    return Err(AppError::from(err)
                        .with_context("operation", "export_image_open")
                        .with_context("path", source.display().to_string()))
                }
            };
            writer
                .start_file(entry, options)
                .map_err(|err| map_zip_error(err, "export_zip_image"))?;
            io::copy(&mut file, &mut writer)
                .map_err(|err| AppError::from(err).with_context("operation", "export_zip_copy"))?;
            images_written += 1;
        }

        writer
            .start_file(EXPORT_INFO_ENTRY, options)
            .map_err(|err| map_zip_error(err, "export_zip_info"))?;
        writer
            .write_all(info.render().as_bytes())
            .map_err(|err| AppError::from(err).with_context("operation", "export_zip_write"))?;
        writer
            .finish()
            .map_err(|err| map_zip_error(err, "export_zip_finish"))?;
    }

    tmp.as_file()
        .sync_all()
        .map_err(|err| AppError::from(err).with_context("operation", "export_sync"))?;
    tmp.persist(destination).map_err(|err| {
        AppError::from(err.error)
            .with_context("operation", "export_persist")
            .with_context("path", destination.display().to_string())
    })?;

    Ok(ExportSummary {
        archive_path: destination.to_path_buf(),
        table_counts,
        images_written,
        images_missing,
    })
}

fn map_zip_error(err: ZipError, operation: &'static str) -> AppError {
    AppError::from(err).with_context("operation", operation)
}
