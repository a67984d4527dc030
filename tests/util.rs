#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nutrilog::codec::encode_table;
use nutrilog::export::manifest::{ExportInfo, EXPORT_INFO_ENTRY};
use nutrilog::model::TableKind;
use nutrilog::store::{SqliteStore, Store};
use nutrilog::{BackupConfig, BackupService};
use sqlx::SqlitePool;
use tempfile::TempDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const CREATED_AT: &str = "2024-03-01 08:15:00";

pub async fn temp_pool() -> SqlitePool {
    nutrilog::db::open_memory_pool()
        .await
        .expect("open in-memory tracker database")
}

pub async fn temp_store() -> Arc<dyn Store> {
    Arc::new(SqliteStore::new(temp_pool().await))
}

/// Data root in a temp dir plus a service over an in-memory store.
pub struct Harness {
    pub dir: TempDir,
    pub service: Arc<BackupService>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_store(temp_store().await).await
    }

    pub async fn with_store(store: Arc<dyn Store>) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = BackupConfig::for_data_root(dir.path().join("data"));
        config.available_space_override = Some(u64::MAX);
        let service = Arc::new(BackupService::new(store, config).unwrap());
        Self { dir, service }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

/// Encode `rows` under the header of `kind`.
pub fn table(kind: TableKind, rows: &[Vec<&str>]) -> (String, Vec<u8>) {
    let rows: Vec<Vec<String>> = rows
        .iter()
        .map(|r| r.iter().map(|f| f.to_string()).collect())
        .collect();
    (
        kind.file_name(),
        encode_table(&kind.header(), &rows).into_bytes(),
    )
}

pub fn export_info() -> (String, Vec<u8>) {
    (
        EXPORT_INFO_ENTRY.to_string(),
        ExportInfo::full_backup("0.1.0").render().into_bytes(),
    )
}

/// Header-only tables for every kind not listed in `present`.
pub fn empty_tables_except(present: &[TableKind], skip: &[TableKind]) -> Vec<(String, Vec<u8>)> {
    TableKind::ALL
        .into_iter()
        .filter(|k| !present.contains(k) && !skip.contains(k))
        .map(|k| table(k, &[]))
        .collect()
}

pub fn write_archive(path: &Path, entries: &[(String, Vec<u8>)]) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, bytes) in entries {
        zip.start_file(name.as_str(), options).unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.finish().unwrap();
}

pub fn meal_row<'a>(id: &'a str, name: &'a str, fiber: &'a str, image: &'a str) -> Vec<&'a str> {
    vec![
        id, name, "100", "g", "350", "12", "60", "6", fiber, "", "5", image, "false", CREATED_AT,
    ]
}

pub fn check_in_row<'a>(id: &'a str, meal_id: &'a str) -> Vec<&'a str> {
    vec![
        id,
        meal_id,
        "BREAKFAST",
        "1.5",
        "2024-03-02",
        "2024-03-02 07:30:00",
        "",
    ]
}
