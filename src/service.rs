//! Caller-facing facade over export, import and progress observation.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use semver::Version;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::BackupConfig;
use crate::db::open_sqlite_pool;
use crate::export::{self, ExportSummary};
use crate::import::{
    run_import, ImportContext, ImportOptions, ImportProgress, ImportResult, ProgressPublisher,
    MIN_SUPPORTED_APP_VERSION,
};
use crate::store::{SqliteStore, Store};
use crate::{AppError, AppResult};

pub struct BackupService {
    store: Arc<dyn Store>,
    config: BackupConfig,
    progress: ProgressPublisher,
    session: Arc<AtomicBool>,
    minimum_app_version: Version,
}

impl BackupService {
    pub fn new(store: Arc<dyn Store>, config: BackupConfig) -> AppResult<Self> {
        let minimum_app_version = Version::parse(MIN_SUPPORTED_APP_VERSION).map_err(|err| {
            AppError::new("BACKUP/CONFIG", "Invalid minimum supported app version")
                .with_context("error", err.to_string())
        })?;
        Ok(Self {
            store,
            config,
            progress: ProgressPublisher::new(),
            session: Arc::new(AtomicBool::new(false)),
            minimum_app_version,
        })
    }

    /// Open the SQLite store described by `config` and wrap it.
    pub async fn open(config: BackupConfig) -> AppResult<Self> {
        let pool = open_sqlite_pool(&config.db_path)
            .await
            .map_err(|err| AppError::from(err).with_context("operation", "open_store"))?;
        Self::new(Arc::new(SqliteStore::new(pool)), config)
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    /// Latest import progress; `None` while no import is running or after a
    /// failed one.
    pub fn observe_progress(&self) -> watch::Receiver<Option<ImportProgress>> {
        self.progress.subscribe()
    }

    pub fn session_active(&self) -> bool {
        self.session.load(Ordering::SeqCst)
    }

    /// Write a full backup to `destination` and return a success message.
    pub async fn export(&self, destination: &Path) -> AppResult<String> {
        let _guard = SessionGuard::begin(self.session.clone())?;
        let summary =
            export::export_archive(&*self.store, destination, &self.config.app_version).await?;
        Ok(summary.message())
    }

    /// Write a full backup into `dir` under a conventional file name.
    pub async fn export_into(&self, dir: &Path) -> AppResult<ExportSummary> {
        let _guard = SessionGuard::begin(self.session.clone())?;
        export::export_into(
            &*self.store,
            dir,
            &self.config.archive_prefix,
            &self.config.app_version,
        )
        .await
    }

    pub async fn import(&self, source: &Path, options: ImportOptions) -> AppResult<ImportResult> {
        let _guard = SessionGuard::begin(self.session.clone())?;
        let ctx = ImportContext {
            store: &*self.store,
            progress: &self.progress,
            meal_images_dir: &self.config.meal_images_dir,
            exercise_images_dir: &self.config.exercise_images_dir,
            backups_dir: &self.config.backups_dir,
            reports_dir: self.config.reports_dir.as_deref(),
            archive_prefix: &self.config.archive_prefix,
            app_version: &self.config.app_version,
            minimum_app_version: &self.minimum_app_version,
            available_space_override: self.config.available_space_override,
        };
        Ok(run_import(source, options, &ctx).await?)
    }

    /// Run an import on the runtime without blocking the caller.
    pub fn spawn_import(
        self: &Arc<Self>,
        source: PathBuf,
        options: ImportOptions,
    ) -> JoinHandle<AppResult<ImportResult>> {
        let service = Arc::clone(self);
        tokio::spawn(async move { service.import(&source, options).await })
    }

    pub fn spawn_export(self: &Arc<Self>, destination: PathBuf) -> JoinHandle<AppResult<String>> {
        let service = Arc::clone(self);
        tokio::spawn(async move { service.export(&destination).await })
    }
}

/// Held for the duration of one export or import. Sessions never overlap.
struct SessionGuard {
    flag: Arc<AtomicBool>,
}

impl SessionGuard {
    fn begin(flag: Arc<AtomicBool>) -> AppResult<Self> {
        if flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AppError::new(
                "BACKUP/SESSION_ACTIVE",
                "A backup or restore is already running.",
            ));
        }
        Ok(Self { flag })
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_blocks_overlap_and_releases_on_drop() {
        let flag = Arc::new(AtomicBool::new(false));
        let guard = SessionGuard::begin(flag.clone()).expect("first session");
        let err = SessionGuard::begin(flag.clone()).err().expect("overlap rejected");
        assert_eq!(err.code(), "BACKUP/SESSION_ACTIVE");
        drop(guard);
        assert!(!flag.load(Ordering::SeqCst));
        assert!(SessionGuard::begin(flag).is_ok());
    }

    #[test]
    fn minimum_version_constant_parses() {
        assert!(Version::parse(MIN_SUPPORTED_APP_VERSION).is_ok());
    }
}
