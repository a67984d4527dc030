use std::path::{Path, PathBuf};

use anyhow::bail;

pub const DATA_DIR_ENV: &str = "NUTRILOG_DATA_DIR";
pub const ARCHIVE_PREFIX_ENV: &str = "NUTRILOG_ARCHIVE_PREFIX";
pub const REPORTS_DIR_ENV: &str = "NUTRILOG_REPORTS_DIR";

pub const DEFAULT_DATA_DIR: &str = "nutrilog-data";
pub const DEFAULT_ARCHIVE_PREFIX: &str = "nutrilog";
pub const DB_FILE_NAME: &str = "nutrilog.sqlite3";

/// Filesystem layout and naming used by backup and restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupConfig {
    pub data_root: PathBuf,
    pub db_path: PathBuf,
    pub meal_images_dir: PathBuf,
    pub exercise_images_dir: PathBuf,
    /// Where pre-import safety backups go.
    pub backups_dir: PathBuf,
    /// JSON import reports are only written when this is set.
    pub reports_dir: Option<PathBuf>,
    pub log_dir: PathBuf,
    pub archive_prefix: String,
    pub app_version: String,
    /// Test hook for the disk preflight.
    pub available_space_override: Option<u64>,
}

impl BackupConfig {
    /// Default layout beneath `data_root`.
    pub fn for_data_root(data_root: impl Into<PathBuf>) -> Self {
        let data_root = data_root.into();
        Self {
            db_path: data_root.join(DB_FILE_NAME),
            meal_images_dir: data_root.join("images").join("meals"),
            exercise_images_dir: data_root.join("images").join("exercises"),
            backups_dir: data_root.join("backups"),
            reports_dir: None,
            log_dir: data_root.join("logs"),
            archive_prefix: DEFAULT_ARCHIVE_PREFIX.to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            available_space_override: None,
            data_root,
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let root = non_blank(DATA_DIR_ENV).unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
        let mut config = Self::for_data_root(root);
        if let Some(prefix) = non_blank(ARCHIVE_PREFIX_ENV) {
            config = config.with_archive_prefix(prefix)?;
        }
        if let Some(dir) = non_blank(REPORTS_DIR_ENV) {
            config.reports_dir = Some(PathBuf::from(dir));
        }
        Ok(config)
    }

    pub fn with_archive_prefix(mut self, prefix: impl Into<String>) -> anyhow::Result<Self> {
        let prefix = prefix.into();
        let prefix = prefix.trim();
        if prefix.is_empty() || prefix.contains(['/', '\\']) || prefix.starts_with('.') {
            bail!("invalid archive prefix {prefix:?}");
        }
        self.archive_prefix = prefix.to_string();
        Ok(self)
    }

    pub fn with_reports_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.reports_dir = Some(dir.as_ref().to_path_buf());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_hang_off_data_root() {
        let config = BackupConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.data_root, PathBuf::from(DEFAULT_DATA_DIR));
        assert_eq!(config.db_path, PathBuf::from(DEFAULT_DATA_DIR).join(DB_FILE_NAME));
        assert_eq!(config.archive_prefix, DEFAULT_ARCHIVE_PREFIX);
        assert!(config.reports_dir.is_none());
    }

    #[test]
    fn environment_overrides() {
        let config = BackupConfig::from_lookup(lookup(&[
            (DATA_DIR_ENV, "/srv/nutrilog"),
            (ARCHIVE_PREFIX_ENV, "mybackup"),
            (REPORTS_DIR_ENV, "/srv/reports"),
        ]))
        .unwrap();
        assert_eq!(
            config.meal_images_dir,
            PathBuf::from("/srv/nutrilog/images/meals")
        );
        assert_eq!(config.archive_prefix, "mybackup");
        assert_eq!(config.reports_dir, Some(PathBuf::from("/srv/reports")));
    }

    #[test]
    fn prefix_must_be_a_plain_name() {
        let err = BackupConfig::from_lookup(lookup(&[(ARCHIVE_PREFIX_ENV, "../evil")]));
        assert!(err.is_err());
        assert!(BackupConfig::for_data_root("x").with_archive_prefix("ok_name").is_ok());
    }
}
