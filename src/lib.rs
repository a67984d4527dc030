//! Backup and restore for the nutrition and exercise tracker.
//!
//! A backup is a ZIP archive holding one TSV file per table, the referenced
//! meal and exercise images, and an `export_info.tsv` descriptor. Restoring
//! replays the tables in dependency order, remapping primary keys as rows are
//! inserted.

pub mod codec;
pub mod config;
pub mod db;
mod error;
pub mod export;
pub mod import;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod service;
pub mod store;
pub mod time;

pub use config::BackupConfig;
pub use error::{AppError, AppResult};
pub use service::BackupService;
