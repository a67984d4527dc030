use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};
use zip::result::ZipError;
use zip::ZipArchive;

use super::assets::{AssetRelocator, ImageKind};
use crate::export::manifest::{ExportInfo, ExportInfoError, EXPORT_INFO_ENTRY};
use crate::model::TableKind;

#[derive(Debug, Error)]
pub enum ImportBundleError {
    #[error("archive not found: {0}")]
    Missing(PathBuf),
    #[error("failed to open archive {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("not a readable archive: {0}")]
    Zip(#[from] ZipError),
    #[error("failed to read entry {entry}: {source}")]
    Entry {
        entry: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to relocate image {entry}: {source}")]
    Relocate {
        entry: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid export_info.tsv: {0}")]
    ExportInfo(#[from] ExportInfoError),
}

/// Result of the single extraction pass.
#[derive(Debug, Default)]
pub struct ExtractedArchive {
    /// Raw TSV text per table kind.
    pub tables: HashMap<TableKind, String>,
    pub images_relocated: usize,
    /// Entries ignored because their names escape the archive root.
    pub rejected_entries: Vec<String>,
}

/// An opened backup archive.
pub struct ImportBundle {
    path: PathBuf,
    archive: ZipArchive<File>,
}

impl ImportBundle {
    pub fn open(path: &Path) -> Result<Self, ImportBundleError> {
        if !path.is_file() {
            return Err(ImportBundleError::Missing(path.to_path_buf()));
        }
        let file = File::open(path).map_err(|source| ImportBundleError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let archive = ZipArchive::new(file)?;
        Ok(Self {
            path: path.to_path_buf(),
            archive,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry_count(&self) -> usize {
        self.archive.len()
    }

    /// Uncompressed size of every image entry, read from the central
    /// directory without inflating anything.
    pub fn image_bytes(&mut self) -> Result<u64, ImportBundleError> {
        let mut total = 0_u64;
        for idx in 0..self.archive.len() {
            let entry = self.archive.by_index(idx)?;
            if !entry.is_dir() && ImageKind::classify(entry.name()).is_some() {
                total = total.saturating_add(entry.size());
            }
        }
        Ok(total)
    }

    pub fn export_info(&mut self) -> Result<Option<ExportInfo>, ImportBundleError> {
        let text = match self.archive.by_name(EXPORT_INFO_ENTRY) {
            Ok(mut entry) => read_text(&mut entry, EXPORT_INFO_ENTRY)?,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(ExportInfo::parse(&text)?))
    }

    /// One pass over every entry: table entries are collected as text,
    /// image entries are streamed through the relocator.
    pub fn extract(
        &mut self,
        relocator: &mut AssetRelocator,
    ) -> Result<ExtractedArchive, ImportBundleError> {
        let mut out = ExtractedArchive::default();
        for idx in 0..self.archive.len() {
            let mut entry = self.archive.by_index(idx)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let Some(enclosed) = entry.enclosed_name().map(Path::to_path_buf) else {
                warn!(target: "nutrilog", event = "import_entry_rejected", entry = %name);
                out.rejected_entries.push(name);
                continue;
            };

            if ImageKind::classify(&name).is_some() {
                relocator
                    .relocate(&name, &mut entry)
                    .map_err(|source| ImportBundleError::Relocate {
                        entry: name.clone(),
                        source,
                    })?;
                out.images_relocated += 1;
                continue;
            }

            let table = enclosed
                .to_str()
                .and_then(|n| n.strip_suffix(".tsv"))
                .and_then(TableKind::from_table_name);
            match table {
                Some(kind) => {
                    let text = read_text(&mut entry, &name)?;
                    out.tables.insert(kind, text);
                }
                None => {
                    debug!(target: "nutrilog", event = "import_entry_skipped", entry = %name);
                }
            }
        }
        Ok(out)
    }
}

fn read_text<R: Read>(reader: &mut R, name: &str) -> Result<String, ImportBundleError> {
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .map_err(|source| ImportBundleError::Entry {
            entry: name.to_string(),
            source,
        })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
