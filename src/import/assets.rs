//! Image relocation between archive entries and device-local files.
//!
//! Images travel under `images/meals/<file>` and `images/exercises/<file>`.
//! On import each entry is copied into the per-kind local directory and the
//! `zip path -> local path` pair is remembered so records can be rewritten to
//! point at the new file.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::debug;

pub const MEAL_IMAGES_PREFIX: &str = "images/meals/";
pub const EXERCISE_IMAGES_PREFIX: &str = "images/exercises/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
    Meal,
    Exercise,
}

impl ImageKind {
    pub fn prefix(self) -> &'static str {
        match self {
            ImageKind::Meal => MEAL_IMAGES_PREFIX,
            ImageKind::Exercise => EXERCISE_IMAGES_PREFIX,
        }
    }

    /// Split an archive entry name into its image kind and file name.
    pub fn classify(entry: &str) -> Option<(Self, &str)> {
        [ImageKind::Meal, ImageKind::Exercise]
            .into_iter()
            .find_map(|kind| {
                entry
                    .strip_prefix(kind.prefix())
                    .and_then(safe_file_name)
                    .map(|name| (kind, name))
            })
    }
}

/// Last component of a device path or archive path, rejecting anything that
/// is not a plain file name.
pub fn file_name_of(path: &str) -> Option<&str> {
    let last = path.rsplit(['/', '\\']).next()?;
    safe_file_name(last)
}

fn safe_file_name(name: &str) -> Option<&str> {
    let name = name.trim();
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return None;
    }
    Some(name)
}

/// Archive entry name an image with this local path is stored under.
pub fn archive_entry_name(kind: ImageKind, local_path: &str) -> Option<String> {
    file_name_of(local_path).map(|name| format!("{}{}", kind.prefix(), name))
}

#[derive(Debug)]
pub struct AssetRelocator {
    meal_dir: PathBuf,
    exercise_dir: PathBuf,
    relocated: HashMap<String, PathBuf>,
    bytes_written: u64,
}

impl AssetRelocator {
    pub fn new(meal_dir: impl Into<PathBuf>, exercise_dir: impl Into<PathBuf>) -> Self {
        Self {
            meal_dir: meal_dir.into(),
            exercise_dir: exercise_dir.into(),
            relocated: HashMap::new(),
            bytes_written: 0,
        }
    }

    fn dir_for(&self, kind: ImageKind) -> &Path {
        match kind {
            ImageKind::Meal => &self.meal_dir,
            ImageKind::Exercise => &self.exercise_dir,
        }
    }

    /// Stream one archive image into its local directory. Returns `None` when
    /// the entry is not an image entry.
    pub fn relocate<R: Read>(&mut self, entry: &str, reader: &mut R) -> io::Result<Option<PathBuf>> {
        let Some((kind, name)) = ImageKind::classify(entry) else {
            return Ok(None);
        };
        let dir = self.dir_for(kind).to_path_buf();
        fs::create_dir_all(&dir)?;
        let target = unique_target(&dir, name);
        let mut out = File::create(&target)?;
        let written = io::copy(reader, &mut out)?;
        out.sync_all()?;
        self.bytes_written += written;
        debug!(
            target: "nutrilog",
            event = "image_relocated",
            entry = %entry,
            path = %target.display(),
            bytes = written
        );
        self.relocated.insert(format!("{}{}", kind.prefix(), name), target.clone());
        Ok(Some(target))
    }

    /// Local path for an image a record referenced before export, matched by
    /// file name. `None` when the archive carried no such image.
    pub fn resolve(&self, kind: ImageKind, old_path: &str) -> Option<String> {
        let key = archive_entry_name(kind, old_path)?;
        self.relocated
            .get(&key)
            .map(|p| p.to_string_lossy().into_owned())
    }

    pub fn relocated(&self) -> &HashMap<String, PathBuf> {
        &self.relocated
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

/// `dir/name`, or `dir/stem-N.ext` for the first free N.
fn unique_target(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };
    let mut n = 1u32;
    loop {
        let file = match ext {
            Some(ext) => format!("{stem}-{n}.{ext}"),
            None => format!("{stem}-{n}"),
        };
        let candidate = dir.join(file);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}
