//! Where database files live on disk.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// File suffix of every managed database.
pub const DB_SUFFIX: &str = ".db";

/// Sidecar files SQLite may leave next to a database.
const SIDECARS: &[&str] = &["-wal", "-shm", "-journal"];

/// Canonical registry name: a trailing `.db` is stripped so `app` and
/// `app.db` address the same database.
#[must_use]
pub fn canonical_name(name: &str) -> String {
    let trimmed = name.trim();
    trimmed.strip_suffix(DB_SUFFIX).unwrap_or(trimmed).to_string()
}

/// Write `content` to `path` atomically.
///
/// The content goes to a temporary sibling first, is synced to disk, then
/// renamed over the target. On failure the original file is untouched.
///
/// # Errors
///
/// Returns `Io` if any file operation fails.
pub fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    {
        let file = File::create(&temp)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(content.as_bytes())?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    if let Err(e) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(e.into());
    }
    Ok(())
}

/// Filesystem access used by the registry.
pub trait Filesystem: Send + Sync {
    /// Directory holding every database file.
    fn database_dir(&self) -> &Path;

    /// Full path of the file backing `name`.
    fn resolve_database_path(&self, name: &str) -> PathBuf {
        self.database_dir()
            .join(format!("{}{DB_SUFFIX}", canonical_name(name)))
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    /// File names in `dir` ending in `suffix`, sorted. A missing directory
    /// yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the directory cannot be read.
    fn list_files(&self, dir: &Path, suffix: &str) -> Result<Vec<String>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(suffix) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove a database file and its sidecars.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the file is absent, `Io` if removal fails.
    fn remove(&self, path: &Path) -> Result<()> {
        if !path.is_file() {
            return Err(Error::NotFound {
                name: path.display().to_string(),
            });
        }
        fs::remove_file(path)?;
        for sidecar in SIDECARS {
            let mut side = path.as_os_str().to_owned();
            side.push(sidecar);
            match fs::remove_file(PathBuf::from(side)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Local directory backed filesystem.
#[derive(Debug, Clone)]
pub struct LocalFilesystem {
    dir: PathBuf,
}

impl LocalFilesystem {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Like [`LocalFilesystem::new`], creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the directory cannot be created.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }
}

impl Filesystem for LocalFilesystem {
    fn database_dir(&self) -> &Path {
        &self.dir
    }
}
