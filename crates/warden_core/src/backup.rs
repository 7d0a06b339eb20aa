//! World backups.
//!
//! A backup is a deflate zip of the world folder named
//! `world_backup_<YYYYmmdd_HHMMSS>.zip`. Entry names keep the world folder
//! name as their first component so an archive unpacks next to the server.
//! After each backup only the newest `max_backups` archives are kept.

use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{LauncherError, LauncherResult};

pub const BACKUP_PREFIX: &str = "world_backup_";
pub const BACKUP_EXTENSION: &str = ".zip";
pub const DEFAULT_MAX_BACKUPS: usize = 5;

const MAX_SAME_SECOND_BACKUPS: usize = 1000;

/// Held open by a running server; never copied.
const SKIPPED_FILES: [&str; 1] = ["session.lock"];

#[derive(Debug, Clone)]
pub struct BackupManager {
    world: PathBuf,
    directory: PathBuf,
    max_backups: usize,
}

impl BackupManager {
    pub fn new(world: impl Into<PathBuf>, directory: impl Into<PathBuf>, max_backups: usize) -> Self {
        Self {
            world: world.into(),
            directory: directory.into(),
            max_backups: max_backups.max(1),
        }
    }

    pub fn world(&self) -> &Path {
        &self.world
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Archives the world folder and prunes old backups. Returns the path of
    /// the new archive.
    pub async fn create_backup(&self) -> LauncherResult<PathBuf> {
        if !self.world.is_dir() {
            return Err(LauncherError::Validation(format!(
                "world folder does not exist: {}",
                self.world.display()
            )));
        }

        let manager = self.clone();
        let archive = tokio::task::spawn_blocking(move || manager.write_archive())
            .await
            .map_err(|e| LauncherError::Archive(self.directory.clone(), e.to_string()))??;

        info!("💾 Backup written to {}", archive.display());
        self.rotate().await?;
        Ok(archive)
    }

    /// Backup file names, oldest first.
    pub async fn list_backups(&self) -> LauncherResult<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(LauncherError::Io(self.directory.clone(), e)),
        };

        let mut backups = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| LauncherError::Io(self.directory.clone(), e))?
        {
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(BACKUP_PREFIX) && name.ends_with(BACKUP_EXTENSION) {
                    backups.push(name.to_string());
                }
            }
        }
        backups.sort();
        Ok(backups)
    }

    /// Deletes the oldest backups beyond `max_backups`. Returns how many
    /// were removed.
    pub async fn rotate(&self) -> LauncherResult<usize> {
        let backups = self.list_backups().await?;
        let excess = backups.len().saturating_sub(self.max_backups);
        for name in &backups[..excess] {
            let path = self.directory.join(name);
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| LauncherError::Io(path.clone(), e))?;
            debug!("Pruned old backup {}", name);
        }
        Ok(excess)
    }

    fn write_archive(&self) -> LauncherResult<PathBuf> {
        std::fs::create_dir_all(&self.directory).map_err(|e| LauncherError::Io(self.directory.clone(), e))?;

        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let (target, file) = create_archive_file(&self.directory, &stamp)?;

        let archive_error = |e: zip::result::ZipError| LauncherError::Archive(target.clone(), e.to_string());
        let base = self.world.parent().unwrap_or_else(|| Path::new(""));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut writer = ZipWriter::new(file);

        for entry in WalkDir::new(&self.world).follow_links(false).into_iter() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable world entry: {}", e);
                    continue;
                }
            };
            let path = entry.path();
            let Ok(relative) = path.strip_prefix(base) else {
                continue;
            };
            let entry_name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if entry.file_type().is_dir() {
                writer.add_directory(entry_name, options).map_err(archive_error)?;
            } else if entry.file_type().is_file() {
                if SKIPPED_FILES.iter().any(|skip| entry.file_name() == *skip) {
                    continue;
                }
                let mut source = match File::open(path) {
                    Ok(source) => source,
                    Err(e) => {
                        warn!("Skipping {}: {}", path.display(), e);
                        continue;
                    }
                };
                writer.start_file(entry_name, options).map_err(archive_error)?;
                io::copy(&mut source, &mut writer).map_err(|e| LauncherError::Io(path.to_path_buf(), e))?;
            }
        }

        writer.finish().map_err(archive_error)?;
        Ok(target)
    }
}

/// Creates a new, empty archive file for `stamp`. Backups taken within the
/// same second get a `_NNN` suffix, which still sorts after the plain name.
fn create_archive_file(directory: &Path, stamp: &str) -> LauncherResult<(PathBuf, File)> {
    for attempt in 0..MAX_SAME_SECOND_BACKUPS {
        let name = if attempt == 0 {
            format!("{}{}{}", BACKUP_PREFIX, stamp, BACKUP_EXTENSION)
        } else {
            format!("{}{}_{:03}{}", BACKUP_PREFIX, stamp, attempt, BACKUP_EXTENSION)
        };
        let target = directory.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&target) {
            Ok(file) => return Ok((target, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(LauncherError::Io(target, e)),
        }
    }
    Err(LauncherError::Archive(
        directory.to_path_buf(),
        format!("too many backups within {}", stamp),
    ))
}
