use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use walkdir::WalkDir;

use crate::error::{QueueError, StorageError};
use crate::queue::{DelayedTask, Scheduler, TaskId};

/// Name of the per-job subdirectory that receives converted artifacts.
pub const OUTPUT_DIR_NAME: &str = "output";

/// Move a file from `src` to `dst`. Uses `rename` first (fast, atomic on same
/// filesystem). Falls back to copy + delete when rename fails.
pub fn move_file(src: &Path, dst: &Path) -> Result<(), StorageError> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    std::fs::copy(src, dst).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    std::fs::remove_file(src).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

/// Removes a file, or a directory recursively.
///
/// Returns `Ok(false)` when nothing existed at `path`.
pub fn remove_path(path: &Path) -> Result<bool, StorageError> {
    // symlink_metadata so a symlinked directory is unlinked, not followed
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => {
            return Err(StorageError::Remove {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    let result = if metadata.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };

    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::Remove {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Every regular file below `dir`, in a stable (file-name sorted) order.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| StorageError::Scan {
            path: dir.to_path_buf(),
            source: e,
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

pub fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Owns the media root: reserves per-job directories and schedules their
/// reclamation.
#[derive(Debug, Clone)]
pub struct ResourceLifecycle {
    media_root: PathBuf,
    original_file_ttl: Duration,
    result_file_ttl: Duration,
}

impl ResourceLifecycle {
    pub fn new<P: AsRef<Path>>(
        media_root: P,
        original_file_ttl: Duration,
        result_file_ttl: Duration,
    ) -> Self {
        Self {
            media_root: media_root.as_ref().to_path_buf(),
            original_file_ttl,
            result_file_ttl,
        }
    }

    pub fn media_root(&self) -> &Path {
        &self.media_root
    }

    /// `<media_root>/<name>`; `name` must be a single plain path component.
    pub fn job_dir(&self, name: &str) -> Result<PathBuf, StorageError> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.media_root.join(name)),
            _ => Err(StorageError::InvalidName(name.to_string())),
        }
    }

    pub fn output_dir(&self, name: &str) -> Result<PathBuf, StorageError> {
        Ok(self.job_dir(name)?.join(OUTPUT_DIR_NAME))
    }

    /// Creates the job directory. Reserving an existing directory succeeds and
    /// leaves its content untouched.
    pub fn reserve_dir(&self, name: &str) -> Result<PathBuf, StorageError> {
        let path = self.job_dir(name)?;
        ensure_directory(&path)?;
        Ok(path)
    }

    pub fn delete(&self, path: &Path) -> Result<bool, StorageError> {
        remove_path(path)
    }

    /// Schedules removal of uploaded content (a job directory) after the
    /// original-file TTL.
    pub fn schedule_original_removal(
        &self,
        scheduler: &Scheduler,
        path: &Path,
    ) -> Result<TaskId, QueueError> {
        scheduler.schedule(
            self.original_file_ttl,
            DelayedTask::RemovePath(path.to_path_buf()),
        )
    }

    /// Schedules removal of a packaged archive after the result TTL.
    pub fn schedule_result_removal(
        &self,
        scheduler: &Scheduler,
        path: &Path,
    ) -> Result<TaskId, QueueError> {
        scheduler.schedule(
            self.result_file_ttl,
            DelayedTask::RemovePath(path.to_path_buf()),
        )
    }
}
