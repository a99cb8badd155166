use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{ArchiveError, StorageError};
use crate::queue::JobId;
use crate::sanitize;
use crate::storage::lifecycle::{ensure_directory, list_files};

/// Packs a job's output directory into `<results_root>/<job id>.zip`.
#[derive(Debug, Clone)]
pub struct ArchivePackager {
    results_root: PathBuf,
    results_url: String,
}

impl ArchivePackager {
    pub fn new<P: AsRef<Path>>(results_root: P, results_url: &str) -> Self {
        Self {
            results_root: results_root.as_ref().to_path_buf(),
            results_url: results_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn results_root(&self) -> &Path {
        &self.results_root
    }

    pub fn archive_path(&self, job_id: &JobId) -> PathBuf {
        self.results_root.join(archive_name(job_id))
    }

    pub fn archive_url(&self, job_id: &JobId) -> String {
        format!("{}/{}", self.results_url, archive_name(job_id))
    }

    /// Zips every file below `source_dir` and returns the archive's path and
    /// public URL. The archive only appears at its final path once complete.
    pub fn pack(
        &self,
        job_id: &JobId,
        source_dir: &Path,
    ) -> Result<(PathBuf, String), ArchiveError> {
        let _span = tracing::info_span!("archive.pack", job_id = %job_id).entered();

        let files = list_files(source_dir)?;
        if files.is_empty() {
            return Err(ArchiveError::EmptySource(source_dir.to_path_buf()));
        }

        ensure_directory(&self.results_root)?;
        let archive_path = self.archive_path(job_id);

        let mut partial = tempfile::Builder::new()
            .prefix(".")
            .suffix(".zip.partial")
            .tempfile_in(&self.results_root)
            .map_err(|e| StorageError::WriteFile {
                path: self.results_root.clone(),
                source: e,
            })?;

        let zip_error = |source| ArchiveError::Zip {
            path: archive_path.clone(),
            source,
        };

        let mut writer = ZipWriter::new(partial.as_file_mut());
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o644);

        for file in &files {
            let name = entry_name(source_dir, file);
            writer.start_file(name, options).map_err(zip_error)?;

            let mut input = File::open(file).map_err(|e| StorageError::WriteFile {
                path: file.clone(),
                source: e,
            })?;
            io::copy(&mut input, &mut writer).map_err(|e| StorageError::WriteFile {
                path: archive_path.clone(),
                source: e,
            })?;
        }
        writer.finish().map_err(zip_error)?;

        partial
            .persist(&archive_path)
            .map_err(|e| StorageError::WriteFile {
                path: archive_path.clone(),
                source: e.error,
            })?;

        tracing::debug!(
            "Packed {} file(s) into {}",
            files.len(),
            sanitize::redact_path(&archive_path)
        );

        Ok((archive_path.clone(), self.archive_url(job_id)))
    }
}

fn archive_name(job_id: &JobId) -> String {
    format!("{}.zip", job_id)
}

/// Archive entry name: path relative to `root`, always `/`-separated.
fn entry_name(root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
