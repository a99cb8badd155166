//! Submission boundary: store uploads, validate and enqueue conversions,
//! report job status.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::Settings;
use crate::convert::{
    ConversionOptions, ConversionRequest, Converter, EngineHandle, PageRasterizer,
    PdftoppmRasterizer, SofficeEngine,
};
use crate::error::{ConversionError, DocpressError, StorageError, ValidationError};
use crate::pipeline::{ConversionJob, Pipeline};
use crate::queue::{JobEvent, JobId, JobQueue, JobRecord, JobStatus};
use crate::sanitize;
use crate::storage::{ArchivePackager, ResourceLifecycle, OUTPUT_DIR_NAME};

/// An upload written below the media root.
#[derive(Debug, Clone)]
pub struct StoredUpload {
    /// Name of the job directory under the media root.
    pub dir_name: String,
    pub path: PathBuf,
    /// Sanitized client filename.
    pub filename: String,
}

/// A request to convert a stored upload.
#[derive(Debug, Clone)]
pub struct Submission {
    pub file_path: PathBuf,
    /// Raw options JSON as sent by the client, if any.
    pub options: Option<String>,
    pub content_type: String,
    pub dir_name: String,
    pub filename: String,
}

impl Submission {
    pub fn for_upload(upload: &StoredUpload, content_type: &str, options: Option<String>) -> Self {
        Self {
            file_path: upload.path.clone(),
            options,
            content_type: content_type.to_string(),
            dir_name: upload.dir_name.clone(),
            filename: upload.filename.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobCreated {
    pub id: JobId,
    pub status: JobStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatusView {
    pub id: JobId,
    pub status: JobStatus,
    pub result_url: Option<String>,
}

impl From<JobRecord> for JobStatusView {
    fn from(record: JobRecord) -> Self {
        Self {
            id: record.id,
            status: record.status,
            result_url: record.result_url,
        }
    }
}

pub struct ConversionService {
    settings: Arc<Settings>,
    lifecycle: ResourceLifecycle,
    engine: Arc<EngineHandle>,
    queue: JobQueue<Pipeline>,
}

impl ConversionService {
    /// Starts a service backed by LibreOffice and pdftoppm.
    pub fn start(settings: Settings) -> Result<Self, DocpressError> {
        let engine = SofficeEngine::new(&settings.engine.office_path)
            .map_err(ConversionError::from)?;
        let rasterizer = PdftoppmRasterizer::new(settings.engine.pdftoppm_path.clone());
        Self::with_components(settings, Arc::new(EngineHandle::new(engine)), Arc::new(rasterizer))
    }

    /// Starts a service around the given engine and rasterizer.
    pub fn with_components(
        settings: Settings,
        engine: Arc<EngineHandle>,
        rasterizer: Arc<dyn PageRasterizer>,
    ) -> Result<Self, DocpressError> {
        let lifecycle = ResourceLifecycle::new(
            &settings.media_root,
            settings.original_file_ttl(),
            settings.result_file_ttl(),
        );
        let packager = ArchivePackager::new(&settings.results_root, &settings.results_url);
        let converter = Converter::from_settings(&settings, Arc::clone(&engine), rasterizer);
        let pipeline = Pipeline::new(converter, packager, lifecycle.clone());

        let queue = JobQueue::start(Arc::new(pipeline), settings.worker_count)?;

        Ok(Self {
            settings: Arc::new(settings),
            lifecycle,
            engine,
            queue,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn engine(&self) -> &Arc<EngineHandle> {
        &self.engine
    }

    pub fn queue(&self) -> &JobQueue<Pipeline> {
        &self.queue
    }

    /// Writes an upload into a fresh job directory.
    ///
    /// The directory stays until it is handed to [`ConversionService::create`],
    /// which either gives it to the job or schedules its removal, or until it
    /// is released with [`ConversionService::discard_upload`].
    pub fn store_upload<R: Read>(
        &self,
        reader: &mut R,
        filename: &str,
    ) -> Result<StoredUpload, DocpressError> {
        let filename = sanitize::sanitize_filename(filename)?;
        let dir_name = uuid::Uuid::new_v4().simple().to_string();
        let job_dir = self.lifecycle.reserve_dir(&dir_name)?;

        let (mut file, path) = tempfile::Builder::new()
            .prefix("upload-")
            .tempfile_in(&job_dir)
            .and_then(|temp| temp.keep().map_err(|e| e.error))
            .map_err(|e| StorageError::WriteFile {
                path: job_dir.clone(),
                source: e,
            })?;
        copy_into(reader, &mut file, &path)?;

        tracing::info!(
            dir = %dir_name,
            filename = %filename,
            "Stored upload"
        );

        Ok(StoredUpload {
            dir_name,
            path,
            filename,
        })
    }

    /// Validates a submission and enqueues its conversion.
    ///
    /// A rejected submission's job directory is removed after the
    /// original-file TTL; an accepted one is owned by the job from then on.
    pub fn create(&self, submission: Submission) -> Result<JobCreated, DocpressError> {
        let dir_name = submission.dir_name.clone();
        let created = self.enqueue_submission(submission);
        if let Err(e) = &created {
            tracing::info!(dir = %dir_name, error = %e, "Submission rejected");
            if let Err(e) = self.release_dir(&dir_name) {
                tracing::warn!(dir = %dir_name, error = %e, "Could not schedule upload removal");
            }
        }
        created
    }

    /// Schedules removal of an upload that will never be submitted.
    pub fn discard_upload(&self, upload: &StoredUpload) -> Result<(), DocpressError> {
        self.release_dir(&upload.dir_name)
    }

    fn release_dir(&self, dir_name: &str) -> Result<(), DocpressError> {
        let job_dir = self.lifecycle.job_dir(dir_name)?;
        self.lifecycle
            .schedule_original_removal(self.queue.scheduler(), &job_dir)?;
        Ok(())
    }

    fn enqueue_submission(&self, submission: Submission) -> Result<JobCreated, DocpressError> {
        let options = ConversionOptions::parse(
            submission.options.as_deref(),
            &submission.content_type,
            &self.settings,
        )?;

        let job_dir = self.lifecycle.job_dir(&submission.dir_name)?;
        if !submission.file_path.starts_with(&job_dir) {
            return Err(ValidationError::InvalidFilename(
                submission.file_path.display().to_string(),
            )
            .into());
        }
        let original_name = sanitize::sanitize_filename(&submission.filename)?;

        let request = ConversionRequest {
            source_path: submission.file_path,
            content_type: submission.content_type,
            formats: options.formats,
            thumbnails: options.thumbnails,
            output_dir: job_dir.join(OUTPUT_DIR_NAME),
            original_name,
        };
        let job = ConversionJob { request, job_dir };

        let id = self.queue.enqueue(job, self.settings.job_timeout())?;
        tracing::info!(job_id = %id, "Conversion job queued");

        Ok(JobCreated {
            id,
            status: JobStatus::Queued,
        })
    }

    /// `None` for unknown ids.
    pub fn status(&self, id: &JobId) -> Option<JobStatusView> {
        self.queue.fetch_status(id).map(JobStatusView::from)
    }

    pub fn record(&self, id: &JobId) -> Option<JobRecord> {
        self.queue.fetch_status(id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.queue.subscribe()
    }

    /// Polls until the job is terminal or `timeout` elapses.
    pub fn wait_for(&self, id: &JobId, timeout: Duration) -> Option<JobRecord> {
        let started = Instant::now();
        loop {
            let record = self.queue.fetch_status(id)?;
            if record.status.is_terminal() || started.elapsed() >= timeout {
                return Some(record);
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    /// Stops accepting jobs and waits for running ones to finish.
    pub fn shutdown(self) {
        self.queue.shutdown();
        self.queue.wait();
    }
}

fn copy_into<R: Read>(reader: &mut R, file: &mut File, path: &Path) -> Result<u64, StorageError> {
    io::copy(reader, file).map_err(|e| StorageError::WriteFile {
        path: path.to_path_buf(),
        source: e,
    })
}
