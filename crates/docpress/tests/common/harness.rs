//! Test harness for isolated service execution.

#![allow(dead_code)]

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use docpress::convert::{EngineHandle, OfficeEngine, PageRasterizer};
use docpress::{ConversionService, DocpressError, JobCreated, JobId, JobRecord, Settings, Submission};

pub const DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const PDF: &str = "application/pdf";
pub const DRAWIO: &str = "application/x-drawio";

/// Upper bound for any single job in these tests.
pub const JOB_WAIT: Duration = Duration::from_secs(20);

/// Temporary media and results roots plus settings pointing at them.
pub struct TestHarness {
    temp_dir: TempDir,
    pub media_root: PathBuf,
    pub results_root: PathBuf,
    pub tools_dir: PathBuf,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();

        let media_root = base.join("media");
        let results_root = base.join("results");
        let tools_dir = base.join("tools");
        std::fs::create_dir_all(&media_root).expect("Failed to create media root");
        std::fs::create_dir_all(&tools_dir).expect("Failed to create tools dir");

        Self {
            temp_dir,
            media_root,
            results_root,
            tools_dir,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Default settings rooted in this harness, two workers.
    pub fn settings(&self) -> Settings {
        Settings {
            media_root: self.media_root.clone(),
            results_root: self.results_root.clone(),
            results_url: "/results".to_string(),
            worker_count: 2,
            job_timeout_secs: 30,
            ..Settings::default()
        }
    }

    pub fn start<E: OfficeEngine + 'static>(
        &self,
        settings: Settings,
        engine: E,
        rasterizer: Arc<dyn PageRasterizer>,
    ) -> ConversionService {
        ConversionService::with_components(settings, Arc::new(EngineHandle::new(engine)), rasterizer)
            .expect("Failed to start service")
    }

    /// Stores `content` as `filename` and submits it.
    pub fn submit(
        &self,
        service: &ConversionService,
        filename: &str,
        content: &[u8],
        content_type: &str,
        options: Option<&str>,
    ) -> Result<JobCreated, DocpressError> {
        let mut reader = content;
        let upload = service.store_upload(&mut reader, filename)?;
        service.create(Submission::for_upload(
            &upload,
            content_type,
            options.map(str::to_string),
        ))
    }

    pub fn wait(&self, service: &ConversionService, id: &JobId) -> JobRecord {
        let record = service.wait_for(id, JOB_WAIT).expect("job not found");
        assert!(
            record.status.is_terminal(),
            "job {} still {} after {:?}",
            id,
            record.status,
            JOB_WAIT
        );
        record
    }

    pub fn archive_path(&self, id: &JobId) -> PathBuf {
        self.results_root.join(format!("{}.zip", id))
    }

    /// Sorted entry names of a job's archive.
    pub fn archive_entries(&self, id: &JobId) -> Vec<String> {
        let file = File::open(self.archive_path(id)).expect("archive missing");
        let archive = zip::ZipArchive::new(file).expect("invalid archive");
        let mut names: Vec<String> = archive.file_names().map(String::from).collect();
        names.sort();
        names
    }

    /// Job directories currently under the media root.
    pub fn job_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = std::fs::read_dir(&self.media_root)
            .expect("media root missing")
            .map(|e| e.expect("bad dir entry").path())
            .collect();
        dirs.sort();
        dirs
    }
}
