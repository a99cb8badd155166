use std::path::PathBuf;

use tracing::{debug, info_span, warn};

use crate::convert::{ConversionRequest, Converter};
use crate::error::ConversionError;
use crate::queue::{JobContext, JobHandler};
use crate::sanitize;
use crate::storage::{list_files, ArchivePackager, ResourceLifecycle};

/// A queued conversion: the request plus the job directory it lives in.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub request: ConversionRequest,
    pub job_dir: PathBuf,
}

/// Worker-side orchestration of one conversion: convert, verify, package,
/// schedule cleanup.
pub struct Pipeline {
    converter: Converter,
    packager: ArchivePackager,
    lifecycle: ResourceLifecycle,
}

impl Pipeline {
    pub fn new(
        converter: Converter,
        packager: ArchivePackager,
        lifecycle: ResourceLifecycle,
    ) -> Self {
        Self {
            converter,
            packager,
            lifecycle,
        }
    }

    /// Runs every step and returns the archive URL.
    pub fn run(&self, ctx: &JobContext, job: &ConversionJob) -> Result<String, ConversionError> {
        let request = &job.request;
        let _pipeline_span = info_span!("pipeline",
            job_id = %ctx.id,
            filename = %request.original_name,
            content_type = %request.content_type,
        )
        .entered();

        // Step 1: Convert
        let artifacts = {
            let _step = info_span!("convert").entered();
            self.converter.convert(request, &ctx.deadline)?
        };
        debug!("Backend reported {} artifact(s)", artifacts.len());

        // Step 2: Verify output
        {
            let _step = info_span!("verify_output").entered();
            // An expired job is already failed; never publish its archive.
            if ctx.deadline.is_expired() {
                return Err(ConversionError::DeadlineExceeded(ctx.deadline.elapsed()));
            }
            if list_files(&request.output_dir)?.is_empty() {
                return Err(ConversionError::EmptyOutput(request.output_dir.clone()));
            }
        }

        // Step 3: Package
        let (archive_path, archive_url) = {
            let _step = info_span!("package").entered();
            self.packager.pack(&ctx.id, &request.output_dir)?
        };

        // Step 4: Schedule cleanup
        {
            let _step = info_span!("schedule_cleanup",
                archive = %sanitize::redact_path(&archive_path),
            )
            .entered();
            self.lifecycle
                .schedule_result_removal(&ctx.scheduler, &archive_path)?;
            self.lifecycle
                .schedule_original_removal(&ctx.scheduler, &job.job_dir)?;
        }

        Ok(archive_url)
    }
}

impl JobHandler for Pipeline {
    type Spec = ConversionJob;
    type Error = ConversionError;

    fn handle(&self, ctx: &JobContext, job: ConversionJob) -> Result<String, ConversionError> {
        let outcome = self.run(ctx, &job);
        if outcome.is_err() {
            // A failed job never reaches its cleanup step.
            if let Err(e) = self
                .lifecycle
                .schedule_original_removal(&ctx.scheduler, &job.job_dir)
            {
                warn!(job_id = %ctx.id, error = %e, "Could not schedule job directory removal");
            }
        }
        outcome
    }
}
