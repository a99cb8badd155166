use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::PDF_CONTENT_TYPE;
use crate::convert::engine::{DocumentSession, EngineHandle};
use crate::convert::thumbnail::ThumbnailGenerator;
use crate::convert::{ConversionRequest, ExportTarget, OutputArtifact, ThumbnailSize};
use crate::error::{ConversionError, StorageError};
use crate::queue::Deadline;

/// Where page thumbnails of an office conversion are rendered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThumbnailSource {
    /// The upload itself is a PDF.
    Original(PathBuf),
    /// A `pdf` export requested alongside.
    Export(PathBuf),
    /// Nothing usable; export a throwaway PDF.
    Throwaway,
}

impl ThumbnailSource {
    pub fn select(request: &ConversionRequest, targets: &[ExportTarget]) -> Self {
        if request.content_type == PDF_CONTENT_TYPE {
            return ThumbnailSource::Original(request.source_path.clone());
        }
        match targets.iter().find(|t| t.format == "pdf") {
            Some(target) => ThumbnailSource::Export(target.path.clone()),
            None => ThumbnailSource::Throwaway,
        }
    }
}

pub struct OfficeBackend {
    engine: Arc<EngineHandle>,
    thumbnails: ThumbnailGenerator,
    pdf_export_id: String,
}

impl OfficeBackend {
    pub fn new(
        engine: Arc<EngineHandle>,
        thumbnails: ThumbnailGenerator,
        pdf_export_id: String,
    ) -> Self {
        Self {
            engine,
            thumbnails,
            pdf_export_id,
        }
    }

    pub fn engine(&self) -> &Arc<EngineHandle> {
        &self.engine
    }

    /// Exports every target from a single document session, then renders
    /// thumbnails if requested. The engine stays leased for the whole call.
    pub fn convert(
        &self,
        request: &ConversionRequest,
        targets: &[ExportTarget],
        deadline: &Deadline,
    ) -> Result<Vec<OutputArtifact>, ConversionError> {
        let lease = {
            let _span = tracing::debug_span!("engine.lease").entered();
            self.engine.lease()
        };
        // Waiting for the lease may have used up the job's budget.
        if deadline.is_expired() {
            return Err(ConversionError::DeadlineExceeded(deadline.elapsed()));
        }

        let mut document = lease.open(&request.source_path)?;

        let mut artifacts = Vec::with_capacity(targets.len());
        for target in targets {
            document.save_as(&target.path, &target.export_id, deadline)?;
            artifacts.push(OutputArtifact {
                format: target.format.clone(),
                path: target.path.clone(),
            });
        }

        if let Some(size) = request.thumbnails {
            let source = ThumbnailSource::select(request, targets);
            self.render_thumbnails(&mut document, source, request, size, deadline)?;
        }

        Ok(artifacts)
    }

    fn render_thumbnails(
        &self,
        document: &mut DocumentSession<'_>,
        source: ThumbnailSource,
        request: &ConversionRequest,
        size: ThumbnailSize,
        deadline: &Deadline,
    ) -> Result<(), ConversionError> {
        match source {
            ThumbnailSource::Original(pdf) | ThumbnailSource::Export(pdf) => {
                self.generate(&pdf, request, size, deadline)
            }
            ThumbnailSource::Throwaway => {
                // Removed when `scratch` drops, whatever the outcome.
                let scratch = tempfile::Builder::new()
                    .prefix("docpress-thumbnail-")
                    .suffix(".pdf")
                    .tempfile()
                    .map_err(|e| StorageError::WriteFile {
                        path: std::env::temp_dir(),
                        source: e,
                    })?;
                document.save_as(scratch.path(), &self.pdf_export_id, deadline)?;
                self.generate(scratch.path(), request, size, deadline)
            }
        }
    }

    fn generate(
        &self,
        pdf: &Path,
        request: &ConversionRequest,
        size: ThumbnailSize,
        deadline: &Deadline,
    ) -> Result<(), ConversionError> {
        self.thumbnails
            .generate(pdf, &request.output_dir, size, deadline)?;
        Ok(())
    }
}
