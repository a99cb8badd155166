pub mod diagram;
pub mod engine;
pub mod office;
pub mod options;
pub mod process;
pub mod thumbnail;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::config::{FormatConfig, Settings};
use crate::error::ConversionError;
use crate::queue::Deadline;
use crate::storage::lifecycle::ensure_directory;

pub use diagram::DiagramBackend;
pub use engine::{
    DocumentSession, EngineHandle, EngineLease, LoadedDocument, OfficeEngine, SofficeEngine,
};
pub use office::{OfficeBackend, ThumbnailSource};
pub use options::{ConversionOptions, ThumbnailSize};
pub use thumbnail::{PageRasterizer, PdftoppmRasterizer, ThumbnailGenerator, THUMBNAILS_DIR_NAME};

const DIAGRAM_CONTENT_TYPES: &[&str] = &[
    "application/vnd.jgraph.mxfile",
    "application/x-drawio",
    "image/svg+xml",
    "text/plain",
];

/// The two ways a document gets converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Shared office engine, one document session at a time.
    Office,
    /// One-shot diagram renderer process per format.
    Diagram,
}

impl Backend {
    pub fn for_content_type(content_type: &str) -> Self {
        if DIAGRAM_CONTENT_TYPES.contains(&content_type) {
            Backend::Diagram
        } else {
            Backend::Office
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Office => "office",
            Backend::Diagram => "diagram",
        }
    }

    pub fn export_identifier<'a>(&self, format: &'a FormatConfig) -> Option<&'a str> {
        match self {
            Backend::Office => format.office.as_deref(),
            Backend::Diagram => format.diagram.as_deref(),
        }
    }
}

/// Everything a worker needs to convert one uploaded file.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub source_path: PathBuf,
    pub content_type: String,
    pub formats: Vec<String>,
    pub thumbnails: Option<ThumbnailSize>,
    pub output_dir: PathBuf,
    /// Sanitized client filename, used as the stem of every output file.
    pub original_name: String,
}

/// A produced file, tagged with the format it was requested as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputArtifact {
    pub format: String,
    pub path: PathBuf,
}

/// A requested format resolved to the backend's export identifier and the
/// file it must produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTarget {
    pub format: String,
    pub export_id: String,
    pub path: PathBuf,
}

/// Routes requests to the backend matching their content type.
pub struct Converter {
    formats: BTreeMap<String, FormatConfig>,
    office: OfficeBackend,
    diagram: DiagramBackend,
}

impl Converter {
    pub fn new(
        formats: BTreeMap<String, FormatConfig>,
        office: OfficeBackend,
        diagram: DiagramBackend,
    ) -> Self {
        Self {
            formats,
            office,
            diagram,
        }
    }

    pub fn from_settings(
        settings: &Settings,
        engine: Arc<EngineHandle>,
        rasterizer: Arc<dyn PageRasterizer>,
    ) -> Self {
        let thumbnails = ThumbnailGenerator::new(&settings.thumbnails, rasterizer);
        let pdf_export_id = settings
            .format("pdf")
            .and_then(|f| f.office.clone())
            .unwrap_or_else(|| "pdf".to_string());

        Self::new(
            settings.formats.clone(),
            OfficeBackend::new(engine, thumbnails, pdf_export_id),
            DiagramBackend::new(&settings.engine.xvfb_run_path, &settings.engine.drawio_path),
        )
    }

    pub fn convert(
        &self,
        request: &ConversionRequest,
        deadline: &Deadline,
    ) -> Result<Vec<OutputArtifact>, ConversionError> {
        let backend = Backend::for_content_type(&request.content_type);
        let targets = self.resolve_targets(request, backend)?;
        ensure_directory(&request.output_dir)?;

        let _span = tracing::info_span!(
            "convert",
            backend = backend.name(),
            formats = %request.formats.join(",")
        )
        .entered();

        match backend {
            Backend::Office => self.office.convert(request, &targets, deadline),
            Backend::Diagram => self.diagram.convert(request, &targets, deadline),
        }
    }

    pub fn resolve_targets(
        &self,
        request: &ConversionRequest,
        backend: Backend,
    ) -> Result<Vec<ExportTarget>, ConversionError> {
        request
            .formats
            .iter()
            .map(|id| {
                let format = self
                    .formats
                    .get(id)
                    .ok_or_else(|| ConversionError::UnknownFormat(id.clone()))?;
                let export_id = backend.export_identifier(format).ok_or_else(|| {
                    ConversionError::NoExportIdentifier {
                        format: id.clone(),
                        backend: backend.name(),
                    }
                })?;
                Ok(ExportTarget {
                    format: id.clone(),
                    export_id: export_id.to_string(),
                    path: request
                        .output_dir
                        .join(format!("{}.{}", request.original_name, format.extension)),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PDF_CONTENT_TYPE;
    use crate::error::ThumbnailError;
    use std::path::Path;

    struct NoPages;

    impl PageRasterizer for NoPages {
        fn rasterize(
            &self,
            pdf: &Path,
            _dpi: u32,
            _out_dir: &Path,
            _deadline: &Deadline,
        ) -> Result<Vec<PathBuf>, ThumbnailError> {
            Err(ThumbnailError::NoPages(pdf.to_path_buf()))
        }
    }

    struct NullEngine;

    impl OfficeEngine for NullEngine {
        fn load<'a>(
            &'a self,
            path: &Path,
        ) -> Result<Box<dyn LoadedDocument + 'a>, crate::error::EngineError> {
            Err(crate::error::EngineError::Load {
                path: path.to_path_buf(),
                reason: "null engine".to_string(),
            })
        }
    }

    fn converter() -> Converter {
        Converter::from_settings(
            &Settings::default(),
            Arc::new(EngineHandle::new(NullEngine)),
            Arc::new(NoPages),
        )
    }

    fn request(content_type: &str, formats: &[&str]) -> ConversionRequest {
        ConversionRequest {
            source_path: PathBuf::from("/media/job/upload"),
            content_type: content_type.to_string(),
            formats: formats.iter().map(|f| f.to_string()).collect(),
            thumbnails: None,
            output_dir: PathBuf::from("/media/job/output"),
            original_name: "report.docx".to_string(),
        }
    }

    #[test]
    fn test_backend_selection() {
        assert_eq!(
            Backend::for_content_type("application/vnd.jgraph.mxfile"),
            Backend::Diagram
        );
        assert_eq!(Backend::for_content_type("application/x-drawio"), Backend::Diagram);
        assert_eq!(Backend::for_content_type("image/svg+xml"), Backend::Diagram);
        assert_eq!(Backend::for_content_type("text/plain"), Backend::Diagram);
        assert_eq!(Backend::for_content_type(PDF_CONTENT_TYPE), Backend::Office);
        assert_eq!(Backend::for_content_type("application/msword"), Backend::Office);
        assert_eq!(Backend::for_content_type("anything/else"), Backend::Office);
    }

    #[test]
    fn test_resolve_targets_names_outputs_after_original() {
        let targets = converter()
            .resolve_targets(&request("application/msword", &["pdf", "txt"]), Backend::Office)
            .unwrap();

        assert_eq!(
            targets,
            vec![
                ExportTarget {
                    format: "pdf".to_string(),
                    export_id: "pdf".to_string(),
                    path: PathBuf::from("/media/job/output/report.docx.pdf"),
                },
                ExportTarget {
                    format: "txt".to_string(),
                    export_id: "txt:Text".to_string(),
                    path: PathBuf::from("/media/job/output/report.docx.txt"),
                },
            ]
        );
    }

    #[test]
    fn test_resolve_targets_errors() {
        let converter = converter();

        let unknown = converter.resolve_targets(&request("text/plain", &["bmp"]), Backend::Diagram);
        assert!(matches!(unknown, Err(ConversionError::UnknownFormat(f)) if f == "bmp"));

        let missing = converter.resolve_targets(&request("text/plain", &["html"]), Backend::Diagram);
        assert!(matches!(
            missing,
            Err(ConversionError::NoExportIdentifier { backend: "diagram", .. })
        ));
    }
}
