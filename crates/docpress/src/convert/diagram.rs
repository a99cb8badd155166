use std::path::{Path, PathBuf};
use std::process::Command;

use crate::convert::process::run_to_completion;
use crate::convert::{ConversionRequest, ExportTarget, OutputArtifact};
use crate::error::ConversionError;
use crate::queue::Deadline;

/// Converts diagrams with the drawio desktop app, one process per format,
/// each under its own virtual X display.
#[derive(Debug, Clone)]
pub struct DiagramBackend {
    xvfb_run: PathBuf,
    drawio: PathBuf,
}

impl DiagramBackend {
    pub fn new<P: AsRef<Path>>(xvfb_run: P, drawio: P) -> Self {
        Self {
            xvfb_run: xvfb_run.as_ref().to_path_buf(),
            drawio: drawio.as_ref().to_path_buf(),
        }
    }

    fn export_command(&self, export_id: &str, input: &Path, output: &Path) -> Command {
        let mut command = Command::new(&self.xvfb_run);
        command
            .arg("-a")
            .arg(&self.drawio)
            .arg("--export")
            .arg("--format")
            .arg(export_id)
            .arg("--output")
            .arg(output)
            .arg(input);
        command
    }

    pub fn convert(
        &self,
        request: &ConversionRequest,
        targets: &[ExportTarget],
        deadline: &Deadline,
    ) -> Result<Vec<OutputArtifact>, ConversionError> {
        if request.thumbnails.is_some() {
            tracing::debug!("Thumbnails are not produced for diagrams, ignoring");
        }

        let mut artifacts = Vec::with_capacity(targets.len());
        for target in targets {
            let _span = tracing::info_span!("diagram.export", format = %target.format).entered();
            let command = self.export_command(&target.export_id, &request.source_path, &target.path);
            run_to_completion(command, deadline)?;
            artifacts.push(OutputArtifact {
                format: target.format.clone(),
                path: target.path.clone(),
            });
        }
        Ok(artifacts)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::ProcessError;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_script(path: &Path, body: &str) {
        std::fs::write(path, format!("#!/bin/sh\n{}", body)).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    /// xvfb-run stand-in that drops `-a` and runs the rest.
    fn fake_xvfb(dir: &Path) -> PathBuf {
        let path = dir.join("xvfb-run");
        write_script(&path, "shift\nexec \"$@\"\n");
        path
    }

    fn request(dir: &Path) -> ConversionRequest {
        let source = dir.join("upload");
        std::fs::write(&source, b"<mxfile/>").unwrap();
        ConversionRequest {
            source_path: source,
            content_type: "application/x-drawio".to_string(),
            formats: vec!["png".to_string(), "svg".to_string()],
            thumbnails: None,
            output_dir: dir.to_path_buf(),
            original_name: "flow.drawio".to_string(),
        }
    }

    fn targets(dir: &Path) -> Vec<ExportTarget> {
        ["png", "svg"]
            .iter()
            .map(|f| ExportTarget {
                format: f.to_string(),
                export_id: f.to_string(),
                path: dir.join(format!("flow.drawio.{}", f)),
            })
            .collect()
    }

    #[test]
    fn test_runs_one_export_per_format() {
        let temp_dir = TempDir::new().unwrap();
        let drawio = temp_dir.path().join("drawio");
        // --export --format <id> --output <out> <input>
        write_script(&drawio, "printf \"$3\" > \"$5\"\n");

        let backend = DiagramBackend::new(fake_xvfb(temp_dir.path()), drawio);
        let artifacts = backend
            .convert(&request(temp_dir.path()), &targets(temp_dir.path()), &Deadline::none())
            .unwrap();

        assert_eq!(artifacts.len(), 2);
        assert_eq!(std::fs::read_to_string(&artifacts[0].path).unwrap(), "png");
        assert_eq!(std::fs::read_to_string(&artifacts[1].path).unwrap(), "svg");
    }

    #[test]
    fn test_nonzero_exit_fails_conversion() {
        let temp_dir = TempDir::new().unwrap();
        let drawio = temp_dir.path().join("drawio");
        write_script(&drawio, "echo 'cannot open display' >&2\nexit 1\n");

        let backend = DiagramBackend::new(fake_xvfb(temp_dir.path()), drawio);
        let result =
            backend.convert(&request(temp_dir.path()), &targets(temp_dir.path()), &Deadline::none());

        match result {
            Err(ConversionError::Diagram(ProcessError::Failed { stderr, .. })) => {
                assert_eq!(stderr, "cannot open display")
            }
            other => panic!("expected diagram failure, got {:?}", other),
        }
    }
}
