//! Fakes standing in for LibreOffice, drawio, xvfb-run and pdftoppm.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{Rgb, RgbImage};

use docpress::convert::{LoadedDocument, OfficeEngine, PageRasterizer};
use docpress::error::{EngineError, StorageError, ThumbnailError};
use docpress::queue::Deadline;

/// What the fake engine observed.
#[derive(Default)]
pub struct EngineStats {
    /// Documents currently open.
    pub active: AtomicUsize,
    /// Highest number of simultaneously open documents.
    pub max_active: AtomicUsize,
    pub loads: AtomicUsize,
    /// (output path, export id) of every export, in order.
    pub exports: Mutex<Vec<(PathBuf, String)>>,
}

impl EngineStats {
    pub fn exports(&self) -> Vec<(PathBuf, String)> {
        self.exports.lock().unwrap().clone()
    }
}

/// Office engine writing `"<export id>:<source name>"` into every output.
pub struct FakeOfficeEngine {
    stats: Arc<EngineStats>,
    export_delay: Duration,
    write_output: bool,
}

impl FakeOfficeEngine {
    pub fn new() -> (Self, Arc<EngineStats>) {
        let stats = Arc::new(EngineStats::default());
        let engine = Self {
            stats: Arc::clone(&stats),
            export_delay: Duration::ZERO,
            write_output: true,
        };
        (engine, stats)
    }

    pub fn with_export_delay(mut self, delay: Duration) -> Self {
        self.export_delay = delay;
        self
    }

    /// Exports report success without writing anything.
    pub fn producing_nothing(mut self) -> Self {
        self.write_output = false;
        self
    }
}

impl OfficeEngine for FakeOfficeEngine {
    fn load<'a>(&'a self, path: &Path) -> Result<Box<dyn LoadedDocument + 'a>, EngineError> {
        if !path.is_file() {
            return Err(EngineError::Load {
                path: path.to_path_buf(),
                reason: "missing".to_string(),
            });
        }
        self.stats.loads.fetch_add(1, Ordering::SeqCst);
        let now = self.stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_active.fetch_max(now, Ordering::SeqCst);

        Ok(Box::new(FakeDocument {
            engine: self,
            source: path.to_path_buf(),
        }))
    }
}

struct FakeDocument<'a> {
    engine: &'a FakeOfficeEngine,
    source: PathBuf,
}

impl LoadedDocument for FakeDocument<'_> {
    fn save_as(
        &mut self,
        output: &Path,
        export_id: &str,
        _deadline: &Deadline,
    ) -> Result<(), EngineError> {
        std::thread::sleep(self.engine.export_delay);
        if self.engine.write_output {
            let name = self.source.file_name().unwrap().to_string_lossy();
            std::fs::write(output, format!("{}:{}", export_id, name)).map_err(|e| {
                StorageError::WriteFile {
                    path: output.to_path_buf(),
                    source: e,
                }
            })?;
        }
        self.engine
            .stats
            .exports
            .lock()
            .unwrap()
            .push((output.to_path_buf(), export_id.to_string()));
        Ok(())
    }

    fn close(&mut self) {
        self.engine.stats.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Rasterizer producing `pages` solid 400x300 pages per PDF.
pub struct FakeRasterizer {
    pages: usize,
    inputs: Mutex<Vec<PathBuf>>,
}

impl FakeRasterizer {
    pub fn new(pages: usize) -> Arc<Self> {
        Arc::new(Self {
            pages,
            inputs: Mutex::new(Vec::new()),
        })
    }

    pub fn inputs(&self) -> Vec<PathBuf> {
        self.inputs.lock().unwrap().clone()
    }
}

impl PageRasterizer for FakeRasterizer {
    fn rasterize(
        &self,
        pdf: &Path,
        _dpi: u32,
        out_dir: &Path,
        _deadline: &Deadline,
    ) -> Result<Vec<PathBuf>, ThumbnailError> {
        assert!(pdf.is_file(), "rasterizing missing pdf {}", pdf.display());
        self.inputs.lock().unwrap().push(pdf.to_path_buf());

        Ok((1..=self.pages)
            .map(|page| {
                let path = out_dir.join(format!("page-{}.png", page));
                RgbImage::from_pixel(400, 300, Rgb([200, 100, page as u8]))
                    .save(&path)
                    .unwrap();
                path
            })
            .collect())
    }
}

/// Writes an executable shell script.
#[cfg(unix)]
pub fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    std::fs::write(path, format!("#!/bin/sh\n{}", body)).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// `xvfb-run` stand-in: drops `-a` and runs the wrapped command.
#[cfg(unix)]
pub fn fake_xvfb_run(dir: &Path) -> PathBuf {
    let path = dir.join("xvfb-run");
    write_script(&path, "[ \"$1\" = \"-a\" ] || exit 64\nshift\nexec \"$@\"\n");
    path
}

/// `drawio` stand-in writing `"<format>"` to the `--output` path.
#[cfg(unix)]
pub fn fake_drawio(dir: &Path) -> PathBuf {
    let path = dir.join("drawio");
    write_script(
        &path,
        "[ \"$1\" = \"--export\" ] || exit 64\nprintf '%s' \"$3\" > \"$5\"\n",
    );
    path
}

/// `drawio` stand-in that always fails.
#[cfg(unix)]
pub fn failing_drawio(dir: &Path) -> PathBuf {
    let path = dir.join("drawio-broken");
    write_script(&path, "echo 'export failed' >&2\nexit 2\n");
    path
}

/// LibreOffice `program/` directory whose `soffice` writes
/// `<outdir>/<stem>.<ext>` with ext taken from the export id.
#[cfg(unix)]
pub fn fake_office_dir(dir: &Path) -> PathBuf {
    let program_dir = dir.join("libreoffice").join("program");
    std::fs::create_dir_all(&program_dir).unwrap();
    write_script(
        &program_dir.join("soffice"),
        "while [ \"$1\" != \"--convert-to\" ]; do shift; done\n\
         ext=\"${2%%:*}\"; out=\"$4\"; src=\"$5\"\n\
         name=$(basename \"$src\")\n\
         printf '%s' \"$ext\" > \"$out/${name%.*}.$ext\"\n",
    );
    program_dir
}

/// `pdftoppm` stand-in copying a prepared PNG as two pages.
#[cfg(unix)]
pub fn fake_pdftoppm(dir: &Path) -> PathBuf {
    let page = dir.join("page-template.png");
    RgbImage::from_pixel(600, 800, Rgb([255, 255, 255]))
        .save(&page)
        .unwrap();

    // -png -r <dpi> <pdf> <prefix>
    let path = dir.join("pdftoppm");
    write_script(
        &path,
        &format!(
            "[ -f \"$4\" ] || exit 1\ncp '{page}' \"$5-1.png\"\ncp '{page}' \"$5-2.png\"\n",
            page = page.display()
        ),
    );
    path
}
