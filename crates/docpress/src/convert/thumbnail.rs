use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use color_quant::NeuQuant;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbaImage};

use crate::config::{Colorspace, ThumbnailConfig};
use crate::convert::options::ThumbnailSize;
use crate::convert::process::run_to_completion;
use crate::error::{StorageError, ThumbnailError};
use crate::queue::Deadline;
use crate::sanitize;
use crate::storage::lifecycle::{ensure_directory, list_files};

/// Subdirectory of the output directory receiving page thumbnails.
pub const THUMBNAILS_DIR_NAME: &str = "thumbnails";

/// NeuQuant sampling factor: 1 is slowest/best, 30 fastest.
const NEUQUANT_SAMPLE_FACTOR: i32 = 10;

/// Renders every page of a PDF into an image file.
pub trait PageRasterizer: Send + Sync {
    /// Writes one image per page into `out_dir` and returns them in page order.
    fn rasterize(
        &self,
        pdf: &Path,
        dpi: u32,
        out_dir: &Path,
        deadline: &Deadline,
    ) -> Result<Vec<PathBuf>, ThumbnailError>;
}

/// Rasterizes with poppler's `pdftoppm`.
#[derive(Debug, Clone)]
pub struct PdftoppmRasterizer {
    program: PathBuf,
}

impl PdftoppmRasterizer {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl PageRasterizer for PdftoppmRasterizer {
    fn rasterize(
        &self,
        pdf: &Path,
        dpi: u32,
        out_dir: &Path,
        deadline: &Deadline,
    ) -> Result<Vec<PathBuf>, ThumbnailError> {
        let mut command = Command::new(&self.program);
        command
            .arg("-png")
            .arg("-r")
            .arg(dpi.to_string())
            .arg(pdf)
            .arg(out_dir.join("page"));
        run_to_completion(command, deadline)?;

        // pdftoppm zero-pads page numbers, so name order is page order
        let pages: Vec<PathBuf> = list_files(out_dir)?
            .into_iter()
            .filter(|p| p.extension().is_some_and(|ext| ext == "png"))
            .collect();
        if pages.is_empty() {
            return Err(ThumbnailError::NoPages(pdf.to_path_buf()));
        }
        Ok(pages)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Quantize {
    colors: usize,
    colorspace: Colorspace,
}

pub struct ThumbnailGenerator {
    rasterizer: Arc<dyn PageRasterizer>,
    dpi: u32,
    quantize: Option<Quantize>,
}

impl ThumbnailGenerator {
    pub fn new(config: &ThumbnailConfig, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        let quantize = config.quantize.then_some(Quantize {
            colors: usize::from(config.quantize_colors),
            colorspace: config.quantize_colorspace,
        });
        Self {
            rasterizer,
            dpi: config.dpi,
            quantize,
        }
    }

    /// Writes `thumbnails/<page>.png` (1-based) below `output_dir` for every
    /// page of `pdf`, each fitted inside `size`.
    pub fn generate(
        &self,
        pdf: &Path,
        output_dir: &Path,
        size: ThumbnailSize,
        deadline: &Deadline,
    ) -> Result<Vec<PathBuf>, ThumbnailError> {
        let _span = tracing::info_span!(
            "thumbnails",
            source = %sanitize::redact_path(pdf),
            size = %size
        )
        .entered();

        let pages_dir = tempfile::Builder::new()
            .prefix("docpress-pages-")
            .tempdir()
            .map_err(|e| StorageError::CreateDirectory {
                path: std::env::temp_dir(),
                source: e,
            })?;
        let pages = self
            .rasterizer
            .rasterize(pdf, self.dpi, pages_dir.path(), deadline)?;

        let thumbnails_dir = output_dir.join(THUMBNAILS_DIR_NAME);
        ensure_directory(&thumbnails_dir)?;

        let mut written = Vec::with_capacity(pages.len());
        for (index, page) in pages.iter().enumerate() {
            let image = image::open(page).map_err(|e| ThumbnailError::Image {
                path: page.clone(),
                source: e,
            })?;
            let thumbnail = self.render(image, size);

            let path = thumbnails_dir.join(format!("{}.png", index + 1));
            thumbnail
                .save_with_format(&path, ImageFormat::Png)
                .map_err(|e| ThumbnailError::Image {
                    path: path.clone(),
                    source: e,
                })?;
            written.push(path);
        }

        tracing::debug!("Wrote {} thumbnail(s)", written.len());
        Ok(written)
    }

    fn render(&self, image: DynamicImage, size: ThumbnailSize) -> DynamicImage {
        let resized = image.resize(size.width, size.height, FilterType::Triangle);
        match self.quantize {
            Some(quantize) => quantize_image(&resized, quantize),
            None => resized,
        }
    }
}

/// Reduces `image` to at most `quantize.colors` colours.
fn quantize_image(image: &DynamicImage, quantize: Quantize) -> DynamicImage {
    let mut pixels: RgbaImage = match quantize.colorspace {
        Colorspace::Rgb => image.to_rgba8(),
        Colorspace::Gray => DynamicImage::ImageLuma8(image.to_luma8()).to_rgba8(),
    };

    let palette = NeuQuant::new(NEUQUANT_SAMPLE_FACTOR, quantize.colors, pixels.as_raw());
    for pixel in pixels.chunks_exact_mut(4) {
        palette.map_pixel(pixel);
    }

    let quantized = DynamicImage::ImageRgba8(pixels);
    match quantize.colorspace {
        Colorspace::Rgb => quantized,
        Colorspace::Gray => DynamicImage::ImageLuma8(quantized.to_luma8()),
    }
}
