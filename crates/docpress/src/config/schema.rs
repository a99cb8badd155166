use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// Format a PDF submission without options is converted to.
pub const PDF_DEFAULT_FORMAT: &str = "html";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,
    #[serde(default = "default_original_file_ttl")]
    pub original_file_ttl_secs: u64,
    #[serde(default = "default_result_file_ttl")]
    pub result_file_ttl_secs: u64,
    /// Root for per-job directories (upload + produced output).
    #[serde(default = "default_media_root")]
    pub media_root: PathBuf,
    /// Root for packaged archives. Must not live inside `media_root`.
    #[serde(default = "default_results_root")]
    pub results_root: PathBuf,
    /// Public prefix under which `results_root` is served.
    #[serde(default = "default_results_url")]
    pub results_url: String,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub thumbnails: ThumbnailConfig,
    #[serde(default = "default_content_types")]
    pub content_types: BTreeMap<String, ContentTypeConfig>,
    #[serde(default = "default_formats")]
    pub formats: BTreeMap<String, FormatConfig>,
    #[serde(default = "default_default_formats")]
    pub default_formats: Vec<String>,
}

fn default_job_timeout() -> u64 {
    60 * 10
}

fn default_original_file_ttl() -> u64 {
    60 * 10
}

fn default_result_file_ttl() -> u64 {
    60 * 60
}

fn default_media_root() -> PathBuf {
    std::env::temp_dir().join("docpress").join("media")
}

fn default_results_root() -> PathBuf {
    std::env::temp_dir().join("docpress").join("results")
}

fn default_results_url() -> String {
    "/results".to_string()
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_default_formats() -> Vec<String> {
    vec!["pdf".to_string()]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            job_timeout_secs: default_job_timeout(),
            original_file_ttl_secs: default_original_file_ttl(),
            result_file_ttl_secs: default_result_file_ttl(),
            media_root: default_media_root(),
            results_root: default_results_root(),
            results_url: default_results_url(),
            worker_count: default_worker_count(),
            engine: EngineConfig::default(),
            thumbnails: ThumbnailConfig::default(),
            content_types: default_content_types(),
            formats: default_formats(),
            default_formats: default_default_formats(),
        }
    }
}

impl Settings {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn original_file_ttl(&self) -> Duration {
        Duration::from_secs(self.original_file_ttl_secs)
    }

    pub fn result_file_ttl(&self) -> Duration {
        Duration::from_secs(self.result_file_ttl_secs)
    }

    /// Formats the given content type may be converted to, or `None` when the
    /// content type is not supported at all.
    pub fn allowed_formats(&self, content_type: &str) -> Option<&[String]> {
        self.content_types
            .get(content_type)
            .map(|c| c.formats.as_slice())
    }

    pub fn format(&self, id: &str) -> Option<&FormatConfig> {
        self.formats.get(id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// LibreOffice `program/` directory.
    #[serde(default = "default_office_path")]
    pub office_path: PathBuf,
    #[serde(default = "default_drawio_path")]
    pub drawio_path: PathBuf,
    #[serde(default = "default_xvfb_run_path")]
    pub xvfb_run_path: PathBuf,
    #[serde(default = "default_pdftoppm_path")]
    pub pdftoppm_path: PathBuf,
}

fn default_office_path() -> PathBuf {
    PathBuf::from("/usr/lib/libreoffice/program/")
}

fn default_drawio_path() -> PathBuf {
    PathBuf::from("/usr/bin/drawio")
}

fn default_xvfb_run_path() -> PathBuf {
    PathBuf::from("/usr/bin/xvfb-run")
}

fn default_pdftoppm_path() -> PathBuf {
    PathBuf::from("pdftoppm")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            office_path: default_office_path(),
            drawio_path: default_drawio_path(),
            xvfb_run_path: default_xvfb_run_path(),
            pdftoppm_path: default_pdftoppm_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailConfig {
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    #[serde(default)]
    pub quantize: bool,
    #[serde(default = "default_quantize_colors")]
    pub quantize_colors: u16,
    #[serde(default)]
    pub quantize_colorspace: Colorspace,
}

fn default_dpi() -> u32 {
    90
}

fn default_quantize_colors() -> u16 {
    128
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            dpi: default_dpi(),
            quantize: false,
            quantize_colors: default_quantize_colors(),
            quantize_colorspace: Colorspace::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Colorspace {
    #[default]
    Rgb,
    Gray,
}

impl FromStr for Colorspace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rgb" => Ok(Colorspace::Rgb),
            "gray" | "grey" => Ok(Colorspace::Gray),
            other => Err(format!("unknown colorspace '{}'", other)),
        }
    }
}

impl fmt::Display for Colorspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Colorspace::Rgb => write!(f, "rgb"),
            Colorspace::Gray => write!(f, "gray"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentTypeConfig {
    pub formats: Vec<String>,
}

/// How one output format is produced by each backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatConfig {
    pub extension: String,
    /// Value passed to the office engine's `--convert-to`.
    #[serde(default)]
    pub office: Option<String>,
    /// Value passed to the diagram renderer's `--format`.
    #[serde(default)]
    pub diagram: Option<String>,
}

impl FormatConfig {
    fn office(extension: &str, export: &str) -> Self {
        Self {
            extension: extension.to_string(),
            office: Some(export.to_string()),
            diagram: None,
        }
    }

    fn diagram(extension: &str, export: &str) -> Self {
        Self {
            extension: extension.to_string(),
            office: None,
            diagram: Some(export.to_string()),
        }
    }

    fn both(extension: &str, office: &str, diagram: &str) -> Self {
        Self {
            extension: extension.to_string(),
            office: Some(office.to_string()),
            diagram: Some(diagram.to_string()),
        }
    }
}

fn default_formats() -> BTreeMap<String, FormatConfig> {
    let entries = [
        ("pdf", FormatConfig::both("pdf", "pdf", "pdf")),
        ("png", FormatConfig::both("png", "png", "png")),
        ("svg", FormatConfig::diagram("svg", "svg")),
        ("jpg", FormatConfig::diagram("jpg", "jpg")),
        ("html", FormatConfig::office("html", "html")),
        ("txt", FormatConfig::office("txt", "txt:Text")),
        ("rtf", FormatConfig::office("rtf", "rtf")),
        ("odt", FormatConfig::office("odt", "odt")),
        ("docx", FormatConfig::office("docx", "docx:MS Word 2007 XML")),
        ("ods", FormatConfig::office("ods", "ods")),
        ("xlsx", FormatConfig::office("xlsx", "xlsx:Calc MS Excel 2007 XML")),
        ("csv", FormatConfig::office("csv", "csv:Text - txt - csv (StarCalc)")),
        ("odp", FormatConfig::office("odp", "odp")),
        ("pptx", FormatConfig::office("pptx", "pptx:Impress MS PowerPoint 2007 XML")),
    ];
    entries
        .into_iter()
        .map(|(id, format)| (id.to_string(), format))
        .collect()
}

fn default_content_types() -> BTreeMap<String, ContentTypeConfig> {
    const TEXT_DOCUMENT: &[&str] = &["pdf", "html", "txt", "rtf", "odt", "docx", "png"];
    const SPREADSHEET: &[&str] = &["pdf", "html", "ods", "xlsx", "csv", "png"];
    const PRESENTATION: &[&str] = &["pdf", "html", "odp", "pptx", "png"];
    const DIAGRAM: &[&str] = &["pdf", "png", "svg", "jpg"];

    let entries: [(&str, &[&str]); 15] = [
        (PDF_CONTENT_TYPE, &["html", "png"]),
        ("application/msword", TEXT_DOCUMENT),
        (
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            TEXT_DOCUMENT,
        ),
        ("application/vnd.oasis.opendocument.text", TEXT_DOCUMENT),
        ("application/rtf", TEXT_DOCUMENT),
        ("application/vnd.ms-excel", SPREADSHEET),
        (
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            SPREADSHEET,
        ),
        ("application/vnd.oasis.opendocument.spreadsheet", SPREADSHEET),
        ("application/vnd.ms-powerpoint", PRESENTATION),
        (
            "application/vnd.openxmlformats-officedocument.presentationml.presentation",
            PRESENTATION,
        ),
        ("application/vnd.oasis.opendocument.presentation", PRESENTATION),
        ("application/vnd.jgraph.mxfile", DIAGRAM),
        ("application/x-drawio", DIAGRAM),
        ("image/svg+xml", &["pdf", "png", "jpg"]),
        ("text/plain", DIAGRAM),
    ];

    entries
        .into_iter()
        .map(|(content_type, formats)| {
            (
                content_type.to_string(),
                ContentTypeConfig {
                    formats: formats.iter().map(|f| f.to_string()).collect(),
                },
            )
        })
        .collect()
}
