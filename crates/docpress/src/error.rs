use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocpressError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Rejections raised before a job exists.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Not supported mimetype: '{0}'")]
    UnsupportedContentType(String),

    #[error("'{content_type}' mimetype can't be converted to '{format}'")]
    UnsupportedFormat {
        content_type: String,
        format: String,
    },

    #[error("Invalid options JSON: {0}")]
    InvalidOptions(String),

    #[error("Invalid 'formats' value")]
    InvalidFormats,

    #[error("Invalid 'thumbnails' value")]
    InvalidThumbnails,

    #[error("Invalid 'size' value")]
    InvalidSize,

    #[error("Invalid original filename: '{0}'")]
    InvalidFilename(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove '{path}': {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move file from '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid directory name: '{0}'")]
    InvalidName(String),

    #[error("Failed to scan '{path}': {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("{program} killed after {elapsed:?} (job deadline passed)")]
    TimedOut { program: String, elapsed: Duration },

    #[error("Failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Office engine not found at '{0}'")]
    NotInstalled(PathBuf),

    #[error("Failed to load document '{path}': {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("Export to '{filter}' failed: {source}")]
    Export {
        filter: String,
        #[source]
        source: ProcessError,
    },

    #[error("Engine produced no output for '{0}'")]
    MissingOutput(PathBuf),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Error, Debug)]
pub enum ThumbnailError {
    #[error("Rasterization failed: {0}")]
    Rasterize(#[from] ProcessError),

    #[error("Rasterizer produced no pages for '{0}'")]
    NoPages(PathBuf),

    #[error("Failed to process page image '{path}': {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Nothing to archive in '{0}'")]
    EmptySource(PathBuf),

    #[error("Failed to write archive '{path}': {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Everything that can fail a job once a worker has picked it up.
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Format '{0}' is not configured")]
    UnknownFormat(String),

    #[error("Format '{format}' has no export identifier for the {backend} backend")]
    NoExportIdentifier {
        format: String,
        backend: &'static str,
    },

    #[error("Office engine failure: {0}")]
    Engine(#[from] EngineError),

    #[error("Diagram renderer failure: {0}")]
    Diagram(#[from] ProcessError),

    #[error("Thumbnail generation failed: {0}")]
    Thumbnail(#[from] ThumbnailError),

    #[error("Conversion produced no output in '{0}'")]
    EmptyOutput(PathBuf),

    #[error("Job deadline passed after {0:?}")]
    DeadlineExceeded(Duration),

    #[error("Packaging failed: {0}")]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Failed to schedule cleanup: {0}")]
    Schedule(#[from] QueueError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Job queue is shut down")]
    ChannelClosed,

    #[error("Scheduler is shut down")]
    SchedulerClosed,

    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),
}

pub type Result<T> = std::result::Result<T, DocpressError>;
