pub mod config;
pub mod convert;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod sanitize;
pub mod service;
pub mod storage;
pub mod telemetry;

pub use config::{load_settings, settings_from_env, validate_settings, Settings};
pub use convert::{
    Backend, ConversionOptions, ConversionRequest, Converter, EngineHandle, OfficeEngine,
    OutputArtifact, PageRasterizer, ThumbnailSize,
};
pub use error::{
    ConfigError, ConversionError, DocpressError, QueueError, Result, StorageError,
    ValidationError,
};
pub use pipeline::{ConversionJob, Pipeline};
pub use queue::{JobEvent, JobId, JobQueue, JobRecord, JobStatus};
pub use service::{ConversionService, JobCreated, JobStatusView, StoredUpload, Submission};
pub use storage::{ArchivePackager, ResourceLifecycle};
