pub mod loader;
pub mod schema;

pub use loader::{
    apply_env_overrides, load_settings, load_settings_from_str, settings_from_env,
    validate_settings,
};
pub use schema::{
    Colorspace, ContentTypeConfig, EngineConfig, FormatConfig, Settings, ThumbnailConfig,
    PDF_CONTENT_TYPE, PDF_DEFAULT_FORMAT,
};
