use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::schema::{Settings, PDF_CONTENT_TYPE, PDF_DEFAULT_FORMAT};
use crate::convert::Backend;
use crate::error::ConfigError;

/// Prefix shared by every recognised environment variable.
pub const ENV_PREFIX: &str = "DOCPRESS_";

pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_settings_from_str(&content)
}

pub fn load_settings_from_str(content: &str) -> Result<Settings, ConfigError> {
    let settings: Settings = serde_json::from_str(content)?;
    validate_settings(&settings)?;
    Ok(settings)
}

/// Builds settings the way the binary does: optional JSON file, then
/// `DOCPRESS_*` environment overrides, then validation.
pub fn settings_from_env(config_path: Option<&Path>) -> Result<Settings, ConfigError> {
    let mut settings = match config_path {
        Some(path) => load_settings(path)?,
        None => Settings::default(),
    };
    apply_env_overrides(&mut settings, std::env::vars())?;
    validate_settings(&settings)?;
    Ok(settings)
}

/// Applies `DOCPRESS_*` overrides from `vars`. Unknown keys are ignored.
pub fn apply_env_overrides<I>(settings: &mut Settings, vars: I) -> Result<(), ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in vars {
        let Some(name) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };

        match name {
            "JOB_TIMEOUT" => settings.job_timeout_secs = parse(&key, &value)?,
            "ORIGINAL_FILE_TTL" => settings.original_file_ttl_secs = parse(&key, &value)?,
            "RESULT_FILE_TTL" => settings.result_file_ttl_secs = parse(&key, &value)?,
            "MEDIA_ROOT" => settings.media_root = PathBuf::from(value),
            "RESULTS_ROOT" => settings.results_root = PathBuf::from(value),
            "RESULTS_URL" => settings.results_url = value,
            "WORKERS" => settings.worker_count = parse(&key, &value)?,
            "LIBREOFFICE_PATH" => settings.engine.office_path = PathBuf::from(value),
            "DRAWIO_PATH" => settings.engine.drawio_path = PathBuf::from(value),
            "XVFB_RUN_PATH" => settings.engine.xvfb_run_path = PathBuf::from(value),
            "PDFTOPPM_PATH" => settings.engine.pdftoppm_path = PathBuf::from(value),
            "THUMBNAILS_DPI" => settings.thumbnails.dpi = parse(&key, &value)?,
            "THUMBNAILS_QUANTIZE" => settings.thumbnails.quantize = parse_bool(&key, &value)?,
            "THUMBNAILS_QUANTIZE_COLORS" => {
                settings.thumbnails.quantize_colors = parse(&key, &value)?
            }
            "THUMBNAILS_QUANTIZE_COLORSPACE" => {
                settings.thumbnails.quantize_colorspace = parse(&key, &value)?
            }
            _ => {}
        }
    }

    Ok(())
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

pub fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    let invalid = |message: String| Err(ConfigError::Validation { message });

    if settings.job_timeout_secs == 0 {
        return invalid("job_timeout_secs must be positive".to_string());
    }
    if settings.original_file_ttl_secs == 0 {
        return invalid("original_file_ttl_secs must be positive".to_string());
    }
    if settings.result_file_ttl_secs == 0 {
        return invalid("result_file_ttl_secs must be positive".to_string());
    }
    if settings.worker_count == 0 {
        return invalid("worker_count must be positive".to_string());
    }
    if settings.thumbnails.dpi == 0 {
        return invalid("thumbnails.dpi must be positive".to_string());
    }
    if settings.thumbnails.quantize
        && !(2..=256).contains(&settings.thumbnails.quantize_colors)
    {
        return invalid(format!(
            "thumbnails.quantize_colors must be between 2 and 256, got {}",
            settings.thumbnails.quantize_colors
        ));
    }

    // Archives must outlive the job directories they were built from.
    if settings.results_root.starts_with(&settings.media_root) {
        return invalid(format!(
            "results_root '{}' must not be inside media_root '{}'",
            settings.results_root.display(),
            settings.media_root.display()
        ));
    }

    for (id, format) in &settings.formats {
        if format.extension.is_empty() || format.extension.contains(['/', '\\']) {
            return invalid(format!("format '{}' has an invalid extension", id));
        }
    }

    for (content_type, config) in &settings.content_types {
        let backend = Backend::for_content_type(content_type);
        for format_id in &config.formats {
            let Some(format) = settings.formats.get(format_id) else {
                return invalid(format!(
                    "'{}' allows unknown format '{}'",
                    content_type, format_id
                ));
            };
            if backend.export_identifier(format).is_none() {
                return invalid(format!(
                    "format '{}' has no {} export identifier (required by '{}')",
                    format_id,
                    backend.name(),
                    content_type
                ));
            }
        }
    }

    if settings.default_formats.is_empty() {
        return invalid("default_formats must not be empty".to_string());
    }
    for format_id in &settings.default_formats {
        if !settings.formats.contains_key(format_id) {
            return invalid(format!("default format '{}' is not configured", format_id));
        }
    }

    // Defaults stand in for the formats of submissions without options.
    for (content_type, config) in &settings.content_types {
        let missing = if content_type == PDF_CONTENT_TYPE {
            Some(PDF_DEFAULT_FORMAT).filter(|f| !config.formats.iter().any(|a| a == f))
        } else {
            settings
                .default_formats
                .iter()
                .map(String::as_str)
                .find(|f| !config.formats.iter().any(|a| a == f))
        };
        if let Some(missing) = missing {
            return invalid(format!(
                "default format '{}' is not allowed for '{}'",
                missing, content_type
            ));
        }
    }

    Ok(())
}
