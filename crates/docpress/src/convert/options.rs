use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;

use crate::config::{Settings, PDF_CONTENT_TYPE, PDF_DEFAULT_FORMAT};
use crate::error::ValidationError;

/// Bounding box for page thumbnails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThumbnailSize {
    pub width: u32,
    pub height: u32,
}

impl FromStr for ThumbnailSize {
    type Err = ValidationError;

    /// Parses `"<width>x<height>"`; both must be positive integers.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (width, height) = s.split_once('x').ok_or(ValidationError::InvalidSize)?;
        let parse = |v: &str| match v.trim().parse::<u32>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(ValidationError::InvalidSize),
        };
        Ok(Self {
            width: parse(width)?,
            height: parse(height)?,
        })
    }
}

impl fmt::Display for ThumbnailSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Validated conversion options of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionOptions {
    pub formats: Vec<String>,
    pub thumbnails: Option<ThumbnailSize>,
}

impl ConversionOptions {
    /// Options used when a submission carries none.
    pub fn defaults(content_type: &str, settings: &Settings) -> Self {
        let formats = if content_type == PDF_CONTENT_TYPE {
            vec![PDF_DEFAULT_FORMAT.to_string()]
        } else {
            settings.default_formats.clone()
        };
        Self {
            formats,
            thumbnails: None,
        }
    }

    /// Parses the raw options JSON of a submission for `content_type`.
    ///
    /// Missing or blank options fall back to [`ConversionOptions::defaults`].
    pub fn parse(
        raw: Option<&str>,
        content_type: &str,
        settings: &Settings,
    ) -> Result<Self, ValidationError> {
        let allowed = settings
            .allowed_formats(content_type)
            .ok_or_else(|| ValidationError::UnsupportedContentType(content_type.to_string()))?;

        let raw = match raw.map(str::trim) {
            Some(raw) if !raw.is_empty() => raw,
            _ => {
                let defaults = Self::defaults(content_type, settings);
                for format in &defaults.formats {
                    ensure_allowed(format, content_type, allowed)?;
                }
                return Ok(defaults);
            }
        };

        let value: Value = serde_json::from_str(raw)
            .map_err(|e| ValidationError::InvalidOptions(e.to_string()))?;
        Self::from_value(&value, content_type, allowed)
    }

    pub fn from_value(
        value: &Value,
        content_type: &str,
        allowed: &[String],
    ) -> Result<Self, ValidationError> {
        let object = value.as_object().ok_or_else(|| {
            ValidationError::InvalidOptions("options must be a JSON object".to_string())
        })?;

        let formats = parse_formats(object.get("formats"), content_type, allowed)?;
        let thumbnails = parse_thumbnails(object.get("thumbnails"))?;

        Ok(Self {
            formats,
            thumbnails,
        })
    }
}

fn parse_formats(
    value: Option<&Value>,
    content_type: &str,
    allowed: &[String],
) -> Result<Vec<String>, ValidationError> {
    let items = match value {
        Some(Value::Array(items)) if !items.is_empty() => items,
        _ => return Err(ValidationError::InvalidFormats),
    };

    let mut formats: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let format = item.as_str().ok_or(ValidationError::InvalidFormats)?;
        ensure_allowed(format, content_type, allowed)?;
        if !formats.iter().any(|f| f == format) {
            formats.push(format.to_string());
        }
    }
    Ok(formats)
}

fn ensure_allowed(
    format: &str,
    content_type: &str,
    allowed: &[String],
) -> Result<(), ValidationError> {
    if allowed.iter().any(|f| f == format) {
        Ok(())
    } else {
        Err(ValidationError::UnsupportedFormat {
            content_type: content_type.to_string(),
            format: format.to_string(),
        })
    }
}

/// Falsy values (`null`, `false`, `0`, `""`, `{}`, `[]`) mean "no thumbnails".
fn parse_thumbnails(value: Option<&Value>) -> Result<Option<ThumbnailSize>, ValidationError> {
    let Some(value) = value.filter(|v| is_truthy(v)) else {
        return Ok(None);
    };

    let object = value.as_object().ok_or(ValidationError::InvalidThumbnails)?;
    match object.get("size") {
        Some(Value::String(size)) if !size.is_empty() => size.parse().map(Some),
        _ => Err(ValidationError::InvalidSize),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

    fn parse(raw: &str, content_type: &str) -> Result<ConversionOptions, ValidationError> {
        ConversionOptions::parse(Some(raw), content_type, &Settings::default())
    }

    #[test]
    fn test_thumbnail_size_parsing() {
        assert_eq!(
            "320x240".parse::<ThumbnailSize>().unwrap(),
            ThumbnailSize {
                width: 320,
                height: 240
            }
        );
        for bad in ["", "320", "x240", "320x", "0x10", "-1x10", "10x20x30", "axb"] {
            assert_eq!(
                bad.parse::<ThumbnailSize>(),
                Err(ValidationError::InvalidSize),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_defaults_for_pdf_and_others() {
        let settings = Settings::default();

        let pdf = ConversionOptions::parse(None, PDF_CONTENT_TYPE, &settings).unwrap();
        assert_eq!(pdf.formats, vec!["html"]);
        assert_eq!(pdf.thumbnails, None);

        let docx = ConversionOptions::parse(Some("  "), DOCX, &settings).unwrap();
        assert_eq!(docx.formats, settings.default_formats);
    }

    #[test]
    fn test_defaults_must_be_allowed_for_content_type() {
        let settings = Settings {
            default_formats: vec!["docx".to_string()],
            ..Settings::default()
        };

        let result = ConversionOptions::parse(None, "image/svg+xml", &settings);
        assert_eq!(
            result,
            Err(ValidationError::UnsupportedFormat {
                content_type: "image/svg+xml".to_string(),
                format: "docx".to_string(),
            })
        );

        let docx = ConversionOptions::parse(None, DOCX, &settings).unwrap();
        assert_eq!(docx.formats, vec!["docx"]);
    }

    #[test]
    fn test_valid_options() {
        let options = parse(
            r#"{"formats": ["pdf", "docx", "pdf"], "thumbnails": {"size": "320x240"}}"#,
            DOCX,
        )
        .unwrap();

        assert_eq!(options.formats, vec!["pdf", "docx"]);
        assert_eq!(
            options.thumbnails,
            Some(ThumbnailSize {
                width: 320,
                height: 240
            })
        );
    }

    #[test]
    fn test_unsupported_content_type() {
        assert_eq!(
            parse(r#"{"formats": ["pdf"]}"#, "application/x-msdownload"),
            Err(ValidationError::UnsupportedContentType(
                "application/x-msdownload".to_string()
            ))
        );
    }

    #[test]
    fn test_unsupported_format() {
        assert_eq!(
            parse(r#"{"formats": ["svg"]}"#, DOCX),
            Err(ValidationError::UnsupportedFormat {
                content_type: DOCX.to_string(),
                format: "svg".to_string()
            })
        );
    }

    #[test]
    fn test_invalid_formats() {
        for raw in [
            r#"{}"#,
            r#"{"formats": []}"#,
            r#"{"formats": "pdf"}"#,
            r#"{"formats": [1]}"#,
        ] {
            assert_eq!(parse(raw, DOCX), Err(ValidationError::InvalidFormats), "{}", raw);
        }
    }

    #[test]
    fn test_invalid_thumbnails() {
        assert_eq!(
            parse(r#"{"formats": ["pdf"], "thumbnails": "320x240"}"#, DOCX),
            Err(ValidationError::InvalidThumbnails)
        );
        assert_eq!(
            parse(r#"{"formats": ["pdf"], "thumbnails": {"size": ""}}"#, DOCX),
            Err(ValidationError::InvalidSize)
        );
        assert_eq!(
            parse(r#"{"formats": ["pdf"], "thumbnails": {"size": 320}}"#, DOCX),
            Err(ValidationError::InvalidSize)
        );
    }

    #[test]
    fn test_falsy_thumbnails_are_ignored() {
        for thumbnails in ["null", "false", "{}", "\"\""] {
            let raw = format!(r#"{{"formats": ["pdf"], "thumbnails": {}}}"#, thumbnails);
            assert_eq!(parse(&raw, DOCX).unwrap().thumbnails, None, "{}", raw);
        }
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            parse("{not json", DOCX),
            Err(ValidationError::InvalidOptions(_))
        ));
        assert!(matches!(
            parse("[\"pdf\"]", DOCX),
            Err(ValidationError::InvalidOptions(_))
        ));
    }
}
