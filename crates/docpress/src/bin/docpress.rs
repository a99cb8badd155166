//! Command-line front end: convert a local file through the job queue, or
//! check a settings file.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use docpress::telemetry::{init_logging, LogFormat};
use docpress::{settings_from_env, ConversionService, JobStatus, Submission};

#[derive(Parser, Debug)]
#[command(name = "docpress", version, about = "Convert documents with LibreOffice and draw.io")]
struct Cli {
    /// Settings file (JSON). Environment variables override its values.
    #[arg(short, long, global = true, env = "DOCPRESS_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a file and print the final job status as JSON
    Convert {
        file: PathBuf,

        /// Output format; repeat for several. Defaults depend on the content type.
        #[arg(short, long = "format")]
        formats: Vec<String>,

        /// Render page thumbnails fitted into WIDTHxHEIGHT
        #[arg(short, long, value_name = "WxH")]
        thumbnails: Option<String>,

        /// Override the content type guessed from the file extension
        #[arg(long)]
        content_type: Option<String>,

        /// Worker threads
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Validate settings and print them
    CheckConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    init_logging(filter, LogFormat::from_env());

    let mut settings =
        settings_from_env(cli.config.as_deref()).context("Failed to load settings")?;

    match cli.command {
        Command::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
        Command::Convert {
            file,
            formats,
            thumbnails,
            content_type,
            workers,
        } => {
            if let Some(workers) = workers {
                if workers == 0 {
                    bail!("--workers must be at least 1");
                }
                settings.worker_count = workers;
            }
            let content_type = match content_type {
                Some(content_type) => content_type,
                None => guess_content_type(&file)
                    .with_context(|| format!("Cannot guess content type of {}", file.display()))?,
            };
            let options = build_options(&formats, thumbnails.as_deref());
            convert(settings, &file, &content_type, options)
        }
    }
}

fn convert(
    settings: docpress::Settings,
    file: &Path,
    content_type: &str,
    options: Option<String>,
) -> Result<()> {
    let job_timeout = settings.job_timeout();
    let service = ConversionService::start(settings).context("Failed to start conversion service")?;

    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .context("File has no usable name")?;
    let mut reader =
        File::open(file).with_context(|| format!("Failed to open {}", file.display()))?;

    let upload = service.store_upload(&mut reader, filename)?;
    let created = service.create(Submission::for_upload(&upload, content_type, options))?;
    tracing::info!(job_id = %created.id, "Waiting for conversion");

    // The queue fails overdue jobs itself; the margin covers its reaction time.
    let record = service
        .wait_for(&created.id, job_timeout + Duration::from_secs(5))
        .context("Job disappeared from the queue")?;

    println!("{}", serde_json::to_string_pretty(&record)?);
    let status = record.status;
    service.shutdown();

    match status {
        JobStatus::Finished => Ok(()),
        other => bail!("Conversion ended as {}", other),
    }
}

/// Builds the options JSON a client would send.
fn build_options(formats: &[String], thumbnails: Option<&str>) -> Option<String> {
    if formats.is_empty() && thumbnails.is_none() {
        return None;
    }
    let mut options = serde_json::Map::new();
    options.insert("formats".to_string(), serde_json::json!(formats));
    if let Some(size) = thumbnails {
        options.insert("thumbnails".to_string(), serde_json::json!({ "size": size }));
    }
    Some(serde_json::Value::Object(options).to_string())
}

fn guess_content_type(file: &Path) -> Option<String> {
    let extension = file.extension()?.to_str()?.to_ascii_lowercase();
    // Not in the mime database
    match extension.as_str() {
        "drawio" => return Some("application/x-drawio".to_string()),
        "mxfile" => return Some("application/vnd.jgraph.mxfile".to_string()),
        _ => {}
    }
    mime_guess::from_ext(&extension)
        .first()
        .map(|mime| mime.essence_str().to_string())
}
