use crate::error::PrepError;
use crate::planning::ocr_plan::OcrPlanOptions;
use crate::planning::profiles::ProfileOptions;
use crate::preprocessing::pipeline::StagePolicy;
use crate::preprocessing::steps::border::BorderOptions;
use crate::preprocessing::steps::denoise::DenoiseOptions;
use crate::preprocessing::steps::deskew::DeskewOptions;
use crate::preprocessing::steps::normalize::BackgroundOptions;
use crate::preprocessing::steps::redaction::RedactionOptions;
use crate::preprocessing::steps::roi::RoiOptions;
use crate::preprocessing::steps::split::SplitOptions;
use crate::structure::StructureOptions;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "ledger-ocr-prep")]
#[command(about = "Preprocessing and OCR planning for scanned church ledger pages")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Host address to bind to
    #[arg(long, env = "LEDGER_PREP_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "LEDGER_PREP_PORT", default_value = "9393")]
    pub port: u16,

    /// Maximum upload size in bytes (default: 50MB)
    #[arg(long, env = "LEDGER_PREP_MAX_FILE_SIZE", default_value = "52428800")]
    pub max_file_size: usize,

    /// TOML file with stage thresholds
    #[arg(long, env = "LEDGER_PREP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Run the pipeline on one image and print the JSON report
    Process {
        /// Image file to process
        path: PathBuf,
        /// Write the processed pages and redaction masks here as PNG
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Sacramental record type (baptism, marriage, funeral, ...)
        #[arg(long)]
        record_type: Option<String>,
        #[arg(long)]
        layout_template_id: Option<u64>,
    },
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub max_file_size: usize,
    pub pipeline_config: Option<PathBuf>,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            host: args.host,
            port: args.port,
            max_file_size: args.max_file_size,
            pipeline_config: args.config,
        }
    }
}

impl Config {
    /// Stage thresholds from the configured TOML file, or the defaults.
    pub fn load_pipeline_config(&self) -> Result<PipelineConfig, PrepError> {
        match &self.pipeline_config {
            Some(path) => PipelineConfig::load(path),
            None => Ok(PipelineConfig::default()),
        }
    }
}

/// Per-stage thresholds. Every section and field is optional in TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub policy: StagePolicy,
    pub border: BorderOptions,
    pub deskew: DeskewOptions,
    pub roi: RoiOptions,
    pub split: SplitOptions,
    pub background: BackgroundOptions,
    pub denoise: DenoiseOptions,
    pub redaction: RedactionOptions,
    pub ocr_plan: OcrPlanOptions,
    pub profiles: ProfileOptions,
    pub structure: StructureOptions,
}

impl PipelineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, PrepError> {
        toml::from_str(content).map_err(|e| PrepError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, PrepError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PrepError::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&content)?;
        tracing::info!(path = %path.display(), "loaded pipeline configuration");
        Ok(config)
    }
}
