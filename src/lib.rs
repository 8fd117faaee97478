//! Preprocessing, OCR planning and structure gating for scanned church
//! ledger pages.

pub mod config;
pub mod error;
pub mod planning;
pub mod preprocessing;
pub mod server;
pub mod structure;

pub use config::{Config, PipelineConfig};
pub use error::PrepError;
pub use preprocessing::{Pipeline, PipelineOutput, PipelineReport};
