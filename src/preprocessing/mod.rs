//! Image preprocessing for ledger OCR
//!
//! Confidence-gated stages plus the driver that runs them in order.

pub mod codec;
pub mod pipeline;
pub mod steps;
pub mod toolkit;
pub mod types;

pub use pipeline::{
    PageSide, Pipeline, PipelineOutput, PipelineReport, StagePolicy, StageKind, StepTiming,
};
pub use types::{Decision, Dimensions, Reason, Rect, StageResult};
