//! Post-extraction structure gate: scores a table extraction and decides
//! whether, and how, recognition should be retried.

pub mod retry;
pub mod signals;

pub use retry::{
    binarized_variant, build_retry_plan, compute_structure_score, header_strip_box,
    select_retry_strategy, RetryDecision, RetryDetails, RetryPlan, RetryStrategy,
    StructureAssessment, StructureOptions, Winner,
};
pub use signals::{
    extract_signals, looks_like_date, Cell, RecordCandidate, RecordCandidates, StructureSignals,
    Table, TableExtraction, TableRow,
};
