//! Individual preprocessing stages.
//!
//! Every stage measures its input, builds a candidate, re-measures it and
//! only then decides whether the candidate replaces the input.

pub mod border;
pub mod denoise;
pub mod deskew;
pub mod normalize;
pub mod redaction;
pub mod roi;
pub mod split;
