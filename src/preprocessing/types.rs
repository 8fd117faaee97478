//! Shared result model for every stage.

use crate::error::PrepError;
use image::DynamicImage;
use serde::{Serialize, Serializer};
use std::fmt;

/// Confidence gate shared by every stage unless overridden.
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.70;

/// Clamp a confidence or fraction into [0, 1]. NaN collapses to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Round to a fixed number of decimals for reporting.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn of(image: &DynamicImage) -> Self {
        Self::new(image.width(), image.height())
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn min_side(&self) -> u32 {
        self.width.min(self.height)
    }
}

/// Reject images no stage can analyse.
pub fn ensure_non_empty(image: &DynamicImage) -> Result<Dimensions, PrepError> {
    let dims = Dimensions::of(image);
    if dims.width == 0 || dims.height == 0 {
        return Err(PrepError::EmptyImage {
            width: dims.width,
            height: dims.height,
        });
    }
    Ok(dims)
}

/// Pixel-space rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn full(dims: Dimensions) -> Self {
        Self::new(0, 0, dims.width, dims.height)
    }

    pub fn right(&self) -> u32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.h
    }

    pub fn area(&self) -> u64 {
        self.w as u64 * self.h as u64
    }

    /// Normalized variant relative to the image the box lives in.
    pub fn normalized(&self, dims: Dimensions) -> NormRect {
        let (iw, ih) = (dims.width.max(1) as f64, dims.height.max(1) as f64);
        NormRect {
            x: clamp_unit(self.x as f64 / iw),
            y: clamp_unit(self.y as f64 / ih),
            w: clamp_unit(self.w as f64 / iw),
            h: clamp_unit(self.h as f64 / ih),
        }
    }

    /// Grow by `pad` on every side, then clip to the image.
    pub fn padded(&self, pad: u32, dims: Dimensions) -> Rect {
        let x0 = self.x.saturating_sub(pad);
        let y0 = self.y.saturating_sub(pad);
        let x1 = (self.right() + pad).min(dims.width);
        let y1 = (self.bottom() + pad).min(dims.height);
        Rect::new(x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
    }

    pub fn is_within(&self, dims: Dimensions) -> bool {
        self.w > 0 && self.h > 0 && self.right() <= dims.width && self.bottom() <= dims.height
    }
}

/// Rectangle with x/w divided by image width and y/h by image height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NormRect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

/// Pixels removed from each edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrimPx {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

impl TrimPx {
    pub fn is_empty(&self) -> bool {
        self.left == 0 && self.right == 0 && self.top == 0 && self.bottom == 0
    }

    pub fn edge_count(&self) -> usize {
        [self.left, self.right, self.top, self.bottom]
            .iter()
            .filter(|&&v| v > 0)
            .count()
    }
}

/// Diagnostic reason codes. Rendered as strings in every report.
#[derive(Debug, Clone, PartialEq)]
pub enum Reason {
    NoBorder,
    BorderBlack,
    BorderUncertain,
    NoLinesFound,
    DeskewSmallAngle,
    DeskewApplied,
    DeskewUncertain,
    NoGridFound,
    RoiApplied,
    RoiUncertain,
    FallbackUsed,
    NoSeamFound,
    SplitApplied,
    SplitUncertain,
    BgNormalized,
    BgNoImprovement,
    BgUncertain,
    DenoiseApplied,
    DenoiseNoImprovement,
    DenoiseUncertain,
    RedactionApplied,
    RedactionNoop,
    RedactionUncertain,
    OcrPlanRegions,
    OcrPlanLowContent,
    OcrPlanFullContent,
    OcrPlanNoSignificantRegions,
    ContentFrac(f64),
    RegionCount(usize),
    RecordTypeMatch(String),
    LayoutTemplate(u64),
    Profiles(String),
    StructureOk,
    NoDataRows,
    LowCellFill,
    VeryLowCellFill,
    LowTokenDensity,
    VeryLowTokenDensity,
    HeaderDominant,
    NoValidDates,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Reason::NoBorder => "NO_BORDER",
            Reason::BorderBlack => "BORDER_BLACK",
            Reason::BorderUncertain => "BORDER_UNCERTAIN",
            Reason::NoLinesFound => "NO_LINES_FOUND",
            Reason::DeskewSmallAngle => "DESKEW_SMALL_ANGLE",
            Reason::DeskewApplied => "DESKEW_APPLIED",
            Reason::DeskewUncertain => "DESKEW_UNCERTAIN",
            Reason::NoGridFound => "NO_GRID_FOUND",
            Reason::RoiApplied => "ROI_APPLIED",
            Reason::RoiUncertain => "ROI_UNCERTAIN",
            Reason::FallbackUsed => "FALLBACK_USED",
            Reason::NoSeamFound => "NO_SEAM_FOUND",
            Reason::SplitApplied => "SPLIT_APPLIED",
            Reason::SplitUncertain => "SPLIT_UNCERTAIN",
            Reason::BgNormalized => "BG_NORMALIZED",
            Reason::BgNoImprovement => "BG_NO_IMPROVEMENT",
            Reason::BgUncertain => "BG_UNCERTAIN",
            Reason::DenoiseApplied => "DENOISE_APPLIED",
            Reason::DenoiseNoImprovement => "DENOISE_NO_IMPROVEMENT",
            Reason::DenoiseUncertain => "DENOISE_UNCERTAIN",
            Reason::RedactionApplied => "REDACTION_APPLIED",
            Reason::RedactionNoop => "REDACTION_NOOP",
            Reason::RedactionUncertain => "REDACTION_UNCERTAIN",
            Reason::OcrPlanRegions => "OCR_PLAN_REGIONS",
            Reason::OcrPlanLowContent => "OCR_PLAN_LOW_CONTENT",
            Reason::OcrPlanFullContent => "OCR_PLAN_FULL_CONTENT",
            Reason::OcrPlanNoSignificantRegions => "OCR_PLAN_NO_SIGNIFICANT_REGIONS",
            Reason::ContentFrac(frac) => return write!(f, "content_frac={:.3}", frac),
            Reason::RegionCount(n) => return write!(f, "region_count={}", n),
            Reason::RecordTypeMatch(kind) => return write!(f, "RECORD_TYPE_MATCH:{}", kind),
            Reason::LayoutTemplate(id) => return write!(f, "LAYOUT_TEMPLATE:{}", id),
            Reason::Profiles(counts) => return write!(f, "PROFILES:{}", counts),
            Reason::StructureOk => "STRUCTURE_OK",
            Reason::NoDataRows => "NO_DATA_ROWS",
            Reason::LowCellFill => "LOW_CELL_FILL",
            Reason::VeryLowCellFill => "VERY_LOW_CELL_FILL",
            Reason::LowTokenDensity => "LOW_TOKEN_DENSITY",
            Reason::VeryLowTokenDensity => "VERY_LOW_TOKEN_DENSITY",
            Reason::HeaderDominant => "HEADER_DOMINANT",
            Reason::NoValidDates => "NO_VALID_DATES",
        };
        f.write_str(code)
    }
}

impl Serialize for Reason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Outcome of a stage: either a transformed payload or nothing.
#[derive(Debug, Clone)]
pub enum Decision<O> {
    Applied(O),
    NotApplied,
}

/// Immutable record returned by every stage call.
///
/// `details` carries the stage's thresholds, detected geometry and
/// before/after metrics. The payload itself is never serialized.
#[derive(Debug, Clone, Serialize)]
#[serde(bound(serialize = "D: Serialize"))]
pub struct StageResult<O, D> {
    #[serde(rename = "applied", serialize_with = "serialize_applied")]
    pub decision: Decision<O>,
    pub method: &'static str,
    pub confidence: f64,
    pub reasons: Vec<Reason>,
    pub input_dimensions: Dimensions,
    pub output_dimensions: Dimensions,
    pub details: D,
}

fn serialize_applied<O, S: Serializer>(decision: &Decision<O>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_bool(matches!(decision, Decision::Applied(_)))
}

impl<O, D> StageResult<O, D> {
    pub fn accept(
        method: &'static str,
        output: O,
        input_dimensions: Dimensions,
        output_dimensions: Dimensions,
        confidence: f64,
        reasons: Vec<Reason>,
        details: D,
    ) -> Self {
        Self {
            decision: Decision::Applied(output),
            method,
            confidence: clamp_unit(confidence),
            reasons,
            input_dimensions,
            output_dimensions,
            details,
        }
    }

    /// Pass-through result: output dimensions equal the input.
    pub fn reject(
        method: &'static str,
        input_dimensions: Dimensions,
        confidence: f64,
        reasons: Vec<Reason>,
        details: D,
    ) -> Self {
        Self {
            decision: Decision::NotApplied,
            method,
            confidence: clamp_unit(confidence),
            reasons,
            input_dimensions,
            output_dimensions: input_dimensions,
            details,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self.decision, Decision::Applied(_))
    }

    pub fn output(&self) -> Option<&O> {
        match &self.decision {
            Decision::Applied(output) => Some(output),
            Decision::NotApplied => None,
        }
    }

    pub fn into_output(self) -> Option<O> {
        match self.decision {
            Decision::Applied(output) => Some(output),
            Decision::NotApplied => None,
        }
    }

    pub fn has_reason(&self, reason: &Reason) -> bool {
        self.reasons.contains(reason)
    }

    /// Drop the payload, keeping the diagnostic record.
    pub fn without_output(&self) -> StageResult<(), D>
    where
        D: Clone,
    {
        StageResult {
            decision: match self.decision {
                Decision::Applied(_) => Decision::Applied(()),
                Decision::NotApplied => Decision::NotApplied,
            },
            method: self.method,
            confidence: self.confidence,
            reasons: self.reasons.clone(),
            input_dimensions: self.input_dimensions,
            output_dimensions: self.output_dimensions,
            details: self.details.clone(),
        }
    }
}

/// The two halves of a split spread.
#[derive(Debug, Clone)]
pub struct SplitPages {
    pub left: DynamicImage,
    pub right: DynamicImage,
}
