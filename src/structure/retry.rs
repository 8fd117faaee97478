//! Structure score and retry strategy selection.

use crate::error::PrepError;
use crate::preprocessing::toolkit::threshold::{adaptive_ink, mask_to_ink_image};
use crate::preprocessing::types::{ensure_non_empty, round_to, Reason, Rect};
use crate::structure::signals::{extract_signals, RecordCandidates, StructureSignals, TableExtraction};
use image::DynamicImage;
use serde::{Deserialize, Serialize};

pub const METHOD: &str = "structure_gate_retry_v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StructureOptions {
    /// Scores at or above this keep the extraction as is.
    pub retry_threshold: f64,
    /// Alternate language hints were already spent on this page.
    pub alt_hints_already_used: bool,
    pub binarized_input_available: bool,
    /// Share of the region height removed by `DROP_HEADER_STRIP`.
    pub header_strip_frac: f64,
    pub binarize_block_size: u32,
    pub binarize_offset: f64,
}

impl Default for StructureOptions {
    fn default() -> Self {
        Self {
            retry_threshold: 0.65,
            alt_hints_already_used: false,
            binarized_input_available: false,
            header_strip_frac: 0.12,
            binarize_block_size: 31,
            binarize_offset: 15.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructureAssessment {
    pub structure_score: f64,
    pub reasons: Vec<Reason>,
    pub signals: StructureSignals,
}

impl StructureAssessment {
    pub fn has_reason(&self, reason: &Reason) -> bool {
        self.reasons.contains(reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryStrategy {
    AltHints,
    BinarizedInput,
    DropHeaderStrip,
    None,
}

/// Why a strategy was chosen, with the figures that drove the choice.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RetryDetails {
    ScoreAboveThreshold {
        score: f64,
        threshold: f64,
    },
    HeaderDominantOrEmptyCells {
        header_strip_frac: f64,
        header_dominance_ratio: f64,
        cell_fill_rate: f64,
    },
    LowTokenDensityBinarizedAvailable {
        token_density: f64,
    },
    LowQualityAltHintsAvailable {
        score: f64,
    },
    AltHintsExhaustedBinarizedFallback {
        score: f64,
    },
    NoViableStrategy {
        score: f64,
        alt_hints_already_used: bool,
        binarized_input_available: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub strategy: RetryStrategy,
    pub details: RetryDetails,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    Initial,
    Retry,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetryPlan {
    pub method: &'static str,
    pub initial: StructureAssessment,
    pub retry: RetryDecision,
    pub winner: Winner,
    #[serde(rename = "final")]
    pub final_assessment: StructureAssessment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_assessment: Option<StructureAssessment>,
}

impl RetryPlan {
    /// Fold in the score of the retried extraction. The retry wins only
    /// with a strictly higher score.
    pub fn resolve(mut self, retry_assessment: StructureAssessment) -> Self {
        if retry_assessment.structure_score > self.initial.structure_score {
            self.winner = Winner::Retry;
            self.final_assessment = retry_assessment.clone();
        } else {
            self.winner = Winner::Initial;
            self.final_assessment = self.initial.clone();
        }
        tracing::info!(
            initial = self.initial.structure_score,
            retry = retry_assessment.structure_score,
            winner = ?self.winner,
            "resolved structure retry"
        );
        self.retry_assessment = Some(retry_assessment);
        self
    }
}

/// Weighted sanity score in [0, 1], rounded to three decimals.
pub fn compute_structure_score(signals: StructureSignals) -> StructureAssessment {
    let mut score = 0.0;
    let mut reasons = Vec::new();

    if signals.data_row_count >= 1 {
        score += 0.25;
    } else {
        reasons.push(Reason::NoDataRows);
    }

    if signals.cell_fill_rate >= 0.30 {
        score += 0.25;
    } else if signals.cell_fill_rate >= 0.15 {
        score += 0.12;
        reasons.push(Reason::LowCellFill);
    } else {
        reasons.push(Reason::VeryLowCellFill);
    }

    if signals.token_density >= 10.0 {
        score += 0.20;
    } else if signals.token_density >= 3.0 {
        score += 0.10;
        reasons.push(Reason::LowTokenDensity);
    } else {
        reasons.push(Reason::VeryLowTokenDensity);
    }

    if signals.header_dominance_ratio < 0.50 {
        score += 0.15;
    } else {
        reasons.push(Reason::HeaderDominant);
    }

    if !signals.expects_dates() {
        score += 0.15;
    } else if signals.date_field_rate > 0.0 {
        score += 0.15 * signals.date_field_rate.min(1.0);
    } else {
        reasons.push(Reason::NoValidDates);
    }

    if reasons.is_empty() {
        reasons.push(Reason::StructureOk);
    }

    StructureAssessment {
        structure_score: round_to(score, 3),
        reasons,
        signals,
    }
}

/// Pick the next retry strategy, degrading to `NONE` once every
/// alternative has been spent.
pub fn select_retry_strategy(
    assessment: &StructureAssessment,
    options: &StructureOptions,
) -> RetryDecision {
    let score = assessment.structure_score;
    let signals = &assessment.signals;
    let retry = |strategy, details| RetryDecision {
        should_retry: true,
        strategy,
        details,
    };

    if score >= options.retry_threshold {
        return RetryDecision {
            should_retry: false,
            strategy: RetryStrategy::None,
            details: RetryDetails::ScoreAboveThreshold {
                score,
                threshold: options.retry_threshold,
            },
        };
    }

    if assessment.has_reason(&Reason::HeaderDominant)
        || (assessment.has_reason(&Reason::VeryLowCellFill) && signals.data_row_count <= 1)
    {
        return retry(
            RetryStrategy::DropHeaderStrip,
            RetryDetails::HeaderDominantOrEmptyCells {
                header_strip_frac: options.header_strip_frac,
                header_dominance_ratio: signals.header_dominance_ratio,
                cell_fill_rate: signals.cell_fill_rate,
            },
        );
    }

    let starved = assessment.has_reason(&Reason::VeryLowTokenDensity)
        || assessment.has_reason(&Reason::NoDataRows);
    if starved && options.binarized_input_available {
        return retry(
            RetryStrategy::BinarizedInput,
            RetryDetails::LowTokenDensityBinarizedAvailable {
                token_density: signals.token_density,
            },
        );
    }

    if !options.alt_hints_already_used {
        return retry(
            RetryStrategy::AltHints,
            RetryDetails::LowQualityAltHintsAvailable { score },
        );
    }

    if options.binarized_input_available {
        return retry(
            RetryStrategy::BinarizedInput,
            RetryDetails::AltHintsExhaustedBinarizedFallback { score },
        );
    }

    tracing::debug!(score, "no retry strategy left");
    RetryDecision {
        should_retry: false,
        strategy: RetryStrategy::None,
        details: RetryDetails::NoViableStrategy {
            score,
            alt_hints_already_used: options.alt_hints_already_used,
            binarized_input_available: options.binarized_input_available,
        },
    }
}

/// Score an extraction and choose a retry. The plan starts with the
/// initial extraction as winner; call [`RetryPlan::resolve`] once the
/// retry has been scored.
pub fn build_retry_plan(
    table: Option<&TableExtraction>,
    candidates: Option<&RecordCandidates>,
    options: &StructureOptions,
) -> RetryPlan {
    let initial = compute_structure_score(extract_signals(table, candidates));
    let retry = select_retry_strategy(&initial, options);
    tracing::debug!(
        score = initial.structure_score,
        strategy = ?retry.strategy,
        "structure gate"
    );
    RetryPlan {
        method: METHOD,
        final_assessment: initial.clone(),
        initial,
        retry,
        winner: Winner::Initial,
        retry_assessment: None,
    }
}

/// Region with the top `frac` of its height removed, for `DROP_HEADER_STRIP`.
pub fn header_strip_box(region: Rect, frac: f64) -> Rect {
    let strip = ((region.h as f64 * frac.clamp(0.0, 1.0)).round() as u32).min(region.h.saturating_sub(1));
    Rect::new(region.x, region.y + strip, region.w, region.h - strip)
}

/// Ink-on-white binarized copy of a page, for `BINARIZED_INPUT`.
pub fn binarized_variant(
    image: &DynamicImage,
    options: &StructureOptions,
) -> Result<DynamicImage, PrepError> {
    ensure_non_empty(image)?;
    let ink = adaptive_ink(
        &image.to_luma8(),
        options.binarize_block_size,
        options.binarize_offset,
    );
    Ok(DynamicImage::ImageLuma8(mask_to_ink_image(&ink)))
}
