//! Region-of-interest crop around the ruled ledger grid.

use crate::error::PrepError;
use crate::preprocessing::toolkit::edges::{column_votes, horizontal_edges, row_votes, vertical_edges};
use crate::preprocessing::toolkit::hough::projection_peaks;
use crate::preprocessing::toolkit::threshold::below_level;
use crate::preprocessing::toolkit::{analysis_gray, AnalysisImage};
use crate::preprocessing::types::{
    ensure_non_empty, Dimensions, NormRect, Reason, Rect, StageResult, DEFAULT_MIN_CONFIDENCE,
};
use image::DynamicImage;
use serde::{Deserialize, Serialize};

pub const METHOD: &str = "hough_grid_roi_v1";
pub const FALLBACK_METHOD: &str = "ink_density_roi_v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoiOptions {
    pub analysis_max_width: u32,
    pub edge_threshold: i32,
    /// Row/column vote floor as a fraction of the analysis dimension.
    pub min_votes_frac: f64,
    pub min_votes_floor: u32,
    pub peak_radius: usize,
    pub min_lines_per_axis: usize,
    /// Detected box must span at least this fraction of each dimension.
    pub min_coverage: f64,
    /// Line count at which the line score saturates.
    pub line_count_target: usize,
    pub tile_size: u32,
    pub ink_density: f64,
    pub binarize_level: u8,
    pub min_tiles_per_axis: u32,
    pub fallback_max_confidence: f64,
    pub pad_frac: f64,
    pub max_crop_frac: f64,
    pub high_conf_max_crop_frac: f64,
    pub high_confidence: f64,
    pub min_output_px: u32,
    pub min_confidence: f64,
}

impl Default for RoiOptions {
    fn default() -> Self {
        Self {
            analysis_max_width: 600,
            edge_threshold: 60,
            min_votes_frac: 0.15,
            min_votes_floor: 10,
            peak_radius: 2,
            min_lines_per_axis: 2,
            min_coverage: 0.30,
            line_count_target: 12,
            tile_size: 20,
            ink_density: 0.08,
            binarize_level: 128,
            min_tiles_per_axis: 3,
            fallback_max_confidence: 0.85,
            pad_frac: 0.02,
            max_crop_frac: 0.15,
            high_conf_max_crop_frac: 0.25,
            high_confidence: 0.90,
            min_output_px: 256,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RoiDetails {
    pub horizontal_lines: usize,
    pub vertical_lines: usize,
    /// Fill ratio of dense tiles inside the fallback box.
    pub fill_ratio: Option<f64>,
    pub detected_box_px: Option<Rect>,
    pub crop_box_px: Option<Rect>,
    pub crop_box_norm: Option<NormRect>,
    pub max_crop_frac: f64,
}

pub type RoiResult = StageResult<DynamicImage, RoiDetails>;

/// A detection in analysis space.
struct Candidate {
    method: &'static str,
    bounds: Rect,
    confidence: f64,
    fallback: bool,
}

/// Crop to the ruled grid, or to the dense-ink area when no grid is found.
pub fn apply(image: &DynamicImage, options: &RoiOptions) -> Result<RoiResult, PrepError> {
    let dims = ensure_non_empty(image)?;
    let analysis = analysis_gray(image, options.analysis_max_width);
    let mut details = RoiDetails::default();

    let candidate = match detect_grid(&analysis, options, &mut details) {
        Some(grid) => Some(grid),
        None => detect_ink_block(&analysis, options, &mut details),
    };

    let Some(candidate) = candidate else {
        tracing::debug!("no grid or dense ink block found");
        return Ok(StageResult::reject(METHOD, dims, 0.0, vec![Reason::NoGridFound], details));
    };

    if candidate.confidence < options.min_confidence {
        return Ok(StageResult::reject(
            candidate.method,
            dims,
            candidate.confidence,
            vec![Reason::RoiUncertain],
            details,
        ));
    }

    let detected = scale_to_original(candidate.bounds, &analysis, dims);
    details.detected_box_px = Some(detected);

    let pad_x = (dims.width as f64 * options.pad_frac).round() as u32;
    let pad_y = (dims.height as f64 * options.pad_frac).round() as u32;
    let padded = pad_rect(detected, pad_x, pad_y, dims);

    let max_crop_frac = if candidate.confidence >= options.high_confidence {
        options.high_conf_max_crop_frac
    } else {
        options.max_crop_frac
    };
    details.max_crop_frac = max_crop_frac;
    let crop = limit_shrink(padded, dims, max_crop_frac);

    if crop.w < options.min_output_px || crop.h < options.min_output_px {
        tracing::debug!(w = crop.w, h = crop.h, "roi crop would fall below the size floor");
        return Ok(StageResult::reject(
            candidate.method,
            dims,
            candidate.confidence,
            vec![Reason::RoiUncertain],
            details,
        ));
    }

    details.crop_box_px = Some(crop);
    details.crop_box_norm = Some(crop.normalized(dims));
    let mut reasons = Vec::new();
    if candidate.fallback {
        reasons.push(Reason::FallbackUsed);
    }
    reasons.push(Reason::RoiApplied);

    tracing::info!(
        method = candidate.method,
        x = crop.x,
        y = crop.y,
        w = crop.w,
        h = crop.h,
        confidence = candidate.confidence,
        "cropped to region of interest"
    );

    let output = image.crop_imm(crop.x, crop.y, crop.w, crop.h);
    Ok(StageResult::accept(
        candidate.method,
        output,
        dims,
        Dimensions::new(crop.w, crop.h),
        candidate.confidence,
        reasons,
        details,
    ))
}

/// Outermost horizontal and vertical ruling lines from edge projections.
fn detect_grid(
    analysis: &AnalysisImage,
    options: &RoiOptions,
    details: &mut RoiDetails,
) -> Option<Candidate> {
    let (aw, ah) = analysis.gray.dimensions();

    let rows = row_votes(&horizontal_edges(&analysis.gray, options.edge_threshold));
    let cols = column_votes(&vertical_edges(&analysis.gray, options.edge_threshold));

    let min_h = ((aw as f64 * options.min_votes_frac).round() as u32).max(options.min_votes_floor);
    let min_v = ((ah as f64 * options.min_votes_frac).round() as u32).max(options.min_votes_floor);
    let h_lines = projection_peaks(&rows, min_h, options.peak_radius);
    let v_lines = projection_peaks(&cols, min_v, options.peak_radius);
    details.horizontal_lines = h_lines.len();
    details.vertical_lines = v_lines.len();

    tracing::debug!(
        horizontal = h_lines.len(),
        vertical = v_lines.len(),
        "grid line candidates"
    );

    if h_lines.len() < options.min_lines_per_axis || v_lines.len() < options.min_lines_per_axis {
        return None;
    }

    let (top, bottom) = (h_lines[0] as u32, h_lines[h_lines.len() - 1] as u32);
    let (left, right) = (v_lines[0] as u32, v_lines[v_lines.len() - 1] as u32);
    let bounds = Rect::new(left, top, right - left + 1, bottom - top + 1);

    let cover_x = bounds.w as f64 / aw as f64;
    let cover_y = bounds.h as f64 / ah as f64;
    if cover_x < options.min_coverage || cover_y < options.min_coverage {
        return None;
    }

    let line_score = ((h_lines.len() + v_lines.len()) as f64
        / options.line_count_target.max(1) as f64)
        .min(1.0);
    let confidence = 0.5 * line_score + 0.5 * cover_x.min(cover_y).min(1.0);

    Some(Candidate {
        method: METHOD,
        bounds,
        confidence,
        fallback: false,
    })
}

/// Bounding box of tiles whose ink density clears the threshold.
fn detect_ink_block(
    analysis: &AnalysisImage,
    options: &RoiOptions,
    details: &mut RoiDetails,
) -> Option<Candidate> {
    let (aw, ah) = analysis.gray.dimensions();
    let tile = options.tile_size.max(1);
    let (tiles_x, tiles_y) = (aw / tile, ah / tile);
    if tiles_x < options.min_tiles_per_axis || tiles_y < options.min_tiles_per_axis {
        return None;
    }

    let ink = below_level(&analysis.gray, options.binarize_level);
    let tile_area = (tile * tile) as f64;
    let mut dense = vec![false; (tiles_x * tiles_y) as usize];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let count = ink.count_in(tx * tile, ty * tile, (tx + 1) * tile, (ty + 1) * tile);
            dense[(ty * tiles_x + tx) as usize] = count as f64 / tile_area >= options.ink_density;
        }
    }

    let mut extent: Option<(u32, u32, u32, u32)> = None;
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            if !dense[(ty * tiles_x + tx) as usize] {
                continue;
            }
            extent = Some(match extent {
                None => (tx, ty, tx, ty),
                Some((x0, y0, x1, y1)) => (x0.min(tx), y0.min(ty), x1.max(tx), y1.max(ty)),
            });
        }
    }
    let (x0, y0, x1, y1) = extent?;

    let bounds = Rect::new(
        x0 * tile,
        y0 * tile,
        (x1 - x0 + 1) * tile,
        (y1 - y0 + 1) * tile,
    );
    if (bounds.w as f64 / aw as f64) < options.min_coverage
        || (bounds.h as f64 / ah as f64) < options.min_coverage
    {
        return None;
    }

    let mut dense_in_box = 0usize;
    for ty in y0..=y1 {
        for tx in x0..=x1 {
            if dense[(ty * tiles_x + tx) as usize] {
                dense_in_box += 1;
            }
        }
    }
    let box_tiles = ((x1 - x0 + 1) * (y1 - y0 + 1)) as f64;
    let fill = dense_in_box as f64 / box_tiles;
    details.fill_ratio = Some(fill);

    Some(Candidate {
        method: FALLBACK_METHOD,
        bounds,
        confidence: (fill * 0.7 + 0.15).min(options.fallback_max_confidence),
        fallback: true,
    })
}

fn scale_to_original(bounds: Rect, analysis: &AnalysisImage, dims: Dimensions) -> Rect {
    let x0 = (analysis.to_original(bounds.x as f64).round() as u32).min(dims.width - 1);
    let y0 = (analysis.to_original(bounds.y as f64).round() as u32).min(dims.height - 1);
    let x1 = (analysis.to_original(bounds.right() as f64).round() as u32).min(dims.width);
    let y1 = (analysis.to_original(bounds.bottom() as f64).round() as u32).min(dims.height);
    Rect::new(x0, y0, (x1 - x0).max(1), (y1 - y0).max(1))
}

fn pad_rect(rect: Rect, pad_x: u32, pad_y: u32, dims: Dimensions) -> Rect {
    let x0 = rect.x.saturating_sub(pad_x);
    let y0 = rect.y.saturating_sub(pad_y);
    let x1 = (rect.right() + pad_x).min(dims.width);
    let y1 = (rect.bottom() + pad_y).min(dims.height);
    Rect::new(x0, y0, x1 - x0, y1 - y0)
}

/// Grow the crop back out, split around its position, so that no axis
/// loses more than `max_frac` of the page.
fn limit_shrink(rect: Rect, dims: Dimensions, max_frac: f64) -> Rect {
    let (x, w) = expand_axis(rect.x, rect.w, dims.width, max_frac);
    let (y, h) = expand_axis(rect.y, rect.h, dims.height, max_frac);
    Rect::new(x, y, w, h)
}

fn expand_axis(start: u32, len: u32, total: u32, max_frac: f64) -> (u32, u32) {
    let min_len = (total as f64 * (1.0 - max_frac)).round() as u32;
    if len >= min_len {
        return (start, len);
    }
    let deficit = min_len - len;
    let start = (start - start.min(deficit / 2)).min(total - min_len);
    (start, min_len)
}
