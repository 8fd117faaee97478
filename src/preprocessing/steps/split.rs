//! Two-page spread splitting at the bright central gutter.

use crate::error::PrepError;
use crate::preprocessing::toolkit::analysis_gray;
use crate::preprocessing::types::{
    ensure_non_empty, Dimensions, Reason, Rect, SplitPages, StageResult, DEFAULT_MIN_CONFIDENCE,
};
use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};

pub const METHOD: &str = "vertical_density_seam_v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitOptions {
    /// Only landscape images at least this wide relative to height are considered.
    pub min_aspect: f64,
    pub analysis_max_width: u32,
    pub smooth_radius: usize,
    pub search_start_frac: f64,
    pub search_end_frac: f64,
    pub min_valley_depth: f64,
    pub high_confidence: f64,
    /// Below `high_confidence`, each half keeps at least this share of the width.
    pub min_half_frac: f64,
    pub min_page_px: u32,
    pub min_confidence: f64,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            min_aspect: 1.2,
            analysis_max_width: 800,
            smooth_radius: 5,
            search_start_frac: 0.4,
            search_end_frac: 0.6,
            min_valley_depth: 30.0,
            high_confidence: 0.90,
            min_half_frac: 0.4,
            min_page_px: 512,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SplitDetails {
    pub valley_depth: f64,
    pub split_x_px: Option<u32>,
    pub split_x_norm: Option<f64>,
    pub left_box: Option<Rect>,
    pub right_box: Option<Rect>,
    pub min_valley_depth: f64,
}

pub type SplitResult = StageResult<SplitPages, SplitDetails>;

/// Find the gutter of a book spread and cut the image into two pages.
pub fn apply(image: &DynamicImage, options: &SplitOptions) -> Result<SplitResult, PrepError> {
    let dims = ensure_non_empty(image)?;
    let mut details = SplitDetails {
        min_valley_depth: options.min_valley_depth,
        ..Default::default()
    };

    if (dims.width as f64) < options.min_aspect * dims.height as f64 {
        return Ok(StageResult::reject(METHOD, dims, 0.0, vec![Reason::NoSeamFound], details));
    }

    let analysis = analysis_gray(image, options.analysis_max_width);
    let profile = smooth(&column_means(&analysis.gray), options.smooth_radius);
    let aw = profile.len();

    let lo = ((aw as f64 * options.search_start_frac).round() as usize).min(aw - 1);
    let hi = ((aw as f64 * options.search_end_frac).round() as usize).min(aw - 1);
    let mut gutter = lo;
    for x in lo..=hi {
        if profile[x] > profile[gutter] {
            gutter = x;
        }
    }

    let outside: Vec<f64> = profile
        .iter()
        .enumerate()
        .filter(|(x, _)| *x < lo || *x > hi)
        .map(|(_, &v)| v)
        .collect();
    if outside.is_empty() {
        return Ok(StageResult::reject(METHOD, dims, 0.0, vec![Reason::NoSeamFound], details));
    }
    let page_mean = outside.iter().sum::<f64>() / outside.len() as f64;
    let depth = profile[gutter] - page_mean;
    details.valley_depth = depth;

    tracing::debug!(gutter, depth, page_mean, "gutter candidate");

    if depth < options.min_valley_depth {
        return Ok(StageResult::reject(METHOD, dims, 0.0, vec![Reason::NoSeamFound], details));
    }

    let position = gutter as f64 / aw as f64;
    let confidence = seam_confidence(depth, position, options.min_valley_depth);
    if confidence < options.min_confidence {
        return Ok(StageResult::reject(
            METHOD,
            dims,
            confidence,
            vec![Reason::SplitUncertain],
            details,
        ));
    }

    let mut split_x = analysis.to_original(gutter as f64).round() as u32;
    if confidence < options.high_confidence {
        let min_half = (dims.width as f64 * options.min_half_frac).round() as u32;
        split_x = split_x.clamp(min_half, dims.width.saturating_sub(min_half).max(min_half));
    }
    split_x = split_x.min(dims.width);

    let left = Rect::new(0, 0, split_x, dims.height);
    let right = Rect::new(split_x, 0, dims.width - split_x, dims.height);
    details.split_x_px = Some(split_x);
    details.split_x_norm = Some(split_x as f64 / dims.width as f64);
    details.left_box = Some(left);
    details.right_box = Some(right);

    if left.w < options.min_page_px || right.w < options.min_page_px || dims.height < options.min_page_px
    {
        tracing::debug!(split_x, "split halves fall below the page size floor");
        return Ok(StageResult::reject(
            METHOD,
            dims,
            confidence,
            vec![Reason::SplitUncertain],
            details,
        ));
    }

    let pages = SplitPages {
        left: image.crop_imm(left.x, left.y, left.w, left.h),
        right: image.crop_imm(right.x, right.y, right.w, right.h),
    };
    tracing::info!(split_x, confidence, "split two-page spread");

    Ok(StageResult::accept(
        METHOD,
        pages,
        dims,
        // dimensions of the left page; the right page is in details
        Dimensions::new(left.w, left.h),
        confidence,
        vec![Reason::SplitApplied],
        details,
    ))
}

fn column_means(gray: &GrayImage) -> Vec<f64> {
    let (w, h) = gray.dimensions();
    let mut sums = vec![0u64; w as usize];
    for (x, _, p) in gray.enumerate_pixels() {
        sums[x as usize] += p.0[0] as u64;
    }
    sums.into_iter().map(|s| s as f64 / h as f64).collect()
}

/// Box filter with a clipped window of `radius` on each side.
fn smooth(values: &[f64], radius: usize) -> Vec<f64> {
    let n = values.len();
    let mut prefix = vec![0.0; n + 1];
    for (i, v) in values.iter().enumerate() {
        prefix[i + 1] = prefix[i] + v;
    }
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(radius);
            let hi = (i + radius + 1).min(n);
            (prefix[hi] - prefix[lo]) / (hi - lo) as f64
        })
        .collect()
}

/// Deeper valleys and a more central gutter raise confidence.
fn seam_confidence(depth: f64, position: f64, min_depth: f64) -> f64 {
    let depth_score = (0.5 + (depth - min_depth) * 0.5 / (2.0 * min_depth)).min(1.0);
    let center_score = (1.0 - (position - 0.5).abs() * 5.0).max(0.3);
    0.6 * depth_score + 0.4 * center_score
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Landscape spread: striped text blocks on both sides of a bright gutter.
    fn spread(w: u32, h: u32, gutter_w: u32) -> DynamicImage {
        let g0 = w / 2 - gutter_w / 2;
        let img = GrayImage::from_fn(w, h, |x, y| {
            if x >= g0 && x < g0 + gutter_w {
                Luma([250])
            } else if (y / 10) % 5 < 2 {
                Luma([30])
            } else {
                Luma([240])
            }
        });
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn test_spread_is_split_at_gutter() {
        let result = apply(&spread(1600, 1000, 40), &SplitOptions::default()).unwrap();

        assert!(result.is_applied(), "reasons: {:?}", result.reasons);
        assert_eq!(result.reasons, vec![Reason::SplitApplied]);
        let norm = result.details.split_x_norm.unwrap();
        assert!((0.4..=0.6).contains(&norm), "split at {}", norm);

        let pages = result.output().unwrap();
        assert_eq!(pages.left.height(), 1000);
        assert_eq!(pages.right.height(), 1000);
        assert_eq!(pages.left.width() + pages.right.width(), 1600);
    }

    #[test]
    fn test_portrait_page_is_not_split() {
        let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(800, 1000, Luma([240])));
        let result = apply(&image, &SplitOptions::default()).unwrap();
        assert_eq!(result.reasons, vec![Reason::NoSeamFound]);
        assert!(result.output().is_none());
    }

    #[test]
    fn test_uniform_landscape_has_no_seam() {
        let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(1600, 1000, Luma([200])));
        let result = apply(&image, &SplitOptions::default()).unwrap();
        assert_eq!(result.reasons, vec![Reason::NoSeamFound]);
    }

    #[test]
    fn test_short_spread_is_refused() {
        let result = apply(&spread(1200, 400, 30), &SplitOptions::default()).unwrap();
        assert!(!result.is_applied());
        assert_eq!(result.reasons, vec![Reason::SplitUncertain]);
    }

    #[test]
    fn test_seam_confidence() {
        assert_eq!(seam_confidence(90.0, 0.5, 30.0), 1.0);
        assert!((seam_confidence(30.0, 0.5, 30.0) - 0.7).abs() < 1e-9);
        assert!((seam_confidence(90.0, 0.2, 30.0) - 0.72).abs() < 1e-9);
    }
}
