//! Black scanner-border removal.

use crate::error::PrepError;
use crate::preprocessing::toolkit::{analysis_gray, mean_std};
use crate::preprocessing::types::{
    ensure_non_empty, Dimensions, NormRect, Reason, Rect, StageResult, TrimPx,
    DEFAULT_MIN_CONFIDENCE,
};
use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};

pub const METHOD: &str = "edge_black_band_profile_v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BorderOptions {
    /// Strip mean must be below this to count as black.
    pub black_threshold: f64,
    /// Strip variance must be below this to count as a uniform band.
    pub variance_threshold: f64,
    /// Bands thinner than this (original pixels) are ignored.
    pub min_band_px: u32,
    pub analysis_max_width: u32,
    pub scan_depth_frac: f64,
    pub max_scan_depth_px: u32,
    /// At or above this confidence each side may trim up to `high_conf_max_side_frac`.
    pub high_confidence: f64,
    pub high_conf_max_side_frac: f64,
    /// Below `high_confidence`, total trim per axis is capped at this fraction.
    pub max_axis_trim_frac: f64,
    pub min_output_px: u32,
    pub min_confidence: f64,
}

impl Default for BorderOptions {
    fn default() -> Self {
        Self {
            black_threshold: 40.0,
            variance_threshold: 600.0,
            min_band_px: 12,
            analysis_max_width: 800,
            scan_depth_frac: 0.18,
            max_scan_depth_px: 200,
            high_confidence: 0.85,
            high_conf_max_side_frac: 0.20,
            max_axis_trim_frac: 0.08,
            min_output_px: 64,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BorderDetails {
    pub trim_px: TrimPx,
    pub crop_box_px: Option<Rect>,
    pub crop_box_norm: Option<NormRect>,
    pub scan_depth_px: u32,
    pub black_threshold: f64,
    pub variance_threshold: f64,
    pub min_band_px: u32,
}

pub type BorderResult = StageResult<DynamicImage, BorderDetails>;

/// Detect uniform black bands along each edge and crop them off.
pub fn apply(image: &DynamicImage, options: &BorderOptions) -> Result<BorderResult, PrepError> {
    let dims = ensure_non_empty(image)?;
    let analysis = analysis_gray(image, options.analysis_max_width);

    let scan_depth = ((options.scan_depth_frac * dims.min_side() as f64).round() as u32)
        .min(options.max_scan_depth_px);
    let analysis_depth = ((scan_depth as f64 / analysis.scale).round() as u32).max(1);

    let bands = scan_bands(&analysis.gray, analysis_depth, options);
    let to_original = |band: u32| -> u32 {
        let px = analysis.to_original(band as f64).round() as u32;
        if px < options.min_band_px {
            0
        } else {
            px
        }
    };
    let mut trim = TrimPx {
        left: to_original(bands.left),
        right: to_original(bands.right),
        top: to_original(bands.top),
        bottom: to_original(bands.bottom),
    };

    let mut details = BorderDetails {
        trim_px: trim,
        crop_box_px: None,
        crop_box_norm: None,
        scan_depth_px: scan_depth,
        black_threshold: options.black_threshold,
        variance_threshold: options.variance_threshold,
        min_band_px: options.min_band_px,
    };

    if trim.is_empty() {
        tracing::debug!(scan_depth, "no black border bands found");
        return Ok(StageResult::reject(METHOD, dims, 1.0, vec![Reason::NoBorder], details));
    }

    let confidence = band_confidence(&trim, dims);
    if confidence < options.min_confidence {
        return Ok(StageResult::reject(
            METHOD,
            dims,
            confidence,
            vec![Reason::BorderUncertain],
            details,
        ));
    }

    clamp_trim(&mut trim, dims, confidence, options);
    details.trim_px = trim;

    let crop_w = dims.width.saturating_sub(trim.left + trim.right);
    let crop_h = dims.height.saturating_sub(trim.top + trim.bottom);
    if crop_w < options.min_output_px || crop_h < options.min_output_px {
        tracing::debug!(crop_w, crop_h, "border crop would fall below the size floor");
        return Ok(StageResult::reject(
            METHOD,
            dims,
            confidence,
            vec![Reason::BorderUncertain],
            details,
        ));
    }

    let crop = Rect::new(trim.left, trim.top, crop_w, crop_h);
    details.crop_box_px = Some(crop);
    details.crop_box_norm = Some(crop.normalized(dims));

    let output = image.crop_imm(crop.x, crop.y, crop.w, crop.h);
    tracing::info!(
        left = trim.left,
        right = trim.right,
        top = trim.top,
        bottom = trim.bottom,
        confidence,
        "trimmed black border"
    );

    Ok(StageResult::accept(
        METHOD,
        output,
        dims,
        Dimensions::new(crop_w, crop_h),
        confidence,
        vec![Reason::BorderBlack],
        details,
    ))
}

/// Band thickness per edge in analysis pixels.
fn scan_bands(gray: &GrayImage, depth: u32, options: &BorderOptions) -> TrimPx {
    let (w, h) = gray.dimensions();
    let column_black = |x: u32| strip_is_black((0..h).map(|y| gray.get_pixel(x, y).0[0]), options);
    let row_black = |y: u32| strip_is_black((0..w).map(|x| gray.get_pixel(x, y).0[0]), options);

    TrimPx {
        left: leading_run(depth.min(w), column_black),
        right: leading_run(depth.min(w), |i| column_black(w - 1 - i)),
        top: leading_run(depth.min(h), row_black),
        bottom: leading_run(depth.min(h), |i| row_black(h - 1 - i)),
    }
}

fn strip_is_black(values: impl Iterator<Item = u8>, options: &BorderOptions) -> bool {
    let (mean, std) = mean_std(values.map(f64::from));
    mean < options.black_threshold && std * std < options.variance_threshold
}

/// Count of consecutive strips from the edge that pass `probe`.
fn leading_run(limit: u32, mut probe: impl FnMut(u32) -> bool) -> u32 {
    (0..limit).take_while(|&i| probe(i)).count() as u32
}

/// Thicker bands and more corroborating edges raise confidence.
fn band_confidence(trim: &TrimPx, dims: Dimensions) -> f64 {
    let (w, h) = (dims.width as f64, dims.height as f64);
    let best_ratio = [
        trim.left as f64 / w,
        trim.right as f64 / w,
        trim.top as f64 / h,
        trim.bottom as f64 / h,
    ]
    .into_iter()
    .fold(0.0, f64::max);

    let base: f64 = if best_ratio >= 0.015 {
        0.90
    } else if best_ratio >= 0.005 {
        0.75
    } else {
        0.50
    };

    let bonus = match trim.edge_count() {
        n if n >= 3 => 0.10,
        2 => 0.05,
        _ => 0.0,
    };

    (base + bonus).min(1.0)
}

fn clamp_trim(trim: &mut TrimPx, dims: Dimensions, confidence: f64, options: &BorderOptions) {
    if confidence >= options.high_confidence {
        let max_x = (dims.width as f64 * options.high_conf_max_side_frac).floor() as u32;
        let max_y = (dims.height as f64 * options.high_conf_max_side_frac).floor() as u32;
        trim.left = trim.left.min(max_x);
        trim.right = trim.right.min(max_x);
        trim.top = trim.top.min(max_y);
        trim.bottom = trim.bottom.min(max_y);
        return;
    }

    let max_x = (dims.width as f64 * options.max_axis_trim_frac).floor() as u32;
    let max_y = (dims.height as f64 * options.max_axis_trim_frac).floor() as u32;
    scale_pair(&mut trim.left, &mut trim.right, max_x);
    scale_pair(&mut trim.top, &mut trim.bottom, max_y);
}

/// Shrink both sides proportionally so their sum fits within `max_total`.
fn scale_pair(a: &mut u32, b: &mut u32, max_total: u32) {
    let total = *a + *b;
    if total <= max_total || total == 0 {
        return;
    }
    let ratio = max_total as f64 / total as f64;
    *a = (*a as f64 * ratio).floor() as u32;
    *b = (*b as f64 * ratio).floor() as u32;
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn page_with_bands(w: u32, h: u32, left: u32, top: u32) -> DynamicImage {
        let img = GrayImage::from_fn(w, h, |x, y| {
            if x < left || y < top {
                Luma([5])
            } else {
                Luma([220])
            }
        });
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn test_border_trims_left_and_top_bands() {
        let image = page_with_bands(1000, 800, 40, 30);
        let result = apply(&image, &BorderOptions::default()).unwrap();

        assert!(result.is_applied());
        assert_eq!(result.reasons, vec![Reason::BorderBlack]);
        assert!((result.confidence - 0.95).abs() < 1e-9);

        let trim = result.details.trim_px;
        assert!((38..=42).contains(&trim.left), "left trim {}", trim.left);
        assert!((28..=32).contains(&trim.top), "top trim {}", trim.top);
        assert_eq!(trim.right, 0);
        assert_eq!(trim.bottom, 0);

        let output = result.output().unwrap();
        assert_eq!(output.width(), 1000 - trim.left);
        assert_eq!(output.height(), 800 - trim.top);
    }

    /// Square page with a black frame of `band` pixels on every side.
    fn framed_page(size: u32, band: u32) -> DynamicImage {
        let img = GrayImage::from_fn(size, size, |x, y| {
            let inside = x >= band && y >= band && x < size - band && y < size - band;
            if inside {
                Luma([220])
            } else {
                Luma([5])
            }
        });
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn test_crop_down_to_the_size_floor() {
        let result = apply(&framed_page(100, 18), &BorderOptions::default()).unwrap();

        assert!(result.is_applied(), "reasons: {:?}", result.reasons);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.output_dimensions, Dimensions::new(64, 64));
        let output = result.output().unwrap();
        assert_eq!((output.width(), output.height()), (64, 64));
    }

    #[test]
    fn test_crop_below_the_size_floor_is_refused() {
        // 16px trims on a 90px page leave 58px
        let result = apply(&framed_page(90, 16), &BorderOptions::default()).unwrap();

        assert!(!result.is_applied());
        assert_eq!(result.reasons, vec![Reason::BorderUncertain]);
        assert_eq!(result.details.trim_px.left, 16);
        assert!(result.details.crop_box_px.is_none());
        assert_eq!(result.output_dimensions, Dimensions::new(90, 90));
    }

    #[test]
    fn test_clean_page_reports_no_border() {
        let image = page_with_bands(600, 400, 0, 0);
        let result = apply(&image, &BorderOptions::default()).unwrap();
        assert!(!result.is_applied());
        assert_eq!(result.reasons, vec![Reason::NoBorder]);
        assert_eq!(result.output_dimensions, Dimensions::new(600, 400));
    }

    #[test]
    fn test_thin_band_is_discarded() {
        let image = page_with_bands(600, 400, 6, 0);
        let result = apply(&image, &BorderOptions::default()).unwrap();
        assert!(result.has_reason(&Reason::NoBorder));
    }

    #[test]
    fn test_textured_dark_edge_is_not_a_band() {
        // dark but noisy: variance far above the band threshold
        let img = GrayImage::from_fn(400, 300, |x, y| {
            if x < 30 {
                Luma([if (x + y) % 2 == 0 { 0 } else { 70 }])
            } else {
                Luma([220])
            }
        });
        let result = apply(&DynamicImage::ImageLuma8(img), &BorderOptions::default()).unwrap();
        assert!(!result.is_applied());
    }

    #[test]
    fn test_low_confidence_clamps_axis_total() {
        let mut trim = TrimPx {
            left: 60,
            right: 40,
            top: 0,
            bottom: 0,
        };
        clamp_trim(&mut trim, Dimensions::new(500, 500), 0.75, &BorderOptions::default());
        assert_eq!(trim.left + trim.right, 40);
        assert_eq!(trim.left, 24);
        assert_eq!(trim.right, 16);
    }

    #[test]
    fn test_band_confidence_ladder() {
        let dims = Dimensions::new(1000, 1000);
        let single = TrimPx {
            left: 20,
            ..Default::default()
        };
        assert_eq!(band_confidence(&single, dims), 0.90);

        let thin = TrimPx {
            left: 8,
            ..Default::default()
        };
        assert_eq!(band_confidence(&thin, dims), 0.75);

        let three = TrimPx {
            left: 20,
            right: 20,
            top: 20,
            bottom: 0,
        };
        assert_eq!(band_confidence(&three, dims), 1.0);
    }

    #[test]
    fn test_empty_image_is_an_error() {
        let image = DynamicImage::new_luma8(0, 0);
        assert!(apply(&image, &BorderOptions::default()).is_err());
    }
}
