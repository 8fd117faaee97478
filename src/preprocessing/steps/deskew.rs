use crate::error::PrepError;
use crate::preprocessing::toolkit::edges::horizontal_edges;
use crate::preprocessing::toolkit::hough::{near_horizontal_lines, HoughLine, HoughParams};
use crate::preprocessing::toolkit::analysis_gray;
use crate::preprocessing::types::{
    ensure_non_empty, Dimensions, Reason, StageResult, DEFAULT_MIN_CONFIDENCE,
};
use image::{imageops, DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use serde::{Deserialize, Serialize};

pub const METHOD: &str = "hough_line_deskew_v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeskewOptions {
    pub analysis_max_width: u32,
    /// Angles smaller than this are left alone.
    pub min_angle_deg: f64,
    /// Correction cap below `high_confidence`.
    pub max_angle_deg: f64,
    /// Correction cap at or above `high_confidence`.
    pub high_conf_max_angle_deg: f64,
    pub high_confidence: f64,
    pub edge_threshold: i32,
    pub search_range_deg: f64,
    pub angle_step_deg: f64,
    /// Minimum Hough votes as a fraction of input width.
    pub min_votes_frac: f64,
    pub min_votes_floor: u32,
    pub analysis_min_votes_floor: u32,
    pub top_lines: usize,
    pub min_confidence: f64,
}

impl Default for DeskewOptions {
    fn default() -> Self {
        Self {
            analysis_max_width: 600,
            min_angle_deg: 0.35,
            max_angle_deg: 7.0,
            high_conf_max_angle_deg: 15.0,
            high_confidence: 0.90,
            edge_threshold: 60,
            search_range_deg: 10.0,
            angle_step_deg: 0.25,
            min_votes_frac: 0.25,
            min_votes_floor: 20,
            analysis_min_votes_floor: 10,
            top_lines: 30,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeskewDetails {
    /// Detected skew; positive means lines fall to the right.
    pub angle_deg: f64,
    /// Rotation actually applied after clamping.
    pub correction_deg: f64,
    pub line_count: usize,
    pub angle_variance: f64,
    pub min_votes: u32,
    pub edge_threshold: i32,
}

pub type DeskewResult = StageResult<DynamicImage, DeskewDetails>;

/// Estimate page skew from near-horizontal lines and counter-rotate.
pub fn apply(image: &DynamicImage, options: &DeskewOptions) -> Result<DeskewResult, PrepError> {
    let dims = ensure_non_empty(image)?;
    let analysis = analysis_gray(image, options.analysis_max_width);

    let min_votes = ((dims.width as f64 * options.min_votes_frac).round() as u32)
        .max(options.min_votes_floor);
    let analysis_votes =
        ((min_votes as f64 / analysis.scale).round() as u32).max(options.analysis_min_votes_floor);

    let edges = horizontal_edges(&analysis.gray, options.edge_threshold);
    let params = HoughParams {
        max_angle_deg: options.search_range_deg,
        step_deg: options.angle_step_deg,
        min_votes: analysis_votes,
        nms_angle_bins: 1,
        nms_rho_bins: 5,
    };
    let mut lines = near_horizontal_lines(&edges, &params);
    lines.truncate(options.top_lines);

    let mut details = DeskewDetails {
        angle_deg: 0.0,
        correction_deg: 0.0,
        line_count: lines.len(),
        angle_variance: 0.0,
        min_votes,
        edge_threshold: options.edge_threshold,
    };

    if lines.is_empty() {
        tracing::debug!(min_votes = analysis_votes, "no lines above vote threshold");
        return Ok(StageResult::reject(METHOD, dims, 0.0, vec![Reason::NoLinesFound], details));
    }

    let (angle, variance) = weighted_angle(&lines);
    let confidence = skew_confidence(lines.len(), variance);
    details.angle_deg = angle;
    details.angle_variance = variance;

    tracing::debug!(angle, variance, lines = lines.len(), confidence, "skew estimate");

    if angle.abs() < options.min_angle_deg {
        return Ok(StageResult::reject(
            METHOD,
            dims,
            confidence,
            vec![Reason::DeskewSmallAngle],
            details,
        ));
    }
    if confidence < options.min_confidence {
        return Ok(StageResult::reject(
            METHOD,
            dims,
            confidence,
            vec![Reason::DeskewUncertain],
            details,
        ));
    }

    let limit = if confidence >= options.high_confidence {
        options.high_conf_max_angle_deg
    } else {
        options.max_angle_deg
    };
    let correction = angle.clamp(-limit, limit);
    details.correction_deg = correction;

    let output = rotate_with_white_fill(image, -correction);
    let out_dims = Dimensions::of(&output);
    tracing::info!(angle, correction, confidence, "deskewed page");

    Ok(StageResult::accept(
        METHOD,
        output,
        dims,
        out_dims,
        confidence,
        vec![Reason::DeskewApplied],
        details,
    ))
}

/// Vote-weighted mean angle and variance.
fn weighted_angle(lines: &[HoughLine]) -> (f64, f64) {
    let total: f64 = lines.iter().map(|l| l.votes as f64).sum();
    if total == 0.0 {
        return (0.0, 0.0);
    }
    let mean = lines
        .iter()
        .map(|l| l.angle_deg * l.votes as f64)
        .sum::<f64>()
        / total;
    let variance = lines
        .iter()
        .map(|l| l.votes as f64 * (l.angle_deg - mean).powi(2))
        .sum::<f64>()
        / total;
    (mean, variance)
}

/// More agreeing lines and a tighter angle spread raise confidence.
fn skew_confidence(line_count: usize, variance: f64) -> f64 {
    let line_score = (0.5 + (line_count.saturating_sub(1)) as f64 * 0.5 / 7.0).min(1.0);
    let variance_score = if variance < 0.3 {
        1.0
    } else if variance < 1.0 {
        1.0 - (variance - 0.3) * 0.3 / 0.7
    } else if variance < 3.0 {
        0.7 - (variance - 1.0) * 0.2
    } else {
        0.3
    };
    0.4 * line_score + 0.6 * variance_score
}

/// Rotate by `angle_deg` (positive is clockwise) onto a canvas large enough
/// to hold the whole page, filling exposed corners with white.
pub fn rotate_with_white_fill(image: &DynamicImage, angle_deg: f64) -> DynamicImage {
    let theta = angle_deg.to_radians();
    let (w, h) = (image.width() as f64, image.height() as f64);
    let (c, s) = (theta.cos().abs(), theta.sin().abs());
    let canvas_w = (w * c + h * s).ceil() as u32;
    let canvas_h = (w * s + h * c).ceil() as u32;
    let off_x = (canvas_w.saturating_sub(image.width()) / 2) as i64;
    let off_y = (canvas_h.saturating_sub(image.height()) / 2) as i64;

    if image.color().has_color() {
        let mut canvas = RgbImage::from_pixel(canvas_w, canvas_h, Rgb([255, 255, 255]));
        imageops::overlay(&mut canvas, &image.to_rgb8(), off_x, off_y);
        DynamicImage::ImageRgb8(rotate_about_center(
            &canvas,
            theta as f32,
            Interpolation::Bilinear,
            Rgb([255, 255, 255]),
        ))
    } else {
        let mut canvas = GrayImage::from_pixel(canvas_w, canvas_h, Luma([255]));
        imageops::overlay(&mut canvas, &image.to_luma8(), off_x, off_y);
        DynamicImage::ImageLuma8(rotate_about_center(
            &canvas,
            theta as f32,
            Interpolation::Bilinear,
            Luma([255]),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Ruled page with dark lines sloping by `angle_deg`.
    fn ruled_page(w: u32, h: u32, lines: u32, angle_deg: f64) -> DynamicImage {
        let slope = angle_deg.to_radians().tan();
        let spacing = (h - 200) / lines;
        let mut img = GrayImage::from_pixel(w, h, Luma([250]));
        for k in 0..lines {
            let y0 = 80.0 + (k * spacing) as f64;
            for x in 50..w - 50 {
                let yc = y0 + (x - 50) as f64 * slope;
                for t in 0..3 {
                    let y = (yc + t as f64).round() as u32;
                    if y < h {
                        img.put_pixel(x, y, Luma([20]));
                    }
                }
            }
        }
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn test_detects_and_corrects_positive_skew() {
        // evenly spaced rules line up into weak diagonals; keep them under the vote floor
        let options = DeskewOptions {
            min_votes_frac: 0.4,
            ..Default::default()
        };
        let image = ruled_page(1200, 900, 12, 2.0);
        let result = apply(&image, &options).unwrap();

        assert!(result.is_applied(), "reasons: {:?}", result.reasons);
        assert_eq!(result.reasons, vec![Reason::DeskewApplied]);
        assert!((result.details.angle_deg - 2.0).abs() < 0.3, "angle {}", result.details.angle_deg);
        assert!(result.confidence >= 0.9);

        // rotated canvas grows to fit the page
        let out = result.output().unwrap();
        assert!(out.width() >= 1200 && out.height() >= 900);

        let again = apply(out, &options).unwrap();
        assert!(again.details.angle_deg.abs() < result.details.angle_deg.abs());
    }

    #[test]
    fn test_straight_page_is_small_angle() {
        let image = ruled_page(1000, 800, 10, 0.0);
        let result = apply(&image, &DeskewOptions::default()).unwrap();
        assert!(!result.is_applied());
        assert_eq!(result.reasons, vec![Reason::DeskewSmallAngle]);
        assert_eq!(result.output_dimensions, Dimensions::new(1000, 800));
    }

    #[test]
    fn test_blank_page_has_no_lines() {
        let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(500, 400, Luma([240])));
        let result = apply(&image, &DeskewOptions::default()).unwrap();
        assert_eq!(result.reasons, vec![Reason::NoLinesFound]);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_skew_confidence_ramps() {
        assert_eq!(skew_confidence(8, 0.1), 1.0);
        assert!((skew_confidence(1, 0.1) - 0.8).abs() < 1e-9);
        assert!((skew_confidence(8, 5.0) - 0.58).abs() < 1e-9);
    }

    #[test]
    fn test_rotation_keeps_grayscale_and_white_corners() {
        let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(200, 100, Luma([0])));
        let rotated = rotate_with_white_fill(&image, 5.0);
        assert!(matches!(rotated, DynamicImage::ImageLuma8(_)));
        assert_eq!(rotated.to_luma8().get_pixel(0, 0).0[0], 255);
    }
}
