use crate::error::PrepError;
use crate::preprocessing::toolkit::components::speckle_stats;
use crate::preprocessing::toolkit::morphology::{grid_kernels, grid_mask};
use crate::preprocessing::toolkit::threshold::adaptive_ink;
use crate::preprocessing::toolkit::BinaryMask;
use crate::preprocessing::types::{
    clamp_unit, ensure_non_empty, Reason, StageResult, DEFAULT_MIN_CONFIDENCE,
};
use image::{DynamicImage, GrayImage};
use imageproc::filter::median_filter;
use serde::{Deserialize, Serialize};

pub const METHOD: &str = "grid_preserve_denoise_v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DenoiseOptions {
    /// Adaptive threshold block size.
    pub block_size: u32,
    /// Pixel must be this far below its local mean to count as ink.
    pub threshold_offset: f64,
    pub grid_kernel_frac: f64,
    pub min_grid_kernel: u32,
    /// Components up to this area are speckles.
    pub speckle_max_area: usize,
    pub min_speckles: usize,
    pub max_grid_drift: f64,
    pub max_content_drop: f64,
    pub min_speckle_reduction: f64,
    /// Reduction at which the speckle score saturates.
    pub speckle_target: f64,
    pub min_confidence: f64,
}

impl Default for DenoiseOptions {
    fn default() -> Self {
        Self {
            block_size: 31,
            threshold_offset: 15.0,
            grid_kernel_frac: 0.05,
            min_grid_kernel: 11,
            speckle_max_area: 25,
            min_speckles: 10,
            max_grid_drift: 0.05,
            max_content_drop: 0.10,
            min_speckle_reduction: 0.20,
            speckle_target: 0.5,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NoiseMetrics {
    pub speckle_count: usize,
    pub content_pixels: usize,
    pub grid_coverage: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DenoiseDetails {
    pub metrics_before: NoiseMetrics,
    pub metrics_after: Option<NoiseMetrics>,
    pub grid_kernel_h: u32,
    pub grid_kernel_v: u32,
    pub speckle_reduction: f64,
    pub content_drop: f64,
    pub grid_drift: f64,
}

pub type DenoiseResult = StageResult<DynamicImage, DenoiseDetails>;

/// Ink mask, its ruling-line subset and derived metrics for one image.
struct Analysis {
    grid: BinaryMask,
    metrics: NoiseMetrics,
}

fn analyse(gray: &GrayImage, kernels: (u32, u32), options: &DenoiseOptions) -> Analysis {
    let ink = adaptive_ink(gray, options.block_size, options.threshold_offset);
    let grid = grid_mask(&ink, kernels.0, kernels.1);
    let (speckle_count, content_pixels) = speckle_stats(&ink, options.speckle_max_area);
    let metrics = NoiseMetrics {
        speckle_count,
        content_pixels,
        grid_coverage: grid.fraction(),
    };
    Analysis { grid, metrics }
}

/// Median-filter everything except ruling lines.
pub fn apply(image: &DynamicImage, options: &DenoiseOptions) -> Result<DenoiseResult, PrepError> {
    let dims = ensure_non_empty(image)?;
    let gray = image.to_luma8();
    let kernels = grid_kernels(
        dims.width,
        dims.height,
        options.grid_kernel_frac,
        options.min_grid_kernel,
    );

    let before = analyse(&gray, kernels, options);
    let mut details = DenoiseDetails {
        metrics_before: before.metrics,
        metrics_after: None,
        grid_kernel_h: kernels.0,
        grid_kernel_v: kernels.1,
        speckle_reduction: 0.0,
        content_drop: 0.0,
        grid_drift: 0.0,
    };

    if before.metrics.speckle_count < options.min_speckles {
        tracing::debug!(speckles = before.metrics.speckle_count, "too few speckles to denoise");
        return Ok(StageResult::reject(
            METHOD,
            dims,
            0.0,
            vec![Reason::DenoiseNoImprovement],
            details,
        ));
    }

    // 3x3 median
    let filtered = median_filter(&gray, 1, 1);
    let candidate = GrayImage::from_fn(dims.width, dims.height, |x, y| {
        if before.grid.get(x, y) {
            *gray.get_pixel(x, y)
        } else {
            *filtered.get_pixel(x, y)
        }
    });

    let after = analyse(&candidate, kernels, options).metrics;
    details.metrics_after = Some(after);

    let b = before.metrics;
    let grid_drift = (after.grid_coverage - b.grid_coverage).abs();
    let content_drop = if b.content_pixels > 0 {
        ((b.content_pixels as f64 - after.content_pixels as f64) / b.content_pixels as f64).max(0.0)
    } else {
        0.0
    };
    let speckle_reduction =
        (b.speckle_count as f64 - after.speckle_count as f64) / b.speckle_count as f64;
    details.grid_drift = grid_drift;
    details.content_drop = content_drop;
    details.speckle_reduction = speckle_reduction;

    tracing::debug!(
        speckle_reduction,
        content_drop,
        grid_drift,
        "denoise candidate"
    );

    if grid_drift > options.max_grid_drift || content_drop > options.max_content_drop {
        return Ok(StageResult::reject(
            METHOD,
            dims,
            0.3,
            vec![Reason::DenoiseUncertain],
            details,
        ));
    }
    if speckle_reduction < options.min_speckle_reduction {
        return Ok(StageResult::reject(
            METHOD,
            dims,
            clamp_unit(speckle_reduction),
            vec![Reason::DenoiseNoImprovement],
            details,
        ));
    }

    let speckle_score = (speckle_reduction / options.speckle_target).min(1.0);
    let content_score = 1.0 - content_drop / options.max_content_drop;
    let grid_score = if grid_drift <= 0.001 {
        1.0
    } else {
        1.0 - grid_drift / options.max_grid_drift
    };
    let confidence = 0.5 * speckle_score + 0.3 * content_score + 0.2 * grid_score;

    if confidence < options.min_confidence {
        return Ok(StageResult::reject(
            METHOD,
            dims,
            confidence,
            vec![Reason::DenoiseUncertain],
            details,
        ));
    }

    tracing::info!(
        speckles_before = b.speckle_count,
        speckles_after = after.speckle_count,
        confidence,
        "removed speckle noise"
    );
    Ok(StageResult::accept(
        METHOD,
        DynamicImage::ImageLuma8(candidate),
        dims,
        dims,
        confidence,
        vec![Reason::DenoiseApplied],
        details,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Ruled page with isolated single-pixel specks between the lines.
    fn speckled_grid(w: u32, h: u32) -> GrayImage {
        let mut img = GrayImage::from_pixel(w, h, Luma([235]));
        for y in (40..h).step_by(80) {
            for x in 0..w {
                img.put_pixel(x, y, Luma([20]));
                img.put_pixel(x, y + 1, Luma([20]));
            }
        }
        for x in (40..w).step_by(100) {
            for y in 0..h {
                img.put_pixel(x, y, Luma([20]));
                img.put_pixel(x + 1, y, Luma([20]));
            }
        }
        for y in (8..h).step_by(16) {
            for x in (10..w).step_by(16) {
                let near_row = (y % 80) >= 36 && (y % 80) <= 46;
                let near_col = (x % 100) >= 36 && (x % 100) <= 46;
                if !near_row && !near_col {
                    img.put_pixel(x, y, Luma([20]));
                }
            }
        }
        img
    }

    fn calculate_variance(img: &GrayImage) -> f64 {
        let pixels: Vec<f64> = img.pixels().map(|p| p.0[0] as f64).collect();
        let mean = pixels.iter().sum::<f64>() / pixels.len() as f64;
        pixels.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / pixels.len() as f64
    }

    #[test]
    fn test_speckles_removed_and_grid_kept() {
        let img = speckled_grid(400, 320);
        let result = apply(&DynamicImage::ImageLuma8(img.clone()), &DenoiseOptions::default()).unwrap();

        assert!(result.is_applied(), "reasons: {:?}", result.reasons);
        assert_eq!(result.reasons, vec![Reason::DenoiseApplied]);
        assert!(result.confidence >= 0.7);

        let out = result.output().unwrap().to_luma8();
        // ruling lines untouched
        assert_eq!(out.get_pixel(200, 40).0[0], 20);
        assert_eq!(out.get_pixel(140, 150).0[0], 20);
        // speck at (10, 8) is gone
        assert_eq!(out.get_pixel(10, 8).0[0], 235);
        assert!(calculate_variance(&out) < calculate_variance(&img));

        let after = result.details.metrics_after.unwrap();
        assert!(after.speckle_count < result.details.metrics_before.speckle_count);
    }

    #[test]
    fn test_clean_page_is_skipped() {
        let img = GrayImage::from_pixel(200, 200, Luma([240]));
        let result = apply(&DynamicImage::ImageLuma8(img), &DenoiseOptions::default()).unwrap();
        assert!(!result.is_applied());
        assert_eq!(result.reasons, vec![Reason::DenoiseNoImprovement]);
    }

    #[test]
    fn test_thin_strokes_trip_content_guard() {
        // 1px staircase strokes are real content the median filter would erase
        let mut img = GrayImage::from_fn(200, 200, |x, y| {
            if x % 13 == 5 && y % 13 == 5 {
                Luma([20])
            } else {
                Luma([235])
            }
        });
        for sy in (10..150).step_by(50) {
            for sx in (10..170).step_by(30) {
                for k in 0..40u32 {
                    img.put_pixel(sx + (k + 1) / 2, sy + k / 2, Luma([20]));
                }
            }
        }
        let result = apply(&DynamicImage::ImageLuma8(img), &DenoiseOptions::default()).unwrap();
        assert!(!result.is_applied());
        assert_eq!(result.reasons, vec![Reason::DenoiseUncertain]);
        assert_eq!(result.confidence, 0.3);
    }
}
