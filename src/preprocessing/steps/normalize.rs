//! Illumination flat-field normalization.

use crate::error::PrepError;
use crate::preprocessing::toolkit::mean_std;
use crate::preprocessing::toolkit::threshold::IntegralImage;
use crate::preprocessing::types::{
    clamp_unit, ensure_non_empty, Dimensions, Reason, StageResult, DEFAULT_MIN_CONFIDENCE,
};
use image::{DynamicImage, GrayImage, Luma};
use imageproc::contrast::otsu_level;
use imageproc::filter::gaussian_blur_f32;
use serde::{Deserialize, Serialize};

pub const METHOD: &str = "illumination_flatfield_v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundOptions {
    /// Pages flatter than this are left alone.
    pub min_nonuniformity: f64,
    /// Blur kernel as a fraction of the shorter side.
    pub kernel_frac: f64,
    pub min_kernel: u32,
    pub tile_size: u32,
    /// Fraction clipped from each histogram tail before stretching.
    pub clip_frac: f64,
    pub min_stretch_range: u32,
    pub min_improvement: f64,
    /// Relative contrast increase above this is treated as noise amplification.
    pub max_contrast_increase: f64,
    /// Improvement at which the improvement score saturates.
    pub improvement_target: f64,
    pub min_confidence: f64,
}

impl Default for BackgroundOptions {
    fn default() -> Self {
        Self {
            min_nonuniformity: 5.0,
            kernel_frac: 0.04,
            min_kernel: 15,
            tile_size: 32,
            clip_frac: 0.01,
            min_stretch_range: 10,
            min_improvement: 0.15,
            max_contrast_increase: 0.5,
            improvement_target: 0.5,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

/// Photometric measurements, recomputed for every image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IlluminationMetrics {
    /// Standard deviation of all intensities.
    pub contrast: f64,
    /// Standard deviation of tile means.
    pub bg_nonuniformity: f64,
    /// Distance of the Otsu level from mid-grey.
    pub otsu_delta: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackgroundDetails {
    pub metrics_before: IlluminationMetrics,
    pub metrics_after: Option<IlluminationMetrics>,
    pub kernel_size: u32,
    pub improvement: f64,
    pub contrast_increase: f64,
    pub stretched: bool,
}

pub type BackgroundResult = StageResult<DynamicImage, BackgroundDetails>;

/// Divide out a blurred illumination estimate and stretch contrast.
pub fn apply(
    image: &DynamicImage,
    options: &BackgroundOptions,
) -> Result<BackgroundResult, PrepError> {
    let dims = ensure_non_empty(image)?;
    let gray = image.to_luma8();
    let before = measure(&gray, options.tile_size);

    let kernel = blur_kernel(dims, options);
    let mut details = BackgroundDetails {
        metrics_before: before,
        metrics_after: None,
        kernel_size: kernel,
        improvement: 0.0,
        contrast_increase: 0.0,
        stretched: false,
    };

    if before.bg_nonuniformity < options.min_nonuniformity {
        tracing::debug!(nonuniformity = before.bg_nonuniformity, "background already flat");
        return Ok(StageResult::reject(
            METHOD,
            dims,
            0.0,
            vec![Reason::BgNoImprovement],
            details,
        ));
    }

    let flattened = flat_field(&gray, kernel as f32 / 6.0);
    let (candidate, stretched) = stretch_contrast(flattened, options);
    let after = measure(&candidate, options.tile_size);
    details.metrics_after = Some(after);
    details.stretched = stretched;

    let improvement = relative_drop(before.bg_nonuniformity, after.bg_nonuniformity);
    let contrast_increase = if before.contrast > 0.0 {
        (after.contrast - before.contrast) / before.contrast
    } else {
        0.0
    };
    details.improvement = improvement;
    details.contrast_increase = contrast_increase;

    tracing::debug!(improvement, contrast_increase, "flat-field candidate");

    if contrast_increase > options.max_contrast_increase {
        return Ok(StageResult::reject(
            METHOD,
            dims,
            0.3,
            vec![Reason::BgUncertain],
            details,
        ));
    }
    if improvement < options.min_improvement {
        return Ok(StageResult::reject(
            METHOD,
            dims,
            clamp_unit(improvement),
            vec![Reason::BgNoImprovement],
            details,
        ));
    }

    let improvement_score = (improvement / options.improvement_target).min(1.0);
    let contrast_score = if contrast_increase <= 0.0 {
        1.0
    } else {
        (1.0 - contrast_increase / options.max_contrast_increase).max(0.0)
    };
    let otsu_stability = if before.otsu_delta == 0.0 {
        1.0
    } else {
        (after.otsu_delta / before.otsu_delta).min(1.0)
    };
    let confidence = 0.6 * improvement_score + 0.2 * contrast_score + 0.2 * otsu_stability;

    if confidence < options.min_confidence {
        return Ok(StageResult::reject(
            METHOD,
            dims,
            confidence,
            vec![Reason::BgUncertain],
            details,
        ));
    }

    tracing::info!(improvement, confidence, "normalized background illumination");
    Ok(StageResult::accept(
        METHOD,
        DynamicImage::ImageLuma8(candidate),
        dims,
        dims,
        confidence,
        vec![Reason::BgNormalized],
        details,
    ))
}

/// Contrast, tile-mean spread and Otsu separation of a greyscale image.
pub fn measure(gray: &GrayImage, tile_size: u32) -> IlluminationMetrics {
    let (_, contrast) = mean_std(gray.pixels().map(|p| p.0[0] as f64));
    IlluminationMetrics {
        contrast,
        bg_nonuniformity: tile_mean_spread(gray, tile_size),
        otsu_delta: (otsu_level(gray) as f64 - 128.0).abs(),
    }
}

fn tile_mean_spread(gray: &GrayImage, tile_size: u32) -> f64 {
    let (w, h) = gray.dimensions();
    let tile = tile_size.max(1);
    let tiles_x = (w / tile).max(1);
    let tiles_y = (h / tile).max(1);
    let (tw, th) = (w / tiles_x, h / tiles_y);
    let integral = IntegralImage::new(gray);

    let mut means = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x1 = tx * tw;
            let y1 = ty * th;
            // last tile absorbs the remainder
            let x2 = if tx + 1 == tiles_x { w - 1 } else { x1 + tw - 1 };
            let y2 = if ty + 1 == tiles_y { h - 1 } else { y1 + th - 1 };
            means.push(integral.window_mean(x1, y1, x2, y2));
        }
    }
    mean_std(means).1
}

fn blur_kernel(dims: Dimensions, options: &BackgroundOptions) -> u32 {
    let k = ((dims.min_side() as f64 * options.kernel_frac).round() as u32).max(options.min_kernel);
    if k % 2 == 0 {
        k + 1
    } else {
        k
    }
}

/// original / blur * mean(blur). Near-zero estimates keep the original pixel.
fn flat_field(gray: &GrayImage, sigma: f32) -> GrayImage {
    let blurred = gaussian_blur_f32(gray, sigma.max(0.5));
    let (bg_mean, _) = mean_std(blurred.pixels().map(|p| p.0[0] as f64));

    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let original = gray.get_pixel(x, y).0[0] as f64;
        let estimate = blurred.get_pixel(x, y).0[0] as f64;
        let value = if estimate < 1.0 {
            original
        } else {
            original / estimate * bg_mean
        };
        Luma([value.round().clamp(0.0, 255.0) as u8])
    })
}

/// Linear stretch between the clipped histogram tails.
fn stretch_contrast(gray: GrayImage, options: &BackgroundOptions) -> (GrayImage, bool) {
    let mut histogram = [0u64; 256];
    for p in gray.pixels() {
        histogram[p.0[0] as usize] += 1;
    }
    let total: u64 = histogram.iter().sum();
    let clip = (total as f64 * options.clip_frac).round() as u64;

    let mut low = 0usize;
    let mut acc = 0u64;
    for (value, &count) in histogram.iter().enumerate() {
        acc += count;
        if acc > clip {
            low = value;
            break;
        }
    }
    let mut high = 255usize;
    acc = 0;
    for (value, &count) in histogram.iter().enumerate().rev() {
        acc += count;
        if acc > clip {
            high = value;
            break;
        }
    }

    if high <= low || (high - low) as u32 <= options.min_stretch_range {
        return (gray, false);
    }

    let range = (high - low) as f64;
    let stretched = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y).0[0] as f64;
        Luma([((v - low as f64) * 255.0 / range).round().clamp(0.0, 255.0) as u8])
    });
    (stretched, true)
}

fn relative_drop(before: f64, after: f64) -> f64 {
    if before <= 0.0 {
        0.0
    } else {
        (before - after) / before
    }
}
