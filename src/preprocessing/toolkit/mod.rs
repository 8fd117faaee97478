//! Low-level image analysis shared by the stages.
//!
//! Stages downscale to an analysis copy, detect there, and rescale the
//! resulting geometry before touching the full-resolution buffer.

pub mod components;
pub mod edges;
pub mod hough;
pub mod morphology;
pub mod threshold;

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};

/// Greyscale analysis copy plus the factor mapping it back to the original.
pub struct AnalysisImage {
    pub gray: GrayImage,
    /// original width / analysis width
    pub scale: f64,
}

impl AnalysisImage {
    /// Convert an analysis-space length back to original pixels.
    pub fn to_original(&self, value: f64) -> f64 {
        value * self.scale
    }
}

/// Greyscale and cap the width at `max_width`, preserving aspect ratio.
pub fn analysis_gray(image: &DynamicImage, max_width: u32) -> AnalysisImage {
    downscale_gray(image.to_luma8(), max_width)
}

/// Same as [`analysis_gray`] for a buffer that is already greyscale.
pub fn downscale_gray(gray: GrayImage, max_width: u32) -> AnalysisImage {
    let (w, h) = gray.dimensions();
    let target_w = w.min(max_width.max(1));
    if target_w == w {
        return AnalysisImage { gray, scale: 1.0 };
    }

    let scale = w as f64 / target_w as f64;
    let target_h = ((h as f64 / scale).round() as u32).max(1);
    let resized = imageops::resize(&gray, target_w, target_h, FilterType::Triangle);
    AnalysisImage {
        gray: resized,
        scale,
    }
}

/// Row-major boolean mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl BinaryMask {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bits: vec![false; width as usize * height as usize],
        }
    }

    pub fn from_fn<F>(width: u32, height: u32, mut f: F) -> Self
    where
        F: FnMut(u32, u32) -> bool,
    {
        let mut bits = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                bits.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            bits,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        self.bits[self.index(x, y)]
    }

    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        let idx = self.index(x, y);
        self.bits[idx] = value;
    }

    pub fn count(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    pub fn fraction(&self) -> f64 {
        if self.bits.is_empty() {
            return 0.0;
        }
        self.count() as f64 / self.bits.len() as f64
    }

    pub fn union(&self, other: &BinaryMask) -> BinaryMask {
        let bits = self
            .bits
            .iter()
            .zip(other.bits.iter())
            .map(|(&a, &b)| a || b)
            .collect();
        BinaryMask {
            width: self.width,
            height: self.height,
            bits,
        }
    }

    /// Set pixels inside the half-open window [x0, x1) x [y0, y1).
    pub fn count_in(&self, x0: u32, y0: u32, x1: u32, y1: u32) -> usize {
        let x1 = x1.min(self.width);
        if x0 >= x1 {
            return 0;
        }
        let mut count = 0;
        for y in y0..y1.min(self.height) {
            let row = self.index(0, y);
            count += self.bits[row + x0 as usize..row + x1 as usize]
                .iter()
                .filter(|&&b| b)
                .count();
        }
        count
    }

    pub(crate) fn row(&self, y: u32) -> &[bool] {
        let start = self.index(0, y);
        &self.bits[start..start + self.width as usize]
    }
}

/// Population mean and standard deviation.
pub fn mean_std<I>(values: I) -> (f64, f64)
where
    I: IntoIterator<Item = f64>,
{
    let mut n = 0usize;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for v in values {
        n += 1;
        sum += v;
        sum_sq += v * v;
    }
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / n as f64;
    let variance = (sum_sq / n as f64 - mean * mean).max(0.0);
    (mean, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_analysis_gray_keeps_small_images() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(300, 200, Luma([128])));
        let analysis = analysis_gray(&img, 600);
        assert_eq!(analysis.gray.dimensions(), (300, 200));
        assert_eq!(analysis.scale, 1.0);
    }

    #[test]
    fn test_analysis_gray_downscales_wide_images() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(1600, 1000, Luma([128])));
        let analysis = analysis_gray(&img, 800);
        assert_eq!(analysis.gray.dimensions(), (800, 500));
        assert_eq!(analysis.scale, 2.0);
        assert_eq!(analysis.to_original(100.0), 200.0);
    }

    #[test]
    fn test_mask_counts() {
        let mask = BinaryMask::from_fn(10, 10, |x, _| x < 3);
        assert_eq!(mask.count(), 30);
        assert_eq!(mask.count_in(0, 0, 5, 2), 6);
        assert!((mask.fraction() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_mean_std() {
        let (mean, std) = mean_std([2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(mean, 5.0);
        assert_eq!(std, 2.0);
    }
}
