use image::GrayImage;

use super::BinaryMask;

/// Summed-area table with a zero row and column in front.
pub struct IntegralImage {
    width: usize,
    sums: Vec<u64>,
}

impl IntegralImage {
    pub fn new(img: &GrayImage) -> Self {
        let (w, h) = (img.width() as usize, img.height() as usize);
        let stride = w + 1;
        let mut sums = vec![0u64; stride * (h + 1)];
        for y in 0..h {
            let mut row_sum = 0u64;
            for x in 0..w {
                row_sum += img.get_pixel(x as u32, y as u32).0[0] as u64;
                sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row_sum;
            }
        }
        Self { width: w, sums }
    }

    /// Sum over the inclusive window [x1, x2] x [y1, y2].
    pub fn window_sum(&self, x1: u32, y1: u32, x2: u32, y2: u32) -> u64 {
        let stride = self.width + 1;
        let (x1, y1, x2, y2) = (x1 as usize, y1 as usize, x2 as usize + 1, y2 as usize + 1);
        self.sums[y2 * stride + x2] + self.sums[y1 * stride + x1]
            - self.sums[y1 * stride + x2]
            - self.sums[y2 * stride + x1]
    }

    pub fn window_mean(&self, x1: u32, y1: u32, x2: u32, y2: u32) -> f64 {
        let area = ((x2 - x1 + 1) as u64 * (y2 - y1 + 1) as u64) as f64;
        self.window_sum(x1, y1, x2, y2) as f64 / area
    }
}

/// Ink mask: a pixel is foreground when darker than its local
/// `block x block` mean minus `offset`. Windows are clipped at the borders.
pub fn adaptive_ink(gray: &GrayImage, block: u32, offset: f64) -> BinaryMask {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return BinaryMask::new(width, height);
    }
    let integral = IntegralImage::new(gray);
    let half = block / 2;

    BinaryMask::from_fn(width, height, |x, y| {
        let x1 = x.saturating_sub(half);
        let y1 = y.saturating_sub(half);
        let x2 = (x + half).min(width - 1);
        let y2 = (y + half).min(height - 1);
        let mean = integral.window_mean(x1, y1, x2, y2);
        (gray.get_pixel(x, y).0[0] as f64) < mean - offset
    })
}

/// Pixels strictly darker than `level`.
pub fn below_level(gray: &GrayImage, level: u8) -> BinaryMask {
    BinaryMask::from_fn(gray.width(), gray.height(), |x, y| {
        gray.get_pixel(x, y).0[0] < level
    })
}

/// Pixels at or above `level`.
pub fn at_least_level(gray: &GrayImage, level: u8) -> BinaryMask {
    BinaryMask::from_fn(gray.width(), gray.height(), |x, y| {
        gray.get_pixel(x, y).0[0] >= level
    })
}

/// Render a mask as black ink on white paper.
pub fn mask_to_ink_image(mask: &BinaryMask) -> GrayImage {
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        if mask.get(x, y) {
            image::Luma([0u8])
        } else {
            image::Luma([255u8])
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_window_sum_matches_direct_sum() {
        let img = GrayImage::from_fn(7, 5, |x, y| Luma([(x * 10 + y) as u8]));
        let integral = IntegralImage::new(&img);
        let mut direct = 0u64;
        for y in 1..=3 {
            for x in 2..=5 {
                direct += img.get_pixel(x, y).0[0] as u64;
            }
        }
        assert_eq!(integral.window_sum(2, 1, 5, 3), direct);
    }

    #[test]
    fn test_adaptive_ink_marks_dark_strokes() {
        let mut img = GrayImage::from_pixel(50, 20, Luma([240]));
        for x in 10..40 {
            img.put_pixel(x, 10, Luma([20]));
        }
        let ink = adaptive_ink(&img, 31, 15.0);
        assert!(ink.get(25, 10));
        assert!(!ink.get(25, 5));
    }

    #[test]
    fn test_adaptive_ink_ignores_smooth_gradient() {
        let img = GrayImage::from_fn(64, 64, |x, _| Luma([(100 + x) as u8]));
        let ink = adaptive_ink(&img, 31, 15.0);
        assert_eq!(ink.count(), 0);
    }

    #[test]
    fn test_mask_to_ink_image() {
        let mut mask = BinaryMask::new(3, 1);
        mask.set(1, 0, true);
        let img = mask_to_ink_image(&mask);
        assert_eq!(img.get_pixel(0, 0).0[0], 255);
        assert_eq!(img.get_pixel(1, 0).0[0], 0);
    }
}
