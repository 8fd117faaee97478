use image::GrayImage;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};

use super::BinaryMask;

/// Pixels whose vertical gradient magnitude exceeds `threshold`.
/// These trace horizontal structures such as ruling lines and text baselines.
pub fn horizontal_edges(gray: &GrayImage, threshold: i32) -> BinaryMask {
    let gy = vertical_sobel(gray);
    BinaryMask::from_fn(gray.width(), gray.height(), |x, y| {
        (gy.get_pixel(x, y).0[0] as i32).abs() > threshold
    })
}

/// Pixels whose horizontal gradient magnitude exceeds `threshold`.
pub fn vertical_edges(gray: &GrayImage, threshold: i32) -> BinaryMask {
    let gx = horizontal_sobel(gray);
    BinaryMask::from_fn(gray.width(), gray.height(), |x, y| {
        (gx.get_pixel(x, y).0[0] as i32).abs() > threshold
    })
}

/// Per-row count of horizontal edge pixels.
pub fn row_votes(edges: &BinaryMask) -> Vec<u32> {
    (0..edges.height())
        .map(|y| edges.row(y).iter().filter(|&&b| b).count() as u32)
        .collect()
}

/// Per-column count of vertical edge pixels.
pub fn column_votes(edges: &BinaryMask) -> Vec<u32> {
    let mut votes = vec![0u32; edges.width() as usize];
    for y in 0..edges.height() {
        for (x, &on) in edges.row(y).iter().enumerate() {
            if on {
                votes[x] += 1;
            }
        }
    }
    votes
}
