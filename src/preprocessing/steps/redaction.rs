//! Redaction mask over empty border tiles.
//!
//! The mask never modifies the source image: white (255) keeps a pixel,
//! black (0) marks it for redaction.

use crate::error::PrepError;
use crate::preprocessing::toolkit::morphology::{grid_kernels, grid_mask};
use crate::preprocessing::toolkit::threshold::adaptive_ink;
use crate::preprocessing::types::{clamp_unit, ensure_non_empty, Dimensions, Reason};
use image::{DynamicImage, GrayImage, Luma};
use serde::{Deserialize, Serialize};

pub const METHOD: &str = "density_border_mask_v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedactionOptions {
    pub tile_size: u32,
    /// Width of the outer tile band as a fraction of the tile count.
    pub border_frac: f64,
    /// Border tiles below this ink density are redaction candidates.
    pub max_border_density: f64,
    /// Tiles at or above this density without grid are treated as handwriting.
    pub handwriting_density: f64,
    pub grid_pad_tiles: u32,
    pub handwriting_pad_tiles: u32,
    pub min_redacted_area_frac: f64,
    pub block_size: u32,
    pub threshold_offset: f64,
    pub grid_kernel_frac: f64,
    pub min_grid_kernel: u32,
    pub max_confidence: f64,
}

impl Default for RedactionOptions {
    fn default() -> Self {
        Self {
            tile_size: 64,
            border_frac: 0.05,
            max_border_density: 0.03,
            handwriting_density: 0.08,
            grid_pad_tiles: 1,
            handwriting_pad_tiles: 1,
            min_redacted_area_frac: 0.02,
            block_size: 31,
            threshold_offset: 15.0,
            grid_kernel_frac: 0.05,
            min_grid_kernel: 11,
            max_confidence: 0.99,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TileStats {
    pub total: usize,
    pub border: usize,
    pub candidate: usize,
    pub protected: usize,
    pub redacted: usize,
}

/// Mask plus the diagnostic record. The mask is always present; an
/// all-white mask means nothing was redacted.
#[derive(Debug, Clone, Serialize)]
pub struct RedactionResult {
    pub applied: bool,
    pub method: &'static str,
    pub confidence: f64,
    pub reasons: Vec<Reason>,
    pub dimensions: Dimensions,
    pub tile_stats: TileStats,
    pub redacted_area_frac: f64,
    pub tile_size: u32,
    pub max_border_density: f64,
    #[serde(skip)]
    pub mask: GrayImage,
}

impl RedactionResult {
    pub fn is_applied(&self) -> bool {
        self.applied
    }
}

struct Tile {
    x: u32,
    y: u32,
    w: u32,
    h: u32,
    density: f64,
    has_grid: bool,
}

/// Build a keep/redact mask for near-empty border tiles.
pub fn apply(
    image: &DynamicImage,
    options: &RedactionOptions,
) -> Result<RedactionResult, PrepError> {
    let dims = ensure_non_empty(image)?;
    let gray = image.to_luma8();
    let ink = adaptive_ink(&gray, options.block_size, options.threshold_offset);
    let (kh, kv) = grid_kernels(
        dims.width,
        dims.height,
        options.grid_kernel_frac,
        options.min_grid_kernel,
    );
    let grid = grid_mask(&ink, kh, kv);

    let size = options.tile_size.max(1);
    let tiles_x = dims.width.div_ceil(size);
    let tiles_y = dims.height.div_ceil(size);

    let mut tiles = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let (x, y) = (tx * size, ty * size);
            let w = size.min(dims.width - x);
            let h = size.min(dims.height - y);
            let area = (w * h) as f64;
            tiles.push(Tile {
                x,
                y,
                w,
                h,
                density: ink.count_in(x, y, x + w, y + h) as f64 / area,
                has_grid: grid.count_in(x, y, x + w, y + h) > 0,
            });
        }
    }

    let band_x = ((tiles_x as f64 * options.border_frac).ceil() as u32).max(1);
    let band_y = ((tiles_y as f64 * options.border_frac).ceil() as u32).max(1);
    let is_border = |tx: u32, ty: u32| {
        tx < band_x || tx >= tiles_x.saturating_sub(band_x) || ty < band_y || ty >= tiles_y.saturating_sub(band_y)
    };

    let mut protected = vec![false; tiles.len()];
    let mut protect = |tx: u32, ty: u32, pad: u32| {
        let x0 = tx.saturating_sub(pad);
        let y0 = ty.saturating_sub(pad);
        let x1 = (tx + pad).min(tiles_x - 1);
        let y1 = (ty + pad).min(tiles_y - 1);
        for py in y0..=y1 {
            for px in x0..=x1 {
                protected[(py * tiles_x + px) as usize] = true;
            }
        }
    };
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let tile = &tiles[(ty * tiles_x + tx) as usize];
            if tile.has_grid {
                protect(tx, ty, options.grid_pad_tiles);
            } else if tile.density >= options.handwriting_density {
                protect(tx, ty, options.handwriting_pad_tiles);
            }
        }
    }

    let mut stats = TileStats {
        total: tiles.len(),
        ..Default::default()
    };
    let mut mask = GrayImage::from_pixel(dims.width, dims.height, Luma([255]));
    let mut redacted_pixels = 0u64;
    let mut redacted_density_sum = 0.0;

    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let idx = (ty * tiles_x + tx) as usize;
            let tile = &tiles[idx];
            if protected[idx] {
                stats.protected += 1;
            }
            if !is_border(tx, ty) {
                continue;
            }
            stats.border += 1;
            if tile.density >= options.max_border_density {
                continue;
            }
            stats.candidate += 1;
            if protected[idx] {
                continue;
            }
            stats.redacted += 1;
            redacted_pixels += tile.w as u64 * tile.h as u64;
            redacted_density_sum += tile.density;
            for y in tile.y..tile.y + tile.h {
                for x in tile.x..tile.x + tile.w {
                    mask.put_pixel(x, y, Luma([0]));
                }
            }
        }
    }

    let area_frac = clamp_unit(redacted_pixels as f64 / dims.area() as f64);
    let (applied, confidence, reason) = if stats.redacted == 0 {
        (false, 0.0, Reason::RedactionNoop)
    } else if area_frac < options.min_redacted_area_frac {
        (false, 0.3, Reason::RedactionUncertain)
    } else {
        let pass_rate = stats.redacted as f64 / stats.candidate as f64;
        let mean_density = redacted_density_sum / stats.redacted as f64;
        let clearance = ((options.max_border_density - mean_density) / options.max_border_density)
            .min(1.0);
        let confidence = (0.6 * pass_rate + 0.4 * clearance).min(options.max_confidence);
        (true, confidence, Reason::RedactionApplied)
    };

    if !applied {
        // an unapplied mask must not redact anything
        mask = GrayImage::from_pixel(dims.width, dims.height, Luma([255]));
    }

    tracing::debug!(
        redacted = stats.redacted,
        candidates = stats.candidate,
        area_frac,
        "redaction mask built"
    );

    Ok(RedactionResult {
        applied,
        method: METHOD,
        confidence: clamp_unit(confidence),
        reasons: vec![reason],
        dimensions: dims,
        tile_stats: stats,
        redacted_area_frac: if applied { area_frac } else { 0.0 },
        tile_size: size,
        max_border_density: options.max_border_density,
        mask,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lcg(seed: &mut u64) -> u32 {
        *seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (*seed >> 33) as u32
    }

    /// Blank margins around a block of scattered handwriting-like ink.
    fn page_with_central_scatter() -> DynamicImage {
        let mut img = GrayImage::from_pixel(640, 640, Luma([240]));
        let mut seed = 11u64;
        for _ in 0..40_000 {
            let x = 128 + lcg(&mut seed) % 384;
            let y = 128 + lcg(&mut seed) % 384;
            img.put_pixel(x, y, Luma([15]));
        }
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn test_empty_border_tiles_are_redacted() {
        let result = apply(&page_with_central_scatter(), &RedactionOptions::default()).unwrap();

        assert!(result.is_applied());
        assert_eq!(result.reasons, vec![Reason::RedactionApplied]);
        assert_eq!(result.tile_stats.total, 100);
        assert_eq!(result.tile_stats.border, 36);
        assert_eq!(result.tile_stats.redacted, 36);
        assert!((result.confidence - 0.99).abs() < 1e-9);

        assert_eq!(result.mask.get_pixel(10, 10).0[0], 0);
        assert_eq!(result.mask.get_pixel(320, 320).0[0], 255);
        assert_eq!(result.mask.dimensions(), (640, 640));
    }

    #[test]
    fn test_content_up_to_the_edge_is_noop() {
        let mut img = GrayImage::from_pixel(256, 256, Luma([240]));
        let mut seed = 3u64;
        for _ in 0..20_000 {
            let (x, y) = (lcg(&mut seed) % 256, lcg(&mut seed) % 256);
            img.put_pixel(x, y, Luma([10]));
        }
        let result = apply(&DynamicImage::ImageLuma8(img), &RedactionOptions::default()).unwrap();
        assert!(!result.is_applied());
        assert_eq!(result.reasons, vec![Reason::RedactionNoop]);
        assert!(result.mask.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn test_tiny_redaction_is_uncertain() {
        // sparse dots everywhere except one empty corner tile
        let img = GrayImage::from_fn(1280, 1280, |x, y| {
            let in_corner = x < 64 && y < 64;
            if !in_corner && x % 4 == 0 && y % 5 == 0 {
                Luma([15])
            } else {
                Luma([240])
            }
        });
        let result = apply(&DynamicImage::ImageLuma8(img), &RedactionOptions::default()).unwrap();

        assert!(!result.is_applied());
        assert_eq!(result.reasons, vec![Reason::RedactionUncertain]);
        assert!((result.confidence - 0.3).abs() < 1e-9);
        assert_eq!(result.tile_stats.candidate, 1);
        assert_eq!(result.tile_stats.redacted, 1);
        assert_eq!(result.redacted_area_frac, 0.0);
        assert!(result.mask.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn test_handwriting_tile_protects_its_neighbours() {
        // dense dots in one left-margin tile, no ruling lines anywhere
        let mut img = GrayImage::from_pixel(640, 640, Luma([240]));
        for y in (258..320).step_by(3) {
            for x in (0..64).step_by(3) {
                img.put_pixel(x, y, Luma([15]));
            }
        }
        let result = apply(&DynamicImage::ImageLuma8(img), &RedactionOptions::default()).unwrap();

        assert!(result.is_applied());
        assert_eq!(result.tile_stats.protected, 6);
        assert_eq!(result.tile_stats.border, 36);
        assert_eq!(result.tile_stats.candidate, 35);
        assert_eq!(result.tile_stats.redacted, 33);
        // the handwriting tile and the margin tiles above and below it are kept
        assert_eq!(result.mask.get_pixel(10, 290).0[0], 255);
        assert_eq!(result.mask.get_pixel(10, 220).0[0], 255);
        assert_eq!(result.mask.get_pixel(10, 350).0[0], 255);
        assert_eq!(result.mask.get_pixel(10, 100).0[0], 0);
    }

    #[test]
    fn test_grid_tiles_are_protected() {
        // a ruling line along the top margin protects its tiles and their neighbours
        let mut img = GrayImage::from_pixel(640, 640, Luma([240]));
        for x in 0..640 {
            img.put_pixel(x, 20, Luma([10]));
            img.put_pixel(x, 21, Luma([10]));
        }
        let result = apply(&DynamicImage::ImageLuma8(img), &RedactionOptions::default()).unwrap();
        assert!(result.is_applied());
        assert_eq!(result.mask.get_pixel(320, 20).0[0], 255);
        assert_eq!(result.mask.get_pixel(320, 620).0[0], 0);
        assert!(result.tile_stats.protected >= 20);
    }
}
