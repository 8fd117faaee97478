//! OCR region plan derived from the redaction mask.

use crate::error::PrepError;
use crate::preprocessing::toolkit::components::label_components;
use crate::preprocessing::toolkit::downscale_gray;
use crate::preprocessing::toolkit::threshold::at_least_level;
use crate::preprocessing::types::{clamp_unit, Dimensions, NormRect, Reason, Rect};
use image::GrayImage;
use serde::{Deserialize, Serialize};

pub const METHOD: &str = "mask_connected_regions_v1";

/// Mask pixels at or above this level are content.
const CONTENT_LEVEL: u8 = 128;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrPlanOptions {
    pub max_regions: usize,
    /// Components smaller than this share of the analysis area are dropped.
    pub min_region_frac: f64,
    /// Padding (analysis pixels) used when deciding whether boxes touch.
    pub merge_pad_px: u32,
    /// Below this content share the whole image is sent instead.
    pub min_content_frac: f64,
    /// Above this content share region scoping buys nothing.
    pub max_content_frac: f64,
    /// Padding (original pixels) added to each final region.
    pub region_pad_px: u32,
    pub analysis_max_width: u32,
}

impl Default for OcrPlanOptions {
    fn default() -> Self {
        Self {
            max_regions: 6,
            min_region_frac: 0.02,
            merge_pad_px: 20,
            min_content_frac: 0.30,
            max_content_frac: 0.95,
            region_pad_px: 8,
            analysis_max_width: 800,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrRegion {
    pub index: usize,
    #[serde(rename = "box")]
    pub bbox: Rect,
    pub box_norm: NormRect,
    pub area_frac: f64,
}

impl OcrRegion {
    fn new(index: usize, bbox: Rect, image: Dimensions) -> Self {
        Self {
            index,
            bbox,
            box_norm: bbox.normalized(image),
            area_frac: clamp_unit(bbox.area() as f64 / image.area().max(1) as f64),
        }
    }

    /// Width over height.
    pub fn aspect(&self) -> f64 {
        self.bbox.w as f64 / self.bbox.h.max(1) as f64
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OcrPlan {
    pub use_regions: bool,
    pub method: &'static str,
    pub reasons: Vec<Reason>,
    pub regions: Vec<OcrRegion>,
    pub content_frac: f64,
    pub image_dimensions: Dimensions,
    pub mask_dimensions: Dimensions,
    pub thresholds: OcrPlanOptions,
}

impl OcrPlan {
    /// Regions the recognizer should actually receive: the planned regions,
    /// or a single whole-image region when scoping is off.
    pub fn effective_regions(&self) -> Vec<OcrRegion> {
        if self.use_regions {
            self.regions.clone()
        } else {
            vec![OcrRegion::new(
                0,
                Rect::full(self.image_dimensions),
                self.image_dimensions,
            )]
        }
    }

    fn full_image(
        reasons: Vec<Reason>,
        content_frac: f64,
        image: Dimensions,
        mask: Dimensions,
        options: &OcrPlanOptions,
    ) -> Self {
        Self {
            use_regions: false,
            method: METHOD,
            reasons,
            regions: Vec::new(),
            content_frac,
            image_dimensions: image,
            mask_dimensions: mask,
            thresholds: options.clone(),
        }
    }
}

/// Derive OCR regions from a keep/redact mask (white = keep).
pub fn generate(
    mask: &GrayImage,
    image: Dimensions,
    options: &OcrPlanOptions,
) -> Result<OcrPlan, PrepError> {
    let (mw, mh) = mask.dimensions();
    if mw == 0 || mh == 0 || image.width == 0 || image.height == 0 {
        return Err(PrepError::EmptyImage {
            width: mw,
            height: mh,
        });
    }
    let mask_dims = Dimensions::new(mw, mh);

    let analysis = downscale_gray(mask.clone(), options.analysis_max_width);
    let (aw, ah) = analysis.gray.dimensions();
    let content = at_least_level(&analysis.gray, CONTENT_LEVEL);
    let content_frac = clamp_unit(content.fraction());

    if content_frac < options.min_content_frac {
        tracing::debug!(content_frac, "mask too sparse for region scoping");
        return Ok(OcrPlan::full_image(
            vec![Reason::OcrPlanLowContent, Reason::ContentFrac(content_frac)],
            content_frac,
            image,
            mask_dims,
            options,
        ));
    }
    if content_frac > options.max_content_frac {
        return Ok(OcrPlan::full_image(
            vec![Reason::OcrPlanFullContent, Reason::ContentFrac(content_frac)],
            content_frac,
            image,
            mask_dims,
            options,
        ));
    }

    let min_area = options.min_region_frac * aw as f64 * ah as f64;
    let boxes: Vec<Rect> = label_components(&content)
        .into_iter()
        .filter(|c| c.area as f64 >= min_area)
        .map(|c| c.bbox())
        .collect();

    if boxes.is_empty() {
        return Ok(OcrPlan::full_image(
            vec![Reason::OcrPlanNoSignificantRegions],
            content_frac,
            image,
            mask_dims,
            options,
        ));
    }

    let mut boxes = merge_touching(boxes, options.merge_pad_px);
    cap_region_count(&mut boxes, options.max_regions.max(1));

    let sx = image.width as f64 / aw as f64;
    let sy = image.height as f64 / ah as f64;
    let mut scaled: Vec<Rect> = boxes
        .iter()
        .map(|b| scale_box(b, sx, sy, image).padded(options.region_pad_px, image))
        .collect();
    scaled.sort_by_key(|r| (r.y, r.x));

    let regions: Vec<OcrRegion> = scaled
        .into_iter()
        .enumerate()
        .map(|(i, r)| OcrRegion::new(i, r, image))
        .collect();

    tracing::debug!(regions = regions.len(), content_frac, "planned OCR regions");

    Ok(OcrPlan {
        use_regions: true,
        method: METHOD,
        reasons: vec![Reason::OcrPlanRegions, Reason::RegionCount(regions.len())],
        regions,
        content_frac,
        image_dimensions: image,
        mask_dimensions: mask_dims,
        thresholds: options.clone(),
    })
}

fn overlaps_padded(a: &Rect, b: &Rect, pad: u32) -> bool {
    let pad = pad as i64;
    let (ax0, ay0, ax1, ay1) = (a.x as i64, a.y as i64, a.right() as i64, a.bottom() as i64);
    let (bx0, by0, bx1, by1) = (b.x as i64, b.y as i64, b.right() as i64, b.bottom() as i64);
    ax0 - pad < bx1 + pad && ax1 + pad > bx0 - pad && ay0 - pad < by1 + pad && ay1 + pad > by0 - pad
}

fn union(a: &Rect, b: &Rect) -> Rect {
    let x = a.x.min(b.x);
    let y = a.y.min(b.y);
    Rect::new(x, y, a.right().max(b.right()) - x, a.bottom().max(b.bottom()) - y)
}

fn centre_distance(a: &Rect, b: &Rect) -> f64 {
    let dx = (a.x as f64 + a.w as f64 / 2.0) - (b.x as f64 + b.w as f64 / 2.0);
    let dy = (a.y as f64 + a.h as f64 / 2.0) - (b.y as f64 + b.h as f64 / 2.0);
    dx.hypot(dy)
}

/// Union boxes whose padded bounds overlap until no pair touches.
fn merge_touching(mut boxes: Vec<Rect>, pad: u32) -> Vec<Rect> {
    'restart: loop {
        for i in 0..boxes.len() {
            for j in i + 1..boxes.len() {
                if overlaps_padded(&boxes[i], &boxes[j], pad) {
                    boxes[i] = union(&boxes[i], &boxes[j]);
                    boxes.remove(j);
                    continue 'restart;
                }
            }
        }
        return boxes;
    }
}

/// Merge the two nearest boxes (by centre) until at most `max` remain.
fn cap_region_count(boxes: &mut Vec<Rect>, max: usize) {
    while boxes.len() > max {
        let mut best = (0, 1, f64::INFINITY);
        for i in 0..boxes.len() {
            for j in i + 1..boxes.len() {
                let d = centre_distance(&boxes[i], &boxes[j]);
                if d < best.2 {
                    best = (i, j, d);
                }
            }
        }
        let (i, j, _) = best;
        let merged = union(&boxes[i], &boxes[j]);
        boxes.remove(j);
        boxes[i] = merged;
    }
}

fn scale_box(b: &Rect, sx: f64, sy: f64, image: Dimensions) -> Rect {
    let x = ((b.x as f64 * sx).round() as u32).min(image.width - 1);
    let y = ((b.y as f64 * sy).round() as u32).min(image.height - 1);
    let w = ((b.w as f64 * sx).round() as u32).clamp(1, image.width - x);
    let h = ((b.h as f64 * sy).round() as u32).clamp(1, image.height - y);
    Rect::new(x, y, w, h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn mask_with_blocks(w: u32, h: u32, blocks: &[(u32, u32, u32, u32)]) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            let inside = blocks
                .iter()
                .any(|&(bx, by, bw, bh)| x >= bx && x < bx + bw && y >= by && y < by + bh);
            if inside {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    #[test]
    fn test_single_kept_block_becomes_one_region() {
        let mask = mask_with_blocks(640, 640, &[(64, 64, 512, 512)]);
        let plan = generate(&mask, Dimensions::new(640, 640), &OcrPlanOptions::default()).unwrap();

        assert!(plan.use_regions);
        assert_eq!(plan.reasons, vec![Reason::OcrPlanRegions, Reason::RegionCount(1)]);
        assert_eq!(plan.regions.len(), 1);
        assert_eq!(plan.regions[0].bbox, Rect::new(56, 56, 528, 528));
        assert!((plan.content_frac - 0.64).abs() < 1e-9);
    }

    #[test]
    fn test_region_count_is_capped_and_sorted() {
        let mut blocks = Vec::new();
        for &y in &[50, 350] {
            for &x in &[20, 220, 420, 620] {
                blocks.push((x, y, 150, 150));
            }
        }
        let mask = mask_with_blocks(800, 600, &blocks);
        let plan = generate(&mask, Dimensions::new(800, 600), &OcrPlanOptions::default()).unwrap();

        assert!(plan.use_regions);
        assert_eq!(plan.regions.len(), 6);
        assert_eq!(plan.reasons[1].to_string(), "region_count=6");
        // the two top-row pairs were merged
        assert_eq!(plan.regions[0].bbox, Rect::new(12, 42, 366, 166));
        assert_eq!(plan.regions[1].bbox.x, 412);
        for pair in plan.regions.windows(2) {
            let (a, b) = (&pair[0].bbox, &pair[1].bbox);
            assert!((a.y, a.x) <= (b.y, b.x));
        }
        for (i, region) in plan.regions.iter().enumerate() {
            assert_eq!(region.index, i);
            assert!(region.bbox.is_within(plan.image_dimensions));
        }
    }

    #[test]
    fn test_sparse_mask_falls_back_to_full_image() {
        let mask = mask_with_blocks(400, 400, &[(0, 0, 120, 100)]);
        let plan = generate(&mask, Dimensions::new(400, 400), &OcrPlanOptions::default()).unwrap();

        assert!(!plan.use_regions);
        assert_eq!(plan.reasons[0], Reason::OcrPlanLowContent);
        assert_eq!(plan.reasons[1].to_string(), "content_frac=0.075");
        let effective = plan.effective_regions();
        assert_eq!(effective.len(), 1);
        assert_eq!(effective[0].bbox, Rect::new(0, 0, 400, 400));
        assert_eq!(effective[0].area_frac, 1.0);
    }

    #[test]
    fn test_all_white_mask_is_full_content() {
        let mask = GrayImage::from_pixel(300, 200, Luma([255]));
        let plan = generate(&mask, Dimensions::new(300, 200), &OcrPlanOptions::default()).unwrap();
        assert!(!plan.use_regions);
        assert_eq!(plan.reasons[0], Reason::OcrPlanFullContent);
    }

    #[test]
    fn test_fragmented_content_has_no_significant_regions() {
        // isolated 3x3 cells cover half the mask but none is large enough
        let mask = GrayImage::from_fn(400, 400, |x, y| {
            if x % 4 < 3 && y % 4 < 3 {
                Luma([255])
            } else {
                Luma([0])
            }
        });
        let plan = generate(&mask, Dimensions::new(400, 400), &OcrPlanOptions::default()).unwrap();
        assert!(!plan.use_regions);
        assert_eq!(plan.reasons, vec![Reason::OcrPlanNoSignificantRegions]);
    }

    #[test]
    fn test_empty_mask_is_an_error() {
        let mask = GrayImage::new(0, 0);
        let err = generate(&mask, Dimensions::new(10, 10), &OcrPlanOptions::default()).unwrap_err();
        assert!(err.is_decode_error());
    }
}
