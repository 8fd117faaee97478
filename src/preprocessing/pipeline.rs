use crate::config::PipelineConfig;
use crate::error::PrepError;
use crate::planning::ocr_plan::{self, OcrPlan};
use crate::planning::profiles::{select_profiles, PageContext, ProfilePlan};
use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::steps::border::BorderDetails;
use super::steps::denoise::DenoiseDetails;
use super::steps::deskew::DeskewDetails;
use super::steps::normalize::BackgroundDetails;
use super::steps::redaction::RedactionResult;
use super::steps::roi::RoiDetails;
use super::steps::split::SplitDetails;
use super::steps::{border, denoise, deskew, normalize, redaction, roi, split};
use super::types::{ensure_non_empty, Dimensions, StageResult};

/// Stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Border,
    Deskew,
    RoiCrop,
    SplitSpread,
    BgNormalize,
    Denoise,
    Redaction,
    OcrPlan,
    ProfileSelection,
}

impl StageKind {
    pub const ORDER: [StageKind; 9] = [
        StageKind::Border,
        StageKind::Deskew,
        StageKind::RoiCrop,
        StageKind::SplitSpread,
        StageKind::BgNormalize,
        StageKind::Denoise,
        StageKind::Redaction,
        StageKind::OcrPlan,
        StageKind::ProfileSelection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Border => "border",
            Self::Deskew => "deskew",
            Self::RoiCrop => "roi_crop",
            Self::SplitSpread => "split_spread",
            Self::BgNormalize => "bg_normalize",
            Self::Denoise => "denoise",
            Self::Redaction => "redaction",
            Self::OcrPlan => "ocr_plan",
            Self::ProfileSelection => "profile_selection",
        }
    }

    /// Algorithm identifier reported by the stage.
    pub fn method(&self) -> &'static str {
        match self {
            Self::Border => border::METHOD,
            Self::Deskew => deskew::METHOD,
            Self::RoiCrop => roi::METHOD,
            Self::SplitSpread => split::METHOD,
            Self::BgNormalize => normalize::METHOD,
            Self::Denoise => denoise::METHOD,
            Self::Redaction => redaction::METHOD,
            Self::OcrPlan => ocr_plan::METHOD,
            Self::ProfileSelection => crate::planning::profiles::METHOD,
        }
    }

    /// The stage whose no-op allows this one to be skipped. Geometric
    /// stages have none and always run.
    pub fn upstream(&self) -> Option<StageKind> {
        match self {
            Self::Denoise => Some(Self::BgNormalize),
            Self::OcrPlan => Some(Self::Redaction),
            Self::ProfileSelection => Some(Self::OcrPlan),
            _ => None,
        }
    }
}

/// Whether a stage still runs after its upstream stage did nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagePolicy {
    #[default]
    AlwaysAnalyze,
    SkipAfterNoOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageSide {
    Full,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    Ran,
    Skipped { upstream: StageKind },
}

/// Timing information for a single stage
#[derive(Debug, Clone, Serialize)]
pub struct StepTiming {
    pub stage: StageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<PageSide>,
    #[serde(flatten)]
    pub status: StageStatus,
    pub time_ms: u64,
}

/// Diagnostics for one page (a split half, or the whole image).
#[derive(Debug, Clone, Serialize)]
pub struct PageReport {
    pub side: PageSide,
    pub dimensions: Dimensions,
    pub background: StageResult<(), BackgroundDetails>,
    pub denoise: Option<StageResult<(), DenoiseDetails>>,
    pub redaction: RedactionResult,
    pub ocr_plan: Option<OcrPlan>,
    pub profiles: Option<ProfilePlan>,
}

/// Serializable record of a whole pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub input_dimensions: Dimensions,
    pub policy: StagePolicy,
    pub border: StageResult<(), BorderDetails>,
    pub deskew: StageResult<(), DeskewDetails>,
    pub roi_crop: StageResult<(), RoiDetails>,
    pub split_spread: StageResult<(), SplitDetails>,
    pub pages: Vec<PageReport>,
    pub steps: Vec<StepTiming>,
    pub total_time_ms: u64,
}

/// Final buffers for one page.
#[derive(Debug, Clone)]
pub struct PageOutput {
    pub side: PageSide,
    pub image: DynamicImage,
    pub mask: GrayImage,
}

/// Report plus the images it describes (not serialized).
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub report: PipelineReport,
    pub pages: Vec<PageOutput>,
}

/// Runs the stage list over one scanned image.
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process an image through every stage in order.
    pub fn process(
        &self,
        image: DynamicImage,
        context: &PageContext,
    ) -> Result<PipelineOutput, PrepError> {
        let start = Instant::now();
        let input_dimensions = ensure_non_empty(&image)?;
        let cfg = &self.config;
        let mut steps = Vec::new();

        let mut img = image;
        let border = self.run_step(StageKind::Border, None, &mut steps, || {
            border::apply(&img, &cfg.border)
        })?;
        let border = advance(&mut img, border);

        let deskew = self.run_step(StageKind::Deskew, None, &mut steps, || {
            deskew::apply(&img, &cfg.deskew)
        })?;
        let deskew = advance(&mut img, deskew);

        let roi_crop = self.run_step(StageKind::RoiCrop, None, &mut steps, || {
            roi::apply(&img, &cfg.roi)
        })?;
        let roi_crop = advance(&mut img, roi_crop);

        let split = self.run_step(StageKind::SplitSpread, None, &mut steps, || {
            split::apply(&img, &cfg.split)
        })?;
        let split_spread = split.without_output();
        let pages = match split.into_output() {
            Some(halves) => vec![(PageSide::Left, halves.left), (PageSide::Right, halves.right)],
            None => vec![(PageSide::Full, img)],
        };

        let mut page_reports = Vec::with_capacity(pages.len());
        let mut page_outputs = Vec::with_capacity(pages.len());
        for (side, page) in pages {
            let (report, output) = self.process_page(side, page, context, &mut steps)?;
            page_reports.push(report);
            page_outputs.push(output);
        }

        let total_time_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            pages = page_reports.len(),
            border = border.is_applied(),
            deskew = deskew.is_applied(),
            roi = roi_crop.is_applied(),
            split = split_spread.is_applied(),
            total_time_ms,
            "pipeline finished"
        );

        Ok(PipelineOutput {
            report: PipelineReport {
                input_dimensions,
                policy: cfg.policy,
                border,
                deskew,
                roi_crop,
                split_spread,
                pages: page_reports,
                steps,
                total_time_ms,
            },
            pages: page_outputs,
        })
    }

    fn process_page(
        &self,
        side: PageSide,
        image: DynamicImage,
        context: &PageContext,
        steps: &mut Vec<StepTiming>,
    ) -> Result<(PageReport, PageOutput), PrepError> {
        let cfg = &self.config;
        let page = Some(side);
        let dimensions = ensure_non_empty(&image)?;
        let mut img = image;

        let background = self.run_step(StageKind::BgNormalize, page, steps, || {
            normalize::apply(&img, &cfg.background)
        })?;
        let background = advance(&mut img, background);

        let denoise = if self.skips(StageKind::Denoise, background.is_applied(), page, steps) {
            None
        } else {
            let result = self.run_step(StageKind::Denoise, page, steps, || {
                denoise::apply(&img, &cfg.denoise)
            })?;
            Some(advance(&mut img, result))
        };

        let redaction = self.run_step(StageKind::Redaction, page, steps, || {
            redaction::apply(&img, &cfg.redaction)
        })?;

        let ocr_plan = if self.skips(StageKind::OcrPlan, redaction.is_applied(), page, steps) {
            None
        } else {
            let dims = Dimensions::of(&img);
            Some(self.run_step(StageKind::OcrPlan, page, steps, || {
                ocr_plan::generate(&redaction.mask, dims, &cfg.ocr_plan)
            })?)
        };

        let uses_regions = ocr_plan.as_ref().is_some_and(|p| p.use_regions);
        let profiles = match &ocr_plan {
            Some(plan) if !self.skips(StageKind::ProfileSelection, uses_regions, page, steps) => {
                Some(self.run_step(StageKind::ProfileSelection, page, steps, || {
                    Ok(select_profiles(
                        &plan.effective_regions(),
                        context,
                        &cfg.profiles,
                    ))
                })?)
            }
            Some(_) => None,
            None => {
                self.record_skip(StageKind::ProfileSelection, page, steps);
                None
            }
        };

        let output = PageOutput {
            side,
            image: img,
            mask: redaction.mask.clone(),
        };
        let report = PageReport {
            side,
            dimensions,
            background,
            denoise,
            redaction,
            ocr_plan,
            profiles,
        };
        Ok((report, output))
    }

    /// Under `SkipAfterNoOp`, record and report a skip when the upstream
    /// stage did nothing.
    fn skips(
        &self,
        stage: StageKind,
        upstream_applied: bool,
        page: Option<PageSide>,
        steps: &mut Vec<StepTiming>,
    ) -> bool {
        if self.config.policy == StagePolicy::AlwaysAnalyze || upstream_applied {
            return false;
        }
        self.record_skip(stage, page, steps);
        true
    }

    fn record_skip(&self, stage: StageKind, page: Option<PageSide>, steps: &mut Vec<StepTiming>) {
        let Some(upstream) = stage.upstream() else {
            return;
        };
        tracing::debug!(stage = stage.as_str(), upstream = upstream.as_str(), "stage skipped");
        steps.push(StepTiming {
            stage,
            page,
            status: StageStatus::Skipped { upstream },
            time_ms: 0,
        });
    }

    fn run_step<T, F>(
        &self,
        stage: StageKind,
        page: Option<PageSide>,
        steps: &mut Vec<StepTiming>,
        step_fn: F,
    ) -> Result<T, PrepError>
    where
        F: FnOnce() -> Result<T, PrepError>,
    {
        let step_start = Instant::now();
        let result = step_fn()?;
        steps.push(StepTiming {
            stage,
            page,
            status: StageStatus::Ran,
            time_ms: step_start.elapsed().as_millis() as u64,
        });
        Ok(result)
    }
}

/// Replace `current` with the stage output when applied; keep the record.
fn advance<D: Clone>(
    current: &mut DynamicImage,
    result: StageResult<DynamicImage, D>,
) -> StageResult<(), D> {
    let record = result.without_output();
    if let Some(output) = result.into_output() {
        *current = output;
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn blank_page() -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(300, 400, Luma([235])))
    }

    #[test]
    fn test_stage_order_and_dependencies() {
        let names: Vec<&str> = StageKind::ORDER.iter().map(|s| s.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "border",
                "deskew",
                "roi_crop",
                "split_spread",
                "bg_normalize",
                "denoise",
                "redaction",
                "ocr_plan",
                "profile_selection"
            ]
        );
        assert_eq!(StageKind::Denoise.upstream(), Some(StageKind::BgNormalize));
        assert_eq!(StageKind::Border.upstream(), None);
        assert_eq!(StageKind::OcrPlan.method(), "mask_connected_regions_v1");
    }

    #[test]
    fn test_blank_page_runs_every_stage() {
        let pipeline = Pipeline::new(PipelineConfig::default());
        let output = pipeline.process(blank_page(), &PageContext::default()).unwrap();
        let report = &output.report;

        assert!(!report.border.is_applied());
        assert!(!report.split_spread.is_applied());
        assert_eq!(report.pages.len(), 1);
        assert_eq!(report.pages[0].side, PageSide::Full);
        assert!(report.pages[0].denoise.is_some());
        assert!(report.pages[0].profiles.is_some());
        assert_eq!(report.steps.len(), 9);
        assert!(report.steps.iter().all(|s| s.status == StageStatus::Ran));

        // no output for a blank page: image passes through unchanged
        let image = &output.pages[0].image;
        assert_eq!((image.width(), image.height()), (300, 400));
    }

    #[test]
    fn test_skip_after_noop_policy() {
        // even dot lattice: flat background, and every tile carries some ink
        let page = DynamicImage::ImageLuma8(GrayImage::from_fn(320, 384, |x, y| {
            if x % 4 == 0 && y % 4 == 0 {
                Luma([20])
            } else {
                Luma([235])
            }
        }));
        let config = PipelineConfig {
            policy: StagePolicy::SkipAfterNoOp,
            ..Default::default()
        };
        let pipeline = Pipeline::new(config);
        let mut steps = Vec::new();
        let (report, output) = pipeline
            .process_page(PageSide::Full, page, &PageContext::default(), &mut steps)
            .unwrap();

        assert!(!report.background.is_applied());
        assert!(report.denoise.is_none());
        assert!(!report.redaction.is_applied());
        assert!(report.ocr_plan.is_none());
        assert!(report.profiles.is_none());
        assert!(output.mask.pixels().all(|p| p.0[0] == 255));

        let skipped: Vec<(StageKind, StageStatus)> = steps
            .iter()
            .filter(|s| matches!(s.status, StageStatus::Skipped { .. }))
            .map(|s| (s.stage, s.status))
            .collect();
        assert_eq!(
            skipped,
            vec![
                (
                    StageKind::Denoise,
                    StageStatus::Skipped {
                        upstream: StageKind::BgNormalize
                    }
                ),
                (
                    StageKind::OcrPlan,
                    StageStatus::Skipped {
                        upstream: StageKind::Redaction
                    }
                ),
                (
                    StageKind::ProfileSelection,
                    StageStatus::Skipped {
                        upstream: StageKind::OcrPlan
                    }
                ),
            ]
        );
    }

    #[test]
    fn test_report_serializes_without_images() {
        let output = Pipeline::new(PipelineConfig::default())
            .process(blank_page(), &PageContext::default())
            .unwrap();
        let value = serde_json::to_value(&output.report).unwrap();
        assert_eq!(value["border"]["applied"], false);
        assert_eq!(value["border"]["reasons"][0], "NO_BORDER");
        assert_eq!(value["pages"][0]["side"], "full");
        assert_eq!(value["steps"][0]["stage"], "border");
        assert_eq!(value["steps"][0]["status"], "ran");
        assert!(value["pages"][0]["redaction"].get("mask").is_none());
    }

    #[test]
    fn test_empty_image_is_fatal() {
        let image = DynamicImage::ImageLuma8(GrayImage::new(0, 0));
        let err = Pipeline::new(PipelineConfig::default())
            .process(image, &PageContext::default())
            .unwrap_err();
        assert!(err.is_decode_error());
    }
}
