//! Recognition profile selection per OCR region.
//!
//! The catalog is closed: three profiles, fixed at build time.

use crate::planning::ocr_plan::OcrRegion;
use crate::preprocessing::types::Reason;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const METHOD: &str = "region_profile_rules_v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VisionFeature {
    DocumentTextDetection,
    TextDetection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    None,
    OneRetryWithAlternateHints,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrProfile {
    LedgerTable,
    NarrativeBlock,
    Unknown,
}

impl OcrProfile {
    pub const ALL: [OcrProfile; 3] = [
        OcrProfile::LedgerTable,
        OcrProfile::NarrativeBlock,
        OcrProfile::Unknown,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OcrProfile::LedgerTable => "ledger_table",
            OcrProfile::NarrativeBlock => "narrative_block",
            OcrProfile::Unknown => "unknown",
        }
    }

    /// Ordered language hints for the first attempt.
    pub fn language_hints(self) -> &'static [&'static str] {
        match self {
            OcrProfile::LedgerTable | OcrProfile::Unknown => &["el", "ru", "en"],
            OcrProfile::NarrativeBlock => &["el", "en", "ru"],
        }
    }

    /// Reordered hints for the single permitted retry; empty when none is allowed.
    pub fn alternate_hints(self) -> &'static [&'static str] {
        match self {
            OcrProfile::LedgerTable => &["ru", "el", "en"],
            OcrProfile::NarrativeBlock => &["en", "el", "ru"],
            OcrProfile::Unknown => &[],
        }
    }

    pub fn vision_feature(self) -> VisionFeature {
        match self {
            OcrProfile::NarrativeBlock => VisionFeature::TextDetection,
            OcrProfile::LedgerTable | OcrProfile::Unknown => VisionFeature::DocumentTextDetection,
        }
    }

    pub fn timeout_ms(self) -> Option<u64> {
        match self {
            OcrProfile::LedgerTable => Some(90_000),
            OcrProfile::NarrativeBlock => Some(60_000),
            OcrProfile::Unknown => None,
        }
    }

    pub fn retry_policy(self) -> RetryPolicy {
        match self {
            OcrProfile::Unknown => RetryPolicy::None,
            _ => RetryPolicy::OneRetryWithAlternateHints,
        }
    }

    /// Serializable snapshot used by the info endpoint.
    pub fn spec(self) -> ProfileSpec {
        ProfileSpec {
            name: self.name(),
            language_hints: self.language_hints(),
            alternate_hints: self.alternate_hints(),
            vision_feature: self.vision_feature(),
            timeout_ms: self.timeout_ms(),
            retry_policy: self.retry_policy(),
        }
    }
}

impl fmt::Display for OcrProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileSpec {
    pub name: &'static str,
    pub language_hints: &'static [&'static str],
    pub alternate_hints: &'static [&'static str],
    pub vision_feature: VisionFeature,
    pub timeout_ms: Option<u64>,
    pub retry_policy: RetryPolicy,
}

/// Sacramental record types that are always tabular ledgers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Baptism,
    Marriage,
    Funeral,
    Death,
    Chrismation,
}

impl RecordType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "baptism" => Some(RecordType::Baptism),
            "marriage" => Some(RecordType::Marriage),
            "funeral" => Some(RecordType::Funeral),
            "death" => Some(RecordType::Death),
            "chrismation" => Some(RecordType::Chrismation),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordType::Baptism => "baptism",
            RecordType::Marriage => "marriage",
            RecordType::Funeral => "funeral",
            RecordType::Death => "death",
            RecordType::Chrismation => "chrismation",
        }
    }
}

/// Job-level facts supplied by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageContext {
    pub record_type: Option<String>,
    pub layout_template_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileOptions {
    pub large_dense_min_area: f64,
    pub large_dense_min_aspect: f64,
    pub small_sparse_max_area: f64,
}

impl Default for ProfileOptions {
    fn default() -> Self {
        Self {
            large_dense_min_area: 0.15,
            large_dense_min_aspect: 0.8,
            small_sparse_max_area: 0.08,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Fallback {
    pub enabled: bool,
    pub alternate_hints: &'static [&'static str],
}

#[derive(Debug, Clone, Serialize)]
pub struct RegionProfileAssignment {
    pub region_index: usize,
    pub profile: OcrProfile,
    pub vision_feature: VisionFeature,
    pub language_hints: &'static [&'static str],
    pub fallback: Fallback,
    pub selection_reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfilePlan {
    pub method: &'static str,
    pub regions: Vec<RegionProfileAssignment>,
    pub reasons: Vec<Reason>,
}

impl ProfilePlan {
    pub fn count(&self, profile: OcrProfile) -> usize {
        self.regions.iter().filter(|a| a.profile == profile).count()
    }
}

/// Page-wide rule that overrides geometry, if any.
enum ContextRule {
    RecordType(RecordType),
    LayoutTemplate(u64),
}

/// Assign a profile to every region. Rules are checked in priority order:
/// known record type, then layout template, then region geometry.
pub fn select_profiles(
    regions: &[OcrRegion],
    context: &PageContext,
    options: &ProfileOptions,
) -> ProfilePlan {
    let rule = context
        .record_type
        .as_deref()
        .and_then(RecordType::parse)
        .map(ContextRule::RecordType)
        .or(context.layout_template_id.map(ContextRule::LayoutTemplate));

    if let (None, Some(raw)) = (&rule, context.record_type.as_deref()) {
        tracing::warn!(record_type = raw, "unrecognised record type, using geometry");
    }

    let assignments: Vec<RegionProfileAssignment> = regions
        .iter()
        .map(|region| {
            let (profile, selection_reason) = match &rule {
                Some(ContextRule::RecordType(kind)) => {
                    (OcrProfile::LedgerTable, format!("record_type:{}", kind.as_str()))
                }
                Some(ContextRule::LayoutTemplate(id)) => {
                    (OcrProfile::LedgerTable, format!("layout_template:{}", id))
                }
                None => by_geometry(region, options),
            };
            let retry = profile.retry_policy() == RetryPolicy::OneRetryWithAlternateHints;
            RegionProfileAssignment {
                region_index: region.index,
                profile,
                vision_feature: profile.vision_feature(),
                language_hints: profile.language_hints(),
                fallback: Fallback {
                    enabled: retry,
                    alternate_hints: profile.alternate_hints(),
                },
                selection_reason,
            }
        })
        .collect();

    let mut reasons = Vec::new();
    match rule {
        Some(ContextRule::RecordType(kind)) => {
            reasons.push(Reason::RecordTypeMatch(kind.as_str().to_string()))
        }
        Some(ContextRule::LayoutTemplate(id)) => reasons.push(Reason::LayoutTemplate(id)),
        None => {}
    }

    let mut plan = ProfilePlan {
        method: METHOD,
        regions: assignments,
        reasons,
    };
    let counts = OcrProfile::ALL
        .iter()
        .filter_map(|&p| match plan.count(p) {
            0 => None,
            n => Some(format!("{}={}", p, n)),
        })
        .collect::<Vec<_>>()
        .join(",");
    plan.reasons.push(Reason::Profiles(counts));

    tracing::debug!(regions = plan.regions.len(), "selected OCR profiles");
    plan
}

fn by_geometry(region: &OcrRegion, options: &ProfileOptions) -> (OcrProfile, String) {
    let area = region.area_frac;
    let aspect = region.aspect();
    let (profile, label) =
        if area >= options.large_dense_min_area && aspect >= options.large_dense_min_aspect {
            (OcrProfile::LedgerTable, "large_dense")
        } else if area <= options.small_sparse_max_area {
            (OcrProfile::NarrativeBlock, "small_sparse")
        } else {
            (OcrProfile::Unknown, "ambiguous")
        };
    (
        profile,
        format!("geometry:{}(area={:.3},aspect={:.2})", label, area, aspect),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessing::types::{Dimensions, Rect};

    fn region(index: usize, w: u32, h: u32) -> OcrRegion {
        let image = Dimensions::new(1000, 1000);
        let bbox = Rect::new(0, 0, w, h);
        OcrRegion {
            index,
            bbox,
            box_norm: bbox.normalized(image),
            area_frac: bbox.area() as f64 / image.area() as f64,
        }
    }

    #[test]
    fn test_large_dense_region_is_ledger_table() {
        // 58% of the page at aspect 1.75
        let r = OcrRegion {
            area_frac: 0.58,
            ..region(0, 1000, 571)
        };
        let plan = select_profiles(&[r], &PageContext::default(), &ProfileOptions::default());

        let a = &plan.regions[0];
        assert_eq!(a.profile, OcrProfile::LedgerTable);
        assert!(a.selection_reason.contains("geometry:large_dense"), "{}", a.selection_reason);
        assert_eq!(a.vision_feature, VisionFeature::DocumentTextDetection);
        assert_eq!(a.language_hints, &["el", "ru", "en"]);
        assert!(a.fallback.enabled);
        assert_eq!(a.fallback.alternate_hints, &["ru", "el", "en"]);
        assert_eq!(plan.reasons, vec![Reason::Profiles("ledger_table=1".into())]);
    }

    #[test]
    fn test_geometry_classes() {
        let regions = vec![region(0, 200, 200), region(1, 500, 800), region(2, 300, 400)];
        let plan = select_profiles(&regions, &PageContext::default(), &ProfileOptions::default());

        // 4% area
        assert_eq!(plan.regions[0].profile, OcrProfile::NarrativeBlock);
        assert_eq!(plan.regions[0].vision_feature, VisionFeature::TextDetection);
        // 40% area but tall and narrow
        assert_eq!(plan.regions[1].profile, OcrProfile::Unknown);
        assert!(plan.regions[1].selection_reason.starts_with("geometry:ambiguous"));
        assert!(!plan.regions[1].fallback.enabled);
        assert!(plan.regions[1].fallback.alternate_hints.is_empty());
        // 12% area
        assert_eq!(plan.regions[2].profile, OcrProfile::Unknown);

        assert_eq!(
            plan.reasons.last().map(|r| r.to_string()),
            Some("PROFILES:narrative_block=1,unknown=2".to_string())
        );
    }

    #[test]
    fn test_record_type_overrides_geometry() {
        let context = PageContext {
            record_type: Some("Baptism".into()),
            layout_template_id: Some(7),
        };
        let plan = select_profiles(&[region(0, 100, 100)], &context, &ProfileOptions::default());

        assert_eq!(plan.regions[0].profile, OcrProfile::LedgerTable);
        assert_eq!(plan.regions[0].selection_reason, "record_type:baptism");
        assert_eq!(plan.reasons[0].to_string(), "RECORD_TYPE_MATCH:baptism");
    }

    #[test]
    fn test_layout_template_applies_when_record_type_unknown() {
        let context = PageContext {
            record_type: Some("census".into()),
            layout_template_id: Some(42),
        };
        let plan = select_profiles(&[region(0, 100, 100)], &context, &ProfileOptions::default());

        assert_eq!(plan.regions[0].profile, OcrProfile::LedgerTable);
        assert_eq!(plan.regions[0].selection_reason, "layout_template:42");
        assert_eq!(plan.reasons[0], Reason::LayoutTemplate(42));
    }

    #[test]
    fn test_catalog_is_fixed() {
        let specs: Vec<ProfileSpec> = OcrProfile::ALL.iter().map(|p| p.spec()).collect();
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0].timeout_ms, Some(90_000));
        assert_eq!(specs[1].timeout_ms, Some(60_000));
        assert_eq!(specs[2].timeout_ms, None);
        assert_eq!(specs[2].retry_policy, RetryPolicy::None);
        assert_eq!(
            serde_json::to_value(&specs[1]).unwrap()["vision_feature"],
            "TEXT_DETECTION"
        );
    }
}
