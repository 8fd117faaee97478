//! OCR planning: which parts of a page to send to recognition, and with
//! which recognition profile.

pub mod ocr_plan;
pub mod profiles;

pub use ocr_plan::{generate as generate_ocr_plan, OcrPlan, OcrPlanOptions, OcrRegion};
pub use profiles::{
    select_profiles, OcrProfile, PageContext, ProfileOptions, ProfilePlan, RecordType,
    RegionProfileAssignment, RetryPolicy, VisionFeature,
};
