//! Typed job parameters.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::encoding::DEFAULT_CRF;
use crate::job::JobType;
use crate::upload::UploadId;

/// Which side of a matched pair plays first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
pub enum ConcatOrder {
    #[default]
    #[serde(rename = "A_THEN_B", alias = "a_then_b", alias = "A_then_B")]
    AThenB,
    #[serde(rename = "B_THEN_A", alias = "b_then_a", alias = "B_then_A")]
    BThenA,
}

impl ConcatOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConcatOrder::AThenB => "A_THEN_B",
            ConcatOrder::BThenA => "B_THEN_A",
        }
    }

    /// Arrange an (a, b) pair into playback order.
    pub fn arrange<T>(&self, a: T, b: T) -> (T, T) {
        match self {
            ConcatOrder::AThenB => (a, b),
            ConcatOrder::BThenA => (b, a),
        }
    }
}

/// Horizontal placement of a text overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverlayAlign {
    /// Centered horizontally, `y` from the top
    #[default]
    TopCenter,
    /// Use `x`/`y` as given
    Manual,
}

/// Text burned into one side of a concat pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct OverlayConfig {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
    /// Seconds the text stays on screen; 0 means the full clip
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub duration: f64,
    #[serde(default = "default_font_size")]
    #[validate(range(min = 1, max = 512))]
    pub font_size: u32,
    #[serde(default = "default_font_color")]
    pub font_color: String,
    #[serde(default)]
    pub font_family: String,
    #[serde(default = "default_font_style")]
    pub font_style: String,
    #[serde(default)]
    pub align: OverlayAlign,
    #[serde(default = "default_max_width_ratio")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub max_width_ratio: f64,
    #[serde(default = "default_stroke_width")]
    pub stroke_width: u32,
    #[serde(default = "default_stroke_color")]
    pub stroke_color: String,
    #[serde(default = "default_line_spacing")]
    pub line_spacing: u32,
    /// 0 = auto
    #[serde(default)]
    pub box_width: u32,
    /// 0 = auto
    #[serde(default)]
    pub box_height: u32,
}

fn default_font_size() -> u32 {
    48
}
fn default_font_color() -> String {
    "white".to_string()
}
fn default_font_style() -> String {
    "Normal".to_string()
}
fn default_max_width_ratio() -> f64 {
    0.85
}
fn default_stroke_width() -> u32 {
    4
}
fn default_stroke_color() -> String {
    "black".to_string()
}
fn default_line_spacing() -> u32 {
    6
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            text: String::new(),
            x: 0,
            y: 0,
            duration: 0.0,
            font_size: default_font_size(),
            font_color: default_font_color(),
            font_family: String::new(),
            font_style: default_font_style(),
            align: OverlayAlign::default(),
            max_width_ratio: default_max_width_ratio(),
            stroke_width: default_stroke_width(),
            stroke_color: default_stroke_color(),
            line_spacing: default_line_spacing(),
            box_width: 0,
            box_height: 0,
        }
    }
}

impl OverlayConfig {
    /// Blank text disables the overlay.
    pub fn is_enabled(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// Parameters for a pairwise concatenation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct ConcatParams {
    #[validate(length(min = 1, message = "files_a must not be empty"))]
    pub files_a: Vec<UploadId>,
    #[validate(length(min = 1, message = "files_b must not be empty"))]
    pub files_b: Vec<UploadId>,
    #[serde(default)]
    pub order: ConcatOrder,
    #[serde(default = "default_crf")]
    #[validate(range(max = 51, message = "crf must be between 0 and 51"))]
    pub crf: u8,
    #[serde(default = "default_true")]
    pub try_fast_copy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub overlay_a: Option<OverlayConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub overlay_b: Option<OverlayConfig>,
}

impl ConcatParams {
    pub fn new(files_a: Vec<UploadId>, files_b: Vec<UploadId>) -> Self {
        Self {
            files_a,
            files_b,
            order: ConcatOrder::default(),
            crf: DEFAULT_CRF,
            try_fast_copy: true,
            overlay_a: None,
            overlay_b: None,
        }
    }
}

/// Parameters for a UGC composition job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct UgcParams {
    #[validate(length(min = 1, message = "files must not be empty"))]
    pub files: Vec<UploadId>,
    /// Image layer placed at (`add1_x`, `add1_y`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add1_file: Option<UploadId>,
    /// Looping video layer blended at `add2_opacity`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add2_file: Option<UploadId>,
    /// Clip appended after the main video
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_end_file: Option<UploadId>,
    #[serde(default = "default_add1_x")]
    pub add1_x: i32,
    #[serde(default = "default_add1_y")]
    pub add1_y: i32,
    #[serde(default = "default_add2_opacity")]
    #[validate(range(min = 0.0, max = 1.0, message = "add2_opacity must be between 0 and 1"))]
    pub add2_opacity: f64,
    #[serde(default = "default_crf")]
    #[validate(range(max = 51, message = "crf must be between 0 and 51"))]
    pub crf: u8,
    #[serde(default = "default_true")]
    pub enable_captions: bool,
    /// Caption provider credential, passed through opaquely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl UgcParams {
    pub fn new(files: Vec<UploadId>) -> Self {
        Self {
            files,
            add1_file: None,
            add2_file: None,
            clip_end_file: None,
            add1_x: default_add1_x(),
            add1_y: default_add1_y(),
            add2_opacity: default_add2_opacity(),
            crf: DEFAULT_CRF,
            enable_captions: true,
            api_key: None,
        }
    }
}

fn default_crf() -> u8 {
    DEFAULT_CRF
}
fn default_true() -> bool {
    true
}
fn default_add1_x() -> i32 {
    190
}
fn default_add1_y() -> i32 {
    890
}
fn default_add2_opacity() -> f64 {
    0.5
}

/// Parameters of a job, tagged by job type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobParams {
    Concat(ConcatParams),
    Ugc(UgcParams),
}

impl JobParams {
    pub fn job_type(&self) -> JobType {
        match self {
            JobParams::Concat(_) => JobType::Concat,
            JobParams::Ugc(_) => JobType::Ugc,
        }
    }

    /// Every upload the job refers to, in parameter order.
    pub fn upload_ids(&self) -> Vec<&UploadId> {
        match self {
            JobParams::Concat(p) => p.files_a.iter().chain(p.files_b.iter()).collect(),
            JobParams::Ugc(p) => p
                .files
                .iter()
                .chain(p.add1_file.iter())
                .chain(p.add2_file.iter())
                .chain(p.clip_end_file.iter())
                .collect(),
        }
    }

    /// Run field-level validation for the wrapped parameters.
    pub fn validate(&self) -> Result<(), validator::ValidationErrors> {
        match self {
            JobParams::Concat(p) => p.validate(),
            JobParams::Ugc(p) => p.validate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_defaults() {
        let params: ConcatParams =
            serde_json::from_str(r#"{"files_a": ["aaaaaaaa"], "files_b": ["bbbbbbbb"]}"#).unwrap();
        assert_eq!(params.order, ConcatOrder::AThenB);
        assert_eq!(params.crf, 18);
        assert!(params.try_fast_copy);
        assert!(params.overlay_a.is_none());
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_order_accepts_aliases() {
        for raw in ["\"A_THEN_B\"", "\"a_then_b\"", "\"A_then_B\""] {
            let order: ConcatOrder = serde_json::from_str(raw).unwrap();
            assert_eq!(order, ConcatOrder::AThenB);
        }
        let order: ConcatOrder = serde_json::from_str("\"b_then_a\"").unwrap();
        assert_eq!(order, ConcatOrder::BThenA);
        assert!(serde_json::from_str::<ConcatOrder>("\"sideways\"").is_err());
        assert_eq!(serde_json::to_string(&ConcatOrder::BThenA).unwrap(), "\"B_THEN_A\"");
    }

    #[test]
    fn test_order_arrange() {
        assert_eq!(ConcatOrder::AThenB.arrange("a", "b"), ("a", "b"));
        assert_eq!(ConcatOrder::BThenA.arrange("a", "b"), ("b", "a"));
    }

    #[test]
    fn test_concat_validation() {
        let mut params = ConcatParams::new(vec![], vec![UploadId::new()]);
        assert!(params.validate().is_err());

        params.files_a.push(UploadId::new());
        params.crf = 60;
        let errors = params.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("crf"));

        params.crf = 23;
        params.overlay_a = Some(OverlayConfig {
            max_width_ratio: 2.0,
            ..OverlayConfig::default()
        });
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_ugc_defaults_and_validation() {
        let params: UgcParams = serde_json::from_str(r#"{"files": ["aaaaaaaa"]}"#).unwrap();
        assert_eq!(params.add1_x, 190);
        assert_eq!(params.add1_y, 890);
        assert!((params.add2_opacity - 0.5).abs() < f64::EPSILON);
        assert!(params.enable_captions);
        assert!(params.validate().is_ok());

        let mut bad = params.clone();
        bad.add2_opacity = 1.5;
        assert!(bad.validate().is_err());

        let mut empty = params;
        empty.files.clear();
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_upload_ids_cover_optional_refs() {
        let mut params = UgcParams::new(vec![UploadId::from("src00001"), UploadId::from("src00002")]);
        params.add2_file = Some(UploadId::from("overlay01"));
        params.clip_end_file = Some(UploadId::from("endclip01"));
        let params = JobParams::Ugc(params);

        let ids: Vec<&str> = params.upload_ids().iter().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["src00001", "src00002", "overlay01", "endclip01"]);
        assert_eq!(params.job_type(), JobType::Ugc);
    }

    #[test]
    fn test_overlay_enabled() {
        let mut overlay = OverlayConfig::default();
        assert!(!overlay.is_enabled());
        overlay.text = "   ".into();
        assert!(!overlay.is_enabled());
        overlay.text = "Part 1".into();
        assert!(overlay.is_enabled());
    }

    #[test]
    fn test_params_tagged_by_type() {
        let params = JobParams::Concat(ConcatParams::new(
            vec![UploadId::from("aaaaaaaa")],
            vec![UploadId::from("bbbbbbbb")],
        ));
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["type"], "concat");
        let back: JobParams = serde_json::from_value(value).unwrap();
        assert_eq!(back, params);
    }
}
