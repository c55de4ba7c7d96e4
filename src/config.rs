use crate::engagement::EngagementConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub detector: DetectorConfig,
    pub emotion: EmotionConfig,
    pub engagement: EngagementConfig,
    pub session: SessionConfig,
    pub annotate: AnnotateConfig,
}

/// Output tensor names for one feature pyramid level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrideConfig {
    pub stride: usize,
    pub scores: String,
    pub bbox_deltas: String,
    pub landmark_deltas: String,
    /// Base anchors `[x1, y1, x2, y2]` tiled at every cell of this level.
    pub base_anchors: Vec<[f32; 4]>,
}

impl StrideConfig {
    fn retinaface(stride: usize, base_anchors: Vec<[f32; 4]>) -> Self {
        Self {
            stride,
            scores: format!("face_rpn_cls_prob_reshape_stride{stride}"),
            bbox_deltas: format!("face_rpn_bbox_pred_stride{stride}"),
            landmark_deltas: format!("face_rpn_landmark_pred_stride{stride}"),
            base_anchors,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub model_path: PathBuf,
    pub input_name: String,
    pub strides: Vec<StrideConfig>,
    pub threshold: f32,
    pub nms_threshold: f32,
    /// Shorter image side is scaled toward this size...
    pub target_size: u32,
    /// ...unless the longer side would then exceed this one.
    pub max_size: u32,
    pub allow_upscaling: bool,
    pub align: bool,
    pub threads: Option<usize>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/retinaface.onnx"),
            input_name: "data".to_string(),
            strides: vec![
                StrideConfig::retinaface(32, vec![[-248., -248., 263., 263.], [-120., -120., 135., 135.]]),
                StrideConfig::retinaface(16, vec![[-56., -56., 71., 71.], [-24., -24., 39., 39.]]),
                StrideConfig::retinaface(8, vec![[-8., -8., 23., 23.], [0., 0., 15., 15.]]),
            ],
            threshold: 0.9,
            nms_threshold: 0.4,
            target_size: 1024,
            max_size: 1980,
            allow_upscaling: true,
            align: true,
            threads: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotionConfig {
    pub model_path: PathBuf,
    pub input_name: String,
    pub output_name: String,
    pub input_size: u32,
    pub threads: Option<usize>,
}

impl Default for EmotionConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/facial_expression.onnx"),
            input_name: "input".to_string(),
            output_name: "output".to_string(),
            input_size: 48,
            threads: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Wait between consecutive captures.
    pub interval_secs: u64,
    /// Per-capture analysis budget; overruns are logged, not fatal.
    pub capture_deadline_ms: Option<u32>,
    pub output_dir: PathBuf,
    pub store_path: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            capture_deadline_ms: None,
            output_dir: PathBuf::from("output"),
            store_path: PathBuf::from("static/engagement_scores.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotateConfig {
    pub enabled: bool,
    /// TTF/OTF font for overlay text. Boxes are still drawn without one.
    pub font_path: Option<PathBuf>,
    pub text_scale: f32,
}

impl Default for AnnotateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            font_path: None,
            text_scale: 20.,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {path:?}: {e}")))?;
        let config: Config = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("cannot parse {path:?}: {e}")))?;
        config.validate()?;

        info!("Loaded config from {path:?}");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let d = &self.detector;
        if !(0f32..=1.).contains(&d.threshold) || !(0f32..=1.).contains(&d.nms_threshold) {
            return Err(Error::Config(
                "detector thresholds must lie in [0, 1]".to_string(),
            ));
        }
        if d.target_size == 0 || d.max_size == 0 {
            return Err(Error::Config("detector sizes must be positive".to_string()));
        }
        if let Some(s) = d.strides.iter().find(|s| s.stride == 0 || s.base_anchors.is_empty()) {
            return Err(Error::Config(format!(
                "stride {} needs a positive stride and at least one anchor",
                s.stride
            )));
        }
        if self.emotion.input_size == 0 {
            return Err(Error::Config("emotion input size must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.detector.strides.len(), 3);
        assert_eq!(config.engagement.signals.emotion, 0.4);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"detector": {"threshold": 0.5}, "engagement": {"emotions": {"sad": 0.1}}}"#)
                .unwrap();
        assert_eq!(config.detector.threshold, 0.5);
        assert_eq!(config.detector.nms_threshold, 0.4);
        assert_eq!(config.engagement.emotions.sad, 0.1);
        assert_eq!(config.engagement.emotions.happy, 1.0);
        assert_eq!(config.session.interval_secs, 60);
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let mut config = Config::default();
        config.detector.nms_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/classwatch.json")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
