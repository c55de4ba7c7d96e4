use crate::error::Result;
use crate::shapes::{PointF32, Rect};
use image::RgbImage;
use serde::{Deserialize, Serialize};

pub use detection::{Preprocessed, RetinaFaceDetector, StrideOutput, decode_detections, preprocess};
pub use emotion::{
    Emotion, EmotionClassificationFailure, EmotionClassifier, EmotionReading, OnnxEmotionClassifier,
};

mod detection;
mod emotion;
mod model;

/// Five or six facial landmarks. Eye and mouth sides are named from the
/// subject's point of view, so `right_eye` appears on the left of the image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmarks {
    pub nose: PointF32,
    pub left_eye: PointF32,
    pub right_eye: PointF32,
    pub chin: Option<PointF32>,
    pub mouth_left: Option<PointF32>,
    pub mouth_right: Option<PointF32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub id: String,
    pub bounds: Rect,
    pub landmarks: Landmarks,
    pub score: f32,
}

pub trait FaceDetector: Send + Sync {
    /// Detect faces in a full-resolution frame, best score first. No faces is
    /// `Ok(vec![])`, not an error.
    fn detect(&self, img: &RgbImage) -> Result<Vec<DetectedFace>>;
}
