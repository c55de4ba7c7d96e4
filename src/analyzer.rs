//! Per-face analysis of one frame: detect, then for every face crop its
//! region, estimate head pose, classify the expression and assign a zone.
//! Only detector construction can fail; everything after that degrades.

use crate::config::Config;
use crate::error::Result;
use crate::geometry::{align_face, rotate_facial_area};
use crate::pipeline::{
    DetectedFace, EmotionClassifier, EmotionReading, FaceDetector, OnnxEmotionClassifier, RetinaFaceDetector,
};
use crate::pose::{PnpPoseEstimator, Pose, PoseEstimator};
use crate::shapes::Rect;
use chrono::NaiveDateTime;
use image::{RgbImage, imageops};
use serde::{Deserialize, Serialize};
use tracing::{Level, debug, error, span, warn};

pub use annotate::{annotate, load_font, overlay_lines};
pub use export::{CSV_HEADER, save_results, write_csv};
pub use zone::Zone;

mod annotate;
mod export;
mod zone;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
    pub center_x: u32,
    pub center_y: u32,
}

impl From<Rect> for Position {
    fn from(r: Rect) -> Position {
        let center = r.center();
        Position {
            x1: r.x1,
            y1: r.y1,
            x2: r.x2,
            y2: r.y2,
            center_x: center.x,
            center_y: center.y,
        }
    }
}

impl Position {
    pub fn bounds(&self) -> Rect {
        Rect::new(self.x1, self.y1, self.x2, self.y2)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRecord {
    pub face_id: String,
    pub position: Position,
    pub zone: Zone,
    pub pose: Pose,
    pub emotion: EmotionReading,
    pub detector_score: f32,
    pub created_at: NaiveDateTime,
}

pub struct FaceAnalyzer {
    detector: Box<dyn FaceDetector>,
    classifier: Box<dyn EmotionClassifier>,
    pose: Box<dyn PoseEstimator>,
    align: bool,
}

impl FaceAnalyzer {
    pub fn new(
        detector: Box<dyn FaceDetector>,
        classifier: Box<dyn EmotionClassifier>,
        pose: Box<dyn PoseEstimator>,
        align: bool,
    ) -> FaceAnalyzer {
        FaceAnalyzer {
            detector,
            classifier,
            pose,
            align,
        }
    }

    /// ONNX detector and classifier with the PnP pose estimator.
    pub fn from_config(config: &Config) -> Result<FaceAnalyzer> {
        Ok(FaceAnalyzer::new(
            Box::new(RetinaFaceDetector::new(&config.detector)?),
            Box::new(OnnxEmotionClassifier::new(&config.emotion)?),
            Box::new(PnpPoseEstimator),
            config.detector.align,
        ))
    }

    /// One record per detected face, in detection order. A detector failure
    /// is logged and reads as a frame without faces.
    pub fn analyze(&self, img: &RgbImage) -> Vec<FaceRecord> {
        let span = span!(Level::INFO, "analyze_faces");
        let _guard = span.enter();

        let faces = match self.detector.detect(img) {
            Ok(faces) => faces,
            Err(e) => {
                error!("Face detection failed: {e}");
                return Vec::new();
            }
        };
        if faces.is_empty() {
            warn!("No faces detected");
        }

        faces.iter().map(|face| self.analyze_face(img, face)).collect()
    }

    fn analyze_face(&self, img: &RgbImage, face: &DetectedFace) -> FaceRecord {
        let span = span!(Level::DEBUG, "face", id = face.id.as_str());
        let _guard = span.enter();

        let (width, height) = img.dimensions();
        let bounds = face.bounds.clamp(width, height);

        let pose = self.pose.estimate(&face.landmarks, width, height);
        let emotion = match self.classifier.classify(&self.face_region(img, face, bounds)) {
            Ok(reading) => reading,
            Err(e) => {
                warn!("Emotion classification failed for {}: {e}", face.id);
                EmotionReading::unknown()
            }
        };
        let position = Position::from(bounds);
        let zone = Zone::for_center(position.center_x as f64, width);

        debug!("{} {zone} {:?} {:?}", face.id, emotion, pose);

        FaceRecord {
            face_id: face.id.clone(),
            position,
            zone,
            pose,
            emotion,
            detector_score: face.score,
            created_at: chrono::Local::now().naive_local(),
        }
    }

    /// Crop of the face, leveled on the eye line when alignment is enabled.
    fn face_region(&self, img: &RgbImage, face: &DetectedFace, bounds: Rect) -> RgbImage {
        if !self.align {
            return crop(img, bounds);
        }

        // The subject's right eye is on the left of the image.
        let (aligned, alignment) = align_face(img, face.landmarks.right_eye, face.landmarks.left_eye);
        let (width, height) = aligned.dimensions();
        let area = rotate_facial_area(bounds, alignment, width, height);
        crop(&aligned, area)
    }
}

fn crop(img: &RgbImage, area: Rect) -> RgbImage {
    let area = area.clamp(img.width(), img.height());
    imageops::crop_imm(img, area.x1, area.y1, area.width(), area.height()).to_image()
}

/// Draw the frame's overlay if annotation is enabled.
pub fn annotate_frame(img: &mut RgbImage, records: &[FaceRecord], config: &Config) -> Result<()> {
    if !config.annotate.enabled {
        return Ok(());
    }
    let font = config.annotate.font_path.as_deref().map(load_font).transpose()?;
    annotate(img, records, font.as_ref(), config.annotate.text_scale);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Emotion, EmotionClassificationFailure, Landmarks};
    use crate::shapes::PointF32;

    struct FixedDetector(Vec<DetectedFace>);

    impl FaceDetector for FixedDetector {
        fn detect(&self, _img: &RgbImage) -> Result<Vec<DetectedFace>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenDetector;

    impl FaceDetector for BrokenDetector {
        fn detect(&self, _img: &RgbImage) -> Result<Vec<DetectedFace>> {
            Err(crate::Error::Model("session lost".to_string()))
        }
    }

    /// Happy for wide crops, failure for empty ones.
    struct SizeClassifier;

    impl EmotionClassifier for SizeClassifier {
        fn classify(&self, region: &RgbImage) -> std::result::Result<EmotionReading, EmotionClassificationFailure> {
            if region.width() == 0 || region.height() == 0 {
                return Err(EmotionClassificationFailure::NoFace);
            }
            Ok(EmotionReading {
                label: Emotion::Happy,
                confidence: 0.8,
            })
        }
    }

    fn face(id: &str, bounds: Rect) -> DetectedFace {
        let c = bounds.center();
        let (cx, cy) = (c.x as f32, c.y as f32);
        DetectedFace {
            id: id.to_string(),
            bounds,
            landmarks: Landmarks {
                nose: PointF32::new(cx, cy),
                left_eye: PointF32::new(cx + 5., cy - 5.),
                right_eye: PointF32::new(cx - 5., cy - 5.),
                chin: None,
                mouth_left: Some(PointF32::new(cx + 4., cy + 6.)),
                mouth_right: Some(PointF32::new(cx - 4., cy + 6.)),
            },
            score: 0.98,
        }
    }

    fn analyzer(detector: Box<dyn FaceDetector>, align: bool) -> FaceAnalyzer {
        FaceAnalyzer::new(detector, Box::new(SizeClassifier), Box::new(PnpPoseEstimator), align)
    }

    #[test]
    fn test_records_follow_detection_order() {
        let img = RgbImage::new(300, 100);
        let faces = vec![
            face("face_1", Rect::new(200, 10, 260, 70)),
            face("face_2", Rect::new(10, 10, 70, 70)),
        ];
        let records = analyzer(Box::new(FixedDetector(faces)), false).analyze(&img);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].face_id, "face_1");
        assert_eq!(records[0].zone, Zone::Right);
        assert_eq!(records[1].zone, Zone::Left);
        assert_eq!(records[1].emotion.label, Emotion::Happy);
        assert_eq!(records[1].detector_score, 0.98);
    }

    #[test]
    fn test_detector_failure_is_empty_frame() {
        let img = RgbImage::new(64, 64);
        assert!(analyzer(Box::new(BrokenDetector), true).analyze(&img).is_empty());
    }

    #[test]
    fn test_boxes_are_clamped_and_empty_crops_degrade() {
        let img = RgbImage::new(100, 100);
        let faces = vec![face("face_1", Rect::new(150, 150, 180, 180))];
        let records = analyzer(Box::new(FixedDetector(faces)), false).analyze(&img);

        assert_eq!(records[0].position.bounds(), Rect::new(100, 100, 100, 100));
        assert_eq!(records[0].emotion, EmotionReading::unknown());
    }

    #[test]
    fn test_aligned_region_is_classified() {
        let img = RgbImage::new(120, 120);
        let mut f = face("face_1", Rect::new(30, 30, 90, 90));
        f.landmarks.left_eye.y += 6.;
        let records = analyzer(Box::new(FixedDetector(vec![f])), true).analyze(&img);
        assert_eq!(records[0].emotion.label, Emotion::Happy);
    }
}
