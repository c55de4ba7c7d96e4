//! Reduces face records to a 0-100 engagement score per frame, per session
//! and across all stored sessions. Every level is a pure function of its
//! inputs; empty inputs score `0.0`.

use crate::analyzer::FaceRecord;
use crate::pipeline::Emotion;
use serde::{Deserialize, Serialize};
use tracing::{debug, span, Level};

/// Valence weight per emotion label. `unknown` always weighs `0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotionWeights {
    pub neutral: f64,
    pub happy: f64,
    pub sad: f64,
    pub angry: f64,
    pub surprise: f64,
    pub fear: f64,
    pub disgust: f64,
}

impl Default for EmotionWeights {
    fn default() -> Self {
        Self {
            neutral: 0.7,
            happy: 1.0,
            sad: 0.3,
            angry: 0.2,
            surprise: 0.6,
            fear: 0.3,
            disgust: 0.2,
        }
    }
}

impl EmotionWeights {
    pub fn weight(&self, emotion: Emotion) -> f64 {
        match emotion {
            Emotion::Neutral => self.neutral,
            Emotion::Happy => self.happy,
            Emotion::Sad => self.sad,
            Emotion::Angry => self.angry,
            Emotion::Surprise => self.surprise,
            Emotion::Fear => self.fear,
            Emotion::Disgust => self.disgust,
            Emotion::Unknown => 0.,
        }
    }
}

/// How the three per-face signals are combined.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalWeights {
    pub detection: f64,
    pub pose: f64,
    pub emotion: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            detection: 0.3,
            pose: 0.3,
            emotion: 0.4,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngagementConfig {
    pub signals: SignalWeights,
    pub emotions: EmotionWeights,
}

fn unit(v: f64) -> f64 {
    if v.is_finite() { v.clamp(0., 1.) } else { 0. }
}

/// Mean of `values`, `0.0` when empty.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Contribution of one face in `[0, 1]` (for weights summing to one).
///
/// The detection term is the classifier's confidence in the face's emotion
/// reading, which is the confidence carried on the record.
pub fn face_contribution(record: &FaceRecord, config: &EngagementConfig) -> f64 {
    let detection = unit(record.emotion.confidence as f64);
    let pose = unit(record.pose.confidence as f64);
    let emotion = unit(config.emotions.weight(record.emotion.label));

    config.signals.detection * detection + config.signals.pose * pose + config.signals.emotion * emotion
}

/// Mean face contribution scaled to 0-100.
pub fn frame_score(faces: &[FaceRecord], config: &EngagementConfig) -> f64 {
    let contributions: Vec<f64> = faces.iter().map(|f| face_contribution(f, config)).collect();
    mean(&contributions) * 100.
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameEngagement {
    pub frame_index: usize,
    pub per_face: Vec<FaceRecord>,
    pub score: f64,
}

impl FrameEngagement {
    pub fn new(frame_index: usize, per_face: Vec<FaceRecord>, config: &EngagementConfig) -> Self {
        let span = span!(Level::DEBUG, "frame_engagement", frame_index);
        let _guard = span.enter();

        let score = frame_score(&per_face, config);
        debug!("{} faces scored {score:.2}", per_face.len());

        Self {
            frame_index,
            per_face,
            score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEngagement {
    pub session_id: String,
    pub frame_scores: Vec<f64>,
    pub aggregate_score: f64,
}

impl SessionEngagement {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            frame_scores: Vec::new(),
            aggregate_score: 0.,
        }
    }

    pub fn from_scores(session_id: impl Into<String>, frame_scores: Vec<f64>) -> Self {
        let aggregate_score = mean(&frame_scores);
        Self {
            session_id: session_id.into(),
            frame_scores,
            aggregate_score,
        }
    }

    pub fn record(&mut self, frame: &FrameEngagement) {
        self.frame_scores.push(frame.score);
        self.aggregate_score = mean(&self.frame_scores);
    }
}

/// Rolling institution score: the plain mean of every stored session score.
pub fn institution_score(session_scores: &[f64]) -> f64 {
    mean(session_scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{Position, Zone};
    use crate::pipeline::EmotionReading;
    use crate::pose::Pose;
    use crate::shapes::Rect;

    fn record(label: Emotion, confidence: f32, pose_confidence: f32) -> FaceRecord {
        let bounds = Rect::new(0, 0, 10, 10);
        FaceRecord {
            face_id: "face_1".to_string(),
            position: Position::from(bounds),
            zone: Zone::Left,
            pose: Pose {
                pitch: 0.,
                yaw: 0.,
                roll: 0.,
                confidence: pose_confidence,
            },
            emotion: EmotionReading { label, confidence },
            detector_score: 0.99,
            created_at: chrono::Local::now().naive_local(),
        }
    }

    #[test]
    fn test_empty_frame_scores_zero() {
        let score = frame_score(&[], &EngagementConfig::default());
        assert_eq!(score, 0.);
    }

    #[test]
    fn test_perfect_face_scores_hundred() {
        let faces = [record(Emotion::Happy, 1., 1.)];
        let score = frame_score(&faces, &EngagementConfig::default());
        assert!((score - 100.).abs() < 1e-9, "{score}");
    }

    #[test]
    fn test_two_neutral_faces() {
        let faces = [
            record(Emotion::Neutral, 0.9, 0.95),
            record(Emotion::Neutral, 0.9, 0.95),
        ];
        let config = EngagementConfig::default();
        let contribution = face_contribution(&faces[0], &config);
        assert!((contribution - 0.835).abs() < 1e-6);
        assert!((frame_score(&faces, &config) - 83.5).abs() < 1e-4);
    }

    #[test]
    fn test_unknown_emotion_and_failed_pose() {
        let faces = [record(Emotion::Unknown, 0., 0.)];
        assert_eq!(frame_score(&faces, &EngagementConfig::default()), 0.);
    }

    #[test]
    fn test_confidences_are_clamped() {
        let config = EngagementConfig::default();
        let over = face_contribution(&record(Emotion::Happy, 7., 3.), &config);
        assert!((over - 1.).abs() < 1e-9);
        let under = face_contribution(&record(Emotion::Unknown, -2., f32::NAN), &config);
        assert_eq!(under, 0.);
    }

    #[test]
    fn test_session_mean() {
        let session = SessionEngagement::from_scores("s1", vec![60., 80.]);
        assert_eq!(session.aggregate_score, 70.);
        assert_eq!(SessionEngagement::new("s2").aggregate_score, 0.);
    }

    #[test]
    fn test_session_record_updates_mean() {
        let config = EngagementConfig::default();
        let mut session = SessionEngagement::new("s1");
        session.record(&FrameEngagement::new(1, vec![record(Emotion::Happy, 1., 1.)], &config));
        session.record(&FrameEngagement::new(2, Vec::new(), &config));
        assert_eq!(session.frame_scores.len(), 2);
        assert!((session.aggregate_score - 50.).abs() < 1e-9);
    }

    #[test]
    fn test_institution_mean() {
        assert_eq!(institution_score(&[]), 0.);
        assert_eq!(institution_score(&[50., 70., 90.]), 70.);
    }

    #[test]
    fn test_custom_weights() {
        let mut config = EngagementConfig::default();
        config.emotions.sad = 0.;
        config.signals = SignalWeights {
            detection: 0.,
            pose: 0.,
            emotion: 1.,
        };
        assert_eq!(frame_score(&[record(Emotion::Sad, 1., 1.)], &config), 0.);
    }
}
