use super::model::{Session, initialize_model};
use crate::config::EmotionConfig;
use crate::error::{Error, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::value::Tensor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{Level, span, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Neutral,
    Happy,
    Sad,
    Angry,
    Surprise,
    Fear,
    Disgust,
    Unknown,
}

/// Class order of the expression model's output vector.
const MODEL_CLASSES: [Emotion; 7] = [
    Emotion::Angry,
    Emotion::Disgust,
    Emotion::Fear,
    Emotion::Happy,
    Emotion::Sad,
    Emotion::Surprise,
    Emotion::Neutral,
];

impl Emotion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Neutral => "neutral",
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Angry => "angry",
            Emotion::Surprise => "surprise",
            Emotion::Fear => "fear",
            Emotion::Disgust => "disgust",
            Emotion::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Emotion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Emotion> {
        match s.trim().to_ascii_lowercase().as_str() {
            "neutral" => Ok(Emotion::Neutral),
            "happy" => Ok(Emotion::Happy),
            "sad" => Ok(Emotion::Sad),
            "angry" => Ok(Emotion::Angry),
            "surprise" => Ok(Emotion::Surprise),
            "fear" => Ok(Emotion::Fear),
            "disgust" => Ok(Emotion::Disgust),
            "unknown" => Ok(Emotion::Unknown),
            other => Err(Error::Config(format!("unknown emotion label {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmotionReading {
    pub label: Emotion,
    /// Probability of `label`, rounded to two decimals.
    pub confidence: f32,
}

impl EmotionReading {
    pub fn unknown() -> EmotionReading {
        EmotionReading {
            label: Emotion::Unknown,
            confidence: 0.,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmotionClassificationFailure {
    #[error("no face in region")]
    NoFace,

    #[error("classifier failed: {0}")]
    Model(String),
}

impl From<Error> for EmotionClassificationFailure {
    fn from(e: Error) -> Self {
        EmotionClassificationFailure::Model(e.to_string())
    }
}

impl From<ort::Error> for EmotionClassificationFailure {
    fn from(e: ort::Error) -> Self {
        EmotionClassificationFailure::Model(e.to_string())
    }
}

pub trait EmotionClassifier: Send + Sync {
    fn classify(&self, region: &RgbImage) -> std::result::Result<EmotionReading, EmotionClassificationFailure>;
}

/// Normalize raw model output into probabilities. Outputs that already form
/// a distribution are kept, anything else goes through softmax.
fn probabilities(raw: &[f32]) -> Vec<f32> {
    let sum: f32 = raw.iter().sum();
    if raw.iter().all(|v| (0f32..=1.).contains(v)) && (sum - 1.).abs() < 1e-3 {
        return raw.to_vec();
    }

    let max = raw.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = raw.iter().map(|v| (v - max).exp()).collect();
    let total: f32 = exp.iter().sum();
    exp.into_iter().map(|v| v / total).collect()
}

/// Dominant class of a model output vector in [`MODEL_CLASSES`] order.
pub(crate) fn dominant(raw: &[f32]) -> std::result::Result<EmotionReading, EmotionClassificationFailure> {
    if raw.len() != MODEL_CLASSES.len() || raw.iter().any(|v| !v.is_finite()) {
        return Err(EmotionClassificationFailure::Model(format!(
            "expected {} finite scores, got {raw:?}",
            MODEL_CLASSES.len()
        )));
    }

    let probs = probabilities(raw);
    let (idx, p) = probs
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, &p)| if p > best.1 { (i, p) } else { best });

    Ok(EmotionReading {
        label: MODEL_CLASSES[idx],
        confidence: (p * 100.).round() / 100.,
    })
}

/// Facial expression classifier over a 48x48 grayscale ONNX model.
pub struct OnnxEmotionClassifier {
    model: Session,
    config: EmotionConfig,
}

impl OnnxEmotionClassifier {
    pub fn new(config: &EmotionConfig) -> Result<OnnxEmotionClassifier> {
        let threads = config.threads.unwrap_or_else(num_cpus::get);
        Ok(OnnxEmotionClassifier {
            model: initialize_model(&config.model_path, threads)?,
            config: config.clone(),
        })
    }

    fn input_tensor(&self, region: &RgbImage) -> Array4<f32> {
        let size = self.config.input_size;
        let gray = imageops::grayscale(region);
        let resized = imageops::resize(&gray, size, size, FilterType::Triangle);

        Array4::from_shape_fn((1, 1, size as usize, size as usize), |(_, _, y, x)| {
            resized.get_pixel(x as u32, y as u32)[0] as f32 / 255.
        })
    }
}

impl EmotionClassifier for OnnxEmotionClassifier {
    fn classify(&self, region: &RgbImage) -> std::result::Result<EmotionReading, EmotionClassificationFailure> {
        let span = span!(Level::DEBUG, "emotion_classifier");
        let _guard = span.enter();

        if region.width() == 0 || region.height() == 0 {
            return Err(EmotionClassificationFailure::NoFace);
        }

        let input = Tensor::from_array(self.input_tensor(region))?;
        let outputs = self
            .model
            .run(ort::inputs![self.config.input_name.as_str() => input]?)?;
        let output = outputs.get(self.config.output_name.as_str()).ok_or_else(|| {
            EmotionClassificationFailure::Model(format!("model has no output named {}", self.config.output_name))
        })?;
        let scores: Vec<f32> = output.try_extract_tensor::<f32>()?.iter().copied().collect();
        trace!("Expression scores {scores:?}");

        dominant(&scores)
    }
}
