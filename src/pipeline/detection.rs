use super::model::{Session, initialize_model};
use super::{DetectedFace, FaceDetector, Landmarks};
use crate::config::DetectorConfig;
use crate::error::{Error, Result};
use crate::geometry::{anchors_plane, bbox_pred, clip_boxes, cpu_nms, landmark_pred};
use crate::shapes::{PointF32, RectF32};
use image::RgbImage;
use image::imageops::{self, FilterType};
use ndarray::{Array2, Array3, Array4, Ix4};
use ort::value::Tensor;
use tracing::{Level, debug, info, span, trace};

const LANDMARKS_PER_FACE: usize = 5;

/// Raw NHWC outputs of one pyramid level.
///
/// `scores` carries `2A` channels (background then face per anchor),
/// `bbox_deltas` `4A` and `landmark_deltas` `10A`.
#[derive(Debug, Clone)]
pub struct StrideOutput {
    pub stride: usize,
    pub base_anchors: Array2<f32>,
    pub scores: Array4<f32>,
    pub bbox_deltas: Array4<f32>,
    pub landmark_deltas: Array4<f32>,
}

#[derive(Debug, Clone)]
pub struct Preprocessed {
    pub tensor: Array4<f32>,
    pub width: u32,
    pub height: u32,
    /// Resized size over original size.
    pub scale: f32,
}

#[derive(Debug, Clone)]
struct Candidate {
    bounds: RectF32,
    score: f32,
    points: [PointF32; LANDMARKS_PER_FACE],
}

/// Scale so the shorter side approaches `target_size` without the longer
/// side passing `max_size`, then lay the pixels out as a `1 x H x W x 3`
/// tensor.
pub fn preprocess(img: &RgbImage, target_size: u32, max_size: u32, allow_upscaling: bool) -> Preprocessed {
    let (w, h) = img.dimensions();
    let (min_side, max_side) = if w > h { (h, w) } else { (w, h) };

    let mut scale = target_size as f32 / min_side.max(1) as f32;
    if !allow_upscaling {
        scale = scale.min(1.);
    }
    if (scale * max_side as f32).round() > max_size as f32 {
        scale = max_size as f32 / max_side.max(1) as f32;
    }

    let resized = if scale != 1. {
        let nw = ((w as f32 * scale).round() as u32).max(1);
        let nh = ((h as f32 * scale).round() as u32).max(1);
        imageops::resize(img, nw, nh, FilterType::Triangle)
    } else {
        img.clone()
    };

    let (width, height) = resized.dimensions();
    let tensor = Array4::from_shape_fn((1, height as usize, width as usize, 3), |(_, y, x, c)| {
        resized.get_pixel(x as u32, y as u32)[c] as f32
    });

    Preprocessed {
        tensor,
        width,
        height,
        scale,
    }
}

fn check_channels(name: &str, shape: &[usize], h: usize, w: usize, channels: usize) -> Result<()> {
    if shape != [1, h, w, channels] {
        return Err(Error::Geometry(format!(
            "{name} has shape {shape:?}, expected [1, {h}, {w}, {channels}]"
        )));
    }
    Ok(())
}

fn decode_stride(
    out: &StrideOutput,
    width: u32,
    height: u32,
    im_scale: f32,
    threshold: f32,
    candidates: &mut Vec<Candidate>,
) -> Result<()> {
    let a = out.base_anchors.nrows();
    let (_, h, w, _) = out.bbox_deltas.dim();
    check_channels("scores", out.scores.shape(), h, w, 2 * a)?;
    check_channels("bbox deltas", out.bbox_deltas.shape(), h, w, 4 * a)?;
    check_channels(
        "landmark deltas",
        out.landmark_deltas.shape(),
        h,
        w,
        2 * LANDMARKS_PER_FACE * a,
    )?;

    let anchors = anchors_plane(h, w, out.stride, out.base_anchors.view())?;
    let k = anchors.nrows();
    // row -> (y, x, anchor)
    let cell = |row: usize| (row / a / w, (row / a) % w, row % a);

    let deltas = Array2::from_shape_fn((k, 4), |(row, c)| {
        let (y, x, ai) = cell(row);
        out.bbox_deltas[[0, y, x, ai * 4 + c]]
    });
    let landmark_deltas = Array3::from_shape_fn((k, LANDMARKS_PER_FACE, 2), |(row, p, d)| {
        let (y, x, ai) = cell(row);
        out.landmark_deltas[[0, y, x, ai * 2 * LANDMARKS_PER_FACE + p * 2 + d]]
    });

    let mut proposals = bbox_pred(anchors.view(), deltas.view())?;
    clip_boxes(proposals.view_mut(), width, height);
    let landmarks = landmark_pred(anchors.view(), landmark_deltas.view())?;

    let before = candidates.len();
    for row in 0..k {
        let (y, x, ai) = cell(row);
        let score = out.scores[[0, y, x, a + ai]];
        if score < threshold {
            continue;
        }

        let points: [PointF32; LANDMARKS_PER_FACE] = std::array::from_fn(|p| {
            PointF32::new(landmarks[[row, p, 0]], landmarks[[row, p, 1]]).scale(1. / im_scale)
        });
        // overflowing size deltas decode to inf
        if !points.iter().all(PointF32::is_finite) {
            trace!("stride {}: dropping anchor {row} with non-finite landmarks", out.stride);
            continue;
        }
        candidates.push(Candidate {
            bounds: RectF32::new(
                proposals[[row, 0]] / im_scale,
                proposals[[row, 1]] / im_scale,
                proposals[[row, 2]] / im_scale,
                proposals[[row, 3]] / im_scale,
            ),
            score,
            points,
        });
    }
    trace!(
        "stride {}: {} of {} anchors above {threshold}",
        out.stride,
        candidates.len() - before,
        k
    );

    Ok(())
}

/// Turn raw pyramid outputs for an image resized to `width` x `height` (by
/// `im_scale`) into faces in original image coordinates.
pub fn decode_detections(
    outputs: &[StrideOutput],
    width: u32,
    height: u32,
    im_scale: f32,
    threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<DetectedFace>> {
    if !(im_scale.is_finite() && im_scale > 0.) {
        return Err(Error::Geometry(format!("invalid image scale {im_scale}")));
    }

    let mut candidates = Vec::new();
    for out in outputs {
        decode_stride(out, width, height, im_scale, threshold, &mut candidates)?;
    }
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let dets = Array2::from_shape_fn((candidates.len(), 5), |(i, c)| {
        let b = &candidates[i].bounds;
        match c {
            0 => b.x1,
            1 => b.y1,
            2 => b.x2,
            3 => b.y2,
            _ => candidates[i].score,
        }
    });
    let keep = cpu_nms(dets.view(), nms_threshold)?;

    let faces: Vec<DetectedFace> = keep
        .into_iter()
        .enumerate()
        .map(|(n, i)| {
            let c = &candidates[i];
            DetectedFace {
                id: format!("face_{}", n + 1),
                bounds: c.bounds.into(),
                landmarks: Landmarks {
                    right_eye: c.points[0],
                    left_eye: c.points[1],
                    nose: c.points[2],
                    mouth_right: Some(c.points[3]),
                    mouth_left: Some(c.points[4]),
                    chin: None,
                },
                score: c.score,
            }
        })
        .collect();

    Ok(faces)
}

/// RetinaFace over ONNX Runtime.
pub struct RetinaFaceDetector {
    model: Session,
    config: DetectorConfig,
    base_anchors: Vec<Array2<f32>>,
}

impl RetinaFaceDetector {
    pub fn new(config: &DetectorConfig) -> Result<RetinaFaceDetector> {
        let threads = config.threads.unwrap_or_else(num_cpus::get);
        let base_anchors = config
            .strides
            .iter()
            .map(|s| {
                let flat: Vec<f32> = s.base_anchors.iter().flatten().copied().collect();
                Array2::from_shape_vec((s.base_anchors.len(), 4), flat)
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(RetinaFaceDetector {
            model: initialize_model(&config.model_path, threads)?,
            config: config.clone(),
            base_anchors,
        })
    }

    fn run_model(&self, tensor: Array4<f32>) -> Result<Vec<StrideOutput>> {
        let input = Tensor::from_array(tensor)?;
        let outputs = self
            .model
            .run(ort::inputs![self.config.input_name.as_str() => input]?)?;

        let extract = |name: &str| -> Result<Array4<f32>> {
            let value = outputs
                .get(name)
                .ok_or_else(|| Error::Model(format!("model has no output named {name}")))?;
            let view = value.try_extract_tensor::<f32>()?;
            Ok(view.into_dimensionality::<Ix4>()?.to_owned())
        };

        self.config
            .strides
            .iter()
            .zip(self.base_anchors.iter())
            .map(|(s, base)| -> Result<StrideOutput> {
                Ok(StrideOutput {
                    stride: s.stride,
                    base_anchors: base.clone(),
                    scores: extract(&s.scores)?,
                    bbox_deltas: extract(&s.bbox_deltas)?,
                    landmark_deltas: extract(&s.landmark_deltas)?,
                })
            })
            .collect()
    }
}

impl FaceDetector for RetinaFaceDetector {
    fn detect(&self, img: &RgbImage) -> Result<Vec<DetectedFace>> {
        let span = span!(Level::DEBUG, "face_detector");
        let _guard = span.enter();

        let pre = preprocess(
            img,
            self.config.target_size,
            self.config.max_size,
            self.config.allow_upscaling,
        );
        debug!(
            "Resized {:?} to {}x{} (scale {})",
            img.dimensions(),
            pre.width,
            pre.height,
            pre.scale
        );

        let outputs = self.run_model(pre.tensor)?;
        let faces = decode_detections(
            &outputs,
            pre.width,
            pre.height,
            pre.scale,
            self.config.threshold,
            self.config.nms_threshold,
        )?;

        if faces.is_empty() {
            info!("No faces found.");
        } else {
            debug!("Detected {} faces", faces.len());
        }

        Ok(faces)
    }
}
