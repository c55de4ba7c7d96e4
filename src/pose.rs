//! Head pose from sparse facial landmarks.
//!
//! A fixed six-point face model is fitted to the landmarks under a pinhole
//! camera whose focal length is the image width and whose principal point is
//! the image center. The fit is a DLT estimate refined with
//! Levenberg-Marquardt on the reprojection error.

use crate::pipeline::Landmarks;
use nalgebra::{DMatrix, Matrix3, Rotation3, SMatrix, SVector, SymmetricEigen, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{trace, warn};

const MODEL_POINTS: [[f64; 3]; 6] = [
    [0.0, 0.0, 0.0],          // nose tip
    [0.0, -330.0, -65.0],     // chin
    [-225.0, 170.0, -135.0],  // left eye corner
    [225.0, 170.0, -135.0],   // right eye corner
    [-150.0, -150.0, -125.0], // left mouth corner
    [150.0, -150.0, -125.0],  // right mouth corner
];

const LM_MAX_ITERS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
    /// `0.0` exactly when no pose could be recovered.
    pub confidence: f32,
}

impl Pose {
    pub fn neutral() -> Pose {
        Pose {
            pitch: 0.,
            yaw: 0.,
            roll: 0.,
            confidence: 0.,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoseSolveFailure {
    #[error("landmarks contain non-finite coordinates")]
    NonFinite,

    #[error("landmarks are collinear or coincident")]
    Degenerate,

    #[error("projection system is rank deficient")]
    RankDeficient,

    #[error("refinement did not converge")]
    NoConvergence,
}

pub trait PoseEstimator: Send + Sync {
    /// Best effort: failures come back as [`Pose::neutral`].
    fn estimate(&self, landmarks: &Landmarks, width: u32, height: u32) -> Pose;
}

/// Perspective-n-point estimator over the six-point face model.
#[derive(Debug, Clone, Copy, Default)]
pub struct PnpPoseEstimator;

impl PoseEstimator for PnpPoseEstimator {
    fn estimate(&self, landmarks: &Landmarks, width: u32, height: u32) -> Pose {
        match solve_pose(&image_points(landmarks), width, height) {
            Ok(rotation) => {
                let [pitch, yaw, roll] = euler_xyz_degrees(&rotation);
                Pose {
                    pitch: round2(pitch),
                    yaw: round2(yaw),
                    roll: round2(roll),
                    confidence: 1.,
                }
            }
            Err(e) => {
                warn!("Head pose estimation failed: {e}");
                Pose::neutral()
            }
        }
    }
}

/// Image points in model order. Missing chin/mouth points fall back to the
/// nose and eyes.
pub fn image_points(landmarks: &Landmarks) -> [[f64; 2]; 6] {
    let p = |pt: crate::shapes::PointF32| [pt.x as f64, pt.y as f64];
    [
        p(landmarks.nose),
        p(landmarks.chin.unwrap_or(landmarks.nose)),
        p(landmarks.left_eye),
        p(landmarks.right_eye),
        p(landmarks.mouth_left.unwrap_or(landmarks.left_eye)),
        p(landmarks.mouth_right.unwrap_or(landmarks.right_eye)),
    ]
}

struct Camera {
    f: f64,
    cx: f64,
    cy: f64,
}

impl Camera {
    fn new(width: u32, height: u32) -> Camera {
        Camera {
            f: width as f64,
            cx: width as f64 / 2.,
            cy: height as f64 / 2.,
        }
    }

    fn project(&self, rotation: &Matrix3<f64>, t: &Vector3<f64>, x: &Vector3<f64>) -> Option<[f64; 2]> {
        let c = rotation * x + t;
        if c.z.abs() < 1e-12 {
            return None;
        }
        Some([self.f * c.x / c.z + self.cx, self.f * c.y / c.z + self.cy])
    }
}

/// Recover the model-to-camera rotation for the given image points.
pub fn solve_pose(
    points: &[[f64; 2]; 6],
    width: u32,
    height: u32,
) -> Result<Rotation3<f64>, PoseSolveFailure> {
    if points.iter().flatten().any(|v| !v.is_finite()) || width == 0 {
        return Err(PoseSolveFailure::NonFinite);
    }
    check_spread(points)?;

    let camera = Camera::new(width, height);
    let (rotation, t) = dlt(points, &camera)?;
    trace!(
        "DLT init rotation {:?} translation {:?}",
        Rotation3::from_matrix(&rotation).scaled_axis(),
        t
    );

    refine(points, &camera, rotation, t)
}

fn check_spread(points: &[[f64; 2]; 6]) -> Result<(), PoseSolveFailure> {
    let n = points.len() as f64;
    let mx = points.iter().map(|p| p[0]).sum::<f64>() / n;
    let my = points.iter().map(|p| p[1]).sum::<f64>() / n;

    let (mut sxx, mut syy, mut sxy) = (0., 0., 0.);
    for p in points {
        let dx = p[0] - mx;
        let dy = p[1] - my;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }

    // Eigenvalues of the 2x2 scatter matrix; a vanishing minor axis means
    // every point sits on one line.
    let tr = sxx + syy;
    let disc = ((sxx - syy) * (sxx - syy) / 4. + sxy * sxy).sqrt();
    let major = tr / 2. + disc;
    let minor = tr / 2. - disc;

    if major <= 1e-12 || minor <= major * 1e-9 {
        return Err(PoseSolveFailure::Degenerate);
    }
    Ok(())
}

fn dlt(
    points: &[[f64; 2]; 6],
    camera: &Camera,
) -> Result<(Matrix3<f64>, Vector3<f64>), PoseSolveFailure> {
    let n = MODEL_POINTS.len();
    let mut a = DMatrix::<f64>::zeros(2 * n, 12);

    for (i, (m, p)) in MODEL_POINTS.iter().zip(points.iter()).enumerate() {
        let xn = (p[0] - camera.cx) / camera.f;
        let yn = (p[1] - camera.cy) / camera.f;
        let x = [m[0], m[1], m[2], 1.];

        for k in 0..4 {
            a[(2 * i, k)] = x[k];
            a[(2 * i, 8 + k)] = -xn * x[k];
            a[(2 * i + 1, 4 + k)] = x[k];
            a[(2 * i + 1, 8 + k)] = -yn * x[k];
        }
    }

    let eig = SymmetricEigen::new(a.transpose() * &a);
    let mut order: Vec<usize> = (0..12).collect();
    order.sort_by(|&i, &j| eig.eigenvalues[i].abs().total_cmp(&eig.eigenvalues[j].abs()));

    let largest = eig.eigenvalues[order[11]].abs();
    if largest <= 0. || eig.eigenvalues[order[1]].abs() <= largest * 1e-14 {
        return Err(PoseSolveFailure::RankDeficient);
    }

    let p: Vec<f64> = (0..12).map(|j| eig.eigenvectors[(j, order[0])]).collect();
    let mut m = Matrix3::new(p[0], p[1], p[2], p[4], p[5], p[6], p[8], p[9], p[10]);
    let mut t = Vector3::new(p[3], p[7], p[11]);

    if m.determinant() < 0. {
        m = -m;
        t = -t;
    }

    let svd = m.svd(true, true);
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => return Err(PoseSolveFailure::RankDeficient),
    };
    let scale = svd.singular_values.sum() / 3.;
    if !scale.is_finite() || scale <= 1e-15 {
        return Err(PoseSolveFailure::RankDeficient);
    }

    let mut rotation = u * v_t;
    if rotation.determinant() < 0. {
        let mut u = u;
        u.column_mut(2).neg_mut();
        rotation = u * v_t;
    }

    Ok((rotation, t / scale))
}

fn residuals(
    points: &[[f64; 2]; 6],
    camera: &Camera,
    params: &SVector<f64, 6>,
) -> Option<SVector<f64, 12>> {
    let rotation = Rotation3::from_scaled_axis(Vector3::new(params[0], params[1], params[2]));
    let t = Vector3::new(params[3], params[4], params[5]);

    let mut r = SVector::<f64, 12>::zeros();
    for (i, (m, p)) in MODEL_POINTS.iter().zip(points.iter()).enumerate() {
        let [u, v] = camera.project(rotation.matrix(), &t, &Vector3::new(m[0], m[1], m[2]))?;
        r[2 * i] = u - p[0];
        r[2 * i + 1] = v - p[1];
    }

    if r.iter().all(|v| v.is_finite()) { Some(r) } else { None }
}

fn refine(
    points: &[[f64; 2]; 6],
    camera: &Camera,
    rotation: Matrix3<f64>,
    t: Vector3<f64>,
) -> Result<Rotation3<f64>, PoseSolveFailure> {
    let r0 = Rotation3::from_matrix(&rotation).scaled_axis();
    let mut params = SVector::<f64, 6>::from_column_slice(&[r0.x, r0.y, r0.z, t.x, t.y, t.z]);
    let mut res = residuals(points, camera, &params).ok_or(PoseSolveFailure::NoConvergence)?;
    let mut cost = res.norm_squared();
    let mut lambda = 1e-3;

    for _ in 0..LM_MAX_ITERS {
        let mut jac = SMatrix::<f64, 12, 6>::zeros();
        for k in 0..6 {
            let h = 1e-6 * params[k].abs().max(1.);
            let mut shifted = params;
            shifted[k] += h;
            let r = residuals(points, camera, &shifted).ok_or(PoseSolveFailure::NoConvergence)?;
            jac.set_column(k, &((r - res) / h));
        }

        let jtj = jac.transpose() * jac;
        let jtr = jac.transpose() * res;

        let mut improved = false;
        while lambda < 1e12 {
            let mut damped = jtj;
            for k in 0..6 {
                damped[(k, k)] += lambda * jtj[(k, k)].max(1e-12);
            }
            let Some(step) = damped.lu().solve(&(-jtr)) else {
                lambda *= 10.;
                continue;
            };

            let candidate = params + step;
            match residuals(points, camera, &candidate) {
                Some(r) if r.norm_squared() < cost => {
                    let converged = step.norm() < 1e-12 * (params.norm() + 1e-12)
                        || cost - r.norm_squared() < 1e-14 * cost.max(1e-30);
                    params = candidate;
                    res = r;
                    cost = res.norm_squared();
                    lambda = (lambda / 10.).max(1e-12);
                    improved = true;
                    if converged {
                        return finish(&params);
                    }
                    break;
                }
                _ => lambda *= 10.,
            }
        }

        if !improved {
            // no descent direction left: the current estimate is a minimum
            break;
        }
    }

    finish(&params)
}

fn finish(params: &SVector<f64, 6>) -> Result<Rotation3<f64>, PoseSolveFailure> {
    if params.iter().any(|v| !v.is_finite()) {
        return Err(PoseSolveFailure::NoConvergence);
    }
    Ok(Rotation3::from_scaled_axis(Vector3::new(
        params[0], params[1], params[2],
    )))
}

/// Intrinsic X-Y-Z angles `[x, y, z]` in degrees, `R = Rx * Ry * Rz`.
pub fn euler_xyz_degrees(rotation: &Rotation3<f64>) -> [f64; 3] {
    let r = rotation.matrix();
    let sin_y = r[(0, 2)].clamp(-1., 1.);
    let y = sin_y.asin();

    let (x, z) = if sin_y.abs() < 1. - 1e-10 {
        ((-r[(1, 2)]).atan2(r[(2, 2)]), (-r[(0, 1)]).atan2(r[(0, 0)]))
    } else {
        // gimbal lock: fold everything into x
        (r[(2, 1)].atan2(r[(1, 1)]), 0.)
    };

    [x.to_degrees(), y.to_degrees(), z.to_degrees()]
}

fn round2(v: f64) -> f32 {
    ((v * 100.).round() / 100.) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::PointF32;
    use nalgebra::Vector3;

    fn rotation_xyz(x: f64, y: f64, z: f64) -> Rotation3<f64> {
        Rotation3::from_axis_angle(&Vector3::x_axis(), x.to_radians())
            * Rotation3::from_axis_angle(&Vector3::y_axis(), y.to_radians())
            * Rotation3::from_axis_angle(&Vector3::z_axis(), z.to_radians())
    }

    fn project_model(rotation: &Rotation3<f64>, t: Vector3<f64>, width: u32, height: u32) -> Landmarks {
        let camera = Camera::new(width, height);
        let pts: Vec<PointF32> = MODEL_POINTS
            .iter()
            .map(|m| {
                let [u, v] = camera
                    .project(rotation.matrix(), &t, &Vector3::new(m[0], m[1], m[2]))
                    .unwrap();
                PointF32::new(u as f32, v as f32)
            })
            .collect();

        Landmarks {
            nose: pts[0],
            chin: Some(pts[1]),
            left_eye: pts[2],
            right_eye: pts[3],
            mouth_left: Some(pts[4]),
            mouth_right: Some(pts[5]),
        }
    }

    #[test]
    fn test_euler_round_trip() {
        for (x, y, z) in [(10., -20., 5.), (170., 15., -5.), (-30., 45., 60.)] {
            let [ex, ey, ez] = euler_xyz_degrees(&rotation_xyz(x, y, z));
            assert!((ex - x).abs() < 1e-6);
            assert!((ey - y).abs() < 1e-6);
            assert!((ez - z).abs() < 1e-6);
        }
    }

    #[test]
    fn test_recovers_known_pose() {
        let (width, height) = (640, 480);
        for (x, y, z) in [(180., 0., 0.), (170., 15., -5.), (-165., -20., 8.)] {
            let truth = rotation_xyz(x, y, z);
            let landmarks = project_model(&truth, Vector3::new(20., -10., 1800.), width, height);

            let pose = PnpPoseEstimator.estimate(&landmarks, width, height);
            assert_eq!(pose.confidence, 1.);

            let recovered = rotation_xyz(pose.pitch as f64, pose.yaw as f64, pose.roll as f64);
            let err = truth.angle_to(&recovered).to_degrees();
            assert!(err < 0.1, "({x}, {y}, {z}) recovered as {pose:?}");
        }
    }

    #[test]
    fn test_collinear_landmarks_fail_softly() {
        let on_line = |t: f32| PointF32::new(100. + t, 50. + 2. * t);
        let landmarks = Landmarks {
            nose: on_line(0.),
            chin: Some(on_line(10.)),
            left_eye: on_line(-20.),
            right_eye: on_line(20.),
            mouth_left: Some(on_line(5.)),
            mouth_right: Some(on_line(-5.)),
        };

        let pose = PnpPoseEstimator.estimate(&landmarks, 640, 480);
        assert_eq!(pose, Pose::neutral());
        assert_eq!(
            solve_pose(&image_points(&landmarks), 640, 480),
            Err(PoseSolveFailure::Degenerate)
        );
    }

    #[test]
    fn test_coincident_landmarks_fail_softly() {
        let p = PointF32::new(40., 40.);
        let landmarks = Landmarks {
            nose: p,
            chin: None,
            left_eye: p,
            right_eye: p,
            mouth_left: None,
            mouth_right: None,
        };
        assert_eq!(PnpPoseEstimator.estimate(&landmarks, 640, 480).confidence, 0.);
    }

    #[test]
    fn test_non_finite_landmarks_fail_softly() {
        let landmarks = Landmarks {
            nose: PointF32::new(f32::NAN, 3.),
            chin: None,
            left_eye: PointF32::new(10., 10.),
            right_eye: PointF32::new(30., 10.),
            mouth_left: None,
            mouth_right: None,
        };
        assert_eq!(
            solve_pose(&image_points(&landmarks), 640, 480),
            Err(PoseSolveFailure::NonFinite)
        );
        assert_eq!(PnpPoseEstimator.estimate(&landmarks, 640, 480), Pose::neutral());
    }

    #[test]
    fn test_five_point_detector_landmarks() {
        // typical detector output: no chin, mouth corners present
        let landmarks = Landmarks {
            nose: PointF32::new(320., 250.),
            chin: None,
            left_eye: PointF32::new(290., 220.),
            right_eye: PointF32::new(350., 221.),
            mouth_left: Some(PointF32::new(298., 280.)),
            mouth_right: Some(PointF32::new(343., 281.)),
        };
        let pose = PnpPoseEstimator.estimate(&landmarks, 640, 480);
        assert!(pose.pitch.is_finite() && pose.yaw.is_finite() && pose.roll.is_finite());
        assert!(pose.confidence == 0. || pose.confidence == 1.);
    }
}
