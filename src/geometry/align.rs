use crate::shapes::{PointF32, Rect};
use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationDirection {
    Clockwise,
    CounterClockwise,
}

impl RotationDirection {
    pub fn sign(&self) -> f64 {
        match self {
            RotationDirection::Clockwise => -1.,
            RotationDirection::CounterClockwise => 1.,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Alignment {
    /// Degrees; always finite, `0.0` for a degenerate eye triangle.
    pub angle: f64,
    pub direction: RotationDirection,
}

impl Alignment {
    /// Signed counter-clockwise rotation in degrees.
    pub fn signed_degrees(&self) -> f64 {
        self.direction.sign() * self.angle
    }
}

/// Angle that levels the eye line. `left_eye` is the eye appearing on the
/// left of the image.
pub fn alignment_angle(left_eye: PointF32, right_eye: PointF32) -> Alignment {
    // Image y grows downward: a larger y is a lower eye.
    let (third, direction) = if left_eye.y > right_eye.y {
        (
            PointF32::new(right_eye.x, left_eye.y),
            RotationDirection::Clockwise,
        )
    } else {
        (
            PointF32::new(left_eye.x, right_eye.y),
            RotationDirection::CounterClockwise,
        )
    };

    let a = left_eye.distance(&third);
    let b = right_eye.distance(&third);
    let c = right_eye.distance(&left_eye);

    if b == 0. || c == 0. || !(a.is_finite() && b.is_finite() && c.is_finite()) {
        return Alignment {
            angle: 0.,
            direction,
        };
    }

    // Rounding can push the ratio just past 1.0, which arccos rejects.
    let cos_a = ((b * b + c * c - a * a) / (2. * b * c)).clamp(-1., 1.);
    let mut angle = cos_a.acos().to_degrees();

    if direction == RotationDirection::Clockwise {
        angle = 90. - angle;
    }

    Alignment { angle, direction }
}

/// Rotate the whole image about its center so the eyes sit level. The output
/// keeps the input size; uncovered pixels are black.
pub fn align_face(img: &RgbImage, left_eye: PointF32, right_eye: PointF32) -> (RgbImage, Alignment) {
    let alignment = alignment_angle(left_eye, right_eye);
    if alignment.angle == 0. {
        return (img.clone(), alignment);
    }

    // imageproc turns clockwise for positive theta.
    let theta = -(alignment.signed_degrees().to_radians()) as f32;
    let rotated = rotate_about_center(img, theta, Interpolation::Nearest, Rgb([0u8, 0u8, 0u8]));

    (rotated, alignment)
}

/// Move a facial area along with an image rotated by [`align_face`]. The box
/// keeps its size and its center is rotated about the image center.
pub fn rotate_facial_area(area: Rect, alignment: Alignment, width: u32, height: u32) -> Rect {
    let angle = alignment.angle.to_radians();
    let direction = alignment.direction.sign();
    let (w, h) = (width as f64, height as f64);

    let x = (area.x1 as f64 + area.x2 as f64) / 2. - w / 2.;
    let y = (area.y1 as f64 + area.y2 as f64) / 2. - h / 2.;

    let x_new = x * angle.cos() + y * direction * angle.sin() + w / 2.;
    let y_new = -x * direction * angle.sin() + y * angle.cos() + h / 2.;

    let half_w = (area.x2 as f64 - area.x1 as f64) / 2.;
    let half_h = (area.y2 as f64 - area.y1 as f64) / 2.;

    let x1 = (x_new - half_w).trunc().max(0.).min(w);
    let y1 = (y_new - half_h).trunc().max(0.).min(h);
    let x2 = (x_new + half_w).trunc().min(w).max(x1);
    let y2 = (y_new + half_h).trunc().min(h).max(y1);

    Rect::new(x1 as u32, y1 as u32, x2 as u32, y2 as u32)
}
