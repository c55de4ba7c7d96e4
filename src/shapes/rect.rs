use super::point::Point;
use serde::{Deserialize, Serialize};

/// Integer facial area in corner form. `x2`/`y2` are exclusive when used to
/// crop.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

/// Detector-space box in corner form, pixel-inclusive (`width = x2 - x1 + 1`).
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct RectF32 {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl RectF32 {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> RectF32 {
        RectF32 { x1, y1, x2, y2 }
    }

    pub fn area(&self) -> f32 {
        (self.x2 - self.x1 + 1.) * (self.y2 - self.y1 + 1.)
    }

    pub fn iou(&self, other: &RectF32) -> f32 {
        let xx1 = self.x1.max(other.x1);
        let yy1 = self.y1.max(other.y1);
        let xx2 = self.x2.min(other.x2);
        let yy2 = self.y2.min(other.y2);

        let w = (xx2 - xx1 + 1.).max(0.);
        let h = (yy2 - yy1 + 1.).max(0.);
        let inter = w * h;

        inter / (self.area() + other.area() - inter)
    }
}

// Truncates toward zero like an integer cast of the detector output, with
// negatives floored at zero.
impl From<RectF32> for Rect {
    fn from(r: RectF32) -> Rect {
        Rect {
            x1: r.x1.max(0.) as u32,
            y1: r.y1.max(0.) as u32,
            x2: r.x2.max(0.) as u32,
            y2: r.y2.max(0.) as u32,
        }
    }
}

impl From<Rect> for imageproc::rect::Rect {
    fn from(r: Rect) -> imageproc::rect::Rect {
        imageproc::rect::Rect::at(r.x1 as i32, r.y1 as i32).of_size(r.width().max(1), r.height().max(1))
    }
}

impl Rect {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Rect {
        Rect { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn center(&self) -> Point {
        Point {
            x: (self.x1 + self.x2) / 2,
            y: (self.y1 + self.y2) / 2,
        }
    }

    /// Clamp into an image of `width` x `height`.
    pub fn clamp(&self, width: u32, height: u32) -> Rect {
        let x1 = self.x1.min(width);
        let y1 = self.y1.min(height);
        Rect {
            x1,
            y1,
            x2: self.x2.min(width).max(x1),
            y2: self.y2.min(height).max(y1),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}
