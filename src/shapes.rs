pub mod point;
pub mod rect;

pub use point::{Point, PointF32};
pub use rect::{Rect, RectF32};
