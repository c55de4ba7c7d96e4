//! Pure array math for turning raw anchor-grid regressions into face boxes:
//! anchor tiling, box/landmark regression, clipping, suppression and eye-line
//! alignment. Nothing here performs I/O.

mod align;
mod anchors;
mod nms;
mod regression;

pub use align::{Alignment, RotationDirection, align_face, alignment_angle, rotate_facial_area};
pub use anchors::anchors_plane;
pub use nms::cpu_nms;
pub use regression::{bbox_pred, clip_boxes, landmark_pred};
