use crate::error::{Error, Result};
use crate::shapes::RectF32;
use ndarray::ArrayView2;
use tracing::trace;

/// Greedy non-maximum suppression over `N x 5` rows of
/// `(x1, y1, x2, y2, score)`.
///
/// Returns the kept row indices in the order they were selected, which is
/// descending score. Equal scores keep their input order.
pub fn cpu_nms(dets: ArrayView2<f32>, threshold: f32) -> Result<Vec<usize>> {
    if dets.nrows() == 0 {
        return Ok(Vec::new());
    }
    if dets.ncols() < 5 {
        return Err(Error::Geometry(format!(
            "detections need 5 columns, got {}",
            dets.ncols()
        )));
    }

    let boxes: Vec<RectF32> = dets
        .rows()
        .into_iter()
        .map(|r| RectF32::new(r[0], r[1], r[2], r[3]))
        .collect();

    let mut order: Vec<usize> = (0..dets.nrows()).collect();
    order.sort_by(|&a, &b| dets[[b, 4]].total_cmp(&dets[[a, 4]]));

    let mut suppressed = vec![false; order.len()];
    let mut keep = Vec::new();

    for (pos, &i) in order.iter().enumerate() {
        if suppressed[i] {
            continue;
        }
        keep.push(i);

        for &j in &order[pos + 1..] {
            if suppressed[j] {
                continue;
            }
            if boxes[i].iou(&boxes[j]) >= threshold {
                suppressed[j] = true;
            }
        }
    }

    trace!("nms kept {} of {}", keep.len(), dets.nrows());

    Ok(keep)
}
