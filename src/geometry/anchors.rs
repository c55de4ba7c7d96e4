use crate::error::{Error, Result};
use ndarray::{Array2, ArrayView2};

/// Tile `A` base anchors across an `height` x `width` feature map.
///
/// Row `(y * width + x) * A + a` holds base anchor `a` offset by
/// `(x * stride, y * stride, x * stride, y * stride)`, matching the order in
/// which the detector emits its per-cell outputs.
pub fn anchors_plane(
    height: usize,
    width: usize,
    stride: usize,
    base_anchors: ArrayView2<f32>,
) -> Result<Array2<f32>> {
    if base_anchors.ncols() != 4 {
        return Err(Error::Geometry(format!(
            "base anchors must have 4 columns, got {}",
            base_anchors.ncols()
        )));
    }

    let a = base_anchors.nrows();
    let mut anchors = Array2::<f32>::zeros((height * width * a, 4));

    for y in 0..height {
        for x in 0..width {
            let sx = (x * stride) as f32;
            let sy = (y * stride) as f32;
            for k in 0..a {
                let row = (y * width + x) * a + k;
                anchors[[row, 0]] = base_anchors[[k, 0]] + sx;
                anchors[[row, 1]] = base_anchors[[k, 1]] + sy;
                anchors[[row, 2]] = base_anchors[[k, 2]] + sx;
                anchors[[row, 3]] = base_anchors[[k, 3]] + sy;
            }
        }
    }

    Ok(anchors)
}
