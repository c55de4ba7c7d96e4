use crate::error::{Error, Result};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, ArrayViewMut2};

struct BoxFrame {
    width: f32,
    height: f32,
    ctr_x: f32,
    ctr_y: f32,
}

fn box_frame(boxes: &ArrayView2<f32>, i: usize) -> BoxFrame {
    let width = boxes[[i, 2]] - boxes[[i, 0]] + 1.;
    let height = boxes[[i, 3]] - boxes[[i, 1]] + 1.;
    BoxFrame {
        width,
        height,
        ctr_x: boxes[[i, 0]] + 0.5 * (width - 1.),
        ctr_y: boxes[[i, 1]] + 0.5 * (height - 1.),
    }
}

fn check_rows(boxes: &ArrayView2<f32>, deltas: usize) -> Result<()> {
    if boxes.ncols() < 4 {
        return Err(Error::Geometry(format!(
            "boxes need at least 4 columns, got {}",
            boxes.ncols()
        )));
    }
    if boxes.nrows() != deltas {
        return Err(Error::Geometry(format!(
            "{} boxes but {} delta rows",
            boxes.nrows(),
            deltas
        )));
    }
    Ok(())
}

/// Apply `(dx, dy, dw, dh)` deltas to anchor boxes. Columns past the fourth
/// are copied through untouched.
pub fn bbox_pred(boxes: ArrayView2<f32>, box_deltas: ArrayView2<f32>) -> Result<Array2<f32>> {
    if box_deltas.ncols() < 4 {
        return Err(Error::Geometry(format!(
            "box deltas need at least 4 columns, got {}",
            box_deltas.ncols()
        )));
    }
    if boxes.nrows() == 0 {
        return Ok(Array2::zeros((0, box_deltas.ncols())));
    }
    check_rows(&boxes, box_deltas.nrows())?;

    let mut pred = Array2::<f32>::zeros(box_deltas.raw_dim());
    for i in 0..boxes.nrows() {
        let f = box_frame(&boxes, i);

        let pred_ctr_x = box_deltas[[i, 0]] * f.width + f.ctr_x;
        let pred_ctr_y = box_deltas[[i, 1]] * f.height + f.ctr_y;
        let pred_w = box_deltas[[i, 2]].exp() * f.width;
        let pred_h = box_deltas[[i, 3]].exp() * f.height;

        pred[[i, 0]] = pred_ctr_x - 0.5 * (pred_w - 1.);
        pred[[i, 1]] = pred_ctr_y - 0.5 * (pred_h - 1.);
        pred[[i, 2]] = pred_ctr_x + 0.5 * (pred_w - 1.);
        pred[[i, 3]] = pred_ctr_y + 0.5 * (pred_h - 1.);

        for c in 4..box_deltas.ncols() {
            pred[[i, c]] = box_deltas[[i, c]];
        }
    }

    Ok(pred)
}

/// Decode `N x K x 2` landmark deltas against their anchor boxes.
pub fn landmark_pred(
    boxes: ArrayView2<f32>,
    landmark_deltas: ArrayView3<f32>,
) -> Result<Array3<f32>> {
    let (n, k, dims) = landmark_deltas.dim();
    if dims != 2 {
        return Err(Error::Geometry(format!(
            "landmark deltas must be N x K x 2, got last axis {dims}"
        )));
    }
    if boxes.nrows() == 0 {
        return Ok(Array3::zeros((0, k, 2)));
    }
    check_rows(&boxes, n)?;

    let mut pred = Array3::<f32>::zeros((n, k, 2));
    for i in 0..n {
        let f = box_frame(&boxes, i);
        for p in 0..k {
            pred[[i, p, 0]] = landmark_deltas[[i, p, 0]] * f.width + f.ctr_x;
            pred[[i, p, 1]] = landmark_deltas[[i, p, 1]] * f.height + f.ctr_y;
        }
    }

    Ok(pred)
}

/// Clamp the four box coordinates into `[0, width - 1]` / `[0, height - 1]`.
pub fn clip_boxes(mut boxes: ArrayViewMut2<f32>, width: u32, height: u32) {
    let max_x = width.saturating_sub(1) as f32;
    let max_y = height.saturating_sub(1) as f32;

    for mut row in boxes.rows_mut() {
        for c in 0..row.len().min(4) {
            let max = if c % 2 == 0 { max_x } else { max_y };
            row[c] = row[c].min(max).max(0.);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_zero_deltas_are_identity() {
        let boxes = array![[10., 20., 49., 79.], [0., 0., 0., 0.], [3.5, 4.25, 100., 7.]];
        let deltas = Array2::<f32>::zeros((3, 4));
        let pred = bbox_pred(boxes.view(), deltas.view()).unwrap();

        for (a, b) in pred.iter().zip(boxes.iter()) {
            assert!((a - b).abs() < 1e-4, "{a} != {b}");
        }
    }

    #[test]
    fn test_shift_and_scale() {
        // 10x10 box centered at (4.5, 4.5)
        let boxes = array![[0., 0., 9., 9.]];
        let deltas = array![[0.1, -0.2, 2f32.ln(), 0.]];
        let pred = bbox_pred(boxes.view(), deltas.view()).unwrap();

        // center moves by (1, -2), width doubles to 20
        assert!((pred[[0, 0]] - (5.5 - 9.5)).abs() < 1e-4);
        assert!((pred[[0, 2]] - (5.5 + 9.5)).abs() < 1e-4);
        assert!((pred[[0, 1]] - (2.5 - 4.5)).abs() < 1e-4);
        assert!((pred[[0, 3]] - (2.5 + 4.5)).abs() < 1e-4);
    }

    #[test]
    fn test_extra_channels_pass_through() {
        let boxes = array![[0., 0., 9., 9.]];
        let deltas = array![[0., 0., 0., 0., 0.75, -3.]];
        let pred = bbox_pred(boxes.view(), deltas.view()).unwrap();
        assert_eq!(pred.ncols(), 6);
        assert_eq!(pred[[0, 4]], 0.75);
        assert_eq!(pred[[0, 5]], -3.);
    }

    #[test]
    fn test_empty_input() {
        let boxes = Array2::<f32>::zeros((0, 4));
        let deltas = Array2::<f32>::zeros((0, 4));
        let pred = bbox_pred(boxes.view(), deltas.view()).unwrap();
        assert_eq!(pred.dim(), (0, 4));

        let lm = Array3::<f32>::zeros((0, 5, 2));
        let pred = landmark_pred(boxes.view(), lm.view()).unwrap();
        assert_eq!(pred.dim(), (0, 5, 2));
    }

    #[test]
    fn test_mismatched_rows_fail() {
        let boxes = array![[0., 0., 9., 9.]];
        let deltas = Array2::<f32>::zeros((2, 4));
        assert!(bbox_pred(boxes.view(), deltas.view()).is_err());
    }

    #[test]
    fn test_landmarks_relative_to_center() {
        let boxes = array![[0., 0., 9., 19.]];
        let mut deltas = Array3::<f32>::zeros((1, 2, 2));
        deltas[[0, 1, 0]] = 0.5;
        deltas[[0, 1, 1]] = -0.25;
        let pred = landmark_pred(boxes.view(), deltas.view()).unwrap();

        assert_eq!(pred[[0, 0, 0]], 4.5);
        assert_eq!(pred[[0, 0, 1]], 9.5);
        assert_eq!(pred[[0, 1, 0]], 4.5 + 5.);
        assert_eq!(pred[[0, 1, 1]], 9.5 - 5.);
    }

    #[test]
    fn test_clip_bounds() {
        let mut boxes = array![
            [-5., -1., 700., 500.],
            [10., 10., 20., 20.],
            [f32::MAX, f32::MIN, 639., 479.]
        ];
        clip_boxes(boxes.view_mut(), 640, 480);

        for row in boxes.rows() {
            assert!(row[0] >= 0. && row[0] <= 639.);
            assert!(row[2] >= 0. && row[2] <= 639.);
            assert!(row[1] >= 0. && row[1] <= 479.);
            assert!(row[3] >= 0. && row[3] <= 479.);
        }
        assert_eq!(boxes.row(0).to_vec(), vec![0., 0., 639., 479.]);
        assert_eq!(boxes.row(1).to_vec(), vec![10., 10., 20., 20.]);
    }
}
