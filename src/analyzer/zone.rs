use serde::{Deserialize, Serialize};
use std::fmt;

/// Horizontal third of the frame a face sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    Left,
    Center,
    Right,
    Unknown,
}

impl Zone {
    /// With `t = W / 3` in whole pixels, bands are `[0, t)`, `[t, 2t)` and
    /// `[2t, W]`. Anything else, including every center of a zero-width
    /// frame, is `Unknown`.
    pub fn for_center(center_x: f64, width: u32) -> Zone {
        let w = width as f64;
        if width == 0 || !center_x.is_finite() || center_x < 0. || center_x > w {
            return Zone::Unknown;
        }

        let third = (width / 3) as f64;
        if center_x < third {
            Zone::Left
        } else if center_x < 2. * third {
            Zone::Center
        } else {
            Zone::Right
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::Left => "left",
            Zone::Center => "center",
            Zone::Right => "right",
            Zone::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_edges() {
        let w = 300;
        assert_eq!(Zone::for_center(0., w), Zone::Left);
        assert_eq!(Zone::for_center(99.9, w), Zone::Left);
        assert_eq!(Zone::for_center(100., w), Zone::Center);
        assert_eq!(Zone::for_center(199.9, w), Zone::Center);
        assert_eq!(Zone::for_center(200., w), Zone::Right);
        assert_eq!(Zone::for_center(299., w), Zone::Right);
        assert_eq!(Zone::for_center(300., w), Zone::Right);
    }

    #[test]
    fn test_uneven_width_uses_whole_pixel_thirds() {
        let w = 640;
        assert_eq!(Zone::for_center(212., w), Zone::Left);
        assert_eq!(Zone::for_center(213., w), Zone::Center);
        assert_eq!(Zone::for_center(425., w), Zone::Center);
        assert_eq!(Zone::for_center(426., w), Zone::Right);
        assert_eq!(Zone::for_center(640., w), Zone::Right);
    }

    #[test]
    fn test_narrow_frame_is_all_right() {
        assert_eq!(Zone::for_center(0., 2), Zone::Right);
        assert_eq!(Zone::for_center(2., 2), Zone::Right);
    }

    #[test]
    fn test_out_of_frame() {
        assert_eq!(Zone::for_center(-1., 300), Zone::Unknown);
        assert_eq!(Zone::for_center(300.5, 300), Zone::Unknown);
        assert_eq!(Zone::for_center(f64::NAN, 300), Zone::Unknown);
        assert_eq!(Zone::for_center(0., 0), Zone::Unknown);
    }
}
