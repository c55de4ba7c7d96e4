use super::FaceRecord;
use crate::error::{Error, Result};
use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing;
use std::path::Path;
use tracing::debug;

const BOX_COLOR: Rgb<u8> = Rgb([0u8, 255u8, 0u8]);
const TEXT_COLOR: Rgb<u8> = Rgb([255u8, 0u8, 0u8]);

pub fn load_font(path: &Path) -> Result<FontVec> {
    let bytes = std::fs::read(path).map_err(|e| Error::Config(format!("cannot read font {path:?}: {e}")))?;
    FontVec::try_from_vec(bytes).map_err(|e| Error::Config(format!("invalid font {path:?}: {e}")))
}

/// Overlay text for a face, bottom line first.
pub fn overlay_lines(record: &FaceRecord) -> [String; 2] {
    [
        format!(
            "Emotion: {} ({:.2})",
            record.emotion.label, record.emotion.confidence
        ),
        format!("Zone: {}", record.zone),
    ]
}

/// Draw each face's box and, when a font is available, its emotion and zone
/// stacked above the box. Lines that would start above the image are skipped.
pub fn annotate(img: &mut RgbImage, records: &[FaceRecord], font: Option<&FontVec>, text_scale: f32) {
    for record in records {
        drawing::draw_hollow_rect_mut(img, record.position.bounds().into(), BOX_COLOR);

        let Some(font) = font else {
            continue;
        };

        let step = text_scale.round() as i32;
        for (i, line) in overlay_lines(record).iter().enumerate() {
            let y = record.position.y1 as i32 - step / 2 - (i as i32 + 1) * step;
            if y > 0 {
                drawing::draw_text_mut(
                    img,
                    TEXT_COLOR,
                    record.position.x1 as i32,
                    y,
                    PxScale::from(text_scale),
                    font,
                    line,
                );
            }
        }
    }
    debug!("Annotated {} faces", records.len());
}
