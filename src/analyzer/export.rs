use super::FaceRecord;
use crate::error::Result;
use image::RgbImage;
use std::fs::File;
use std::borrow::Cow;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};

pub const CSV_HEADER: &str = "face_id,zone,pose.pitch,pose.yaw,pose.roll,pose.confidence,confidence,emotion,\
position.x1,position.y1,position.x2,position.y2,position.center_x,position.center_y,created_at";

const SENTINEL: &str = "None";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Quote a free-text field when it would otherwise split the row.
fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

/// One row per face. A frame without faces still gets a single placeholder
/// row so every capture leaves a file behind.
pub fn write_csv<W: Write>(mut out: W, records: &[FaceRecord]) -> Result<()> {
    writeln!(out, "{CSV_HEADER}")?;

    if records.is_empty() {
        let sentinels = vec![SENTINEL; 13].join(",");
        writeln!(out, "0,unknown,{sentinels}")?;
        return Ok(());
    }

    for r in records {
        let p = &r.position;
        writeln!(
            out,
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            csv_field(&r.face_id),
            r.zone,
            r.pose.pitch,
            r.pose.yaw,
            r.pose.roll,
            r.pose.confidence,
            r.emotion.confidence,
            r.emotion.label,
            p.x1,
            p.y1,
            p.x2,
            p.y2,
            p.center_x,
            p.center_y,
            r.created_at.format(TIMESTAMP_FORMAT),
        )?;
    }

    Ok(())
}

/// Save the annotated frame and its face table.
pub fn save_results(img: &RgbImage, records: &[FaceRecord], image_path: &Path, csv_path: &Path) -> Result<()> {
    img.save(image_path)?;
    info!("Annotated image saved to {image_path:?}");

    let mut out = BufWriter::new(File::create(csv_path)?);
    write_csv(&mut out, records)?;
    out.flush()?;

    if records.is_empty() {
        warn!("No faces to export, wrote placeholder row to {csv_path:?}");
    } else {
        info!("Face data saved to {csv_path:?}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{Position, Zone};
    use crate::pipeline::{Emotion, EmotionReading};
    use crate::pose::Pose;
    use crate::shapes::Rect;
    use chrono::NaiveDate;

    fn record() -> FaceRecord {
        FaceRecord {
            face_id: "face_1".to_string(),
            position: Position::from(Rect::new(10, 20, 50, 70)),
            zone: Zone::Center,
            pose: Pose {
                pitch: -3.25,
                yaw: 12.5,
                roll: 0.75,
                confidence: 1.,
            },
            emotion: EmotionReading {
                label: Emotion::Happy,
                confidence: 0.87,
            },
            detector_score: 0.99,
            created_at: NaiveDate::from_ymd_opt(2024, 3, 5)
                .unwrap()
                .and_hms_opt(9, 30, 0)
                .unwrap(),
        }
    }

    fn csv(records: &[FaceRecord]) -> Vec<String> {
        let mut buf = Vec::new();
        write_csv(&mut buf, records).unwrap();
        String::from_utf8(buf).unwrap().lines().map(str::to_string).collect()
    }

    #[test]
    fn test_face_row() {
        let lines = csv(&[record()]);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(
            lines[1],
            "face_1,center,-3.25,12.5,0.75,1,0.87,happy,10,20,50,70,30,45,2024-03-05 09:30:00"
        );
    }

    #[test]
    fn test_face_id_with_delimiters_is_quoted() {
        let mut r = record();
        r.face_id = "row 2, seat \"b\"".to_string();
        let lines = csv(&[r]);
        assert!(lines[1].starts_with("\"row 2, seat \"\"b\"\"\",center,-3.25,"));
        assert_eq!(csv_field("face_3"), "face_3");
    }

    #[test]
    fn test_placeholder_row() {
        let lines = csv(&[]);
        assert_eq!(lines.len(), 2);
        let fields: Vec<&str> = lines[1].split(',').collect();
        assert_eq!(fields.len(), lines[0].split(',').count());
        assert_eq!(fields[0], "0");
        assert_eq!(fields[1], "unknown");
        assert!(fields[2..].iter().all(|f| *f == "None"));
    }
}
