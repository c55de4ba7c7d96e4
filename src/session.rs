//! A monitoring session: analyze each capture in turn, export its artifacts,
//! score it, and persist the session's mean score.

use crate::analyzer::{FaceAnalyzer, annotate_frame, save_results};
use crate::config::Config;
use crate::engagement::{self, FrameEngagement, SessionEngagement};
use crate::error::{Error, Result};
use chrono::NaiveDateTime;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{Level, debug, error, info, span, warn};

/// One persisted session score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session: String,
    pub score: f64,
    #[serde(default)]
    pub report: String,
    #[serde(default)]
    pub created_at: Option<NaiveDateTime>,
}

pub trait ScoreStore {
    fn append(&mut self, report: SessionReport) -> Result<()>;

    fn reports(&self) -> Result<Vec<SessionReport>>;

    fn all_scores(&self) -> Result<Vec<f64>> {
        Ok(self.reports()?.into_iter().map(|r| r.score).collect())
    }

    /// `Session {n}` for the next report appended.
    fn next_label(&self) -> Result<String> {
        Ok(format!("Session {}", self.reports()?.len() + 1))
    }
}

/// Scores kept as a pretty-printed JSON array. A missing file is an empty
/// store.
pub struct JsonScoreStore {
    path: PathBuf,
}

impl JsonScoreStore {
    pub fn new(path: impl Into<PathBuf>) -> JsonScoreStore {
        JsonScoreStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ScoreStore for JsonScoreStore {
    fn append(&mut self, report: SessionReport) -> Result<()> {
        let mut reports = self.reports()?;
        reports.push(report);

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| Error::Store(format!("cannot create {dir:?}: {e}")))?;
        }
        let json = serde_json::to_string_pretty(&reports).map_err(|e| Error::Store(e.to_string()))?;
        std::fs::write(&self.path, json).map_err(|e| Error::Store(format!("cannot write {:?}: {e}", self.path)))?;

        debug!("Stored {} session scores in {:?}", reports.len(), self.path);
        Ok(())
    }

    fn reports(&self) -> Result<Vec<SessionReport>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::Store(format!("cannot read {:?}: {e}", self.path)))?;
        serde_json::from_str(&raw).map_err(|e| Error::Store(format!("cannot parse {:?}: {e}", self.path)))
    }
}

/// Mean of every stored session score, recomputed from the store each call.
pub fn institution_score(store: &dyn ScoreStore) -> Result<f64> {
    Ok(engagement::institution_score(&store.all_scores()?))
}

pub fn load_capture(path: &Path) -> Result<RgbImage> {
    let img = image::open(path).map_err(|source| Error::ImageLoad {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(img.into_rgb8())
}

fn check_time(within_ms: u32, start: Instant, waypoint: &str) -> bool {
    let elapsed_ms = start.elapsed().as_millis();
    if elapsed_ms >= within_ms.into() {
        warn!("{elapsed_ms}ms exceeds allowed time of {within_ms}ms at {waypoint}");
        return false;
    }

    debug!("{elapsed_ms}ms at {waypoint}");
    true
}

pub struct SessionRunner<'a> {
    analyzer: &'a FaceAnalyzer,
    config: &'a Config,
}

impl<'a> SessionRunner<'a> {
    pub fn new(analyzer: &'a FaceAnalyzer, config: &'a Config) -> SessionRunner<'a> {
        SessionRunner { analyzer, config }
    }

    pub fn image_path(&self, n: usize) -> PathBuf {
        self.config.session.output_dir.join(format!("annotated_image_{n}.jpg"))
    }

    pub fn csv_path(&self, n: usize) -> PathBuf {
        self.config.session.output_dir.join(format!("face_data_{n}.csv"))
    }

    /// Analyze capture `n` (1-based) and export its artifacts. Export
    /// failures are logged; only an unreadable image fails the capture.
    pub fn process_capture(&self, n: usize, path: &Path) -> Result<FrameEngagement> {
        let span = span!(Level::INFO, "capture", n);
        let _guard = span.enter();
        let start = Instant::now();

        let mut img = load_capture(path)?;
        let records = self.analyzer.analyze(&img);
        if let Some(within_ms) = self.config.session.capture_deadline_ms {
            check_time(within_ms, start, "Face Analysis");
        }

        let frame = FrameEngagement::new(n, records, &self.config.engagement);
        info!("Engagement score for capture {n}: {:.2}", frame.score);

        let exported = annotate_frame(&mut img, &frame.per_face, self.config)
            .and_then(|_| save_results(&img, &frame.per_face, &self.image_path(n), &self.csv_path(n)));
        if let Err(e) = exported {
            error!("Failed to export capture {n}: {e}");
        }

        Ok(frame)
    }

    /// Run every capture in order, waiting the configured interval between
    /// them. Unreadable captures are skipped.
    pub fn run(&self, session_id: &str, captures: &[PathBuf]) -> Result<SessionEngagement> {
        let span = span!(Level::INFO, "session", session_id);
        let _guard = span.enter();

        std::fs::create_dir_all(&self.config.session.output_dir)?;

        let interval = Duration::from_secs(self.config.session.interval_secs);
        let mut session = SessionEngagement::new(session_id);
        for (i, path) in captures.iter().enumerate() {
            match self.process_capture(i + 1, path) {
                Ok(frame) => session.record(&frame),
                Err(e @ Error::ImageLoad { .. }) => warn!("Skipping capture {}: {e}", i + 1),
                Err(e) => return Err(e),
            }

            if i + 1 < captures.len() && !interval.is_zero() {
                debug!("Waiting {interval:?} before the next capture");
                thread::sleep(interval);
            }
        }

        info!(
            "Session {session_id} scored {:.2} over {} frames",
            session.aggregate_score,
            session.frame_scores.len()
        );
        Ok(session)
    }
}

/// Append a finished session to the store. An empty session id takes the
/// store's next `Session {n}` label.
pub fn persist_session(store: &mut dyn ScoreStore, session: &SessionEngagement, report: String) -> Result<()> {
    let label = if session.session_id.is_empty() {
        store.next_label()?
    } else {
        session.session_id.clone()
    };

    store.append(SessionReport {
        session: label,
        score: session.aggregate_score,
        report,
        created_at: Some(chrono::Local::now().naive_local()),
    })
}

/// Plain-text summary stored alongside a session score.
pub fn summarize(session: &SessionEngagement) -> String {
    format!(
        "{} frames, mean engagement {:.2}, frame scores [{}]",
        session.frame_scores.len(),
        session.aggregate_score,
        session
            .frame_scores
            .iter()
            .map(|s| format!("{s:.2}"))
            .collect::<Vec<_>>()
            .join(", ")
    )
}
