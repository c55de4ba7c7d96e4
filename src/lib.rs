#![warn(unused_extern_crates)]

pub mod analyzer;
pub mod config;
pub mod engagement;
pub mod error;
pub mod geometry;
pub mod pipeline;
pub mod pose;
pub mod session;
pub mod shapes;

pub use analyzer::{FaceAnalyzer, FaceRecord, Position, Zone};
pub use config::Config;
pub use engagement::{FrameEngagement, SessionEngagement};
pub use error::{Error, Result};
