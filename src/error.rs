use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to load image {path:?}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("malformed detector output: {0}")]
    Geometry(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("failed to write export: {0}")]
    Export(#[from] std::io::Error),

    #[error("failed to encode annotated image: {0}")]
    Encode(#[from] image::ImageError),

    #[error("score store error: {0}")]
    Store(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<ort::Error> for Error {
    fn from(e: ort::Error) -> Self {
        Error::Model(e.to_string())
    }
}

impl From<ndarray::ShapeError> for Error {
    fn from(e: ndarray::ShapeError) -> Self {
        Error::Geometry(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
