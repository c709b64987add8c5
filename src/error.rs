use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A label line that can't be parsed into a detection.
    #[error("Malformed label at {path}:{line}: {reason}")]
    MalformedLabel {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Invalid symbol map: {0}")]
    InvalidSymbolMap(String),

    #[error("Invalid class names in {path}: {reason}")]
    InvalidClassNames { path: PathBuf, reason: String },

    /// The detector produced no output for a sample.
    #[error("No prediction found at {0}")]
    MissingPrediction(PathBuf),

    #[error("No image found for {0}")]
    MissingImage(PathBuf),

    #[error("Failed to read image dimensions of {path}: {source}")]
    ImageDimensions {
        path: PathBuf,
        source: image::ImageError,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
