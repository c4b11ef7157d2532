use std::path::PathBuf;

use burn::record::RecorderError;

use crate::port::PortError;

/// Errors raised by the training, metric log, plotting and preprocessing glue.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("I/O error on `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid metric value `{value}` at {path}:{line}")]
    MetricParse {
        path: PathBuf,
        line: usize,
        value: String,
    },

    #[error("Image error on `{path}`: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Invalid training configuration: {0}")]
    InvalidConfig(String),

    #[error("Recorder error: {0}")]
    Recorder(#[from] RecorderError),

    #[error("Weight porting failed: {0}")]
    Port(#[from] PortError),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }

    pub(crate) fn image(path: impl Into<PathBuf>) -> impl FnOnce(image::ImageError) -> Self {
        let path = path.into();
        move |source| Self::Image { path, source }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
