use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    /// The source is missing, unreadable, or does not look like a GEDI granule.
    #[error("Data format error: {0}")]
    DataFormat(String),

    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    #[error("{context}: {source}")]
    Gdal {
        context: String,
        #[source]
        source: gdal::errors::GdalError,
    },

    /// An external tool exited unsuccessfully, could not be spawned, or timed out.
    #[error("External tool `{tool}` failed: {detail}")]
    ExternalTool { tool: String, detail: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid tile: {0}")]
    InvalidTile(String),

    #[error("I/O error on {path:?}: {source}")]
    Path {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Manifest serialization failed: {0}")]
    Manifest(#[from] serde_json::Error),
}

impl IngestError {
    pub fn data_format(msg: impl Into<String>) -> Self {
        Self::DataFormat(msg.into())
    }

    pub fn gdal(context: impl Into<String>, source: gdal::errors::GdalError) -> Self {
        Self::Gdal {
            context: context.into(),
            source,
        }
    }

    pub fn path(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Path {
            path: path.into(),
            source,
        }
    }

    /// Whether the error says something about the input granule rather than
    /// about the environment it is processed in.
    pub fn is_data_format(&self) -> bool {
        matches!(self, Self::DataFormat(_) | Self::Hdf5(_))
    }
}
