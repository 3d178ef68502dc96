use std::path::PathBuf;

use crate::error::{IngestError, Result};
use crate::external::RetryPolicy;
use crate::model::{BoundingBox, Tile};
use crate::rasterize::GRID_RESOLUTION_DEG;
use crate::tiling::{bbox_tile, utm_tiles};
use crate::upload::CloudConfig;

#[derive(Debug, Clone, PartialEq)]
pub enum TilingMode {
    /// The 120 UTM zone/hemisphere strips.
    UtmZones,
    /// One caller-supplied box in WGS84.
    BoundingBox(BoundingBox),
}

impl TilingMode {
    pub fn tiles(&self) -> Vec<Tile> {
        match self {
            TilingMode::UtmZones => utm_tiles(),
            TilingMode::BoundingBox(bbox) => vec![bbox_tile(*bbox)],
        }
    }

    pub fn is_single_tile(&self) -> bool {
        matches!(self, TilingMode::BoundingBox(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestConfig {
    /// Local HDF5 path or http(s) URL of the granule.
    pub source: String,
    /// Parent of the per-run work directory; the system temp dir when `None`.
    pub work_root: Option<PathBuf>,
    pub tiling: TilingMode,
    /// Grid cell size in decimal degrees.
    pub resolution_deg: f64,
    pub retry: RetryPolicy,
    pub cloud: CloudConfig,
    /// Stop after writing the vector files; implies `keep_work_dir`.
    pub extract_only: bool,
    pub keep_work_dir: bool,
    pub downloader: String,
    pub rasterizer: String,
}

impl IngestConfig {
    pub fn new(source: impl Into<String>, cloud: CloudConfig) -> Self {
        Self {
            source: source.into(),
            work_root: None,
            tiling: TilingMode::UtmZones,
            resolution_deg: GRID_RESOLUTION_DEG,
            retry: RetryPolicy::default(),
            cloud,
            extract_only: false,
            keep_work_dir: false,
            downloader: "wget".to_string(),
            rasterizer: "gdal_rasterize".to_string(),
        }
    }

    pub fn is_remote_source(&self) -> bool {
        self.source.starts_with("http://") || self.source.starts_with("https://")
    }

    pub fn keeps_work_dir(&self) -> bool {
        self.keep_work_dir || self.extract_only
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(IngestError::Config("no source given".to_string()));
        }
        if !(self.resolution_deg.is_finite() && self.resolution_deg > 0.0) {
            return Err(IngestError::Config(format!(
                "resolution must be positive, got {}",
                self.resolution_deg
            )));
        }
        if !self.extract_only {
            if self.cloud.bucket.trim().is_empty() {
                return Err(IngestError::Config(
                    "a bucket is required unless only extracting".to_string(),
                ));
            }
            if self.cloud.asset_root.trim().is_empty() {
                return Err(IngestError::Config(
                    "an asset root is required unless only extracting".to_string(),
                ));
            }
        }
        Ok(())
    }
}
