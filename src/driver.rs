//! Tiling driver: fetch the granule, read its beam groups once, extract every
//! tile, then rasterize and publish the non-empty ones.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::external::ToolCommand;
use crate::extract::extract_to_dir;
use crate::model::{BeamGroup, ExtractionResult, Tile, TileOutcome};
use crate::rasterize::Rasterizer;
use crate::reader::GediReader;
use crate::upload::{AssetRequest, Publisher};

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedTile {
    pub asset_id: String,
    pub result: ExtractionResult,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub tiles: usize,
    pub empty: usize,
    pub extracted: Vec<ExtractedTile>,
    /// Assets whose ingestion was started.
    pub published: Vec<String>,
    /// `(asset id, error message)` of tiles that failed.
    pub failed: Vec<(String, String)>,
    /// Set when the work directory was kept.
    pub work_dir: Option<PathBuf>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct TileDriver {
    config: IngestConfig,
}

impl TileDriver {
    pub fn new(config: IngestConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn run(&self) -> Result<RunSummary> {
        // 作業ディレクトリの作成
        let work_root = self
            .config
            .work_root
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        std::fs::create_dir_all(&work_root).map_err(|e| IngestError::path(&work_root, e))?;
        let work = tempfile::Builder::new()
            .prefix("gedi-ingest-")
            .tempdir_in(&work_root)
            .map_err(|e| IngestError::path(&work_root, e))?;
        info!("Created work directory {:?}", work.path());

        let mut summary = self.run_in(work.path())?;

        if self.config.keeps_work_dir() {
            let kept = work.keep();
            info!("Keeping work directory {:?}", kept);
            summary.work_dir = Some(kept);
        }
        Ok(summary)
    }

    fn run_in(&self, work_dir: &Path) -> Result<RunSummary> {
        let source = self.fetch_source(work_dir)?;
        let source_file = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "granule".to_string());

        info!("Reading HDF5 file {:?}", source);
        let reader = GediReader::open(&source)?;
        let beams = reader.read_all()?;
        let shots: usize = beams.iter().map(BeamGroup::len).sum();
        info!("Read {} beam groups, {} shots", beams.len(), shots);

        let tiles = self.config.tiling.tiles();
        let mut summary = RunSummary {
            tiles: tiles.len(),
            ..RunSummary::default()
        };

        // タイルごとに並列で抽出
        let outcomes: Vec<(Tile, Result<TileOutcome>)> = tiles
            .into_par_iter()
            .map(|tile| {
                let dir = work_dir.join(tile.asset_id(&stem));
                let outcome = extract_to_dir(&beams, &tile, &dir);
                (tile, outcome)
            })
            .collect();

        let rasterizer = Rasterizer::new(self.config.resolution_deg, self.config.retry.clone())
            .with_program(self.config.rasterizer.as_str());
        let publisher = Publisher::new(self.config.cloud.clone(), self.config.retry.clone());
        let mut provisioned = false;

        for (tile, outcome) in outcomes {
            let asset_id = tile.asset_id(&stem);
            let result = match outcome {
                Ok(TileOutcome::Empty) => {
                    debug!("{}: no points, skipping", tile);
                    summary.empty += 1;
                    continue;
                }
                Ok(TileOutcome::Extracted(result)) => result,
                Err(e) => {
                    self.tile_failed(&mut summary, &asset_id, e)?;
                    continue;
                }
            };

            info!(
                "Processing asset {} ({} points)",
                asset_id, result.total_points
            );
            summary.extracted.push(ExtractedTile {
                asset_id: asset_id.clone(),
                result: result.clone(),
            });
            if self.config.extract_only {
                continue;
            }

            if !provisioned {
                publisher.provision();
                provisioned = true;
            }
            match self.publish_tile(&rasterizer, &publisher, &tile, &asset_id, &source_file, &result)
            {
                Ok(()) => summary.published.push(asset_id),
                Err(e) => self.tile_failed(&mut summary, &asset_id, e)?,
            }
        }

        info!(
            "Done: {} tiles, {} with points, {} empty, {} failed",
            summary.tiles,
            summary.extracted.len(),
            summary.empty,
            summary.failed.len()
        );
        Ok(summary)
    }

    /// Downloads a remote granule into `work_dir`; a local path is used as is.
    fn fetch_source(&self, work_dir: &Path) -> Result<PathBuf> {
        if !self.config.is_remote_source() {
            return Ok(PathBuf::from(&self.config.source));
        }

        let name = remote_file_name(&self.config.source).ok_or_else(|| {
            IngestError::Config(format!(
                "cannot derive a file name from {}",
                self.config.source
            ))
        })?;
        let target = work_dir.join(name);
        info!("Downloading {} to {:?}", self.config.source, target);
        ToolCommand::new(self.config.downloader.as_str())
            .arg("-q")
            .arg("-O")
            .arg(&target)
            .arg(&self.config.source)
            .run(&self.config.retry)?;
        Ok(target)
    }

    fn publish_tile(
        &self,
        rasterizer: &Rasterizer,
        publisher: &Publisher,
        tile: &Tile,
        asset_id: &str,
        source_file: &str,
        result: &ExtractionResult,
    ) -> Result<()> {
        let tile_dir = result
            .vector_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let grids = rasterizer.rasterize(&result.vector_path, tile, &tile_dir)?;
        publisher.publish(&AssetRequest {
            asset_id,
            source_file,
            grids: &grids,
            result,
            work_dir: &tile_dir,
        })
    }

    /// Any failure in single-tile mode ends the run. Otherwise the tile is
    /// recorded and the remaining tiles go on.
    fn tile_failed(&self, summary: &mut RunSummary, asset_id: &str, e: IngestError) -> Result<()> {
        if self.config.tiling.is_single_tile() {
            error!("{}: {}", asset_id, e);
            return Err(e);
        }
        warn!("{}: failed, continuing with the next tile: {}", asset_id, e);
        summary.failed.push((asset_id.to_string(), e.to_string()));
        Ok(())
    }
}

/// Last path segment of a URL, without query or fragment.
pub fn remote_file_name(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next()?;
    let name = path.trim_end_matches('/').rsplit('/').next()?;
    if name.is_empty() || name.contains(':') {
        None
    } else {
        Some(name)
    }
}
