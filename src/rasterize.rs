//! Hand-off to `gdal_rasterize`: one grid per science field.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::Result;
use crate::external::{RetryPolicy, ToolCommand};
use crate::model::{ScienceField, Tile};
use crate::writer::LAYER_NAME;

/// Grid cell size in decimal degrees (about 25 m at the equator).
pub const GRID_RESOLUTION_DEG: f64 = 0.000225;

/// Used to express the cell size in metres for projected tiles.
pub const METRES_PER_DEGREE: f64 = 111_320.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridType {
    Byte,
    Int16,
}

impl GridType {
    pub fn for_field(field: ScienceField) -> Self {
        if field.is_categorical() {
            GridType::Byte
        } else {
            GridType::Int16
        }
    }

    pub fn gdal_name(self) -> &'static str {
        match self {
            GridType::Byte => "Byte",
            GridType::Int16 => "Int16",
        }
    }

    pub fn nodata(self) -> i32 {
        match self {
            GridType::Byte => 255,
            GridType::Int16 => -9999,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridFile {
    pub field: ScienceField,
    pub grid_type: GridType,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Rasterizer {
    program: String,
    resolution_deg: f64,
    policy: RetryPolicy,
}

impl Rasterizer {
    pub fn new(resolution_deg: f64, policy: RetryPolicy) -> Self {
        Self {
            program: "gdal_rasterize".to_string(),
            resolution_deg,
            policy,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Cell size in the tile's own units.
    pub fn cell_size(&self, tile: &Tile) -> f64 {
        if tile.crs.is_geographic() {
            self.resolution_deg
        } else {
            self.resolution_deg * METRES_PER_DEGREE
        }
    }

    pub fn command(&self, field: ScienceField, vector: &Path, tile: &Tile, out: &Path) -> ToolCommand {
        let grid_type = GridType::for_field(field);
        let nodata = grid_type.nodata().to_string();
        let cell = self.cell_size(tile).to_string();

        let mut cmd = ToolCommand::new(self.program.as_str())
            .args(["-l", LAYER_NAME, "-a", field.name()])
            .args(["-ot", grid_type.gdal_name()])
            .args(["-a_nodata", nodata.as_str(), "-init", nodata.as_str()])
            .args(["-tr", cell.as_str(), cell.as_str()]);
        // projected tiles take their extent from the layer; a whole zone at
        // this cell size would be a grid of millions of cells per side
        if tile.crs.is_geographic() {
            let b = tile.bbox;
            cmd = cmd.arg("-te").args([
                b.min_lon.to_string(),
                b.min_lat.to_string(),
                b.max_lon.to_string(),
                b.max_lat.to_string(),
            ]);
        }
        cmd.args(["-of", "GTiff", "-co", "COMPRESS=DEFLATE"])
            .arg(vector)
            .arg(out)
    }

    /// Writes `<out_dir>/<field>.tif` for every science field.
    pub fn rasterize(&self, vector: &Path, tile: &Tile, out_dir: &Path) -> Result<Vec<GridFile>> {
        info!("Rasterizing {} fields for {}", ScienceField::ALL.len(), tile);
        ScienceField::ALL
            .iter()
            .map(|&field| {
                let path = out_dir.join(format!("{}.tif", field.name()));
                self.command(field, vector, tile, &path).run(&self.policy)?;
                Ok(GridFile {
                    field,
                    grid_type: GridType::for_field(field),
                    path,
                })
            })
            .collect()
    }
}
