use std::fs;
use std::path::{Path, PathBuf};

use gdal::vector::{
    FieldValue, Geometry, LayerAccess, LayerOptions, OGRFieldType, OGRwkbGeometryType,
};
use gdal::{Dataset, DriverManager};
use tempfile::TempDir;

use crate::error::{IngestError, Result};
use crate::model::{Crs, ScienceField};
use crate::reproject::traditional_order_srs;

pub const LAYER_NAME: &str = "data";
pub const VECTOR_FILE_NAME: &str = "data.shp";

/// Encoded property values in [`ScienceField::ALL`] order.
pub type Properties = [i32; 10];

/// Receives accepted shots as point features.
pub trait FeatureSink {
    fn write_point(&mut self, x: f64, y: f64, properties: &Properties) -> Result<()>;
}

/// Point shapefile written into a hidden staging directory and moved into place by [`finish`].
///
/// Dropping the writer without calling `finish` deletes everything written so far.
///
/// [`finish`]: ShapefileWriter::finish
pub struct ShapefileWriter {
    // declared before `staging` so the dataset is closed before the directory is removed
    dataset: Dataset,
    staging: TempDir,
    field_names: Vec<&'static str>,
    written: u64,
}

impl ShapefileWriter {
    pub fn create(parent: &Path, crs: Crs) -> Result<Self> {
        // ESRI Shapefileドライバーを取得
        let driver = DriverManager::get_driver_by_name("ESRI Shapefile")
            .map_err(|e| IngestError::gdal("Failed to get ESRI Shapefile driver", e))?;

        fs::create_dir_all(parent).map_err(|e| IngestError::path(parent, e))?;
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(parent)
            .map_err(|e| IngestError::path(parent, e))?;

        let mut dataset = driver
            .create_vector_only(staging.path().join(VECTOR_FILE_NAME))
            .map_err(|e| IngestError::gdal("Failed to create vector dataset", e))?;

        let srs = traditional_order_srs(crs)?;
        {
            let layer = dataset
                .create_layer(LayerOptions {
                    name: LAYER_NAME,
                    srs: Some(&srs),
                    ty: OGRwkbGeometryType::wkbPoint,
                    options: None,
                })
                .map_err(|e| IngestError::gdal("Failed to create layer", e))?;

            // スキーマ: 10個の整数プロパティ
            let fields: Vec<(&str, OGRFieldType::Type)> = ScienceField::ALL
                .iter()
                .map(|f| (f.name(), OGRFieldType::OFTInteger))
                .collect();
            layer
                .create_defn_fields(&fields)
                .map_err(|e| IngestError::gdal("Failed to define layer fields", e))?;
        }

        Ok(Self {
            dataset,
            staging,
            field_names: ScienceField::ALL.iter().map(|f| f.name()).collect(),
            written: 0,
        })
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Closes the dataset and moves its files into `dest_dir`, replacing any
    /// previous output there. Returns the path of the `.shp` file.
    pub fn finish(self, dest_dir: &Path) -> Result<PathBuf> {
        let Self {
            mut dataset,
            staging,
            written,
            ..
        } = self;

        dataset
            .flush_cache()
            .map_err(|e| IngestError::gdal("Failed to flush vector dataset", e))?;
        drop(dataset);

        fs::create_dir_all(dest_dir).map_err(|e| IngestError::path(dest_dir, e))?;
        remove_previous_output(dest_dir)?;

        let mut staged: Vec<PathBuf> = fs::read_dir(staging.path())
            .map_err(|e| IngestError::path(staging.path(), e))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<_>>()
            .map_err(|e| IngestError::path(staging.path(), e))?;
        // the .shp goes last: once it exists, its sidecars do too
        staged.sort_by_key(|p| p.extension().is_some_and(|ext| ext == "shp"));

        for path in staged {
            let Some(name) = path.file_name() else {
                continue;
            };
            let target = dest_dir.join(name);
            fs::rename(&path, &target).map_err(|e| IngestError::path(&target, e))?;
        }

        tracing::debug!("Committed {} features to {:?}", written, dest_dir);
        Ok(dest_dir.join(VECTOR_FILE_NAME))
    }
}

impl FeatureSink for ShapefileWriter {
    fn write_point(&mut self, x: f64, y: f64, properties: &Properties) -> Result<()> {
        let mut geometry = Geometry::empty(OGRwkbGeometryType::wkbPoint)
            .map_err(|e| IngestError::gdal("Failed to create point geometry", e))?;
        geometry.set_point_2d(0, (x, y));

        let values: Vec<FieldValue> = properties
            .iter()
            .map(|&v| FieldValue::IntegerValue(v))
            .collect();

        let mut layer = self
            .dataset
            .layer(0)
            .map_err(|e| IngestError::gdal("Failed to get layer", e))?;
        layer
            .create_feature_fields(geometry, &self.field_names, &values)
            .map_err(|e| IngestError::gdal("Failed to write feature", e))?;

        self.written += 1;
        Ok(())
    }
}

fn remove_previous_output(dest_dir: &Path) -> Result<()> {
    let stem = Path::new(VECTOR_FILE_NAME)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(LAYER_NAME);
    for entry in fs::read_dir(dest_dir).map_err(|e| IngestError::path(dest_dir, e))? {
        let path = entry.map_err(|e| IngestError::path(dest_dir, e))?.path();
        if path.is_file() && path.file_stem().and_then(|s| s.to_str()) == Some(stem) {
            fs::remove_file(&path).map_err(|e| IngestError::path(&path, e))?;
        }
    }
    Ok(())
}
