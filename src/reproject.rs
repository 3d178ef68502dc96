use gdal::spatial_ref::{AxisMappingStrategy, CoordTransform, SpatialRef};

use crate::error::{IngestError, Result};
use crate::model::{BeamGroup, BoundingBox, Crs};

/// Maps WGS84 longitude/latitude in place into a tile's coordinate system.
pub trait Projection {
    fn project(&self, xs: &mut [f64], ys: &mut [f64]) -> Result<()>;
}

/// GDAL/PROJ backed transform from EPSG:4326 into `target`.
pub struct GdalReprojector {
    transform: CoordTransform,
    target: Crs,
}

impl GdalReprojector {
    pub fn new(target: Crs) -> Result<Self> {
        let source = traditional_order_srs(Crs::WGS84)?;
        let target_srs = traditional_order_srs(target)?;
        let transform = CoordTransform::new(&source, &target_srs).map_err(|e| {
            IngestError::gdal(format!("Failed to build transform to {}", target), e)
        })?;
        Ok(Self { transform, target })
    }

    pub fn target(&self) -> Crs {
        self.target
    }
}

impl Projection for GdalReprojector {
    fn project(&self, xs: &mut [f64], ys: &mut [f64]) -> Result<()> {
        if xs.is_empty() {
            return Ok(());
        }
        let mut zs = vec![0.0; xs.len()];
        self.transform
            .transform_coords(xs, ys, &mut zs)
            .map_err(|e| IngestError::gdal(format!("Failed to project into {}", self.target), e))
    }
}

/// SpatialRef with x = longitude / easting regardless of the authority's axis order.
pub fn traditional_order_srs(crs: Crs) -> Result<SpatialRef> {
    let mut srs = SpatialRef::from_epsg(crs.epsg)
        .map_err(|e| IngestError::gdal(format!("Failed to create SpatialRef from {}", crs), e))?;
    srs.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
    Ok(srs)
}

/// Shot positions as the midpoint of the first and last waveform bins.
pub fn centroids(beam: &BeamGroup) -> (Vec<f64>, Vec<f64>) {
    let lon = beam
        .lon_bin0
        .iter()
        .zip(&beam.lon_lastbin)
        .map(|(a, b)| (a + b) / 2.0)
        .collect();
    let lat = beam
        .lat_bin0
        .iter()
        .zip(&beam.lat_lastbin)
        .map(|(a, b)| (a + b) / 2.0)
        .collect();
    (lon, lat)
}

pub fn select_shots(lon: &[f64], lat: &[f64], bbox: &BoundingBox) -> Vec<usize> {
    lon.iter()
        .zip(lat)
        .enumerate()
        .filter(|(_, (&x, &y))| bbox.contains(x, y))
        .map(|(i, _)| i)
        .collect()
}

/// Shots of one beam group that fall inside a tile, with projected coordinates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub indices: Vec<usize>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl Selection {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Selects the shots inside `bbox` and projects only those. An empty selection is not an error.
pub fn filter_and_project(
    beam: &BeamGroup,
    bbox: &BoundingBox,
    projection: &dyn Projection,
) -> Result<Selection> {
    let (lon, lat) = centroids(beam);
    let indices = select_shots(&lon, &lat, bbox);
    if indices.is_empty() {
        return Ok(Selection::default());
    }

    let mut x: Vec<f64> = indices.iter().map(|&i| lon[i]).collect();
    let mut y: Vec<f64> = indices.iter().map(|&i| lat[i]).collect();
    projection.project(&mut x, &mut y)?;

    Ok(Selection { indices, x, y })
}
