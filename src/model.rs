use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{IngestError, Result};

/// Seconds between the Unix epoch and the GEDI epoch (2018-01-01T00:00:00Z).
pub const GEDI_EPOCH_OFFSET: i64 = 1_514_764_800;

/// Reserved value marking a missing measurement.
pub const NODATA_VALUE: f64 = -9999.0;

/// How a raw field value becomes the integer stored in the feature file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Encoding {
    /// `round(value * multiplier)`, sentinel left untouched.
    Scaled(f64),
    /// Already integral; truncated to an integer.
    Passthrough,
}

/// The science fields carried from every shot into the feature file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScienceField {
    Cover,
    Beam,
    Channel,
    Dem,
    FhdNormal,
    Pai,
    Rh100,
    PgapTheta,
    SolarElev,
    QualityFlag,
}

impl ScienceField {
    /// Schema order of the feature file properties.
    pub const ALL: [ScienceField; 10] = [
        ScienceField::Cover,
        ScienceField::Beam,
        ScienceField::Channel,
        ScienceField::Dem,
        ScienceField::FhdNormal,
        ScienceField::Pai,
        ScienceField::Rh100,
        ScienceField::PgapTheta,
        ScienceField::SolarElev,
        ScienceField::QualityFlag,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Property name in the feature file (shapefile names are capped at 10 chars).
    pub fn name(self) -> &'static str {
        match self {
            ScienceField::Cover => "cover",
            ScienceField::Beam => "beam",
            ScienceField::Channel => "channel",
            ScienceField::Dem => "dem",
            ScienceField::FhdNormal => "fhd_normal",
            ScienceField::Pai => "pai",
            ScienceField::Rh100 => "rh100",
            ScienceField::PgapTheta => "pgap_theta",
            ScienceField::SolarElev => "solar_elev",
            ScienceField::QualityFlag => "quality_fl",
        }
    }

    /// Dataset path relative to the beam group.
    pub fn dataset_path(self) -> &'static str {
        match self {
            ScienceField::Cover => "cover",
            ScienceField::Beam => "beam",
            ScienceField::Channel => "channel",
            ScienceField::Dem => "geolocation/digital_elevation_model",
            ScienceField::FhdNormal => "fhd_normal",
            ScienceField::Pai => "pai",
            ScienceField::Rh100 => "rh100",
            ScienceField::PgapTheta => "pgap_theta",
            ScienceField::SolarElev => "geolocation/solar_elevation",
            ScienceField::QualityFlag => "l2b_quality_flag",
        }
    }

    pub fn encoding(self) -> Encoding {
        match self {
            ScienceField::Cover
            | ScienceField::FhdNormal
            | ScienceField::Pai
            | ScienceField::PgapTheta => Encoding::Scaled(1000.0),
            ScienceField::SolarElev => Encoding::Scaled(10.0),
            ScienceField::Beam
            | ScienceField::Channel
            | ScienceField::Dem
            | ScienceField::Rh100
            | ScienceField::QualityFlag => Encoding::Passthrough,
        }
    }

    /// Fields whose values are labels rather than measurements.
    pub fn is_categorical(self) -> bool {
        matches!(
            self,
            ScienceField::Beam | ScienceField::Channel | ScienceField::QualityFlag
        )
    }
}

impl fmt::Display for ScienceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One beam group read into memory: parallel per-shot arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct BeamGroup {
    pub name: String,
    /// Acquisition time in whole seconds since the GEDI epoch.
    pub time: Vec<i64>,
    pub lon_bin0: Vec<f64>,
    pub lon_lastbin: Vec<f64>,
    pub lat_bin0: Vec<f64>,
    pub lat_lastbin: Vec<f64>,
    /// Raw science values indexed by [`ScienceField::index`].
    pub fields: [Vec<f64>; 10],
}

impl BeamGroup {
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn field(&self, field: ScienceField) -> &[f64] {
        &self.fields[field.index()]
    }

    /// Checks that every array has one entry per shot.
    pub fn validate(&self) -> Result<()> {
        let n = self.len();
        let geolocation = [
            ("geolocation/longitude_bin0", &self.lon_bin0),
            ("geolocation/longitude_lastbin", &self.lon_lastbin),
            ("geolocation/latitude_bin0", &self.lat_bin0),
            ("geolocation/latitude_lastbin", &self.lat_lastbin),
        ];
        for (path, values) in geolocation {
            if values.len() != n {
                return Err(IngestError::data_format(format!(
                    "{}/{} has {} entries, expected {}",
                    self.name,
                    path,
                    values.len(),
                    n
                )));
            }
        }
        for field in ScienceField::ALL {
            let len = self.field(field).len();
            if len != n {
                return Err(IngestError::data_format(format!(
                    "{}/{} has {} entries, expected {}",
                    self.name,
                    field.dataset_path(),
                    len,
                    n
                )));
            }
        }
        Ok(())
    }
}

/// Geographic rectangle, min-inclusive and max-exclusive on both axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Result<Self> {
        let bbox = Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        };
        if ![min_lon, min_lat, max_lon, max_lat]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(IngestError::InvalidTile(format!(
                "non-finite bounds in {}",
                bbox
            )));
        }
        if min_lon >= max_lon || min_lat >= max_lat {
            return Err(IngestError::InvalidTile(format!("empty extent {}", bbox)));
        }
        if min_lat < -90.0 || max_lat > 90.0 || min_lon < -180.0 || max_lon > 180.0 {
            return Err(IngestError::InvalidTile(format!(
                "{} lies outside -180..180 / -90..90",
                bbox
            )));
        }
        Ok(bbox)
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon < self.max_lon && lat >= self.min_lat && lat < self.max_lat
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}]",
            self.min_lon, self.min_lat, self.max_lon, self.max_lat
        )
    }
}

/// Parses `min_lon,min_lat,max_lon,max_lat`.
impl FromStr for BoundingBox {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(IngestError::InvalidTile(format!(
                "expected min_lon,min_lat,max_lon,max_lat, got '{}'",
                s
            )));
        }
        let mut values = [0.0f64; 4];
        for (value, part) in values.iter_mut().zip(&parts) {
            *value = part
                .parse()
                .map_err(|_| IngestError::InvalidTile(format!("'{}' is not a number", part)))?;
        }
        BoundingBox::new(values[0], values[1], values[2], values[3])
    }
}

/// Coordinate reference system, identified by EPSG code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Crs {
    pub epsg: u32,
}

impl Crs {
    pub const WGS84: Crs = Crs { epsg: 4326 };

    pub fn is_geographic(&self) -> bool {
        self.epsg == Self::WGS84.epsg
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}

/// One unit of extraction and rasterization work.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    /// Appended to the granule name to form the asset id, e.g. `_UTM33N`.
    pub suffix: String,
    pub bbox: BoundingBox,
    pub crs: Crs,
}

impl Tile {
    pub fn asset_id(&self, granule_stem: &str) -> String {
        format!("{}{}", granule_stem, self.suffix)
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = self.suffix.trim_start_matches('_');
        if label.is_empty() {
            write!(f, "bbox {} ({})", self.bbox, self.crs)
        } else {
            write!(f, "{} {} ({})", label, self.bbox, self.crs)
        }
    }
}

/// Unix-second acquisition bounds of the accepted shots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn merge(self, other: TimeRange) -> TimeRange {
        TimeRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// A tile that yielded at least one shot.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    pub time_range: TimeRange,
    pub total_points: u64,
    pub vector_path: PathBuf,
}

/// What extracting one tile produced. `Empty` is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum TileOutcome {
    Empty,
    Extracted(ExtractionResult),
}
