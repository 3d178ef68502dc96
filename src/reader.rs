//! Beam group discovery and loading for GEDI L2B granules.

use std::path::{Path, PathBuf};

use hdf5::{File, Group};
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::model::{BeamGroup, ScienceField};

/// Case-sensitive prefix shared by every beam group name.
pub const BEAM_PREFIX: &str = "BEAM";

const TIME_DATASET: &str = "master_int";
const LON_BIN0: &str = "geolocation/longitude_bin0";
const LON_LASTBIN: &str = "geolocation/longitude_lastbin";
const LAT_BIN0: &str = "geolocation/latitude_bin0";
const LAT_LASTBIN: &str = "geolocation/latitude_lastbin";

pub fn is_beam_group(name: &str) -> bool {
    name.starts_with(BEAM_PREFIX)
}

/// Keeps the beam group names, in sorted order.
pub fn filter_beam_names<I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut beams: Vec<String> = names.into_iter().filter(|n| is_beam_group(n)).collect();
    beams.sort();
    beams
}

pub struct GediReader {
    path: PathBuf,
    file: File,
}

impl GediReader {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(IngestError::data_format(format!(
                "source {} does not exist",
                path.display()
            )));
        }
        let file = File::open(path).map_err(|e| {
            IngestError::data_format(format!("cannot open {} as HDF5: {}", path.display(), e))
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Names of the top-level groups that hold beam data. Fails if there are none.
    pub fn beam_names(&self) -> Result<Vec<String>> {
        let groups = self.file.groups()?;
        let names = filter_beam_names(
            groups
                .iter()
                .map(|g| g.name().trim_start_matches('/').to_string()),
        );
        if names.is_empty() {
            return Err(IngestError::data_format(format!(
                "{} contains no groups named {}*",
                self.path.display(),
                BEAM_PREFIX
            )));
        }
        debug!("Found {} beam groups: {:?}", names.len(), names);
        Ok(names)
    }

    pub fn read_beam(&self, name: &str) -> Result<BeamGroup> {
        let group = self.file.group(name).map_err(|e| {
            IngestError::data_format(format!("cannot open group {}: {}", name, e))
        })?;

        let mut fields: [Vec<f64>; 10] = Default::default();
        for field in ScienceField::ALL {
            fields[field.index()] = read_f64(&group, field.dataset_path())?;
        }

        let beam = BeamGroup {
            name: name.to_string(),
            time: read_i64(&group, TIME_DATASET)?,
            lon_bin0: read_f64(&group, LON_BIN0)?,
            lon_lastbin: read_f64(&group, LON_LASTBIN)?,
            lat_bin0: read_f64(&group, LAT_BIN0)?,
            lat_lastbin: read_f64(&group, LAT_LASTBIN)?,
            fields,
        };
        beam.validate()?;
        debug!("Read {} shots from {}", beam.len(), name);
        Ok(beam)
    }

    /// Loads every beam group in discovery order.
    pub fn read_all(&self) -> Result<Vec<BeamGroup>> {
        self.beam_names()?
            .iter()
            .map(|name| self.read_beam(name))
            .collect()
    }
}

fn open_dataset(group: &Group, path: &str) -> Result<hdf5::Dataset> {
    group.dataset(path).map_err(|e| {
        IngestError::data_format(format!("missing dataset {}/{}: {}", group.name(), path, e))
    })
}

fn read_f64(group: &Group, path: &str) -> Result<Vec<f64>> {
    open_dataset(group, path)?.read_raw::<f64>().map_err(|e| {
        IngestError::data_format(format!("cannot read {}/{}: {}", group.name(), path, e))
    })
}

fn read_i64(group: &Group, path: &str) -> Result<Vec<i64>> {
    open_dataset(group, path)?.read_raw::<i64>().map_err(|e| {
        IngestError::data_format(format!("cannot read {}/{}: {}", group.name(), path, e))
    })
}
