//! Per-tile extraction: filter, project and transcode every beam group, then
//! stream the accepted shots into a feature sink.

use std::path::Path;

use tracing::debug;

use crate::error::{IngestError, Result};
use crate::model::{
    BeamGroup, ExtractionResult, ScienceField, Tile, TileOutcome, TimeRange, GEDI_EPOCH_OFFSET,
};
use crate::reproject::{filter_and_project, GdalReprojector, Projection, Selection};
use crate::transcode::transcode_selected;
use crate::writer::{FeatureSink, Properties, ShapefileWriter};

/// Running totals threaded through the beam group loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Accumulator {
    pub time_range: Option<TimeRange>,
    pub total_points: u64,
}

impl Accumulator {
    /// Records one accepted shot; `gedi_time` is seconds since the GEDI epoch.
    pub fn record(&mut self, gedi_time: i64) {
        let t = gedi_time + GEDI_EPOCH_OFFSET;
        let shot = TimeRange { start: t, end: t };
        self.time_range = Some(match self.time_range {
            Some(range) => range.merge(shot),
            None => shot,
        });
        self.total_points += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.total_points == 0
    }
}

/// The accepted shots of one beam group.
#[derive(Debug, Clone, PartialEq)]
pub struct BeamSelection<'a> {
    pub beam: &'a BeamGroup,
    pub selection: Selection,
}

/// Filters and projects every beam group for `tile`, skipping groups with no
/// shot inside it.
///
/// Fails if there is nothing to extract from at all: no beam groups, or beam
/// groups without a single shot between them.
pub fn select_tile<'a>(
    beams: &'a [BeamGroup],
    tile: &Tile,
    projection: &dyn Projection,
) -> Result<Vec<BeamSelection<'a>>> {
    if beams.is_empty() {
        return Err(IngestError::data_format("no beam groups to extract from"));
    }
    if beams.iter().all(BeamGroup::is_empty) {
        return Err(IngestError::data_format(
            "beam groups contain no shots at all",
        ));
    }

    let mut selections = Vec::new();
    for beam in beams {
        let selection = filter_and_project(beam, &tile.bbox, projection)?;
        if selection.is_empty() {
            debug!("{}: no shots in {}", beam.name, tile);
            continue;
        }
        debug!("{}: {} shots in {}", beam.name, selection.len(), tile);
        selections.push(BeamSelection { beam, selection });
    }
    Ok(selections)
}

/// Writes one feature per selected shot, in beam group order.
pub fn write_selections(
    selections: &[BeamSelection<'_>],
    sink: &mut dyn FeatureSink,
) -> Result<Accumulator> {
    let mut acc = Accumulator::default();
    for BeamSelection { beam, selection } in selections {
        let columns: Vec<Vec<i32>> = ScienceField::ALL
            .iter()
            .map(|&field| transcode_selected(beam.field(field), &selection.indices, field))
            .collect();

        for (k, &shot) in selection.indices.iter().enumerate() {
            let mut properties: Properties = [0; 10];
            for (slot, column) in properties.iter_mut().zip(&columns) {
                *slot = column[k];
            }
            sink.write_point(selection.x[k], selection.y[k], &properties)?;
            acc.record(beam.time[shot]);
        }
    }
    Ok(acc)
}

pub fn extract_tile(
    beams: &[BeamGroup],
    tile: &Tile,
    projection: &dyn Projection,
    sink: &mut dyn FeatureSink,
) -> Result<Accumulator> {
    let selections = select_tile(beams, tile, projection)?;
    write_selections(&selections, sink)
}

/// Extracts one tile into `<out_dir>/data.shp`.
///
/// Nothing is written for a tile without accepted shots. On error the partial
/// vector file is discarded.
pub fn extract_to_dir(beams: &[BeamGroup], tile: &Tile, out_dir: &Path) -> Result<TileOutcome> {
    let projection = GdalReprojector::new(tile.crs)?;
    let selections = select_tile(beams, tile, &projection)?;
    if selections.is_empty() {
        return Ok(TileOutcome::Empty);
    }

    let mut writer = ShapefileWriter::create(out_dir, tile.crs)?;
    let acc = write_selections(&selections, &mut writer)?;
    let Some(time_range) = acc.time_range else {
        // dropping the writer discards its staging directory
        return Ok(TileOutcome::Empty);
    };
    let vector_path = writer.finish(out_dir)?;

    Ok(TileOutcome::Extracted(ExtractionResult {
        time_range,
        total_points: acc.total_points,
        vector_path,
    }))
}
