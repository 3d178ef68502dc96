use crate::model::{BoundingBox, Crs, Tile};

pub const UTM_ZONES: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hemisphere {
    North,
    South,
}

impl Hemisphere {
    fn letter(self) -> char {
        match self {
            Hemisphere::North => 'N',
            Hemisphere::South => 'S',
        }
    }

    fn epsg_base(self) -> u32 {
        match self {
            Hemisphere::North => 32600,
            Hemisphere::South => 32700,
        }
    }
}

/// The 6-degree strip of `zone` (1..=60) in one hemisphere, projected to WGS84 / UTM.
pub fn utm_tile(zone: u32, hemisphere: Hemisphere) -> Tile {
    debug_assert!((1..=UTM_ZONES).contains(&zone));
    let min_lon = -186.0 + zone as f64 * 6.0;
    let (min_lat, max_lat) = match hemisphere {
        Hemisphere::North => (0.0, 90.0),
        Hemisphere::South => (-90.0, 0.0),
    };
    Tile {
        suffix: format!("_UTM{}{}", zone, hemisphere.letter()),
        bbox: BoundingBox {
            min_lon,
            min_lat,
            max_lon: min_lon + 6.0,
            max_lat,
        },
        crs: Crs {
            epsg: hemisphere.epsg_base() + zone,
        },
    }
}

/// All 120 zone/hemisphere tiles, southern zones first.
pub fn utm_tiles() -> Vec<Tile> {
    [Hemisphere::South, Hemisphere::North]
        .into_iter()
        .flat_map(|h| (1..=UTM_ZONES).map(move |zone| utm_tile(zone, h)))
        .collect()
}

/// A caller-supplied box, kept in WGS84.
pub fn bbox_tile(bbox: BoundingBox) -> Tile {
    Tile {
        suffix: String::new(),
        bbox,
        crs: Crs::WGS84,
    }
}
