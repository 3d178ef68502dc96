pub mod config;
pub mod driver;
pub mod error;
pub mod external;
pub mod extract;
pub mod model;
pub mod rasterize;
pub mod reader;
pub mod reproject;
pub mod tiling;
pub mod transcode;
pub mod upload;
pub mod writer;

pub use config::{IngestConfig, TilingMode};
pub use driver::{RunSummary, TileDriver};
pub use error::{IngestError, Result};
pub use external::RetryPolicy;
pub use model::{BeamGroup, BoundingBox, Crs, ExtractionResult, ScienceField, Tile, TileOutcome};
pub use reader::GediReader;
pub use upload::CloudConfig;
pub use writer::ShapefileWriter;
