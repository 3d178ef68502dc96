// tests/pipeline.rs

use std::path::{Path, PathBuf};

use gdal::vector::LayerAccess;
use gdal::Dataset;
use gedi_ingest::extract::extract_tile;
use gedi_ingest::model::GEDI_EPOCH_OFFSET;
use gedi_ingest::reproject::Projection;
use gedi_ingest::tiling::bbox_tile;
use gedi_ingest::writer::{FeatureSink, Properties};
use gedi_ingest::{
    BoundingBox, CloudConfig, GediReader, IngestConfig, RetryPolicy, ScienceField, TileDriver,
    TilingMode,
};
use tempfile::TempDir;

// ショット単位のテストデータ (L2B と同じ型)
struct Shot {
    time: u32,
    lon: f64,
    lat: f64,
    cover: f32,
}

const SHOTS: [Shot; 4] = [
    Shot { time: 100, lon: 12.5, lat: 5.0, cover: 0.834 },
    Shot { time: 200, lon: 20.0, lat: 5.0, cover: 0.5 },
    Shot { time: 300, lon: 14.0, lat: 9.0, cover: -9999.0 },
    Shot { time: 400, lon: -70.0, lat: -10.0, cover: 0.1 },
];

const GRANULE_STEM: &str = "GEDI02_B_2019108002012_O01959_T03909_02_001_01";

fn write_dataset<T: hdf5::H5Type>(group: &hdf5::Group, name: &str, values: &[T]) {
    group
        .new_dataset_builder()
        .with_data(values)
        .create(name)
        .unwrap();
}

/// Writes a granule with one beam group holding `SHOTS` plus a non-beam group.
/// Datasets use the on-disk types of real L2B products.
fn write_granule(dir: &Path) -> PathBuf {
    let path = dir.join(format!("{}.h5", GRANULE_STEM));
    let file = hdf5::File::create(&path).unwrap();
    file.create_group("METADATA").unwrap();

    let beam = file.create_group("BEAM0101").unwrap();
    let geolocation = beam.create_group("geolocation").unwrap();

    let times: Vec<u32> = SHOTS.iter().map(|s| s.time).collect();
    write_dataset(&beam, "master_int", &times);

    // bin0 と lastbin の中点が各ショットの位置になる
    let lon0: Vec<f64> = SHOTS.iter().map(|s| s.lon - 0.001).collect();
    let lon1: Vec<f64> = SHOTS.iter().map(|s| s.lon + 0.001).collect();
    let lat0: Vec<f64> = SHOTS.iter().map(|s| s.lat + 0.002).collect();
    let lat1: Vec<f64> = SHOTS.iter().map(|s| s.lat - 0.002).collect();
    write_dataset(&geolocation, "longitude_bin0", &lon0);
    write_dataset(&geolocation, "longitude_lastbin", &lon1);
    write_dataset(&geolocation, "latitude_bin0", &lat0);
    write_dataset(&geolocation, "latitude_lastbin", &lat1);

    let n = SHOTS.len();
    let cover: Vec<f32> = SHOTS.iter().map(|s| s.cover).collect();
    write_dataset(&beam, "cover", &cover);
    write_dataset(&beam, "beam", &vec![5u16; n]);
    write_dataset(&beam, "channel", &vec![2u8; n]);
    write_dataset(&geolocation, "digital_elevation_model", &vec![123.7f32; n]);
    write_dataset(&beam, "fhd_normal", &vec![2.5f32; n]);
    write_dataset(&beam, "pai", &vec![1.25f32; n]);
    write_dataset(&beam, "rh100", &vec![1520i16; n]);
    write_dataset(&beam, "pgap_theta", &vec![0.75f32; n]);
    write_dataset(&geolocation, "solar_elevation", &vec![-12.34f32; n]);
    write_dataset(&beam, "l2b_quality_flag", &vec![1u8; n]);

    path
}

fn gdal_available() -> bool {
    gdal::DriverManager::get_driver_by_name("ESRI Shapefile").is_ok()
        && gdal::spatial_ref::SpatialRef::from_epsg(32633).is_ok()
}

fn extract_only_config(source: &Path, work_root: &Path) -> IngestConfig {
    let mut config = IngestConfig::new(source.to_string_lossy(), CloudConfig::new("", ""));
    config.work_root = Some(work_root.to_path_buf());
    config.extract_only = true;
    config
}

#[test]
fn test_reader_loads_beam_groups() {
    let dir = TempDir::new().unwrap();
    let path = write_granule(dir.path());

    let reader = GediReader::open(&path).unwrap();
    assert_eq!(reader.beam_names().unwrap(), vec!["BEAM0101"]);

    let beams = reader.read_all().unwrap();
    assert_eq!(beams.len(), 1);
    let beam = &beams[0];
    assert_eq!(beam.len(), 4);
    assert_eq!(beam.time, vec![100, 200, 300, 400]);
    assert_eq!(beam.field(ScienceField::Cover)[0], 0.834f32 as f64);
    assert_eq!(beam.field(ScienceField::Cover)[2], -9999.0);
    assert_eq!(beam.field(ScienceField::Beam), &[5.0; 4]);
    assert_eq!(beam.field(ScienceField::QualityFlag), &[1.0; 4]);
    assert_eq!(beam.field(ScienceField::Rh100)[0], 1520.0);
    assert_eq!(beam.field(ScienceField::SolarElev)[0], -12.34f32 as f64);
}

// 恒等変換 (経緯度のまま)
struct Identity;

impl Projection for Identity {
    fn project(&self, _xs: &mut [f64], _ys: &mut [f64]) -> gedi_ingest::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct MemorySink {
    points: Vec<(f64, f64, Properties)>,
}

impl FeatureSink for MemorySink {
    fn write_point(&mut self, x: f64, y: f64, properties: &Properties) -> gedi_ingest::Result<()> {
        self.points.push((x, y, *properties));
        Ok(())
    }
}

#[test]
fn test_native_types_are_encoded_end_to_end() {
    let dir = TempDir::new().unwrap();
    let path = write_granule(dir.path());
    let beams = GediReader::open(&path).unwrap().read_all().unwrap();

    let tile = bbox_tile(BoundingBox::new(10.0, 0.0, 15.0, 10.0).unwrap());
    let mut sink = MemorySink::default();
    let acc = extract_tile(&beams, &tile, &Identity, &mut sink).unwrap();

    assert_eq!(acc.total_points, 2);
    let range = acc.time_range.unwrap();
    assert_eq!(range.start, 100 + GEDI_EPOCH_OFFSET);
    assert_eq!(range.end, 300 + GEDI_EPOCH_OFFSET);

    let column = |field: ScienceField| -> Vec<i32> {
        sink.points.iter().map(|(_, _, p)| p[field.index()]).collect()
    };
    assert_eq!(column(ScienceField::Cover), vec![834, -9999]);
    assert_eq!(column(ScienceField::Beam), vec![5, 5]);
    assert_eq!(column(ScienceField::Channel), vec![2, 2]);
    assert_eq!(column(ScienceField::QualityFlag), vec![1, 1]);
    assert_eq!(column(ScienceField::Rh100), vec![1520, 1520]);
    assert_eq!(column(ScienceField::Dem), vec![123, 123]);
    assert_eq!(column(ScienceField::Pai), vec![1250, 1250]);
    assert_eq!(column(ScienceField::SolarElev), vec![-123, -123]);
}

#[test]
fn test_granule_without_beams_is_data_format_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.h5");
    {
        let file = hdf5::File::create(&path).unwrap();
        file.create_group("METADATA").unwrap();
    }

    let err = GediReader::open(&path).unwrap().read_all().unwrap_err();
    assert!(err.is_data_format(), "{}", err);
}

#[test]
fn test_ragged_beam_is_data_format_error() {
    let dir = TempDir::new().unwrap();
    let path = write_granule(dir.path());
    {
        let file = hdf5::File::open_rw(&path).unwrap();
        let beam = file.group("BEAM0101").unwrap();
        beam.unlink("pai").unwrap();
        write_dataset(&beam, "pai", &[1.0f32, 2.0]);
    }

    let err = GediReader::open(&path).unwrap().read_all().unwrap_err();
    assert!(err.is_data_format(), "{}", err);
}

#[test]
fn test_bbox_run_writes_single_tile() {
    if !gdal_available() {
        eprintln!("Skipping: GDAL Shapefile driver or EPSG database not available");
        return;
    }
    let dir = TempDir::new().unwrap();
    let source = write_granule(dir.path());
    let work_root = dir.path().join("work");

    let mut config = extract_only_config(&source, &work_root);
    config.tiling = TilingMode::BoundingBox(BoundingBox::new(10.0, 0.0, 15.0, 10.0).unwrap());

    let summary = TileDriver::new(config).unwrap().run().unwrap();
    assert_eq!(summary.tiles, 1);
    assert_eq!(summary.extracted.len(), 1);
    assert!(summary.published.is_empty());
    assert!(summary.is_success());

    let tile = &summary.extracted[0];
    assert_eq!(tile.asset_id, GRANULE_STEM);
    assert_eq!(tile.result.total_points, 2);
    assert_eq!(tile.result.time_range.start, 100 + GEDI_EPOCH_OFFSET);
    assert_eq!(tile.result.time_range.end, 300 + GEDI_EPOCH_OFFSET);

    // extract-only keeps the work directory
    let work_dir = summary.work_dir.as_ref().unwrap();
    assert!(tile.result.vector_path.starts_with(work_dir));

    let dataset = Dataset::open(&tile.result.vector_path).unwrap();
    let mut layer = dataset.layer_by_name("data").unwrap();
    assert_eq!(layer.feature_count(), 2);
    let covers: Vec<i32> = layer
        .features()
        .map(|f| f.field_as_integer_by_name("cover").unwrap().unwrap())
        .collect();
    assert_eq!(covers, vec![834, -9999]);
}

#[test]
fn test_utm_run_skips_empty_zones() {
    if !gdal_available() {
        eprintln!("Skipping: GDAL Shapefile driver or EPSG database not available");
        return;
    }
    let dir = TempDir::new().unwrap();
    let source = write_granule(dir.path());
    let work_root = dir.path().join("work");

    let summary = TileDriver::new(extract_only_config(&source, &work_root))
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(summary.tiles, 120);
    assert_eq!(summary.empty, 117);
    assert!(summary.failed.is_empty());

    let mut extracted: Vec<(String, u64)> = summary
        .extracted
        .iter()
        .map(|t| {
            let suffix = t.asset_id.rsplit('_').next().unwrap_or_default().to_string();
            (suffix, t.result.total_points)
        })
        .collect();
    extracted.sort();
    assert_eq!(
        extracted,
        vec![
            ("UTM19S".to_string(), 1),
            ("UTM33N".to_string(), 2),
            ("UTM34N".to_string(), 1),
        ]
    );

    // empty zones leave no directory behind
    let work_dir = summary.work_dir.as_ref().unwrap();
    let dirs = std::fs::read_dir(work_dir).unwrap().count();
    assert_eq!(dirs, 3);
}

#[test]
fn test_missing_rasterizer_fails_bbox_run() {
    if !gdal_available() {
        eprintln!("Skipping: GDAL Shapefile driver or EPSG database not available");
        return;
    }
    let dir = TempDir::new().unwrap();
    let source = write_granule(dir.path());

    let mut config = IngestConfig::new(
        source.to_string_lossy(),
        CloudConfig::new("gs://bucket", "users/me"),
    );
    config.work_root = Some(dir.path().join("work"));
    config.tiling = TilingMode::BoundingBox(BoundingBox::new(10.0, 0.0, 15.0, 10.0).unwrap());
    config.rasterizer = "definitely-not-gdal-rasterize".to_string();
    config.cloud.gcloud = "true".to_string();
    config.cloud.gsutil = "true".to_string();

    let err = TileDriver::new(config).unwrap().run().unwrap_err();
    assert!(matches!(
        err,
        gedi_ingest::IngestError::ExternalTool { ref tool, .. } if tool == "definitely-not-gdal-rasterize"
    ));
}

fn publishing_config(source: &Path, work_root: &Path) -> IngestConfig {
    let mut config = IngestConfig::new(
        source.to_string_lossy(),
        CloudConfig::new("gs://bucket", "users/me"),
    );
    config.work_root = Some(work_root.to_path_buf());
    config.retry = RetryPolicy::once();
    config
}

#[test]
fn test_failing_utm_tiles_do_not_stop_the_run() {
    if !gdal_available() {
        eprintln!("Skipping: GDAL Shapefile driver or EPSG database not available");
        return;
    }
    let dir = TempDir::new().unwrap();
    let source = write_granule(dir.path());

    let mut config = publishing_config(&source, &dir.path().join("work"));
    config.rasterizer = "definitely-not-gdal-rasterize".to_string();
    config.cloud.gcloud = "true".to_string();
    config.cloud.gsutil = "true".to_string();
    config.cloud.earthengine = "true".to_string();

    let summary = TileDriver::new(config).unwrap().run().unwrap();
    assert_eq!(summary.tiles, 120);
    assert_eq!(summary.empty, 117);
    assert_eq!(summary.extracted.len(), 3);
    assert_eq!(summary.failed.len(), 3);
    assert!(summary.published.is_empty());
    assert!(!summary.is_success());
    for (asset_id, message) in &summary.failed {
        assert!(asset_id.starts_with(GRANULE_STEM), "{}", asset_id);
        assert!(message.contains("definitely-not-gdal-rasterize"), "{}", message);
    }
}

/// Writes an executable script that appends `<name> <args>` to `log`.
#[cfg(unix)]
fn recording_tool(bin: &Path, name: &str, log: &Path) -> String {
    use std::os::unix::fs::PermissionsExt;

    let path = bin.join(name);
    std::fs::write(
        &path,
        format!("#!/bin/sh\necho \"{} $*\" >> '{}'\n", name, log.display()),
    )
    .unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

#[cfg(unix)]
#[test]
fn test_extracted_tile_is_rasterized_uploaded_and_ingested() {
    if !gdal_available() {
        eprintln!("Skipping: GDAL Shapefile driver or EPSG database not available");
        return;
    }
    let dir = TempDir::new().unwrap();
    let source = write_granule(dir.path());
    let bin = dir.path().join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    let log = dir.path().join("calls.log");

    let mut config = publishing_config(&source, &dir.path().join("work"));
    config.tiling = TilingMode::BoundingBox(BoundingBox::new(10.0, 0.0, 15.0, 10.0).unwrap());
    config.keep_work_dir = true;
    config.rasterizer = recording_tool(&bin, "gdal_rasterize", &log);
    config.cloud.gcloud = recording_tool(&bin, "gcloud", &log);
    config.cloud.gsutil = recording_tool(&bin, "gsutil", &log);
    config.cloud.earthengine = recording_tool(&bin, "earthengine", &log);

    let summary = TileDriver::new(config).unwrap().run().unwrap();
    assert!(summary.is_success());
    assert_eq!(summary.published, vec![GRANULE_STEM.to_string()]);
    let result = &summary.extracted[0].result;

    // 呼び出し順: バケット作成, ラスタライズ x10, アップロード, 取り込み
    let calls: Vec<String> = std::fs::read_to_string(&log)
        .unwrap()
        .lines()
        .map(|l| l.split_whitespace().next().unwrap_or_default().to_string())
        .collect();
    let mut expected = vec!["gsutil".to_string()];
    expected.extend(std::iter::repeat("gdal_rasterize".to_string()).take(10));
    expected.push("gsutil".to_string());
    expected.push("earthengine".to_string());
    assert_eq!(calls, expected);

    let tile_dir = summary.work_dir.as_ref().unwrap().join(GRANULE_STEM);
    let manifest: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(tile_dir.join("manifest.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(manifest["name"], format!("users/me/{}", GRANULE_STEM));
    assert_eq!(manifest["start_time"]["seconds"], result.time_range.start);
    assert_eq!(manifest["end_time"]["seconds"], result.time_range.end);
    assert_eq!(manifest["properties"]["total_points"], result.total_points);
    assert_eq!(manifest["properties"]["total_points"], 2);
    assert_eq!(manifest["bands"].as_array().unwrap().len(), 10);
}
