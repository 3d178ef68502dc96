//! Hand-off to cloud storage and the asset catalog: provisioning, grid
//! upload, ingestion manifest and the (unawaited) ingestion request.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{IngestError, Result};
use crate::external::{RetryPolicy, ToolCommand};
use crate::model::ExtractionResult;
use crate::rasterize::GridFile;

pub const MANIFEST_FILE_NAME: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq)]
pub struct CloudConfig {
    /// Bucket URL, e.g. `gs://gedi-transfer`.
    pub bucket: String,
    /// Catalog folder the assets are created in.
    pub asset_root: String,
    pub project: Option<String>,
    /// Service-account key file.
    pub credentials: Option<PathBuf>,
    pub gcloud: String,
    pub gsutil: String,
    pub earthengine: String,
}

impl CloudConfig {
    pub fn new(bucket: impl Into<String>, asset_root: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            asset_root: asset_root.into(),
            project: None,
            credentials: None,
            gcloud: "gcloud".to_string(),
            gsutil: "gsutil".to_string(),
            earthengine: "earthengine".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Manifest {
    pub name: String,
    pub tilesets: Vec<Tileset>,
    pub bands: Vec<Band>,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub properties: ManifestProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tileset {
    pub id: String,
    pub sources: Vec<Source>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub uris: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Band {
    pub id: String,
    pub tileset_id: String,
    pub missing_data: MissingData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingData {
    pub values: Vec<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Timestamp {
    pub seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestProperties {
    pub source_file: String,
    pub total_points: u64,
}

/// Everything needed to publish one extracted tile.
#[derive(Debug, Clone, Copy)]
pub struct AssetRequest<'a> {
    pub asset_id: &'a str,
    pub source_file: &'a str,
    pub grids: &'a [GridFile],
    pub result: &'a ExtractionResult,
    /// Where the manifest is written.
    pub work_dir: &'a Path,
}

pub struct Publisher {
    config: CloudConfig,
    policy: RetryPolicy,
}

impl Publisher {
    pub fn new(config: CloudConfig, policy: RetryPolicy) -> Self {
        Self { config, policy }
    }

    pub fn config(&self) -> &CloudConfig {
        &self.config
    }

    /// Activates credentials and creates the bucket. Failures are only logged:
    /// the account is usually active and the bucket usually exists.
    pub fn provision(&self) {
        let mut steps = Vec::new();
        if let Some(project) = &self.config.project {
            steps.push(
                ToolCommand::new(self.config.gcloud.as_str())
                    .args(["config", "set", "project"])
                    .arg(project),
            );
        }
        if let Some(key) = &self.config.credentials {
            steps.push(
                ToolCommand::new(self.config.gcloud.as_str())
                    .args(["auth", "activate-service-account"])
                    .arg(format!("--key-file={}", key.display())),
            );
        }
        steps.push(
            ToolCommand::new(self.config.gsutil.as_str())
                .arg("mb")
                .arg(&self.config.bucket),
        );

        for step in steps {
            if let Err(e) = step.run_once(self.policy.timeout) {
                warn!("Provisioning step `{}` failed: {}", step, e);
            }
        }
    }

    /// `gs://bucket/<asset_id>/`
    pub fn storage_prefix(&self, asset_id: &str) -> String {
        format!("{}/{}/", self.config.bucket.trim_end_matches('/'), asset_id)
    }

    pub fn upload_command(&self, grids: &[GridFile], asset_id: &str) -> ToolCommand {
        ToolCommand::new(self.config.gsutil.as_str())
            .args([
                "-m",
                "-o",
                "GSUtil:parallel_composite_upload_threshold=150M",
                "cp",
            ])
            .args(grids.iter().map(|g| g.path.as_os_str()))
            .arg(self.storage_prefix(asset_id))
    }

    pub fn manifest(&self, request: &AssetRequest<'_>) -> Manifest {
        let prefix = self.storage_prefix(request.asset_id);
        let mut tilesets = Vec::with_capacity(request.grids.len());
        let mut bands = Vec::with_capacity(request.grids.len());
        for grid in request.grids {
            let id = grid.field.name().to_string();
            let file_name = grid
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("{}.tif", id));
            tilesets.push(Tileset {
                id: id.clone(),
                sources: vec![Source {
                    uris: vec![format!("{}{}", prefix, file_name)],
                }],
            });
            bands.push(Band {
                id: id.clone(),
                tileset_id: id,
                missing_data: MissingData {
                    values: vec![grid.grid_type.nodata()],
                },
            });
        }

        Manifest {
            name: format!(
                "{}/{}",
                self.config.asset_root.trim_end_matches('/'),
                request.asset_id
            ),
            tilesets,
            bands,
            start_time: Timestamp {
                seconds: request.result.time_range.start,
            },
            end_time: Timestamp {
                seconds: request.result.time_range.end,
            },
            properties: ManifestProperties {
                source_file: request.source_file.to_string(),
                total_points: request.result.total_points,
            },
        }
    }

    pub fn write_manifest(&self, request: &AssetRequest<'_>) -> Result<PathBuf> {
        let path = request.work_dir.join(MANIFEST_FILE_NAME);
        let json = serde_json::to_string_pretty(&self.manifest(request))?;
        fs::write(&path, json).map_err(|e| IngestError::path(&path, e))?;
        Ok(path)
    }

    pub fn ingest_command(&self, manifest: &Path) -> ToolCommand {
        let mut cmd = ToolCommand::new(self.config.earthengine.as_str());
        if let Some(key) = &self.config.credentials {
            cmd = cmd.arg("--service_account_file").arg(key);
        }
        cmd.args(["upload", "image", "-f", "--manifest"])
            .arg(manifest)
    }

    /// Uploads the grids and starts ingestion without waiting for it to finish.
    pub fn publish(&self, request: &AssetRequest<'_>) -> Result<()> {
        info!(
            "Uploading {} grids to {}",
            request.grids.len(),
            self.storage_prefix(request.asset_id)
        );
        self.upload_command(request.grids, request.asset_id)
            .run(&self.policy)?;

        let manifest = self.write_manifest(request)?;
        info!("Starting ingestion of {}", request.asset_id);
        self.ingest_command(&manifest).run(&self.policy)
    }
}
