use anyhow::Result;
use clap::Parser;
use gedi_ingest::{
    BoundingBox, CloudConfig, IngestConfig, RetryPolicy, TileDriver, TilingMode,
};
use rayon::ThreadPoolBuilder;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// GEDI L2B HDF5ファイルのパス、またはhttp(s) URL
    #[arg(value_name = "SOURCE", env = "URL")]
    source: String,

    /// 作業ディレクトリの親ディレクトリ（デフォルト: システムの一時ディレクトリ）
    #[arg(long, value_name = "DIR", env = "TEMP_BASE")]
    work_root: Option<PathBuf>,

    /// アセットを作成するカタログのフォルダ
    #[arg(long, env = "ASSET_ROOT", default_value = "")]
    asset_root: String,

    /// グリッドのアップロード先バケット (gs://...)
    #[arg(long, env = "BUCKET", default_value = "")]
    bucket: String,

    /// 設定するクラウドプロジェクト
    #[arg(long, env = "GCLOUD_PROJECT")]
    project: Option<String>,

    /// サービスアカウントのキーファイル
    #[arg(long, value_name = "FILE", env = "CREDENTIALS")]
    credentials: Option<PathBuf>,

    /// 単一タイルの範囲 (WGS84)。省略時は120個のUTMゾーン
    #[arg(long, value_name = "MIN_LON,MIN_LAT,MAX_LON,MAX_LAT", env = "BBOX")]
    bbox: Option<BoundingBox>,

    /// グリッド解像度（度）
    #[arg(long, default_value_t = gedi_ingest::rasterize::GRID_RESOLUTION_DEG)]
    resolution: f64,

    /// 外部コマンド失敗時の再試行回数（初回の実行は含まない）
    #[arg(long, default_value_t = 2)]
    retries: u32,

    /// 外部コマンド1回あたりのタイムアウト（秒、0で無制限）
    #[arg(long, default_value_t = 3600)]
    timeout_secs: u64,

    /// 並列処理スレッド数（デフォルト: CPUコア数）
    #[arg(short, long)]
    threads: Option<usize>,

    /// ベクターファイルの書き出しまでで終了
    #[arg(long)]
    extract_only: bool,

    /// 作業ディレクトリを削除しない
    #[arg(long)]
    keep_work_dir: bool,
}

fn main() -> Result<()> {
    // ログの初期化
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // CLI引数の解析
    let args = Args::parse();

    // 処理開始時間を記録
    let start_time = std::time::Instant::now();

    // スレッドプールの設定
    if let Some(threads) = args.threads {
        ThreadPoolBuilder::new().num_threads(threads).build_global()?;
    }

    let config = build_config(args);
    let driver = TileDriver::new(config)?;
    let summary = driver.run()?;

    for tile in &summary.extracted {
        info!(
            "{}: {} points, {} - {}",
            tile.asset_id,
            tile.result.total_points,
            tile.result.time_range.start,
            tile.result.time_range.end
        );
    }
    if let Some(dir) = &summary.work_dir {
        info!("Work directory kept at {:?}", dir);
    }

    // 処理時間を表示
    let elapsed = start_time.elapsed();
    info!("Total processing time: {:?}", elapsed);

    if !summary.is_success() {
        for (asset_id, message) in &summary.failed {
            error!("{}: {}", asset_id, message);
        }
        anyhow::bail!("{} of {} tiles failed", summary.failed.len(), summary.tiles);
    }
    Ok(())
}

fn build_config(args: Args) -> IngestConfig {
    let mut cloud = CloudConfig::new(args.bucket, args.asset_root);
    cloud.project = args.project;
    cloud.credentials = args.credentials;

    let mut config = IngestConfig::new(args.source, cloud);
    config.work_root = args.work_root;
    if let Some(bbox) = args.bbox {
        config.tiling = TilingMode::BoundingBox(bbox);
    }
    config.resolution_deg = args.resolution;
    config.retry = RetryPolicy {
        attempts: args.retries.saturating_add(1),
        timeout: (args.timeout_secs > 0).then(|| Duration::from_secs(args.timeout_secs)),
        ..RetryPolicy::default()
    };
    config.extract_only = args.extract_only;
    config.keep_work_dir = args.keep_work_dir;
    config
}
