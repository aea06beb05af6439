//! # 图库媒体流水线 — 命令行入口
//!
//! 本文件仅负责参数解析、协作者装配与结果输出。
//! 业务逻辑分布在各子模块中，详见 `lib.rs` 架构文档。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use gallery_media::error::AppError;
use gallery_media::media::{FileChunk, FileChunkList, MediaConfig, MediaService, Point, Quadrilateral};
use gallery_media::metadata::SqliteMetadataStore;
use gallery_media::storage::FsObjectStore;
use uuid::Uuid;

const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(name = "gallery-media", version, about = "图库媒体摄取与变换工具")]
struct Cli {
    /// JSON 配置文件路径，缺省使用内置默认值
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 分块上传并摄取一张图片，输出记录 JSON
    Ingest {
        #[arg(long)]
        file: PathBuf,
        /// 父文件夹 id（partition key）
        #[arg(long)]
        folder: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
    },
    /// 透视校正：四个角点依次为 左上 右上 右下 左下，格式 `x,y`
    Project {
        #[arg(long)]
        file: PathBuf,
        #[arg(long, num_args = 4, required = true, value_parser = parse_point)]
        points: Vec<Point>,
        #[arg(long)]
        out: PathBuf,
    },
    /// 列出已保存的图片记录
    List {
        #[arg(long)]
        folder: Option<String>,
    },
}

fn parse_point(value: &str) -> Result<Point, String> {
    let (x, y) = value
        .split_once(',')
        .ok_or_else(|| format!("角点格式应为 x,y：{value}"))?;
    let x: f64 = x.trim().parse().map_err(|e| format!("无效的 x 坐标 '{x}': {e}"))?;
    let y: f64 = y.trim().parse().map_err(|e| format!("无效的 y 坐标 '{y}': {e}"))?;
    Ok(Point::new(x, y))
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        log::error!("❌ {err}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let config = match &cli.config {
        Some(path) => MediaConfig::load_from_path(path)?,
        None => MediaConfig::default(),
    };
    let service = build_service(config)?;

    match cli.command {
        Command::Ingest {
            file,
            folder,
            description,
            chunk_size,
        } => ingest(&service, &file, folder, description, chunk_size).await,
        Command::Project { file, points, out } => project(&service, &file, &points, &out).await,
        Command::List { folder } => {
            let records = service.list(folder.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
            Ok(())
        }
    }
}

fn build_service(config: MediaConfig) -> Result<MediaService, AppError> {
    let objects = Arc::new(FsObjectStore::new(config.storage_root.clone())?);
    let metadata = Arc::new(SqliteMetadataStore::open(&config.database_path)?);
    Ok(MediaService::new(config, objects, metadata)?)
}

/// 块 id 使用定长序号的 base64，保证同一上传内各块 id 等长且互不相同。
fn block_id(index: usize) -> String {
    general_purpose::STANDARD.encode(format!("block-{index:06}"))
}

async fn ingest(
    service: &MediaService,
    file: &Path,
    folder: String,
    description: String,
    chunk_size: usize,
) -> Result<(), AppError> {
    if chunk_size == 0 {
        return Err(AppError::Usage("chunk-size 必须大于 0".to_string()));
    }

    let data = Bytes::from(tokio::fs::read(file).await?);
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| AppError::Usage(format!("无法从路径取得文件名：{}", file.display())))?;
    let file_id = Uuid::new_v4();

    let ranges: Vec<(usize, usize)> = (0..data.len())
        .step_by(chunk_size)
        .map(|start| (start, (start + chunk_size).min(data.len())))
        .collect();
    let block_ids: Vec<String> = (0..ranges.len()).map(block_id).collect();

    // 倒序暂存，提交时按原始顺序拼接
    for (index, (start, end)) in ranges.iter().enumerate().rev() {
        let chunk = FileChunk {
            file_id,
            block_id: block_ids[index].clone(),
            name: name.clone(),
            parent_id: folder.clone(),
            data: data.slice(*start..*end),
        };
        service.upload_chunk(file_id, chunk).await?;
    }
    log::info!("📤 已暂存 {} 个块：{}", block_ids.len(), name);

    let list = FileChunkList {
        file_id,
        name,
        parent_id: folder,
        description,
        block_ids,
    };
    let record = service.finalize_upload(&file_id.to_string(), list).await?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

async fn project(
    service: &MediaService,
    file: &Path,
    points: &[Point],
    out: &Path,
) -> Result<(), AppError> {
    let [top_left, top_right, bottom_right, bottom_left] = points else {
        return Err(AppError::Usage("需要恰好四个角点".to_string()));
    };
    let quad = Quadrilateral::new(*top_left, *top_right, *bottom_right, *bottom_left);

    let data = Bytes::from(tokio::fs::read(file).await?);
    let output = service.project(data, quad).await?;
    tokio::fs::write(out, &output.bytes).await?;

    println!(
        "{}",
        serde_json::json!({
            "out": out.display().to_string(),
            "width": output.width,
            "height": output.height,
            "bytes": output.bytes.len(),
        })
    );
    Ok(())
}
