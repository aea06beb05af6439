//! # 媒体处理模块（media）
//!
//! ## 设计思路
//!
//! 该模块把“分块上传 → 解码 → 主色调 / 预览阶梯 → 写 blob → 写记录”以及透视校正
//! 按职责拆分为多个子模块，避免单文件膨胀与耦合。
//!
//! - `service`：对外入口，承载取消标志表（`MediaService`）
//! - `handler`：编排整条摄取流水线（`MediaIngestionOrchestrator`）
//! - `chunked`：分块暂存与按序提交
//! - `decode`：签名校验、资源上限、解码与 EXIF 方向
//! - `color`：色相直方图与主色调
//! - `preview`：预览尺寸计算、缩放与重编码
//! - `projection`：单应矩阵与透视校正
//! - `config/error/source`：配置、错误、中间数据模型
//!
//! ## 新同事快速上手
//!
//! ```text
//! 调用方（CLI / 上层 CRUD）
//!    ↓
//! service.rs（request_id 登记、取消）
//!    ↓
//! handler.rs（统一编排 + 阶段耗时日志）
//!    ├─ chunked.rs（暂存块 → 按序提交）
//!    ├─ decode.rs（字节 → DecodedBitmap）
//!    ├─ color.rs + preview.rs（spawn_blocking 并行派生）
//!    └─ projection.rs（四边形 → 矩形）
//!    ↓
//! ObjectStore.put × N → MetadataStore.upsert（唯一线性化点）
//! ```
//!
//! ## 分层职责建议
//!
//! - 流程顺序变更优先改 `handler.rs`
//! - 可调参数变更优先改 `config.rs`
//! - 单阶段算法分别改 `color/preview/projection`

pub mod chunked;
pub mod color;
mod config;
pub mod decode;
mod error;
mod handler;
pub mod preview;
pub mod projection;
mod service;
mod source;

pub use chunked::ChunkedUploadAssembler;
pub use color::{HueHistogram, average_color, calculate_dominant_color};
pub use config::{MediaConfig, ResizeFilter};
pub use decode::decode_image;
pub use error::MediaError;
pub use handler::MediaIngestionOrchestrator;
pub use preview::generate_preview;
pub use projection::project;
pub use service::MediaService;
pub use source::{
    DecodedBitmap, FileChunk, FileChunkList, IngestRequest, Point, PreviewEncoding, PreviewResult,
    PreviewSpec, ProjectedImage, ProjectionOutput, Quadrilateral, RgbColor,
};
