//! # 错误模型模块
//!
//! ## 设计思路
//!
//! 使用单一错误枚举承载媒体流水线中的所有错误来源，调用侧可按分支决定致命/可重试：
//! - `InvalidArgument`：任何 I/O 之前拒绝，不产生部分状态
//! - `IncompleteUpload`：提交引用了未暂存的块，已暂存的块保留，上传可续传
//! - `DecodeFailure`：图片损坏或格式不支持，本次请求不写任何预览
//! - `DegenerateGeometry`：仅影响当前透视校正请求

use crate::metadata::MetadataError;
use crate::storage::StorageError;

/// 媒体流水线统一错误类型。
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("参数错误：{0}")]
    InvalidArgument(String),

    #[error("上传不完整，缺少块：{missing:?}")]
    IncompleteUpload { missing: Vec<String> },

    #[error("解码错误：{0}")]
    DecodeFailure(String),

    #[error("几何退化：{0}")]
    DegenerateGeometry(String),

    #[error("编码错误：{0}")]
    Encode(String),

    #[error("资源限制：{0}")]
    ResourceLimit(String),

    #[error("未找到：{0}")]
    NotFound(String),

    #[error("请求已取消：{0}")]
    Cancelled(String),

    #[error("后台任务失败：{0}")]
    Task(String),

    #[error(transparent)]
    Storage(StorageError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

impl From<StorageError> for MediaError {
    /// 缺块错误提升为 `IncompleteUpload`，其余存储错误原样包装。
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::MissingBlocks { missing } => MediaError::IncompleteUpload { missing },
            other => MediaError::Storage(other),
        }
    }
}

impl From<tokio::task::JoinError> for MediaError {
    fn from(error: tokio::task::JoinError) -> Self {
        MediaError::Task(error.to_string())
    }
}
