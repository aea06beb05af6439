//! 统一错误类型模块
//!
//! # 设计思路
//!
//! 定义应用级 `AppError`，聚合各模块错误，命令行入口统一返回该类型。
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息。
//! - 为 `MediaError` / `StorageError` / `MetadataError` 提供 `From` 转换，无需手动 map。
//! - 实现 `Serialize` 将错误序列化为字符串，便于以 JSON 输出。

use serde::Serialize;

use crate::media::MediaError;
use crate::metadata::MetadataError;
use crate::storage::StorageError;

/// 应用级统一错误类型
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// 媒体流水线错误（上传 / 解码 / 派生 / 校正）
    #[error("{0}")]
    Media(#[from] MediaError),

    #[error("{0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Metadata(#[from] MetadataError),

    /// 文件系统 I/O 错误
    #[error("文件系统错误: {0}")]
    Io(#[from] std::io::Error),

    /// 命令行参数无法解析
    #[error("参数错误: {0}")]
    Usage(String),

    #[error("JSON 输出失败: {0}")]
    Json(#[from] serde_json::Error),
}

/// 将错误序列化为人类可读的字符串。
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
