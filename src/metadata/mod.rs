//! # 元数据存储协作者（metadata）
//!
//! ## 设计思路
//!
//! `ImageRecord` 的持久化归属外部的表存储，流水线只负责填充记录并在最后一步调用
//! `upsert`。该调用是整个摄取流程唯一的线性化点：记录一旦可见，其引用的所有预览
//! blob 都已写入完成。
//!
//! ## 实现思路
//!
//! - 以 `(partition_key, row_key)` 寻址，分别对应父文件夹 id 与图片 id。
//! - `get`/`delete` 返回 `Lookup`，缺失不是错误。
//! - `memory`：`BTreeMap` 实现，按键有序，便于测试断言。
//! - `sqlite`：`rusqlite` 实现，记录主体以 JSON 存储，Schema 版本由 `PRAGMA user_version` 管理。

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::storage::Lookup;

mod memory;
mod sqlite;

pub use memory::InMemoryMetadataStore;
pub use sqlite::SqliteMetadataStore;

/// 单个预览变体在记录中的引用：路径与实际尺寸。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewRef {
    pub path: String,
    pub width: u32,
    pub height: u32,
}

/// 图片元数据记录。
///
/// `previews` 以预览名（`small`/`medium`/`large`/`raw`/`original`）为键。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// 父文件夹 id。
    pub partition_key: String,
    /// 图片 id。
    pub row_key: String,
    #[serde(default)]
    pub description: String,
    /// `#RRGGBB` 形式的主色调。
    pub dominant_colour: String,
    /// `#RRGGBB` 形式的平均色，旧记录可能为空。
    #[serde(default)]
    pub average_colour: String,
    #[serde(default)]
    pub previews: BTreeMap<String, PreviewRef>,
    /// 最近一次写入的毫秒时间戳。
    #[serde(default)]
    pub timestamp: i64,
}

impl ImageRecord {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            description: String::new(),
            dominant_colour: String::new(),
            average_colour: String::new(),
            previews: BTreeMap::new(),
            timestamp: 0,
        }
    }

    pub fn preview(&self, name: &str) -> Option<&PreviewRef> {
        self.previews.get(name)
    }
}

/// 元数据存储错误。
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("数据库错误: {0}")]
    Database(String),

    #[error("记录序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("元数据状态锁已中毒")]
    Poisoned,
}

impl From<rusqlite::Error> for MetadataError {
    fn from(error: rusqlite::Error) -> Self {
        MetadataError::Database(error.to_string())
    }
}

/// 元数据存储接口。
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn upsert(
        &self,
        partition_key: &str,
        row_key: &str,
        record: &ImageRecord,
    ) -> Result<(), MetadataError>;

    async fn get(
        &self,
        partition_key: &str,
        row_key: &str,
    ) -> Result<Lookup<ImageRecord>, MetadataError>;

    async fn delete(&self, partition_key: &str, row_key: &str) -> Result<Lookup<()>, MetadataError>;

    /// 按分区查询；`None` 表示全表。结果按 `(partition_key, row_key)` 排序。
    async fn query(&self, partition_key: Option<&str>) -> Result<Vec<ImageRecord>, MetadataError>;
}
