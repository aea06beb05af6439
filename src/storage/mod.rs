//! # 对象存储协作者（storage）
//!
//! ## 设计思路
//!
//! 流水线只通过 `ObjectStore` 这一窄接口访问 blob 存储，不持有任何全局单例。
//! 每个操作显式接收存储句柄（`Arc<dyn ObjectStore>`），便于测试注入与多实例并存。
//!
//! ## 实现思路
//!
//! - 对象以 `(container, name)` 寻址，内容统一使用 `Bytes`。
//! - “实体不存在”不是错误，而是 `Lookup::NotFound`，由调用方决定是否致命。
//! - 分块上传遵循“暂存块 → 按序提交”模型：
//!   - `stage_block` 对同一 token 幂等（覆盖而不是追加）
//!   - `commit_blocks` 严格按调用方给出的顺序拼接，引用未暂存的块时返回 `MissingBlocks`
//!   - 提交后暂存块仍保留，直到 `delete` 删除对象时一并清理
//!
//! - `memory`：进程内实现，供测试与 CLI 演示使用
//! - `fs`：本地目录实现，写入采用“临时文件 + rename”

use async_trait::async_trait;
use bytes::Bytes;

mod fs;
mod memory;

pub use fs::FsObjectStore;
pub use memory::InMemoryObjectStore;

/// 协作者边界上的查找结果。
///
/// 取代“实体不存在即抛错”的模式，让调用方显式区分致命与可恢复的缺失。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    /// 转换为 `Option`，便于 `?`/`ok_or_else` 链式处理。
    pub fn into_option(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound => None,
        }
    }
}

/// 对象存储错误。
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("存储 I/O 错误：{0}")]
    Io(#[from] std::io::Error),

    #[error("提交引用了未暂存的块：{missing:?}")]
    MissingBlocks { missing: Vec<String> },

    #[error("非法对象名：{0}")]
    InvalidName(String),

    #[error("存储状态锁已中毒")]
    Poisoned,
}

/// 分块提交成功后的对象句柄，供下游读取与解码。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedObject {
    pub container: String,
    pub name: String,
    pub size: u64,
}

/// 对象存储接口。
///
/// 实现方需保证：对同一对象、不同 token 的并发 `stage_block` 互不破坏。
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// 写入（或覆盖）完整对象。
    async fn put(&self, container: &str, name: &str, data: Bytes) -> Result<(), StorageError>;

    /// 读取完整对象。
    async fn get(&self, container: &str, name: &str) -> Result<Lookup<Bytes>, StorageError>;

    /// 删除对象及其所有暂存块。
    async fn delete(&self, container: &str, name: &str) -> Result<Lookup<()>, StorageError>;

    /// 暂存一个命名块；同一 `block_id` 重复暂存会覆盖内容。
    async fn stage_block(
        &self,
        container: &str,
        name: &str,
        block_id: &str,
        data: Bytes,
    ) -> Result<(), StorageError>;

    /// 按 `block_ids` 的顺序拼接暂存块，生成最终对象。
    async fn commit_blocks(
        &self,
        container: &str,
        name: &str,
        block_ids: &[String],
    ) -> Result<CommittedObject, StorageError>;
}

/// 校验对象名：禁止空名、绝对路径与 `..` 片段，避免逃出存储根目录。
pub(crate) fn validate_object_name(name: &str) -> Result<(), StorageError> {
    if name.trim().is_empty() {
        return Err(StorageError::InvalidName("对象名为空".to_string()));
    }
    if name.starts_with('/') || name.starts_with('\\') {
        return Err(StorageError::InvalidName(format!("对象名不能是绝对路径：{}", name)));
    }
    if name.split(['/', '\\']).any(|segment| segment == ".." || segment.is_empty()) {
        return Err(StorageError::InvalidName(format!("对象名包含非法片段：{}", name)));
    }
    Ok(())
}
