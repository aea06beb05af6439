//! 本地目录对象存储
//!
//! # 设计思路
//!
//! 以目录树模拟 blob 容器，支持 CLI 在本机跑通完整的“分块上传 → 提交 → 生成预览”链路。
//!
//! # 实现思路
//!
//! - 对象路径：`<root>/<container>/<name>`
//! - 暂存块路径：`<root>/.blocks/<container>/<name>/<token>`，token 使用 URL-safe Base64
//!   编码后作为文件名，避免任意字符破坏路径。
//! - 所有写入均为“临时文件 + rename”，并发暂存不同 token 时互不覆盖，
//!   读方也不会看到写了一半的对象。
//! - 目录不存在时自动 `create_dir_all`，避免上层判断。

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::{Bytes, BytesMut};
use tokio::fs;

use super::{CommittedObject, Lookup, ObjectStore, StorageError, validate_object_name};

const BLOCKS_DIR: &str = ".blocks";

pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// 以 `root` 为根目录创建存储，目录不存在时自动创建。
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        log::info!("📦 对象存储目录: {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, container: &str, name: &str) -> Result<PathBuf, StorageError> {
        validate_object_name(container)?;
        validate_object_name(name)?;
        Ok(self.root.join(container).join(name))
    }

    fn blocks_dir(&self, container: &str, name: &str) -> Result<PathBuf, StorageError> {
        validate_object_name(container)?;
        validate_object_name(name)?;
        Ok(self.root.join(BLOCKS_DIR).join(container).join(name))
    }

    fn block_file_name(block_id: &str) -> String {
        general_purpose::URL_SAFE_NO_PAD.encode(block_id.as_bytes())
    }
}

/// 先写临时文件再 rename，保证目标路径要么是旧内容要么是完整新内容。
async fn write_atomically(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| StorageError::InvalidName(path.display().to_string()))?;
    let tmp = path.with_file_name(format!(".{}.tmp-{}", file_name, uuid::Uuid::new_v4()));

    fs::write(&tmp, data).await?;
    if let Err(err) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(err.into());
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, container: &str, name: &str, data: Bytes) -> Result<(), StorageError> {
        let path = self.object_path(container, name)?;
        write_atomically(&path, &data).await
    }

    async fn get(&self, container: &str, name: &str) -> Result<Lookup<Bytes>, StorageError> {
        let path = self.object_path(container, name)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Lookup::Found(Bytes::from(data))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Lookup::NotFound),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, container: &str, name: &str) -> Result<Lookup<()>, StorageError> {
        let path = self.object_path(container, name)?;
        let removed = match fs::remove_file(&path).await {
            Ok(()) => true,
            Err(err) if err.kind() == ErrorKind::NotFound => false,
            Err(err) => return Err(err.into()),
        };

        let blocks = self.blocks_dir(container, name)?;
        let removed_blocks = match fs::remove_dir_all(&blocks).await {
            Ok(()) => true,
            Err(err) if err.kind() == ErrorKind::NotFound => false,
            Err(err) => return Err(err.into()),
        };

        Ok(if removed || removed_blocks {
            Lookup::Found(())
        } else {
            Lookup::NotFound
        })
    }

    async fn stage_block(
        &self,
        container: &str,
        name: &str,
        block_id: &str,
        data: Bytes,
    ) -> Result<(), StorageError> {
        let path = self
            .blocks_dir(container, name)?
            .join(Self::block_file_name(block_id));
        write_atomically(&path, &data).await
    }

    async fn commit_blocks(
        &self,
        container: &str,
        name: &str,
        block_ids: &[String],
    ) -> Result<CommittedObject, StorageError> {
        let blocks_dir = self.blocks_dir(container, name)?;

        let mut missing = Vec::new();
        for id in block_ids {
            let block_path = blocks_dir.join(Self::block_file_name(id));
            if !fs::try_exists(&block_path).await? {
                missing.push(id.clone());
            }
        }
        if !missing.is_empty() {
            return Err(StorageError::MissingBlocks { missing });
        }

        let mut assembled = BytesMut::new();
        for id in block_ids {
            let block = fs::read(blocks_dir.join(Self::block_file_name(id))).await?;
            assembled.extend_from_slice(&block);
        }

        let path = self.object_path(container, name)?;
        write_atomically(&path, &assembled).await?;

        Ok(CommittedObject {
            container: container.to_string(),
            name: name.to_string(),
            size: assembled.len() as u64,
        })
    }
}
